use crate::ipc::helpers::{
    get_bool, get_optional_i64, get_optional_str, get_required_str, get_term_key, to_json,
    with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, ClassTermInfoPatch, NewStudent};
use rusqlite::Connection;
use serde_json::{json, Value};

fn classes_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let classes = roster::list_classes(conn)?;
    Ok(json!({ "classes": to_json(&classes)? }))
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class_id = roster::create_class(conn, &name)?;
    Ok(json!({ "classId": class_id }))
}

fn classes_assign_subject(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let added = roster::assign_subject(conn, &class_id, &subject_id)?;
    Ok(json!({ "ok": true, "added": added }))
}

fn classes_subjects(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let subjects = roster::list_class_subjects(conn, &class_id)?;
    Ok(json!({ "subjects": to_json(&subjects)? }))
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let students = roster::list_students(conn, &class_id)?;
    Ok(json!({ "students": to_json(&students)? }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let admission_number = get_optional_str(params, "admissionNumber")?;
    let active = get_bool(params, "active", true)?;
    let student_id = roster::create_student(
        conn,
        &NewStudent {
            class_id: &class_id,
            last_name: &last_name,
            first_name: &first_name,
            admission_number: admission_number.as_deref(),
            active,
        },
    )?;
    Ok(json!({ "studentId": student_id }))
}

fn subjects_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let subjects = roster::list_subjects(conn)?;
    Ok(json!({ "subjects": to_json(&subjects)? }))
}

fn subjects_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let code = get_optional_str(params, "code")?;
    let subject_id = roster::create_subject(conn, &name, code.as_deref())?;
    Ok(json!({ "subjectId": subject_id }))
}

fn sessions_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let sessions = roster::list_sessions(conn)?;
    Ok(json!({ "sessions": to_json(&sessions)? }))
}

fn sessions_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let is_current = get_bool(params, "isCurrent", false)?;
    let session_id = roster::create_session(conn, &name, is_current)?;
    Ok(json!({ "sessionId": session_id }))
}

fn class_term_info_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = get_term_key(params)?;
    to_json(&roster::class_term_info(conn, &key)?)
}

fn class_term_info_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = get_term_key(params)?;
    let patch_json = params.get("patch").unwrap_or(&Value::Null);
    if !patch_json.is_object() {
        return Err(HandlerErr::bad_params("patch", "missing patch object"));
    }
    // An explicit null clears the date; an absent key leaves it alone.
    let next_term_begins = match patch_json.get("nextTermBegins") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(_) => Some(get_optional_str(patch_json, "nextTermBegins")?),
    };
    let patch = ClassTermInfoPatch {
        times_school_opened: get_optional_i64(patch_json, "timesSchoolOpened")?,
        next_term_begins,
    };
    to_json(&roster::update_class_term_info(conn, &key, &patch)?)
}

fn attendance_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let key = get_term_key(params)?;
    to_json(&roster::student_attendance(conn, &student_id, &key)?)
}

fn attendance_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let key = get_term_key(params)?;
    let times_present = get_optional_i64(params, "timesPresent")?
        .ok_or_else(|| HandlerErr::bad_params("timesPresent", "missing timesPresent"))?;
    to_json(&roster::update_attendance(conn, &student_id, &key, times_present)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "classes.list" => classes_list,
        "classes.create" => classes_create,
        "classes.assignSubject" => classes_assign_subject,
        "classes.subjects" => classes_subjects,
        "students.list" => students_list,
        "students.create" => students_create,
        "subjects.list" => subjects_list,
        "subjects.create" => subjects_create,
        "sessions.list" => sessions_list,
        "sessions.create" => sessions_create,
        "classTermInfo.get" => class_term_info_get,
        "classTermInfo.update" => class_term_info_update,
        "attendance.get" => attendance_get,
        "attendance.update" => attendance_update,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
