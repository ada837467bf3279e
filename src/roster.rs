use crate::calc::attendance_percentage;
use crate::error::EngineError;
use crate::results::TermKey;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub student_count: i64,
    pub subject_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub class_id: String,
    pub last_name: String,
    pub first_name: String,
    pub display_name: String,
    pub admission_number: Option<String>,
    pub active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct NewStudent<'a> {
    pub class_id: &'a str,
    pub last_name: &'a str,
    pub first_name: &'a str,
    pub admission_number: Option<&'a str>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub id: String,
    pub name: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub id: String,
    pub name: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassTermInfo {
    pub class_id: String,
    pub session_id: String,
    pub term: crate::calc::Term,
    pub times_school_opened: i64,
    pub next_term_begins: Option<String>,
    /// Students holding a term summary for the key.
    pub class_population: i64,
}

pub fn display_name(last: &str, first: &str) -> String {
    format!("{}, {}", last, first)
}

pub(crate) fn require_exists(
    conn: &Connection,
    table: &str,
    id: &str,
    what: &'static str,
) -> Result<(), EngineError> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found = conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some();
    if found {
        Ok(())
    } else {
        Err(EngineError::NotFound(what))
    }
}

fn required_name(field: &str, value: &str) -> Result<String, EngineError> {
    let t = value.trim();
    if t.is_empty() {
        return Err(EngineError::validation(field, "must not be empty"));
    }
    Ok(t.to_string())
}

fn map_unique(e: rusqlite::Error, field: &str) -> EngineError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
            EngineError::validation(field, "already exists")
        }
        _ => EngineError::Db(e),
    }
}

pub fn list_classes(conn: &Connection) -> Result<Vec<ClassRow>, EngineError> {
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM class_subjects cs WHERE cs.class_id = c.id) AS subject_count
         FROM classes c
         ORDER BY c.name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
                student_count: r.get(2)?,
                subject_count: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_class(conn: &Connection, name: &str) -> Result<String, EngineError> {
    let name = required_name("name", name)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&id, &name),
    )
    .map_err(|e| map_unique(e, "name"))?;
    Ok(id)
}

pub fn list_students(conn: &Connection, class_id: &str) -> Result<Vec<StudentRow>, EngineError> {
    require_exists(conn, "classes", class_id, "class")?;
    let mut stmt = conn.prepare(
        "SELECT id, class_id, last_name, first_name, admission_number, active, sort_order
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(StudentRow {
                id: r.get(0)?,
                class_id: r.get(1)?,
                display_name: display_name(&last, &first),
                last_name: last,
                first_name: first,
                admission_number: r.get(4)?,
                active: r.get::<_, i64>(5)? != 0,
                sort_order: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_student(conn: &Connection, student: &NewStudent<'_>) -> Result<String, EngineError> {
    require_exists(conn, "classes", student.class_id, "class")?;
    let last = required_name("lastName", student.last_name)?;
    let first = required_name("firstName", student.first_name)?;
    let admission = student
        .admission_number
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let next_sort: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
        [student.class_id],
        |r| r.get(0),
    )?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, admission_number, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            student.class_id,
            &last,
            &first,
            admission,
            student.active as i64,
            next_sort,
            crate::db::now_stamp(),
        ),
    )
    .map_err(|e| map_unique(e, "admissionNumber"))?;
    Ok(id)
}

pub fn list_subjects(conn: &Connection) -> Result<Vec<SubjectRow>, EngineError> {
    let mut stmt = conn.prepare("SELECT id, name, code FROM subjects ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_subject(
    conn: &Connection,
    name: &str,
    code: Option<&str>,
) -> Result<String, EngineError> {
    let name = required_name("name", name)?;
    let code = code.map(str::trim).filter(|s| !s.is_empty());
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&id, &name, code),
    )
    .map_err(|e| map_unique(e, "name"))?;
    Ok(id)
}

/// Returns false when the subject was already assigned.
pub fn assign_subject(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
) -> Result<bool, EngineError> {
    require_exists(conn, "classes", class_id, "class")?;
    require_exists(conn, "subjects", subject_id, "subject")?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO class_subjects(class_id, subject_id) VALUES(?, ?)",
        (class_id, subject_id),
    )?;
    Ok(inserted > 0)
}

pub fn list_class_subjects(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<SubjectRow>, EngineError> {
    require_exists(conn, "classes", class_id, "class")?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.code
         FROM class_subjects cs
         JOIN subjects s ON s.id = cs.subject_id
         WHERE cs.class_id = ?
         ORDER BY s.name",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_sessions(conn: &Connection) -> Result<Vec<SessionRow>, EngineError> {
    let mut stmt =
        conn.prepare("SELECT id, name, is_current FROM academic_sessions ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                name: r.get(1)?,
                is_current: r.get::<_, i64>(2)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// At most one session is current; marking a new one clears the others.
pub fn create_session(
    conn: &Connection,
    name: &str,
    is_current: bool,
) -> Result<String, EngineError> {
    let name = required_name("name", name)?;
    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    if is_current {
        tx.execute("UPDATE academic_sessions SET is_current = 0", [])?;
    }
    tx.execute(
        "INSERT INTO academic_sessions(id, name, is_current) VALUES(?, ?, ?)",
        (&id, &name, is_current as i64),
    )
    .map_err(|e| map_unique(e, "name"))?;
    tx.commit()?;
    Ok(id)
}

pub fn class_term_info(conn: &Connection, key: &TermKey) -> Result<ClassTermInfo, EngineError> {
    require_exists(conn, "classes", &key.class_id, "class")?;
    require_exists(conn, "academic_sessions", &key.session_id, "session")?;
    let stored: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT times_school_opened, next_term_begins
             FROM class_term_info
             WHERE class_id = ? AND session_id = ? AND term = ?",
            (&key.class_id, &key.session_id, key.term.as_str()),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let class_population: i64 = conn.query_row(
        "SELECT COUNT(*) FROM term_summaries WHERE class_id = ? AND session_id = ? AND term = ?",
        (&key.class_id, &key.session_id, key.term.as_str()),
        |r| r.get(0),
    )?;
    let (times_school_opened, next_term_begins) = stored.unwrap_or((0, None));
    Ok(ClassTermInfo {
        class_id: key.class_id.clone(),
        session_id: key.session_id.clone(),
        term: key.term,
        times_school_opened,
        next_term_begins,
        class_population,
    })
}

#[derive(Debug, Clone, Default)]
pub struct ClassTermInfoPatch {
    pub times_school_opened: Option<i64>,
    /// `Some(None)` clears the stored date.
    pub next_term_begins: Option<Option<String>>,
}

pub fn update_class_term_info(
    conn: &Connection,
    key: &TermKey,
    patch: &ClassTermInfoPatch,
) -> Result<ClassTermInfo, EngineError> {
    if let Some(n) = patch.times_school_opened {
        if n < 0 {
            return Err(EngineError::validation(
                "timesSchoolOpened",
                "must not be negative",
            ));
        }
    }
    if let Some(Some(date)) = &patch.next_term_begins {
        if chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            return Err(EngineError::validation(
                "nextTermBegins",
                "must be a YYYY-MM-DD date",
            ));
        }
    }

    let current = class_term_info(conn, key)?;
    let times = patch
        .times_school_opened
        .unwrap_or(current.times_school_opened);
    let next = match &patch.next_term_begins {
        Some(v) => v.clone(),
        None => current.next_term_begins,
    };
    conn.execute(
        "INSERT INTO class_term_info(class_id, session_id, term, times_school_opened, next_term_begins)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(class_id, session_id, term) DO UPDATE SET
           times_school_opened = excluded.times_school_opened,
           next_term_begins = excluded.next_term_begins",
        (&key.class_id, &key.session_id, key.term.as_str(), times, &next),
    )?;
    class_term_info(conn, key)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendance {
    pub student_id: String,
    pub term: crate::calc::Term,
    pub times_present: i64,
    pub times_school_opened: i64,
    pub attendance_percentage: f64,
}

fn require_student_in_class(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
) -> Result<(), EngineError> {
    let in_class = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
            (student_id, class_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if in_class {
        Ok(())
    } else {
        Err(EngineError::NotFound("student"))
    }
}

/// Days present are per student; days opened come from the class term info.
pub fn student_attendance(
    conn: &Connection,
    student_id: &str,
    key: &TermKey,
) -> Result<StudentAttendance, EngineError> {
    let info = class_term_info(conn, key)?;
    require_student_in_class(conn, student_id, &key.class_id)?;
    attendance_against(conn, student_id, &info)
}

/// Builds the attendance line from already-loaded class term info.
pub(crate) fn attendance_against(
    conn: &Connection,
    student_id: &str,
    info: &ClassTermInfo,
) -> Result<StudentAttendance, EngineError> {
    let times_present: i64 = conn
        .query_row(
            "SELECT times_present FROM student_attendance
             WHERE student_id = ? AND class_id = ? AND session_id = ? AND term = ?",
            (student_id, &info.class_id, &info.session_id, info.term.as_str()),
            |r| r.get(0),
        )
        .optional()?
        .unwrap_or(0);
    Ok(StudentAttendance {
        student_id: student_id.to_string(),
        term: info.term,
        times_present,
        times_school_opened: info.times_school_opened,
        attendance_percentage: attendance_percentage(times_present, info.times_school_opened),
    })
}

pub fn update_attendance(
    conn: &Connection,
    student_id: &str,
    key: &TermKey,
    times_present: i64,
) -> Result<StudentAttendance, EngineError> {
    if times_present < 0 {
        return Err(EngineError::validation("timesPresent", "must not be negative"));
    }
    let info = class_term_info(conn, key)?;
    require_student_in_class(conn, student_id, &key.class_id)?;
    if info.times_school_opened > 0 && times_present > info.times_school_opened {
        return Err(EngineError::validation(
            "timesPresent",
            format!(
                "must not exceed times school opened ({})",
                info.times_school_opened
            ),
        ));
    }
    conn.execute(
        "INSERT INTO student_attendance(student_id, class_id, session_id, term, times_present, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, class_id, session_id, term) DO UPDATE SET
           times_present = excluded.times_present,
           updated_at = excluded.updated_at",
        (
            student_id,
            &key.class_id,
            &key.session_id,
            key.term.as_str(),
            times_present,
            crate::db::now_stamp(),
        ),
    )?;
    student_attendance(conn, student_id, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::Term;
    use crate::db::open_memory;

    #[test]
    fn duplicate_names_are_validation_errors() {
        let conn = open_memory();
        create_class(&conn, "JSS1").expect("create");
        match create_class(&conn, " JSS1 ") {
            Err(EngineError::Validation { field, .. }) => assert_eq!(field, "name"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(create_class(&conn, "   ").is_err());
    }

    #[test]
    fn students_are_appended_in_sort_order() {
        let conn = open_memory();
        let class_id = create_class(&conn, "SS2").expect("class");
        for (last, first) in [("Okafor", "Ada"), ("Bello", "Tunde")] {
            create_student(
                &conn,
                &NewStudent {
                    class_id: &class_id,
                    last_name: last,
                    first_name: first,
                    admission_number: None,
                    active: true,
                },
            )
            .expect("student");
        }
        let students = list_students(&conn, &class_id).expect("list");
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].display_name, "Okafor, Ada");
        assert_eq!(students[1].sort_order, 1);
        assert!(matches!(
            list_students(&conn, "missing"),
            Err(EngineError::NotFound("class"))
        ));
    }

    #[test]
    fn only_one_current_session() {
        let conn = open_memory();
        create_session(&conn, "2023/2024", true).expect("first");
        create_session(&conn, "2024/2025", true).expect("second");
        let current: Vec<String> = list_sessions(&conn)
            .expect("list")
            .into_iter()
            .filter(|s| s.is_current)
            .map(|s| s.name)
            .collect();
        assert_eq!(current, vec!["2024/2025".to_string()]);
    }

    #[test]
    fn class_term_info_patches_and_validates() {
        let conn = open_memory();
        let class_id = create_class(&conn, "JSS3").expect("class");
        let session_id = create_session(&conn, "2024/2025", true).expect("session");
        let key = TermKey {
            class_id,
            session_id,
            term: Term::Second,
        };
        let info = class_term_info(&conn, &key).expect("default");
        assert_eq!(info.times_school_opened, 0);
        assert_eq!(info.class_population, 0);

        let info = update_class_term_info(
            &conn,
            &key,
            &ClassTermInfoPatch {
                times_school_opened: Some(118),
                next_term_begins: Some(Some("2025-04-28".to_string())),
            },
        )
        .expect("update");
        assert_eq!(info.times_school_opened, 118);

        let info = update_class_term_info(
            &conn,
            &key,
            &ClassTermInfoPatch {
                times_school_opened: None,
                next_term_begins: Some(None),
            },
        )
        .expect("clear date");
        assert_eq!(info.times_school_opened, 118);
        assert_eq!(info.next_term_begins, None);

        let bad = ClassTermInfoPatch {
            times_school_opened: None,
            next_term_begins: Some(Some("28/04/2025".to_string())),
        };
        assert!(update_class_term_info(&conn, &key, &bad).is_err());
    }

    #[test]
    fn attendance_is_kept_per_student_against_days_opened() {
        let conn = open_memory();
        let class_id = create_class(&conn, "JSS2").expect("class");
        let session_id = create_session(&conn, "2024/2025", true).expect("session");
        let student_id = create_student(
            &conn,
            &NewStudent {
                class_id: &class_id,
                last_name: "Okafor",
                first_name: "Ada",
                admission_number: None,
                active: true,
            },
        )
        .expect("student");
        let key = TermKey {
            class_id,
            session_id,
            term: Term::First,
        };

        let none = student_attendance(&conn, &student_id, &key).expect("default");
        assert_eq!(none.times_present, 0);
        assert_eq!(none.attendance_percentage, 0.0);

        update_class_term_info(
            &conn,
            &key,
            &ClassTermInfoPatch {
                times_school_opened: Some(60),
                next_term_begins: None,
            },
        )
        .expect("opened");
        let att = update_attendance(&conn, &student_id, &key, 45).expect("update");
        assert_eq!(att.times_present, 45);
        assert_eq!(att.times_school_opened, 60);
        assert_eq!(att.attendance_percentage, 75.0);

        assert!(matches!(
            update_attendance(&conn, &student_id, &key, 61),
            Err(EngineError::Validation { .. })
        ));
        assert!(matches!(
            update_attendance(&conn, &student_id, &key, -1),
            Err(EngineError::Validation { .. })
        ));
        assert!(matches!(
            update_attendance(&conn, "ghost", &key, 10),
            Err(EngineError::NotFound("student"))
        ));
        assert_eq!(
            student_attendance(&conn, &student_id, &key)
                .expect("read")
                .times_present,
            45
        );
    }
}
