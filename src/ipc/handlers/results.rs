use crate::bundle;
use crate::ipc::helpers::{get_required_str, get_term_key, to_json, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use crate::results;
use crate::roster::require_exists;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::error;

fn compute_term(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = get_term_key(params)?;
    let outcome = results::compute_term_results(conn, &key)?;
    let summaries = reports::term_summaries(conn, &key)?;
    Ok(json!({
        "outcome": to_json(&outcome)?,
        "summaries": to_json(&summaries)?,
    }))
}

fn term_summaries(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = get_term_key(params)?;
    let summaries = reports::term_summaries(conn, &key)?;
    Ok(json!({ "summaries": to_json(&summaries)? }))
}

fn student_term(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = get_term_key(params)?;
    let student_id = get_required_str(params, "studentId")?;
    to_json(&reports::student_term_report(conn, &student_id, &key)?)
}

fn broadsheet(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = get_term_key(params)?;
    to_json(&reports::broadsheet(conn, &key)?)
}

fn cumulative(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let session_id = get_required_str(params, "sessionId")?;
    to_json(&results::cumulative_result(conn, &student_id, &session_id)?)
}

fn export_cumulative_bundle(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let session_id = get_required_str(params, "sessionId")?;
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    require_exists(conn, "classes", &class_id, "class")?;
    require_exists(conn, "academic_sessions", &session_id, "session")?;

    let summary = bundle::export_cumulative_bundle(conn, &class_id, &session_id, &out_path)
        .map_err(|e| {
            error!(error = %format!("{e:#}"), "cumulative bundle export failed");
            HandlerErr {
                code: "io_failed",
                message: format!("{e:#}"),
                details: Some(json!({ "outPath": out_path.to_string_lossy() })),
            }
        })?;
    Ok(json!({
        "ok": true,
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "studentCount": summary.student_count,
        "entryCount": summary.entry_count,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "results.computeTerm" => compute_term,
        "results.termSummaries" => term_summaries,
        "results.studentTerm" => student_term,
        "results.broadsheet" => broadsheet,
        "results.cumulative" => cumulative,
        "results.exportCumulativeBundle" => export_cumulative_bundle,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
