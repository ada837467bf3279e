use crate::calc::ScoreEntry;
use crate::ipc::helpers::{
    get_required_str, get_score_entry, get_score_key, get_term_key, to_json, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use crate::scores::{self, RejectedRow, ScoreKey};
use rusqlite::Connection;
use serde_json::{json, Value};

fn scores_save(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = get_score_key(params)?;
    let entry = get_score_entry(params)?;
    let record = scores::save_score(conn, &key, &entry)?;
    Ok(json!({ "record": to_json(&record)? }))
}

fn scores_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = get_score_key(params)?;
    let record = scores::get_score(conn, &key)?;
    Ok(json!({ "record": to_json(&record)? }))
}

/// Rows that cannot even be parsed are reported alongside the engine's own
/// rejections, indexed by their position in `params.rows`.
fn scores_bulk_save(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(raw_rows) = params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("rows", "missing rows array"));
    };

    let mut parsed: Vec<(ScoreKey, ScoreEntry)> = Vec::with_capacity(raw_rows.len());
    let mut origin: Vec<usize> = Vec::with_capacity(raw_rows.len());
    let mut rejected: Vec<RejectedRow> = Vec::new();
    for (index, row) in raw_rows.iter().enumerate() {
        match get_score_key(row).and_then(|key| Ok((key, get_score_entry(row)?))) {
            Ok(pair) => {
                parsed.push(pair);
                origin.push(index);
            }
            Err(e) => rejected.push(RejectedRow {
                index,
                code: e.code.to_string(),
                message: e.message,
                details: e.details,
            }),
        }
    }

    let mut outcome = scores::bulk_save(conn, &parsed)?;
    for row in &mut outcome.rejected {
        row.index = origin[row.index];
    }
    rejected.append(&mut outcome.rejected);
    rejected.sort_by_key(|r| r.index);
    outcome.rejected = rejected;
    to_json(&outcome)
}

fn scores_subject_sheet(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = get_term_key(params)?;
    let subject_id = get_required_str(params, "subjectId")?;
    let rows = reports::subject_sheet(conn, &key, &subject_id)?;
    Ok(json!({ "rows": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "scores.save" => scores_save,
        "scores.get" => scores_get,
        "scores.bulkSave" => scores_bulk_save,
        "scores.subjectSheet" => scores_subject_sheet,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
