use crate::db;
use crate::error::EngineError;
use crate::ipc::helpers::{with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn settings_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let pass_mark = db::promotion_pass_mark(conn).map_err(EngineError::from)?;
    Ok(json!({ "passMark": pass_mark }))
}

fn settings_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(pass_mark) = params.get("passMark").and_then(|v| v.as_f64()) else {
        return Err(HandlerErr::bad_params("passMark", "missing passMark"));
    };
    if !(0.0..=100.0).contains(&pass_mark) {
        return Err(HandlerErr::bad_params(
            "passMark",
            format!("must be between 0 and 100 (got {})", pass_mark),
        ));
    }
    db::settings_set_json(conn, db::PASS_MARK_KEY, &json!(pass_mark)).map_err(EngineError::from)?;
    Ok(json!({ "passMark": pass_mark }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "settings.get" => Some(with_db(state, req, settings_get)),
        "settings.update" => Some(with_db(state, req, settings_update)),
        _ => None,
    }
}
