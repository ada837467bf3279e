use crate::calc::{ScoreEntry, ScoreInput, Term};
use crate::error::EngineError;
use crate::ipc::types::{AppState, Request};
use crate::results::TermKey;
use crate::scores::ScoreKey;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};

pub fn ok(id: &str, result: Value) -> Value {
    json!({ "id": id, "ok": true, "result": result })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message.into() });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({ "id": id, "ok": false, "error": error })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(field: &str, message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: Some(json!({ "field": field })),
        }
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

/// Runs `f` against the open workspace and wraps its outcome in a response.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn to_json<T: Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "serialize_failed",
        message: e.to_string(),
        details: None,
    })
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(key, format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::bad_params(key, format!("{} must be a string", key))),
    }
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(key, format!("{} must be an integer", key))),
    }
}

pub fn get_bool(params: &Value, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(HandlerErr::bad_params(key, format!("{} must be a boolean", key))),
    }
}

/// Accepts `"First"`/`"second"`/`"3"` as well as the bare integers 1..=3.
pub fn get_term(params: &Value) -> Result<Term, HandlerErr> {
    match params.get("term") {
        Some(Value::String(s)) => Ok(s.parse::<Term>()?),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(Term::from_index)
            .ok_or_else(|| HandlerErr::bad_params("term", format!("unknown term {}", n))),
        _ => Err(HandlerErr::bad_params("term", "missing term")),
    }
}

pub fn get_term_key(params: &Value) -> Result<TermKey, HandlerErr> {
    Ok(TermKey {
        class_id: get_required_str(params, "classId")?,
        session_id: get_required_str(params, "sessionId")?,
        term: get_term(params)?,
    })
}

pub fn get_score_key(params: &Value) -> Result<ScoreKey, HandlerErr> {
    Ok(ScoreKey {
        student_id: get_required_str(params, "studentId")?,
        class_id: get_required_str(params, "classId")?,
        subject_id: get_required_str(params, "subjectId")?,
        session_id: get_required_str(params, "sessionId")?,
        term: get_term(params)?,
    })
}

fn get_mark_array<const N: usize>(params: &Value, key: &str) -> Result<Option<[i64; N]>, HandlerErr> {
    let raw = match params.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(HandlerErr::bad_params(
                key,
                format!("{} must be an array of {} integers", key, N),
            ))
        }
    };
    if raw.len() != N {
        return Err(HandlerErr::bad_params(
            key,
            format!("{} must have exactly {} entries (got {})", key, N, raw.len()),
        ));
    }
    let mut out = [0i64; N];
    for (slot, v) in out.iter_mut().zip(raw) {
        *slot = v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params(key, format!("{} entries must be integers", key)))?;
    }
    Ok(Some(out))
}

/// `ca` (four marks), `tests` (two marks) and `exam` are each optional;
/// omitted groups keep what is stored.
pub fn get_score_entry(params: &Value) -> Result<ScoreEntry, HandlerErr> {
    let mut entry = ScoreEntry::default();
    if let Some(ca) = get_mark_array::<4>(params, "ca")? {
        entry.inputs.push(ScoreInput::Continuous(ca));
    }
    if let Some(tests) = get_mark_array::<2>(params, "tests")? {
        entry.inputs.push(ScoreInput::LegacyTests(tests));
    }
    entry.exam = get_optional_i64(params, "exam")?;
    Ok(entry)
}
