use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "bad_params",
            EngineError::NotFound(_) => "not_found",
            EngineError::Db(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::Validation { field, .. } => Some(json!({ "field": field })),
            EngineError::NotFound(what) => Some(json!({ "entity": what })),
            EngineError::Db(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_ipc_error_codes() {
        assert_eq!(EngineError::validation("exam", "too high").code(), "bad_params");
        assert_eq!(EngineError::NotFound("student").code(), "not_found");
        assert_eq!(
            EngineError::from(rusqlite::Error::QueryReturnedNoRows).code(),
            "db_query_failed"
        );
        assert_eq!(
            EngineError::validation("exam", "too high").to_string(),
            "exam: too high"
        );
        assert_eq!(EngineError::NotFound("student").to_string(), "student not found");
    }
}
