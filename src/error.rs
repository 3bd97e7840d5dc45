//! Unified error model for the engine.
//! One enum spans the storage backend, the log store, the classifier and
//! the dispatcher, and carries enough information to map cleanly onto an
//! HTTP status code at the server boundary.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineError {
    /// The classifier or the embedded analytical engine reports the SQL is malformed.
    Parse { code: String, message: String },
    /// Replaying `schema_log` against a fresh transaction failed.
    SchemaReplay { code: String, message: String },
    /// A storage read/write/list/stat call failed.
    Io { code: String, message: String },
    /// A conditional write lost a race against another writer.
    PreconditionFailed { code: String, message: String },
    /// The requested table or object does not exist.
    NotFound { code: String, message: String },
    /// An invariant of the engine itself was violated.
    Internal { code: String, message: String },
}

impl EngineError {
    pub fn code_str(&self) -> &str {
        match self {
            EngineError::Parse { code, .. }
            | EngineError::SchemaReplay { code, .. }
            | EngineError::Io { code, .. }
            | EngineError::PreconditionFailed { code, .. }
            | EngineError::NotFound { code, .. }
            | EngineError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            EngineError::Parse { message, .. }
            | EngineError::SchemaReplay { message, .. }
            | EngineError::Io { message, .. }
            | EngineError::PreconditionFailed { message, .. }
            | EngineError::NotFound { message, .. }
            | EngineError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        EngineError::Parse { code: "parse_error".into(), message: msg.into() }
    }
    pub fn schema_replay<S: Into<String>>(msg: S) -> Self {
        EngineError::SchemaReplay { code: "schema_replay_error".into(), message: msg.into() }
    }
    pub fn io<S: Into<String>>(msg: S) -> Self {
        EngineError::Io { code: "io_error".into(), message: msg.into() }
    }
    pub fn precondition_failed<S: Into<String>>(msg: S) -> Self {
        EngineError::PreconditionFailed { code: "precondition_failed".into(), message: msg.into() }
    }
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        EngineError::NotFound { code: "not_found".into(), message: msg.into() }
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        EngineError::Internal { code: "internal_error".into(), message: msg.into() }
    }

    /// Map to the HTTP status code per the dispatcher's error propagation policy:
    /// per-statement errors are 400, write-out failures are 500.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::Parse { .. } => 400,
            EngineError::SchemaReplay { .. } => 400,
            EngineError::PreconditionFailed { .. } => 409,
            EngineError::NotFound { .. } => 404,
            EngineError::Io { .. } => 500,
            EngineError::Internal { .. } => 500,
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

impl From<duckdb::Error> for EngineError {
    fn from(err: duckdb::Error) -> Self {
        EngineError::Parse { code: "exec_error".into(), message: err.to_string() }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            EngineError::NotFound { code: "not_found".into(), message: err.to_string() }
        } else {
            EngineError::Io { code: "io_error".into(), message: err.to_string() }
        }
    }
}

impl From<object_store::Error> for EngineError {
    fn from(err: object_store::Error) -> Self {
        match &err {
            object_store::Error::NotFound { .. } => {
                EngineError::NotFound { code: "not_found".into(), message: err.to_string() }
            }
            object_store::Error::Precondition { .. } | object_store::Error::AlreadyExists { .. } => {
                EngineError::PreconditionFailed { code: "precondition_failed".into(), message: err.to_string() }
            }
            _ => EngineError::Io { code: "io_error".into(), message: err.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(EngineError::parse("bad sql").http_status(), 400);
        assert_eq!(EngineError::schema_replay("bad replay").http_status(), 400);
        assert_eq!(EngineError::precondition_failed("stale etag").http_status(), 409);
        assert_eq!(EngineError::not_found("no such table").http_status(), 404);
        assert_eq!(EngineError::io("disk full").http_status(), 500);
        assert_eq!(EngineError::internal("invariant broken").http_status(), 500);
    }

    #[test]
    fn display_includes_code_and_message() {
        let e = EngineError::not_found("table t");
        assert_eq!(e.to_string(), "not_found: table t");
    }
}
