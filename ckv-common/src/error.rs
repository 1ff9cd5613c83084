//! # Error Model
//!
//! Purpose: Provide one error enum for every failure the engine, the
//! dispatcher, and the durability tasks can surface, with a stable
//! client-facing message per kind.
//!
//! ## Design Principles
//! 1. **Single Enum**: Every crate returns `KvResult<T>` so `?` composes
//!    across the engine/server boundary.
//! 2. **Message Stability**: Client-visible text lives here, not in
//!    handlers, so wire output stays consistent.
//! 3. **Local Failures**: No retry or recovery logic in the error type;
//!    callers decide.

use thiserror::Error;

/// Result alias used across the workspace.
pub type KvResult<T> = Result<T, KvError>;

/// Failure kinds surfaced by the keyspace engine and command handlers.
///
/// Each variant maps to one RESP error line; the dispatcher serializes the
/// `Display` output as `-ERR <message>\r\n`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    /// Command shape or arity is wrong.
    #[error("wrong number of arguments for '{0}' command")]
    WrongArgs(String),

    /// The value at the key is not the type the command expects.
    #[error("operation against a key holding the wrong type of value")]
    WrongType,

    /// The key is absent where the command required presence.
    #[error("key '{0}' does not exist")]
    NotFound(String),

    /// A score, integer, or range endpoint failed to parse.
    #[error("{0}")]
    Parse(String),

    /// Mutually exclusive flags were combined.
    #[error("{0}")]
    Conflict(String),

    /// A rank index fell outside the collection.
    #[error("index out of range: {0}")]
    OutOfRange(String),

    /// The ACL refused the command.
    #[error("permission denied: {0}")]
    PolicyDenied(String),

    /// A snapshot or rewrite is already in progress.
    #[error("{0}")]
    Transient(String),

    /// IO or replication failure.
    #[error("{0}")]
    Fatal(String),
}

impl From<std::io::Error> for KvError {
    fn from(err: std::io::Error) -> Self {
        KvError::Fatal(format!("io error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_args_names_the_command() {
        let err = KvError::WrongArgs("zadd".to_string());
        assert_eq!(
            err.to_string(),
            "wrong number of arguments for 'zadd' command"
        );
    }

    #[test]
    fn wrong_type_mentions_type() {
        let err = KvError::WrongType;
        assert!(err.to_string().contains("wrong type"));
    }

    #[test]
    fn io_errors_become_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: KvError = io.into();
        assert!(matches!(err, KvError::Fatal(_)));
        assert!(err.to_string().contains("disk gone"));
    }
}
