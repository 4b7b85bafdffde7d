//! Error types for the companion session.

use crate::ai::ChatError;

/// Top-level error type for the companion.
#[derive(Debug, thiserror::Error)]
pub enum CompanionError {
    /// Missing or malformed configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Audio decoding, sink or file error.
    #[error("audio error: {0}")]
    Audio(String),

    /// The session task has stopped and no longer accepts commands.
    #[error("companion session closed")]
    SessionClosed,

    /// Generation collaborator error.
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CompanionError>;
