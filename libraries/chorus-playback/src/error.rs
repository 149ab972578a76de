//! Error types for session management

use thiserror::Error;

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Audio file does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// File exists but the format could not be opened
    #[error("Decode error: {0}")]
    Decode(String),

    /// Effects chain or output sink construction failed
    #[error("Pipeline init error: {0}")]
    PipelineInit(String),

    /// The engine stopped with a runtime failure
    #[error("Engine stopped with error: {0}")]
    StoppedWithError(String),

    /// No engine is currently allocated for the session
    #[error("No engine loaded")]
    EngineGone,

    /// Song cannot be played (zero duration, missing path, ...)
    #[error("Invalid song: {0}")]
    InvalidSong(String),

    /// Loop persistence store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
