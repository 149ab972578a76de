//! Engine errors
use chorus_playback::SessionError;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Audio file does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// File exists but cannot be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// File extension or codec is not supported
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Effects chain or output sink construction failed
    #[error("Pipeline init error: {0}")]
    PipelineInit(String),

    /// Output device failure
    #[error("Output error: {0}")]
    Output(String),

    /// Seek failed
    #[error("Seek error: {0}")]
    Seek(String),

    /// Container/codec layer error
    #[error("Symphonia error: {0}")]
    Symphonia(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(path) => SessionError::NotFound(path),
            EngineError::Decode(msg)
            | EngineError::UnsupportedFormat(msg)
            | EngineError::Symphonia(msg)
            | EngineError::Seek(msg) => SessionError::Decode(msg),
            EngineError::PipelineInit(msg) | EngineError::Output(msg) => {
                SessionError::PipelineInit(msg)
            }
            EngineError::Io(e) => SessionError::Io(e),
        }
    }
}
