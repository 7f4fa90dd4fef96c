use thiserror::Error;

/// Main error type for Distiller
#[derive(Error, Debug)]
pub enum DistillError {
    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Directory read or drop decoding failed; the intake attempt is abandoned
    #[error("{0}")]
    Intake(String),

    /// No credential bound to the completion client
    #[error("Completion client unavailable: {0}")]
    RemoteUnavailable(String),

    /// Transport or API-level failure reported by the completion provider
    #[error("{0}")]
    Remote(String),

    /// Persisting a processed document failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Missing instruction, model or documents
    #[error("Cannot start run: {0}")]
    Precondition(String),

    /// A run is already active on this processor
    #[error("A batch run is already in progress")]
    RunInProgress,
}

/// Convenient Result type using DistillError
pub type Result<T> = std::result::Result<T, DistillError>;
