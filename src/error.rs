//! Error types for dualstt.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SttError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio errors
    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Voice classification failed: {message}")]
    Classification { message: String },

    // Decode and scheduling errors
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    // Session errors
    #[error("Session {session} is closed")]
    SessionClosed { session: String },

    #[error("Runtime error: {message}")]
    Runtime { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

/// Failure reported by a decode engine.
///
/// `retryable` is false when the engine knows a second attempt cannot
/// succeed (e.g. malformed audio).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Decode failed: {message}")]
pub struct DecodeError {
    pub message: String,
    pub retryable: bool,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Scheduler bookkeeping violations. These indicate a programming defect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job {job} ({class}) completed but is not in flight for session {session}")]
    NotInFlight {
        job: u64,
        class: String,
        session: String,
    },

    #[error("job {job} was never issued by this scheduler")]
    UnknownJob { job: u64 },
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SttError>;
