use thiserror::Error;

/// Main error type for the noise-camo library
#[derive(Error, Debug)]
pub enum CamoError {
    #[error("Video processing error: {0}")]
    Video(#[from] VideoError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Video source and sink errors
#[derive(Error, Debug)]
pub enum VideoError {
    /// The source could not be probed, opened, or produced no first frame.
    #[error("Video source is not readable: {path} ({reason})")]
    NotReadable { path: String, reason: String },

    /// The sink refused a frame, or could not be opened or finalized.
    #[error("Failed to write output: {reason}")]
    WriteFailure { reason: String },

    #[error("Video decoding failed: {reason}")]
    DecodingFailed { reason: String },

    #[error("Invalid video parameters: {details}")]
    InvalidParameters { details: String },
}

/// Session lifecycle and service-level errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session cancelled before the source was exhausted")]
    Cancelled,

    #[error("Unknown source: {id}")]
    UnknownSource { id: String },

    #[error("Output not found: {id}")]
    OutputNotFound { id: String },

    #[error("Invalid identifier: {id}")]
    InvalidIdentifier { id: String },

    #[error("Session task failed: {reason}")]
    TaskFailed { reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path} ({reason})")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Source file could not be deleted after teardown.
///
/// Never returned as an `Err`: it is logged and attached to the session report,
/// and does not change whether the session succeeded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Could not delete source {path}: {reason}")]
pub struct DisposalWarning {
    pub path: String,
    pub reason: String,
}

/// Convenience type alias for Results using CamoError
pub type Result<T> = std::result::Result<T, CamoError>;

impl CamoError {
    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            // IO errors might be temporary
            Self::Io(_) => true,
            // A cancelled preview can simply be restarted
            Self::Session(SessionError::Cancelled) => true,
            // Unreadable sources and failed writes are final for the session
            _ => false,
        }
    }

    /// True when a viewer disconnect or handle cancel ended the session.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Session(SessionError::Cancelled))
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Video(VideoError::NotReadable { path, .. }) => {
                format!("Could not read video '{}'. Please check the upload is a supported video file.", path)
            }
            Self::Video(VideoError::DecodingFailed { .. }) => {
                "The video stopped decoding part way through, so the output is incomplete.".to_string()
            }
            Self::Video(VideoError::WriteFailure { .. }) => {
                "The camouflaged video could not be written. Partial output may remain on disk.".to_string()
            }
            Self::Session(SessionError::OutputNotFound { id }) => {
                format!("Output '{}' does not exist (yet).", id)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}
