/*!
Error types for the hydrate core engine.
*/

use thiserror::Error;

/// Result type used throughout the hydrate core.
pub type Result<T> = std::result::Result<T, HydrateError>;

/// Errors that can occur while restoring or persisting state.
#[derive(Error, Debug)]
pub enum HydrateError {
    /// The storage backend could not be opened
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Stored text is not a usable JSON document
    #[error("Decode error: {0}")]
    Decode(String),

    /// The decoded document was rejected by the schema validator
    #[error("Validation error: {0}")]
    Validation(String),

    /// No migration path to the target version, or a step failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// State could not be converted to or from a JSON document
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid hydrator or storage configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HydrateError {
    /// Create a new initialization error
    pub fn initialization<S: Into<String>>(msg: S) -> Self {
        Self::Initialization(msg.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new migration error
    pub fn migration<S: Into<String>>(msg: S) -> Self {
        Self::Migration(msg.into())
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the error means the stored record is unusable as opposed to
    /// the store itself being unavailable.
    pub fn is_corrupt_record(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Validation(_) | Self::Migration(_) | Self::Json(_)
        )
    }
}
