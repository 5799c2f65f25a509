//! Error types for sheetfind-core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the registry, storage and configuration layers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Username already registered.
    #[error("Username already exists: {0}")]
    UsernameTaken(String),

    /// E-mail already registered.
    #[error("Email already in use: {0}")]
    EmailTaken(String),

    /// No user with this id.
    #[error("User not found: {0}")]
    UserNotFound(u64),

    /// No document with this id.
    #[error("Document not found: {0}")]
    DocumentNotFound(u64),

    /// No grant with this id.
    #[error("Grant not found: {0}")]
    GrantNotFound(u64),

    /// Storage key that could escape the storage root.
    #[error("Invalid storage key: {0:?}")]
    InvalidStorageKey(String),

    /// Current password did not verify.
    #[error("Current password is incorrect")]
    WrongPassword,

    /// Input rejected before touching any state.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Password hashing failure.
    #[error("Password hash error: {0}")]
    PasswordHash(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
