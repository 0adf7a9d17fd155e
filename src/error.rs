use thiserror::Error;

/// Result type for fieldvault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the fieldvault library
#[derive(Error, Debug)]
pub enum Error {
    /// No active or resolvable key for the requested operation
    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),

    /// A serialized payload did not match the expected wire format
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// AEAD tag verification failed during decryption
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rotation requested before the key's scheduled rotation time
    #[error("Rotation not due for key {key_id} until {next_rotation}")]
    RotationNotDue {
        key_id: String,
        next_rotation: chrono::DateTime<chrono::Utc>,
    },

    /// Errors related to key metastore operations
    #[error("Metastore error: {0}")]
    Metastore(String),

    /// Errors related to cryptographic operations
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Errors related to JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors related to I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Feature not implemented error
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Internal(err.to_string())
    }
}
