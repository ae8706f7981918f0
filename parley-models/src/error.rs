//! Error types for provider adapters.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, configuring, or calling a model.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown provider, invalid registration, or no model to send to.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No credential available for the provider.
    #[error("no API key available for provider: {provider}")]
    Auth { provider: String },

    /// Attachment MIME type is not accepted by the target vendor.
    #[error("unsupported file type {mime} for {file}")]
    UnsupportedFileType { file: String, mime: String },

    /// Attachment could not be read or downloaded.
    #[error("failed to fetch attachment {source_path}: {reason}")]
    AttachmentFetch { source_path: String, reason: String },

    /// Request could not be delivered.
    #[error("transport error: {0}")]
    Transport(String),

    /// Vendor answered with a non-success status.
    #[error("provider API error ({status}): {message}")]
    ProviderApi { status: u16, message: String },

    /// Vendor payload did not match its documented schema.
    #[error("decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
