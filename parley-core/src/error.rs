//! Error types for parley-core

use std::path::PathBuf;

use thiserror::Error;

/// Errors from chat sessions
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse session file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to encode session: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Model(#[from] parley_models::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
