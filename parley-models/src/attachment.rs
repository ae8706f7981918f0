//! Attachment classification and loading.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::{Error, Result};

/// Fallback MIME type for unknown extensions.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Whether a file reference is a remote `http(s)` URL.
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Guess a MIME type from the file extension, ignoring any URL query or fragment.
pub fn mime_type(source: &str) -> String {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}

/// Classify a file and check it against a vendor's accepted types.
pub fn classify(source: &str, accepts: impl Fn(&str) -> bool) -> Result<String> {
    let mime = mime_type(source);
    if accepts(&mime) {
        Ok(mime)
    } else {
        Err(Error::UnsupportedFileType {
            file: source.to_string(),
            mime,
        })
    }
}

/// Attachment bytes with their MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub source: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// `data:<mime>;base64,<payload>` URL.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64())
    }

    /// Contents decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Reads attachment bytes from disk or the network.
#[async_trait]
pub trait AttachmentLoader: Send + Sync {
    async fn load(&self, source: &str) -> Result<Vec<u8>>;

    /// Load and wrap with its MIME type.
    async fn attachment(&self, source: &str, mime: &str) -> Result<Attachment> {
        Ok(Attachment {
            source: source.to_string(),
            mime: mime.to_string(),
            data: self.load(source).await?,
        })
    }
}

/// Reads local files with `tokio::fs` and downloads URLs with `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct DefaultLoader {
    client: reqwest::Client,
}

impl DefaultLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

fn fetch_error(source: &str, reason: impl ToString) -> Error {
    Error::AttachmentFetch {
        source_path: source.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl AttachmentLoader for DefaultLoader {
    async fn load(&self, source: &str) -> Result<Vec<u8>> {
        if !is_url(source) {
            return tokio::fs::read(source)
                .await
                .map_err(|e| fetch_error(source, e));
        }

        debug!(url = source, "downloading attachment");
        let response = self
            .client
            .get(source)
            .send()
            .await
            .map_err(|e| fetch_error(source, e))?;
        if !response.status().is_success() {
            return Err(fetch_error(source, format!("HTTP {}", response.status())));
        }
        let bytes = response.bytes().await.map_err(|e| fetch_error(source, e))?;
        Ok(bytes.to_vec())
    }
}
