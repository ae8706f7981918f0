//! Vendor transport.
//!
//! Adapters describe a call as a [`ProviderRequest`] and hand it to a
//! [`Transport`]. [`HttpTransport`] performs it with `reqwest`, decoding
//! server-sent events into JSON values for streaming calls. Tests swap in
//! [`FixtureTransport`](crate::mock::FixtureTransport).

use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_stream::Stream;
use tracing::debug;

use crate::keys::ApiKey;
use crate::{Error, Result};

/// Decoded streaming events, one JSON value per server-sent event.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// How the credential is attached to a request.
#[derive(Debug, Clone)]
pub enum Auth {
    /// `Authorization: Bearer <key>`.
    Bearer(ApiKey),
    /// Key sent in a named header (e.g. `x-api-key`).
    Header { name: String, key: ApiKey },
}

impl Auth {
    pub fn key(&self) -> &ApiKey {
        match self {
            Auth::Bearer(key) => key,
            Auth::Header { key, .. } => key,
        }
    }
}

/// A vendor call, ready to send.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub auth: Option<Auth>,
    pub body: Value,
    pub stream: bool,
}

impl ProviderRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            auth: None,
            body,
            stream: false,
        }
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let existing = self
            .headers
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name));
        match existing {
            Some(index) => self.headers[index].1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Mutable access to `body.messages`, when it is an array.
    pub fn messages_mut(&mut self) -> Option<&mut Vec<Value>> {
        self.body.get_mut("messages").and_then(Value::as_array_mut)
    }
}

/// What the vendor sent back.
pub enum RawResponse {
    /// A complete JSON reply.
    Complete(Value),
    /// A live event stream.
    Events(EventStream),
}

impl std::fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawResponse::Complete(body) => f.debug_tuple("Complete").field(body).finish(),
            RawResponse::Events(_) => f.write_str("Events(..)"),
        }
    }
}

/// Executes vendor calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ProviderRequest) -> Result<RawResponse>;
}

/// HTTP transport backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ProviderRequest) -> Result<RawResponse> {
        debug!(url = %request.url, stream = request.stream, "sending provider request");

        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.auth {
            Some(Auth::Bearer(key)) => builder.bearer_auth(key.expose_secret()),
            Some(Auth::Header { name, key }) => builder.header(name.as_str(), key.expose_secret()),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::ProviderApi {
                status: status.as_u16(),
                message,
            });
        }

        if !request.stream {
            let body = response
                .json::<Value>()
                .await
                .map_err(|e| Error::Decode(e.to_string()))?;
            return Ok(RawResponse::Complete(body));
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) => decode_event_data(&event.data),
                    Err(e) => Some(Err(Error::Transport(e.to_string()))),
                }
            });
        Ok(RawResponse::Events(Box::pin(events)))
    }
}

/// Parse one SSE `data:` payload. Keep-alives and the `[DONE]` sentinel yield nothing.
fn decode_event_data(data: &str) -> Option<Result<Value>> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(serde_json::from_str(data).map_err(Error::from))
}
