//! Test doubles for adapters and transports.
//!
//! [`FixtureTransport`] replays canned vendor replies and records every
//! request it sees; [`MockAdapter`] answers with a fixed reply without any
//! vendor translation. Both are used by this crate's tests and by downstream
//! crates that drive sessions offline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::adapters::{AdapterContext, AdapterCore, ModelAdapter, SendOptions, TextStream, text_deltas, wants_stream};
use crate::attachment::DefaultLoader;
use crate::keys::{KeyManager, StaticSource};
use crate::registry::AdapterKind;
use crate::transport::{EventStream, ProviderRequest, RawResponse, Transport};
use crate::{Error, Message, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A canned vendor reply.
#[derive(Debug, Clone)]
pub enum Fixture {
    Complete(Value),
    Events(Vec<Value>),
    Failure { status: u16, message: String },
}

/// Transport that replays queued fixtures in order.
#[derive(Debug, Default)]
pub struct FixtureTransport {
    queue: Mutex<VecDeque<Fixture>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl FixtureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, fixture: Fixture) {
        lock(&self.queue).push_back(fixture);
    }

    pub fn push_complete(&self, body: Value) {
        self.push(Fixture::Complete(body));
    }

    pub fn push_events(&self, events: Vec<Value>) {
        self.push(Fixture::Events(events));
    }

    pub fn push_failure(&self, status: u16, message: impl Into<String>) {
        self.push(Fixture::Failure {
            status,
            message: message.into(),
        });
    }

    /// Every request executed so far, oldest first.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn execute(&self, request: ProviderRequest) -> Result<RawResponse> {
        lock(&self.requests).push(request);
        let fixture = lock(&self.queue).pop_front();
        match fixture {
            Some(Fixture::Complete(body)) => Ok(RawResponse::Complete(body)),
            Some(Fixture::Events(events)) => {
                let events: EventStream = Box::pin(tokio_stream::iter(events.into_iter().map(Ok)));
                Ok(RawResponse::Events(events))
            }
            Some(Fixture::Failure { status, message }) => Err(Error::ProviderApi { status, message }),
            None => Err(Error::Transport("no fixture queued".to_string())),
        }
    }
}

/// Context whose key pool holds `test-key` for `provider`.
pub fn keyed_context(provider: &str, transport: Arc<FixtureTransport>) -> AdapterContext {
    let keys = KeyManager::with_source(Arc::new(StaticSource::new()));
    keys.add_key(provider, "test-key");
    AdapterContext::new(Arc::new(keys), transport, Arc::new(DefaultLoader::new()))
}

// ────────────────────────────────────────────────────────────────────────────
// MockAdapter
// ────────────────────────────────────────────────────────────────────────────

/// Adapter that answers every call with a fixed reply.
///
/// Streaming replies are split on spaces, so the concatenated deltas equal
/// the complete reply.
#[derive(Debug)]
pub struct MockAdapter {
    core: AdapterCore,
    reply: String,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockAdapter {
    pub fn new(reply: impl Into<String>) -> Self {
        let context = AdapterContext::new(
            Arc::new(KeyManager::with_source(Arc::new(StaticSource::new()))),
            Arc::new(FixtureTransport::new()),
            Arc::new(DefaultLoader::new()),
        );
        Self {
            core: AdapterCore::new("mock", AdapterKind::OpenAi, None, context),
            reply: reply.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// History passed to each send, oldest first.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        lock(&self.calls).clone()
    }

    fn chunks(&self) -> Vec<Value> {
        self.reply
            .split_inclusive(' ')
            .map(|chunk| json!({ "text": chunk }))
            .collect()
    }
}

fn text_field(event: Value) -> Result<Option<String>> {
    Ok(event.get("text").and_then(Value::as_str).map(str::to_string))
}

#[async_trait]
impl ModelAdapter for MockAdapter {
    fn core(&self) -> &AdapterCore {
        &self.core
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn ensure_client(&self) -> Result<()> {
        Ok(())
    }

    async fn prepare_request(
        &self,
        history: &[Message],
        options: &SendOptions,
    ) -> Result<ProviderRequest> {
        lock(&self.calls).push(history.to_vec());
        let params = self.core.request_params(options);
        let mut request = ProviderRequest::new("mock://chat", json!({ "messages": history.len() }));
        request.stream = wants_stream(&params, options);
        Ok(request)
    }

    async fn send_raw(&self, request: ProviderRequest) -> Result<RawResponse> {
        if request.stream {
            let events: EventStream = Box::pin(tokio_stream::iter(self.chunks().into_iter().map(Ok)));
            Ok(RawResponse::Events(events))
        } else {
            Ok(RawResponse::Complete(json!({ "text": self.reply })))
        }
    }

    fn handle_response(&self, raw: Value) -> Result<Message> {
        Ok(Message::assistant(text_field(raw)?.unwrap_or_default()))
    }

    fn handle_stream(&self, events: EventStream) -> TextStream {
        text_deltas(events, text_field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixtures_replay_in_order() {
        let transport = FixtureTransport::new();
        transport.push_complete(json!({ "n": 1 }));
        transport.push_failure(429, "slow down");

        let first = transport
            .execute(ProviderRequest::new("mock://a", Value::Null))
            .await
            .unwrap();
        assert!(matches!(first, RawResponse::Complete(body) if body["n"] == 1));

        let second = transport
            .execute(ProviderRequest::new("mock://b", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(second, Error::ProviderApi { status: 429, .. }));

        let third = transport
            .execute(ProviderRequest::new("mock://c", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(third, Error::Transport(_)));
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn mock_adapter_streams_the_same_text() {
        let adapter = MockAdapter::new("hello there world");
        let history = vec![Message::user("hi")];

        let complete = adapter.send(&history, &SendOptions::new()).await.unwrap();
        let streamed = adapter.send(&history, &SendOptions::new().stream(true)).await.unwrap();
        assert!(streamed.is_stream());
        assert_eq!(complete.collect_text().await.unwrap(), "hello there world");
        assert_eq!(streamed.collect_text().await.unwrap(), "hello there world");
        assert_eq!(adapter.calls().len(), 2);
    }
}
