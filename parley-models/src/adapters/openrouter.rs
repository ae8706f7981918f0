//! OpenRouter adapter.
//!
//! OpenRouter speaks the chat-completions dialect, so translation is shared
//! with the OpenAI adapter. Requests routed to Claude models additionally get
//! Anthropic prompt-cache markers, which OpenRouter forwards upstream.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::openai::{SUPPORTED_FILE_TYPES, build_request, chunk_delta, parse_completion};
use super::{AdapterContext, AdapterCore, ModelAdapter, SendOptions, TextStream, text_deltas};
use crate::cache::{CacheAnnotator, normalize_content};
use crate::registry::AdapterKind;
use crate::transport::{EventStream, ProviderRequest};
use crate::{Message, Result};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

const PROMPT_CACHING_BETA: &str = "prompt-caching-2024-07-31";

/// Whether a routed model is served by Anthropic.
fn routes_to_claude(model: &str) -> bool {
    model.to_ascii_lowercase().contains("claude")
}

/// Adapter for the OpenRouter gateway.
#[derive(Debug)]
pub struct OpenRouterAdapter {
    core: AdapterCore,
    annotator: CacheAnnotator,
}

impl OpenRouterAdapter {
    pub fn new(provider: impl Into<String>, base_url: Option<String>, context: AdapterContext) -> Self {
        Self {
            core: AdapterCore::new(provider, AdapterKind::OpenRouter, base_url, context),
            annotator: CacheAnnotator::new(),
        }
    }
}

#[async_trait]
impl ModelAdapter for OpenRouterAdapter {
    fn core(&self) -> &AdapterCore {
        &self.core
    }

    fn supports_files(&self) -> bool {
        true
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn supported_file_types(&self) -> &[&str] {
        SUPPORTED_FILE_TYPES
    }

    async fn ensure_client(&self) -> Result<()> {
        self.core.ensure_client(DEFAULT_BASE_URL).map(|_| ())
    }

    async fn prepare_request(
        &self,
        history: &[Message],
        options: &SendOptions,
    ) -> Result<ProviderRequest> {
        build_request(&self.core, history, options, SUPPORTED_FILE_TYPES).await
    }

    fn before_send(&self, _history: &[Message], mut request: ProviderRequest) -> ProviderRequest {
        let model = request
            .body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !routes_to_claude(&model) {
            return request;
        }

        request.set_header("anthropic-beta", PROMPT_CACHING_BETA);
        if let Some(messages) = request.messages_mut() {
            messages.iter_mut().for_each(normalize_content);
            let marked = self.annotator.annotate(messages);
            debug!(model = %model, marked, "prompt cache markers applied");
        }
        request
    }

    fn handle_response(&self, raw: Value) -> Result<Message> {
        parse_completion(raw)
    }

    fn handle_stream(&self, events: EventStream) -> TextStream {
        text_deltas(events, chunk_delta)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::cache::message_is_marked;
    use crate::mock::{FixtureTransport, keyed_context};
    use crate::registry::params;

    fn adapter(model: &str) -> (OpenRouterAdapter, Arc<FixtureTransport>) {
        let transport = Arc::new(FixtureTransport::new());
        let adapter = OpenRouterAdapter::new("openrouter", None, keyed_context("openrouter", transport.clone()));
        adapter.set_config(params(json!({ "model": model })));
        (adapter, transport)
    }

    fn history() -> Vec<Message> {
        vec![
            Message::system("you are terse"),
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
        ]
    }

    #[tokio::test]
    async fn claude_models_get_cache_markers() {
        let (adapter, transport) = adapter("anthropic/claude-3.5-sonnet");
        transport.push_complete(json!({ "choices": [{ "message": { "content": "ok" } }] }));

        adapter.send(&history(), &SendOptions::new()).await.unwrap();
        let requests = transport.requests();
        let request = &requests[0];

        assert_eq!(request.url, "https://openrouter.ai/api/v1/chat/completions");
        assert_eq!(request.header("anthropic-beta"), Some(PROMPT_CACHING_BETA));
        let messages = request.body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["content"][0]["type"], "text");
        assert!(messages.iter().all(message_is_marked));
    }

    #[tokio::test]
    async fn other_models_pass_through_untouched() {
        let (adapter, transport) = adapter("openai/gpt-4o");
        transport.push_complete(json!({ "choices": [{ "message": { "content": "ok" } }] }));

        adapter.send(&history(), &SendOptions::new()).await.unwrap();
        let requests = transport.requests();
        let request = &requests[0];

        assert!(request.header("anthropic-beta").is_none());
        assert_eq!(request.body["messages"][0]["content"], "you are terse");
    }

    #[test]
    fn claude_detection_ignores_case() {
        assert!(routes_to_claude("Anthropic/Claude-3-Opus"));
        assert!(!routes_to_claude("meta-llama/llama-3-70b"));
    }
}
