//! Anthropic messages adapter.
//!
//! System turns are lifted into the top-level `system` field, tool results
//! become `tool_result` blocks on a user turn, and every request is annotated
//! for prompt caching before it is sent.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    AdapterContext, AdapterCore, ModelAdapter, SendOptions, TextStream, base_body,
    calling_function_text, linked_call_name, text_deltas, tool_schema, wants_stream,
};
use crate::attachment::{classify, is_image};
use crate::cache::CacheAnnotator;
use crate::registry::AdapterKind;
use crate::transport::{Auth, EventStream, ProviderRequest};
use crate::{Error, Message, Result, Role, ToolCall, ToolSpec};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Value of the `anthropic-version` header.
pub const API_VERSION: &str = "2023-06-01";

/// Value of the `anthropic-beta` header enabling prompt caching.
pub const PROMPT_CACHING_BETA: &str = "prompt-caching-2024-07-31";

/// `max_tokens` is mandatory for this API.
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Attachment types with a dedicated block; any `text/*` file is also inlined.
pub const SUPPORTED_FILE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
    "text/markdown",
    "text/csv",
    "text/html",
];

fn accepts(mime: &str) -> bool {
    SUPPORTED_FILE_TYPES.contains(&mime) || mime.starts_with("text/")
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: BlockDelta },
    Error { error: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

// ────────────────────────────────────────────────────────────────────────────
// Translation
// ────────────────────────────────────────────────────────────────────────────

fn tool_definition(tool: &ToolSpec) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.schema(),
    })
}

fn tool_use_block(call: &ToolCall) -> Value {
    json!({
        "type": "tool_use",
        "id": call.id,
        "name": call.function.name,
        "input": call.arguments_value(),
    })
}

fn is_tool_result_turn(message: &Value) -> bool {
    message["role"] == "user"
        && message["content"].as_array().is_some_and(|blocks| {
            !blocks.is_empty() && blocks.iter().all(|block| block["type"] == "tool_result")
        })
}

async fn content_blocks(core: &AdapterCore, message: &Message) -> Result<Vec<Value>> {
    let mut blocks = Vec::new();
    if !message.text_or_empty().is_empty() {
        blocks.push(json!({ "type": "text", "text": message.text_or_empty() }));
    }

    for file in &message.files {
        let mime = classify(file, accepts)?;
        let attachment = core.context().loader.attachment(file, &mime).await?;
        let block = if is_image(&mime) {
            json!({
                "type": "image",
                "source": { "type": "base64", "media_type": mime, "data": attachment.base64() }
            })
        } else if mime == "application/pdf" {
            json!({
                "type": "document",
                "source": { "type": "base64", "media_type": mime, "data": attachment.base64() }
            })
        } else {
            json!({ "type": "text", "text": attachment.text() })
        };
        blocks.push(block);
    }

    if message.role == Role::Assistant {
        blocks.extend(message.invocations().map(tool_use_block));
    }
    Ok(blocks)
}

/// Translate history into `(system blocks, messages)`.
async fn translate(core: &AdapterCore, history: &[Message]) -> Result<(Vec<Value>, Vec<Value>)> {
    let mut system = Vec::new();
    let mut messages: Vec<Value> = Vec::with_capacity(history.len());

    for (index, message) in history.iter().enumerate() {
        match message.role {
            Role::System => {
                if !message.text_or_empty().is_empty() {
                    system.push(json!({ "type": "text", "text": message.text_or_empty() }));
                }
            }
            Role::Tool => {
                if linked_call_name(history, index).is_none() {
                    warn!(
                        provider = core.provider(),
                        tool_call_id = ?message.tool_call_id,
                        "skipping orphaned tool result"
                    );
                    continue;
                }
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id,
                    "content": message.text_or_empty(),
                });
                let open_turn = messages
                    .last_mut()
                    .filter(|last| is_tool_result_turn(last))
                    .and_then(|last| last["content"].as_array_mut());
                match open_turn {
                    Some(blocks) => blocks.push(block),
                    None => messages.push(json!({ "role": "user", "content": [block] })),
                }
            }
            Role::User | Role::Assistant => {
                let content = match &message.content {
                    Some(content) => content.clone(),
                    None => {
                        let blocks = content_blocks(core, message).await?;
                        if blocks.is_empty() {
                            debug!(index, "skipping message with no content");
                            continue;
                        }
                        Value::Array(blocks)
                    }
                };
                messages.push(json!({ "role": message.role.as_str(), "content": content }));
            }
        }
    }
    Ok((system, messages))
}

/// Normalize a complete messages reply.
fn parse_response(raw: Value) -> Result<Message> {
    let response: MessagesResponse =
        serde_json::from_value(raw).map_err(|e| Error::Decode(e.to_string()))?;

    let mut text = String::new();
    let mut calls = Vec::new();
    for block in &response.content {
        let decoded: ResponseBlock =
            serde_json::from_value(block.clone()).map_err(|e| Error::Decode(e.to_string()))?;
        match decoded {
            ResponseBlock::Text { text: part } => text.push_str(&part),
            ResponseBlock::ToolUse { id, name, input } => {
                calls.push(ToolCall::function(id, name, input.to_string()));
            }
            ResponseBlock::Other => {}
        }
    }

    let used_tools = response.stop_reason.as_deref() == Some("tool_use") || !calls.is_empty();
    let text = calling_function_text(text, &calls);
    let mut message = Message::assistant(text).with_tool_calls(calls);
    if used_tools {
        // Native blocks are replayed verbatim on the next turn.
        message = message.with_content(Value::Array(response.content));
    }
    Ok(message)
}

fn stream_delta(event: Value) -> Result<Option<String>> {
    let event: StreamEvent = serde_json::from_value(event).map_err(|e| Error::Decode(e.to_string()))?;
    match event {
        StreamEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } => Ok(Some(text)),
        StreamEvent::Error { error } => Err(Error::Transport(format!("stream error: {error}"))),
        _ => Ok(None),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AnthropicAdapter
// ────────────────────────────────────────────────────────────────────────────

/// Adapter for the Anthropic messages API.
#[derive(Debug)]
pub struct AnthropicAdapter {
    core: AdapterCore,
    annotator: CacheAnnotator,
}

impl AnthropicAdapter {
    pub fn new(provider: impl Into<String>, base_url: Option<String>, context: AdapterContext) -> Self {
        Self {
            core: AdapterCore::new(provider, AdapterKind::Anthropic, base_url, context),
            annotator: CacheAnnotator::new(),
        }
    }
}

#[async_trait]
impl ModelAdapter for AnthropicAdapter {
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

    fn supports_file_type(&self, mime: &str) -> bool {
        accepts(mime)
    }

    async fn ensure_client(&self) -> Result<()> {
        self.core.ensure_client(DEFAULT_BASE_URL).map(|_| ())
    }

    async fn prepare_request(
        &self,
        history: &[Message],
        options: &SendOptions,
    ) -> Result<ProviderRequest> {
        let client = self.core.client()?;
        let params = self.core.request_params(options);
        let model = self.core.model(&params)?;
        let stream = wants_stream(&params, options);
        let (system, messages) = translate(&self.core, history).await?;

        let mut body = base_body(&params);
        body.insert("model".to_string(), json!(model));
        body.entry("max_tokens")
            .or_insert_with(|| json!(DEFAULT_MAX_TOKENS));
        if !system.is_empty() {
            body.insert("system".to_string(), Value::Array(system));
        }
        body.insert("messages".to_string(), Value::Array(messages));
        body.insert("stream".to_string(), json!(stream));
        if let Some(tools) = tool_schema(history, options.tools.as_deref()) {
            let definitions: Vec<Value> = tools.iter().map(tool_definition).collect();
            body.insert("tools".to_string(), Value::Array(definitions));
        }

        let url = format!("{}/messages", client.base_url.trim_end_matches('/'));
        let mut request = ProviderRequest::new(url, Value::Object(body));
        request.auth = Some(Auth::Header {
            name: "x-api-key".to_string(),
            key: client.api_key,
        });
        request.set_header("anthropic-version", API_VERSION);
        request.stream = stream;
        Ok(request)
    }

    /// Add the caching header and mark cacheable blocks, system prompt included.
    fn before_send(&self, _history: &[Message], mut request: ProviderRequest) -> ProviderRequest {
        request.set_header("anthropic-beta", PROMPT_CACHING_BETA);

        if let Some(body) = request.body.as_object_mut() {
            let system = body.remove("system");
            let has_system = system.is_some();

            let mut wire = Vec::new();
            if let Some(system) = system {
                wire.push(json!({ "role": "system", "content": system }));
            }
            if let Some(Value::Array(messages)) = body.remove("messages") {
                wire.extend(messages);
            }

            self.annotator.annotate(&mut wire);

            let mut wire = wire.into_iter();
            if has_system && let Some(mut system) = wire.next() {
                body.insert("system".to_string(), system["content"].take());
            }
            body.insert("messages".to_string(), Value::Array(wire.collect()));
        }
        request
    }

    fn handle_response(&self, raw: Value) -> Result<Message> {
        parse_response(raw)
    }

    fn handle_stream(&self, events: EventStream) -> TextStream {
        text_deltas(events, stream_delta)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use super::*;
    use crate::attachment::AttachmentLoader;
    use crate::cache::{MAX_CACHED_MESSAGES, message_is_marked};
    use crate::mock::{FixtureTransport, keyed_context};
    use crate::registry::params;

    fn adapter(transport: &Arc<FixtureTransport>) -> AnthropicAdapter {
        let adapter =
            AnthropicAdapter::new("anthropic", None, keyed_context("anthropic", transport.clone()));
        adapter.set_config(params(json!({
            "model": "claude-3-5-haiku-20241022",
            "max_tokens": 1024,
            "temperature": 0.7,
        })));
        adapter
    }

    async fn sent(adapter: &AnthropicAdapter, history: &[Message], options: &SendOptions) -> ProviderRequest {
        adapter.ensure_client().await.unwrap();
        let request = adapter.prepare_request(history, options).await.unwrap();
        adapter.before_send(history, request)
    }

    fn tool_turn() -> Message {
        Message::assistant("").with_tool_calls(vec![ToolCall::function(
            "toolu_1",
            "get_weather",
            r#"{"city":"Lima"}"#,
        )])
    }

    #[tokio::test]
    async fn system_prompt_is_lifted_and_cached() {
        let transport = Arc::new(FixtureTransport::new());
        let adapter = adapter(&transport);
        let history = vec![Message::system("be terse"), Message::user("hi")];

        let request = sent(&adapter, &history, &SendOptions::new()).await;

        assert_eq!(request.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(request.header("anthropic-version"), Some(API_VERSION));
        assert_eq!(request.header("anthropic-beta"), Some(PROMPT_CACHING_BETA));
        assert!(matches!(&request.auth, Some(Auth::Header { name, .. }) if name == "x-api-key"));

        let system = &request.body["system"];
        assert_eq!(system[0]["text"], "be terse");
        assert_eq!(system[0]["cache_control"]["type"], "ephemeral");

        let messages = request.body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[tokio::test]
    async fn tool_turns_become_tool_use_and_tool_result_blocks() {
        let transport = Arc::new(FixtureTransport::new());
        let adapter = adapter(&transport);
        let history = vec![
            Message::user("weather in Lima?"),
            Message::assistant("").with_tool_calls(vec![
                ToolCall::function("toolu_1", "get_weather", r#"{"city":"Lima"}"#),
                ToolCall::function("toolu_2", "get_time", "{}"),
            ]),
            Message::tool("22C", "toolu_1"),
            Message::tool("noon", "toolu_2"),
            Message::tool("stray", "toolu_9"),
        ];

        adapter.ensure_client().await.unwrap();
        let request = adapter.prepare_request(&history, &SendOptions::new()).await.unwrap();
        let messages = request.body["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 3);
        let tool_use = &messages[1]["content"][0];
        assert_eq!(tool_use["type"], "tool_use");
        assert_eq!(tool_use["input"]["city"], "Lima");

        let results = messages[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2, "consecutive results share one user turn");
        assert_eq!(results[0]["tool_use_id"], "toolu_1");
        assert_eq!(results[1]["tool_use_id"], "toolu_2");

        let tools = request.body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["input_schema"]["type"], "object");
    }

    #[tokio::test]
    async fn content_override_is_sent_verbatim() {
        let transport = Arc::new(FixtureTransport::new());
        let adapter = adapter(&transport);
        let native = json!([
            { "type": "text", "text": "checking" },
            { "type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": { "city": "Lima" } }
        ]);
        let history = vec![
            Message::user("weather?"),
            tool_turn().with_content(native.clone()),
            Message::tool("22C", "toolu_1"),
        ];

        adapter.ensure_client().await.unwrap();
        let request = adapter.prepare_request(&history, &SendOptions::new()).await.unwrap();
        assert_eq!(request.body["messages"][1]["content"], native);
    }

    #[tokio::test]
    async fn attachments_become_image_document_and_text_blocks() {
        let transport = Arc::new(FixtureTransport::new());
        let adapter = adapter(&transport);

        let mut image = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        image.write_all(b"\x89PNG").unwrap();
        let mut notes = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        notes.write_all(b"meeting notes").unwrap();
        let mut report = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        report.write_all(b"%PDF-1.4").unwrap();

        let files: Vec<String> = [&image, &notes, &report]
            .iter()
            .map(|f| f.path().to_string_lossy().to_string())
            .collect();
        let history = vec![Message::user("summarize").with_files(files)];

        adapter.ensure_client().await.unwrap();
        let request = adapter.prepare_request(&history, &SendOptions::new()).await.unwrap();
        let blocks = request.body["messages"][0]["content"].as_array().unwrap();

        assert_eq!(blocks[0]["text"], "summarize");
        assert_eq!(blocks[1]["type"], "image");
        assert_eq!(blocks[1]["source"]["media_type"], "image/png");
        assert_eq!(blocks[2], json!({ "type": "text", "text": "meeting notes" }));
        assert_eq!(blocks[3]["type"], "document");
    }

    struct FailingLoader;

    #[async_trait]
    impl AttachmentLoader for FailingLoader {
        async fn load(&self, source: &str) -> Result<Vec<u8>> {
            Err(Error::AttachmentFetch {
                source_path: source.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn fetch_failure_aborts_the_request() {
        let transport = Arc::new(FixtureTransport::new());
        let mut context = keyed_context("anthropic", transport.clone());
        context.loader = Arc::new(FailingLoader);
        let adapter = AnthropicAdapter::new("anthropic", None, context);
        adapter.set_config(params(json!({ "model": "claude-3-5-haiku-20241022" })));

        let history = vec![Message::user("look").with_files(["https://example.com/cat.png"])];
        let err = adapter.send(&history, &SendOptions::new()).await.unwrap_err();
        assert!(matches!(err, Error::AttachmentFetch { .. }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn cache_budget_holds_for_long_histories() {
        let transport = Arc::new(FixtureTransport::new());
        let adapter = adapter(&transport);
        let mut history = vec![Message::system("sys")];
        for round in 0..8 {
            history.push(Message::user(format!("q{round}")));
            history.push(Message::assistant(format!("a{round}")));
        }

        let request = sent(&adapter, &history, &SendOptions::new()).await;
        let messages = request.body["messages"].as_array().unwrap();
        let marked = messages.iter().filter(|m| message_is_marked(m)).count();

        // The system prompt takes one unit of the budget.
        assert_eq!(marked, MAX_CACHED_MESSAGES - 1);
        assert!(message_is_marked(messages.last().unwrap()));
        assert!(request.body["system"][0].get("cache_control").is_some());
    }

    #[test]
    fn tool_use_reply_keeps_native_blocks() {
        let raw = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "stop_reason": "tool_use",
            "content": [
                { "type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": { "city": "Lima" } }
            ]
        });
        let message = parse_response(raw).unwrap();
        assert_eq!(message.text.as_deref(), Some("Calling function: get_weather"));
        assert_eq!(message.tool_calls[0].id, "toolu_1");
        assert_eq!(message.tool_calls[0].arguments_value()["city"], "Lima");
        assert_eq!(message.content.as_ref().unwrap()[0]["type"], "tool_use");
    }

    #[test]
    fn text_reply_joins_blocks() {
        let raw = json!({
            "stop_reason": "end_turn",
            "content": [
                { "type": "text", "text": "Hello, " },
                { "type": "text", "text": "world" }
            ]
        });
        let message = parse_response(raw).unwrap();
        assert_eq!(message.text.as_deref(), Some("Hello, world"));
        assert!(message.content.is_none());
        assert!(message.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn stream_and_complete_agree_on_fixture() {
        let transport = Arc::new(FixtureTransport::new());
        transport.push_complete(json!({
            "stop_reason": "end_turn",
            "content": [{ "type": "text", "text": "Hi there" }]
        }));
        transport.push_events(vec![
            json!({ "type": "message_start", "message": { "id": "msg_1" } }),
            json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "text", "text": "" } }),
            json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "Hi" } }),
            json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": " there" } }),
            json!({ "type": "content_block_stop", "index": 0 }),
            json!({ "type": "message_stop" }),
        ]);
        let adapter = adapter(&transport);
        let history = vec![Message::user("hello")];

        let complete = adapter.send(&history, &SendOptions::new()).await.unwrap();
        let streamed = adapter.send(&history, &SendOptions::new().stream(true)).await.unwrap();
        assert_eq!(
            complete.collect_text().await.unwrap(),
            streamed.collect_text().await.unwrap()
        );
    }

    #[test]
    fn stream_error_event_surfaces() {
        let err = stream_delta(json!({ "type": "error", "error": { "type": "overloaded_error" } }))
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
