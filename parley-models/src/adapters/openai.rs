//! OpenAI chat-completions adapter.
//!
//! Also serves every OpenAI-compatible endpoint (DeepSeek, Qwen, GLM, local
//! servers) through a registry base URL.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use super::{
    AdapterContext, AdapterCore, ModelAdapter, SendOptions, TextStream, base_body,
    calling_function_text, linked_call_name, text_deltas, tool_schema, wants_stream,
};
use crate::attachment::{classify, is_url};
use crate::registry::AdapterKind;
use crate::transport::{Auth, EventStream, ProviderRequest};
use crate::{Error, Message, Result, Role, ToolCall, ToolSpec};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Attachment types accepted as `image_url` parts.
pub const SUPPORTED_FILE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Translation (shared with OpenRouter)
// ────────────────────────────────────────────────────────────────────────────

/// Endpoint for a base URL; bases that already name the endpoint are kept.
pub(crate) fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

pub(crate) fn tool_definition(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.schema(),
        }
    })
}

async fn content_parts(core: &AdapterCore, message: &Message, supported: &[&str]) -> Result<Value> {
    if message.files.is_empty() {
        return Ok(Value::String(message.text_or_empty().to_string()));
    }

    let mut parts = Vec::with_capacity(message.files.len() + 1);
    if !message.text_or_empty().is_empty() {
        parts.push(json!({ "type": "text", "text": message.text_or_empty() }));
    }
    for file in &message.files {
        let mime = classify(file, |mime| supported.contains(&mime))?;
        let url = if is_url(file) {
            file.clone()
        } else {
            core.context().loader.attachment(file, &mime).await?.data_url()
        };
        parts.push(json!({ "type": "image_url", "image_url": { "url": url } }));
    }
    Ok(Value::Array(parts))
}

/// Translate history into chat-completions messages, skipping orphaned tool results.
pub(crate) async fn translate_messages(
    core: &AdapterCore,
    history: &[Message],
    supported: &[&str],
) -> Result<Vec<Value>> {
    let mut messages = Vec::with_capacity(history.len());
    for (index, message) in history.iter().enumerate() {
        if message.role == Role::Tool {
            if linked_call_name(history, index).is_none() {
                warn!(
                    provider = core.provider(),
                    tool_call_id = ?message.tool_call_id,
                    "skipping orphaned tool result"
                );
                continue;
            }
            messages.push(json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id,
                "content": message.text_or_empty(),
            }));
            continue;
        }

        let mut wire = serde_json::Map::new();
        wire.insert("role".to_string(), json!(message.role.as_str()));
        let content = match &message.content {
            Some(content) => content.clone(),
            None => content_parts(core, message, supported).await?,
        };
        wire.insert("content".to_string(), content);
        if let Some(name) = &message.name {
            wire.insert("name".to_string(), json!(name));
        }
        if message.role == Role::Assistant {
            let calls: Vec<&ToolCall> = message.invocations().collect();
            if !calls.is_empty() {
                wire.insert("tool_calls".to_string(), json!(calls));
            }
        }
        messages.push(Value::Object(wire));
    }
    Ok(messages)
}

/// Build a chat-completions request against the core's client.
pub(crate) async fn build_request(
    core: &AdapterCore,
    history: &[Message],
    options: &SendOptions,
    supported: &[&str],
) -> Result<ProviderRequest> {
    let client = core.client()?;
    let params = core.request_params(options);
    let model = core.model(&params)?;
    let stream = wants_stream(&params, options);

    let mut body = base_body(&params);
    body.insert("model".to_string(), json!(model));
    body.insert(
        "messages".to_string(),
        Value::Array(translate_messages(core, history, supported).await?),
    );
    body.insert("stream".to_string(), json!(stream));
    if let Some(tools) = tool_schema(history, options.tools.as_deref()) {
        let definitions: Vec<Value> = tools.iter().map(tool_definition).collect();
        body.insert("tools".to_string(), Value::Array(definitions));
    }

    let mut request = ProviderRequest::new(chat_completions_url(&client.base_url), Value::Object(body));
    request.auth = Some(Auth::Bearer(client.api_key));
    request.stream = stream;
    Ok(request)
}

/// Normalize a complete chat-completions reply.
pub(crate) fn parse_completion(raw: Value) -> Result<Message> {
    let completion: ChatCompletion =
        serde_json::from_value(raw).map_err(|e| Error::Decode(e.to_string()))?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Decode("completion has no choices".to_string()))?;

    let calls = choice.message.tool_calls.unwrap_or_default();
    let text = calling_function_text(choice.message.content.unwrap_or_default(), &calls);
    Ok(Message::assistant(text).with_tool_calls(calls))
}

/// Text delta of one streamed chunk.
pub(crate) fn chunk_delta(event: Value) -> Result<Option<String>> {
    let chunk: ChatChunk = serde_json::from_value(event).map_err(|e| Error::Decode(e.to_string()))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content))
}

// ────────────────────────────────────────────────────────────────────────────
// OpenAiAdapter
// ────────────────────────────────────────────────────────────────────────────

/// Adapter for OpenAI and OpenAI-compatible endpoints.
#[derive(Debug)]
pub struct OpenAiAdapter {
    core: AdapterCore,
}

impl OpenAiAdapter {
    pub fn new(provider: impl Into<String>, base_url: Option<String>, context: AdapterContext) -> Self {
        Self {
            core: AdapterCore::new(provider, AdapterKind::OpenAi, base_url, context),
        }
    }
}

#[async_trait]
impl ModelAdapter for OpenAiAdapter {
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

    fn handle_response(&self, raw: Value) -> Result<Message> {
        parse_completion(raw)
    }

    fn handle_stream(&self, events: EventStream) -> TextStream {
        text_deltas(events, chunk_delta)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use super::*;
    use crate::adapters::Reply;
    use crate::mock::{FixtureTransport, keyed_context};
    use crate::registry::params;

    fn adapter(transport: &Arc<FixtureTransport>) -> OpenAiAdapter {
        let adapter = OpenAiAdapter::new("openai", None, keyed_context("openai", transport.clone()));
        adapter.set_config(params(json!({ "model": "gpt-4o-mini", "temperature": 0.7 })));
        adapter
    }

    fn completion(content: Value, tool_calls: Value) -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content, "tool_calls": tool_calls },
                "finish_reason": "stop"
            }]
        })
    }

    fn chunks(parts: &[&str]) -> Vec<Value> {
        parts
            .iter()
            .map(|part| json!({ "choices": [{ "index": 0, "delta": { "content": part } }] }))
            .collect()
    }

    async fn prepared(adapter: &OpenAiAdapter, history: &[Message], options: &SendOptions) -> ProviderRequest {
        adapter.ensure_client().await.unwrap();
        adapter.prepare_request(history, options).await.unwrap()
    }

    #[test]
    fn endpoint_respects_full_base_urls() {
        assert_eq!(
            chat_completions_url("https://api.deepseek.com/beta"),
            "https://api.deepseek.com/beta/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://open.bigmodel.cn/api/paas/v4/chat/completions"),
            "https://open.bigmodel.cn/api/paas/v4/chat/completions"
        );
        assert_eq!(
            chat_completions_url("http://localhost:8080/v1/"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn translates_text_attachments_and_tool_turns() {
        let transport = Arc::new(FixtureTransport::new());
        let adapter = adapter(&transport);

        let mut image = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        image.write_all(b"png-bytes").unwrap();
        let local = image.path().to_string_lossy().to_string();

        let history = vec![
            Message::system("be brief"),
            Message::user("what is this?")
                .with_files(["https://example.com/cat.jpg", local.as_str()])
                .with_name("alice"),
            Message::assistant("").with_tool_calls(vec![ToolCall::function(
                "call_1",
                "lookup",
                r#"{"q":"cat"}"#,
            )]),
            Message::tool("a cat", "call_1"),
            Message::tool("orphan", "call_zzz"),
        ];
        let request = prepared(&adapter, &history, &SendOptions::new()).await;
        let messages = request.body["messages"].as_array().unwrap();

        assert_eq!(request.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(request.body["model"], "gpt-4o-mini");
        assert_eq!(request.body["temperature"], 0.7);
        assert_eq!(messages.len(), 4, "orphaned tool result is skipped");

        assert_eq!(messages[0], json!({ "role": "system", "content": "be brief" }));

        let parts = messages[1]["content"].as_array().unwrap();
        assert_eq!(parts[0], json!({ "type": "text", "text": "what is this?" }));
        assert_eq!(parts[1]["image_url"]["url"], "https://example.com/cat.jpg");
        let data_url = parts[2]["image_url"]["url"].as_str().unwrap();
        assert!(data_url.starts_with("data:image/png;base64,"));
        assert_eq!(messages[1]["name"], "alice");

        assert_eq!(messages[2]["tool_calls"][0]["function"]["name"], "lookup");
        assert_eq!(messages[3]["tool_call_id"], "call_1");

        // Tool activity in history brings back a best-effort schema.
        assert_eq!(request.body["tools"][0]["function"]["name"], "lookup");
    }

    #[tokio::test]
    async fn unsupported_attachment_fails_before_sending() {
        let transport = Arc::new(FixtureTransport::new());
        let adapter = adapter(&transport);
        let history = vec![Message::user("read this").with_files(["report.pdf"])];

        let err = adapter.send(&history, &SendOptions::new()).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType { .. }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn tools_only_declared_when_offered() {
        let transport = Arc::new(FixtureTransport::new());
        let adapter = adapter(&transport);
        let history = vec![Message::user("hi")];

        let request = prepared(&adapter, &history, &SendOptions::new()).await;
        assert!(request.body.get("tools").is_none());

        let tool = ToolSpec::named("get_time");
        let request = prepared(&adapter, &history, &SendOptions::new().tools(vec![tool])).await;
        assert_eq!(request.body["tools"][0]["type"], "function");
    }

    #[test]
    fn tool_only_reply_gets_calling_function_text() {
        let raw = completion(
            Value::Null,
            json!([{ "id": "call_7", "type": "function",
                     "function": { "name": "get_weather", "arguments": "{\"city\":\"Rome\"}" } }]),
        );
        let message = parse_completion(raw).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text.as_deref(), Some("Calling function: get_weather"));
        assert_eq!(message.tool_calls[0].id, "call_7");
    }

    #[test]
    fn empty_choices_is_decode_error() {
        assert!(matches!(
            parse_completion(json!({ "choices": [] })),
            Err(Error::Decode(_))
        ));
    }

    #[tokio::test]
    async fn stream_and_complete_agree_on_fixture() {
        let parts = ["The ", "answer ", "is 42."];
        let transport = Arc::new(FixtureTransport::new());
        transport.push_complete(completion(json!(parts.concat()), Value::Null));
        transport.push_events(chunks(&parts));
        let adapter = adapter(&transport);
        let history = vec![Message::user("question")];

        let complete = adapter.send(&history, &SendOptions::new()).await.unwrap();
        let streamed = adapter
            .send(&history, &SendOptions::new().stream(true))
            .await
            .unwrap();
        assert!(streamed.is_stream());

        let complete = complete.collect_text().await.unwrap();
        let streamed = streamed.collect_text().await.unwrap();
        assert_eq!(complete, streamed);

        let requests = transport.requests();
        assert_eq!(requests[0].body["stream"], false);
        assert_eq!(requests[1].body["stream"], true);
        assert!(matches!(&requests[0].auth, Some(Auth::Bearer(key)) if key.expose_secret() == "test-key"));
    }

    #[tokio::test]
    async fn call_params_override_instance_config() {
        let transport = Arc::new(FixtureTransport::new());
        transport.push_complete(completion(json!("ok"), Value::Null));
        let adapter = adapter(&transport);

        let reply = adapter
            .send(&[Message::user("hi")], &SendOptions::new().param("temperature", 0.2))
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Message(_)));
        assert_eq!(transport.requests()[0].body["temperature"], 0.2);
        assert_eq!(adapter.get_config()["temperature"], 0.7);
    }
}
