//! Google Gemini adapter.
//!
//! Translates history into `contents` with `user`/`model` roles, inlines
//! attachments as base64 parts, and declares tools as `functionDeclarations`
//! with Gemini's upper-case schema types.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    AdapterContext, AdapterCore, ModelAdapter, SendOptions, TextStream, calling_function_text,
    linked_call_name, text_deltas, tool_schema, wants_stream,
};
use crate::attachment::classify;
use crate::registry::{AdapterKind, Params};
use crate::transport::{Auth, EventStream, ProviderRequest};
use crate::{Error, Message, Result, Role, ToolCall, ToolSpec};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_TOP_P: f64 = 0.95;
const DEFAULT_TOP_K: u64 = 40;

/// Attachment types Gemini accepts.
pub const SUPPORTED_FILE_TYPES: &[&str] = &[
    // images
    "image/jpeg",
    "image/png",
    "image/webp",
    // video
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/quicktime",
    "video/x-msvideo",
    "video/mpeg",
    // documents
    "text/plain",
    "text/html",
    "text/css",
    "application/javascript",
    "text/javascript",
    "application/json",
    "application/xml",
    "text/xml",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/markdown",
    "text/x-markdown",
];

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

/// A response part; Gemini discriminates parts by which field is present.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCallPart>,
}

#[derive(Debug, Deserialize)]
struct FunctionCallPart {
    name: String,
    #[serde(default)]
    args: Value,
}

impl GenerateContentResponse {
    fn into_parts(self) -> Vec<Part> {
        self.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts)
            .unwrap_or_default()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Translation
// ────────────────────────────────────────────────────────────────────────────

/// Convert a JSON schema to Gemini's dialect (upper-case `type` values).
pub fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(fields) => {
            let mut converted = serde_json::Map::new();
            for (key, value) in fields {
                let value = match (key.as_str(), value) {
                    ("type", Value::String(kind)) => Value::String(kind.to_uppercase()),
                    ("properties", Value::Object(properties)) => Value::Object(
                        properties
                            .iter()
                            .map(|(name, property)| (name.clone(), gemini_schema(property)))
                            .collect(),
                    ),
                    ("items", items) => gemini_schema(items),
                    _ => value.clone(),
                };
                converted.insert(key.clone(), value);
            }
            Value::Object(converted)
        }
        other => other.clone(),
    }
}

fn function_declaration(tool: &ToolSpec) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": gemini_schema(&tool.schema()),
    })
}

fn generation_config(params: &Params) -> Value {
    let mut config = serde_json::Map::new();
    if let Some(temperature) = params.get("temperature") {
        config.insert("temperature".to_string(), temperature.clone());
    }
    config.insert(
        "topP".to_string(),
        params.get("top_p").cloned().unwrap_or(json!(DEFAULT_TOP_P)),
    );
    config.insert(
        "topK".to_string(),
        params.get("top_k").cloned().unwrap_or(json!(DEFAULT_TOP_K)),
    );
    if let Some(max_tokens) = params.get("max_tokens") {
        config.insert("maxOutputTokens".to_string(), max_tokens.clone());
    }
    Value::Object(config)
}

/// Id for a function call; Gemini does not return one.
fn call_id(name: &str, index: usize, arguments: &str) -> String {
    let digest = md5::compute(format!("{name}:{index}:{arguments}"));
    format!("call_{}", &format!("{digest:x}")[..16])
}

// ────────────────────────────────────────────────────────────────────────────
// GoogleAdapter
// ────────────────────────────────────────────────────────────────────────────

/// Adapter for the Gemini generateContent API.
pub struct GoogleAdapter {
    core: AdapterCore,
    /// Encoded attachment parts keyed `path:mime`.
    file_cache: Mutex<HashMap<String, Value>>,
}

impl std::fmt::Debug for GoogleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleAdapter")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl GoogleAdapter {
    pub fn new(provider: impl Into<String>, base_url: Option<String>, context: AdapterContext) -> Self {
        Self {
            core: AdapterCore::new(provider, AdapterKind::Google, base_url, context),
            file_cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.file_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop every cached attachment.
    pub fn clear_file_cache(&self) {
        self.cache().clear();
    }

    /// Drop cached encodings of one file.
    pub fn remove_file_from_cache(&self, path: &str) {
        let prefix = format!("{path}:");
        self.cache().retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn cached_files(&self) -> usize {
        self.cache().len()
    }

    async fn file_part(&self, file: &str) -> Result<Value> {
        let mime = classify(file, |mime| SUPPORTED_FILE_TYPES.contains(&mime))?;
        let cache_key = format!("{file}:{mime}");
        if let Some(part) = self.cache().get(&cache_key) {
            debug!(file, "attachment served from cache");
            return Ok(part.clone());
        }

        let attachment = self.core.context().loader.attachment(file, &mime).await?;
        let part = json!({ "inlineData": { "mimeType": mime, "data": attachment.base64() } });
        self.cache().insert(cache_key, part.clone());
        Ok(part)
    }

    async fn translate(&self, history: &[Message]) -> Result<(Vec<Value>, Vec<Value>)> {
        let mut system = Vec::new();
        let mut contents = Vec::with_capacity(history.len());

        for (index, message) in history.iter().enumerate() {
            if message.role == Role::System {
                if !message.text_or_empty().is_empty() {
                    system.push(json!({ "text": message.text_or_empty() }));
                }
                continue;
            }

            if message.role == Role::Tool {
                let Some(name) = linked_call_name(history, index) else {
                    warn!(
                        provider = self.core.provider(),
                        tool_call_id = ?message.tool_call_id,
                        "skipping orphaned tool result"
                    );
                    continue;
                };
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": name,
                            "response": { "content": message.text_or_empty() }
                        }
                    }]
                }));
                continue;
            }

            let role = if message.role == Role::User { "user" } else { "model" };
            let parts = match &message.content {
                Some(content) => content.clone(),
                None => {
                    let mut parts = Vec::new();
                    if !message.text_or_empty().is_empty() {
                        parts.push(json!({ "text": message.text_or_empty() }));
                    }
                    for file in &message.files {
                        parts.push(self.file_part(file).await?);
                    }
                    if message.role == Role::Assistant {
                        parts.extend(message.invocations().map(|call| {
                            json!({
                                "functionCall": { "name": call.function.name, "args": call.arguments_value() }
                            })
                        }));
                    }
                    if parts.is_empty() {
                        debug!(index, "skipping message with no parts");
                        continue;
                    }
                    Value::Array(parts)
                }
            };
            contents.push(json!({ "role": role, "parts": parts }));
        }
        Ok((system, contents))
    }
}

fn parse_response(raw: Value) -> Result<Message> {
    let response: GenerateContentResponse =
        serde_json::from_value(raw).map_err(|e| Error::Decode(e.to_string()))?;

    let mut text = String::new();
    let mut calls = Vec::new();
    for (index, part) in response.into_parts().into_iter().enumerate() {
        if let Some(call) = part.function_call {
            let arguments = call.args.to_string();
            calls.push(ToolCall::function(
                call_id(&call.name, index, &arguments),
                call.name,
                arguments,
            ));
        } else if let Some(part) = part.text {
            text.push_str(&part);
        }
    }

    let text = calling_function_text(text, &calls);
    Ok(Message::assistant(text).with_tool_calls(calls))
}

fn stream_delta(event: Value) -> Result<Option<String>> {
    let chunk: GenerateContentResponse =
        serde_json::from_value(event).map_err(|e| Error::Decode(e.to_string()))?;
    let text: String = chunk
        .into_parts()
        .into_iter()
        .filter_map(|part| part.text)
        .collect();
    Ok(Some(text))
}

#[async_trait]
impl ModelAdapter for GoogleAdapter {
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
        let client = self.core.client()?;
        let params = self.core.request_params(options);
        let model = self.core.model(&params)?;
        let stream = wants_stream(&params, options);
        let (system, contents) = self.translate(history).await?;

        let mut body = serde_json::Map::new();
        body.insert("contents".to_string(), Value::Array(contents));
        if !system.is_empty() {
            body.insert("systemInstruction".to_string(), json!({ "parts": system }));
        }
        body.insert("generationConfig".to_string(), generation_config(&params));
        if let Some(tools) = tool_schema(history, options.tools.as_deref()) {
            let declarations: Vec<Value> = tools.iter().map(function_declaration).collect();
            body.insert(
                "tools".to_string(),
                json!([{ "functionDeclarations": declarations }]),
            );
        }

        let base = client.base_url.trim_end_matches('/');
        let url = if stream {
            format!("{base}/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("{base}/models/{model}:generateContent")
        };
        let mut request = ProviderRequest::new(url, Value::Object(body));
        request.auth = Some(Auth::Header {
            name: "x-goog-api-key".to_string(),
            key: client.api_key,
        });
        request.stream = stream;
        Ok(request)
    }

    fn handle_response(&self, raw: Value) -> Result<Message> {
        parse_response(raw)
    }

    fn handle_stream(&self, events: EventStream) -> TextStream {
        text_deltas(events, stream_delta)
    }
}
