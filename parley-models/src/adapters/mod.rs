//! Model adapter contract and vendor implementations.
//!
//! Every vendor family implements [`ModelAdapter`]. Its public
//! [`send`](ModelAdapter::send) is a fixed template:
//!
//! ```text
//! ensure_client ─▶ prepare_request ─▶ before_send ─▶ send_raw ─┬─▶ handle_response ─▶ Message
//!                                                              └─▶ handle_stream   ─▶ TextStream
//! ```
//!
//! Adapters customize individual steps and never reorder them.
//!
//! # Example
//!
//! ```ignore
//! use parley_models::adapters::{ModelAdapter, SendOptions};
//! use parley_models::Message;
//!
//! async fn ask(adapter: &dyn ModelAdapter) -> parley_models::Result<String> {
//!     let history = vec![Message::user("Hello!")];
//!     adapter.send(&history, &SendOptions::new()).await?.collect_text().await
//! }
//! ```

mod anthropic;
mod google;
mod openai;
mod openrouter;
mod tools;

use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_stream::Stream;
use tracing::debug;

pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAiAdapter;
pub use openrouter::OpenRouterAdapter;
pub use tools::{has_tool_activity, linked_call_name, tool_schema};

use crate::attachment::{AttachmentLoader, DefaultLoader};
use crate::keys::{ApiKey, KeyManager};
use crate::registry::{AdapterKind, Params};
use crate::transport::{EventStream, HttpTransport, ProviderRequest, RawResponse, Transport};
use crate::{Error, Message, Result, ToolSpec};

/// Incremental text deltas of a streaming reply.
///
/// Lazily pulled: nothing is read from the vendor until the caller polls it.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Result of a send: a complete message or a live text stream.
pub enum Reply {
    Message(Message),
    Stream(TextStream),
}

impl Reply {
    pub fn into_message(self) -> Option<Message> {
        match self {
            Reply::Message(message) => Some(message),
            Reply::Stream(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Reply::Stream(_))
    }

    /// Full reply text: the message text, or every stream delta concatenated.
    pub async fn collect_text(self) -> Result<String> {
        match self {
            Reply::Message(message) => Ok(message.text.unwrap_or_default()),
            Reply::Stream(mut stream) => {
                let mut text = String::new();
                while let Some(delta) = stream.next().await {
                    text.push_str(&delta?);
                }
                Ok(text)
            }
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Reply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Tools offered for this call.
    pub tools: Option<Vec<ToolSpec>>,
    /// Overrides the configured `stream` flag.
    pub stream: Option<bool>,
    /// Parameter overrides for this call only.
    pub params: Params,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared adapter state
// ────────────────────────────────────────────────────────────────────────────

/// Collaborators shared by every adapter a factory builds.
#[derive(Clone)]
pub struct AdapterContext {
    pub keys: Arc<KeyManager>,
    pub transport: Arc<dyn Transport>,
    pub loader: Arc<dyn AttachmentLoader>,
}

impl AdapterContext {
    pub fn new(
        keys: Arc<KeyManager>,
        transport: Arc<dyn Transport>,
        loader: Arc<dyn AttachmentLoader>,
    ) -> Self {
        Self {
            keys,
            transport,
            loader,
        }
    }

    /// HTTP transport and default loader around the given key pool.
    pub fn http(keys: Arc<KeyManager>) -> Self {
        Self::new(keys, Arc::new(HttpTransport::new()), Arc::new(DefaultLoader::new()))
    }
}

impl std::fmt::Debug for AdapterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterContext")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

/// Resolved client state: the credential and base URL in use.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub api_key: ApiKey,
    pub base_url: String,
}

/// State every adapter carries: identity, config, credentials, collaborators.
///
/// Config is overwrite-last-wins; instances may be shared between sessions.
pub struct AdapterCore {
    provider: String,
    kind: AdapterKind,
    base_url: Option<String>,
    config: RwLock<Params>,
    api_key: RwLock<Option<ApiKey>>,
    client: RwLock<Option<ClientHandle>>,
    context: AdapterContext,
}

impl std::fmt::Debug for AdapterCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterCore")
            .field("provider", &self.provider)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn write<T>(lock: &RwLock<T>, value: T) {
    *lock.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
}

impl AdapterCore {
    pub fn new(
        provider: impl Into<String>,
        kind: AdapterKind,
        base_url: Option<String>,
        context: AdapterContext,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            base_url,
            config: RwLock::new(Params::new()),
            api_key: RwLock::new(None),
            client: RwLock::new(None),
            context,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn kind(&self) -> AdapterKind {
        self.kind
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn context(&self) -> &AdapterContext {
        &self.context
    }

    pub fn config(&self) -> Params {
        read(&self.config)
    }

    /// Merge params into the live config; later values win.
    pub fn merge_config(&self, params: Params) {
        let mut config = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        config.extend(params);
    }

    /// Set an explicit key and drop the current client so it is rebuilt with it.
    pub fn set_api_key(&self, key: ApiKey) {
        write(&self.api_key, Some(key));
        write(&self.client, None);
    }

    /// Build the client on first use. Idempotent.
    ///
    /// The write lock is held while a key is pulled, so concurrent first calls
    /// draw from the pool once.
    pub fn ensure_client(&self, default_base_url: &str) -> Result<ClientHandle> {
        if let Some(client) = read(&self.client) {
            return Ok(client);
        }

        let mut slot = self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let api_key = match read(&self.api_key) {
            Some(key) => key,
            None => self
                .context
                .keys
                .get_key(&self.provider)
                .ok_or_else(|| Error::Auth {
                    provider: self.provider.clone(),
                })?,
        };
        let client = ClientHandle {
            api_key,
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url.to_string()),
        };
        debug!(provider = %self.provider, base_url = %client.base_url, "client ready");
        *slot = Some(client.clone());
        Ok(client)
    }

    /// The client built by [`ensure_client`](Self::ensure_client).
    pub fn client(&self) -> Result<ClientHandle> {
        read(&self.client).ok_or_else(|| Error::Auth {
            provider: self.provider.clone(),
        })
    }

    /// Instance config with this call's overrides applied.
    pub fn request_params(&self, options: &SendOptions) -> Params {
        let mut params = self.config();
        params.extend(options.params.clone());
        params
    }

    /// Model name for a request, required by every vendor.
    pub fn model(&self, params: &Params) -> Result<String> {
        params
            .get("model")
            .and_then(Value::as_str)
            .filter(|model| !model.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::config(format!("no model configured for provider '{}'", self.provider))
            })
    }
}

/// Whether a call streams: explicit option, else the `stream` param, else no.
pub fn wants_stream(params: &Params, options: &SendOptions) -> bool {
    options
        .stream
        .or_else(|| params.get("stream").and_then(Value::as_bool))
        .unwrap_or(false)
}

/// Request body from params, dropping keys that are not vendor request fields.
pub(crate) fn base_body(params: &Params) -> serde_json::Map<String, Value> {
    let mut body = params.clone();
    body.remove("stream");
    body
}

/// Map decoded stream events to non-empty text deltas.
pub fn text_deltas(events: EventStream, decode: fn(Value) -> Result<Option<String>>) -> TextStream {
    Box::pin(events.filter_map(move |event| async move {
        match event.and_then(decode) {
            Ok(Some(text)) if !text.is_empty() => Some(Ok(text)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    }))
}

/// Text for an assistant turn that only calls tools.
pub(crate) fn calling_function_text(text: String, calls: &[crate::ToolCall]) -> String {
    match calls.first() {
        Some(call) if text.is_empty() => format!("Calling function: {}", call.function.name),
        _ => text,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ModelAdapter
// ────────────────────────────────────────────────────────────────────────────

/// Vendor adapter contract.
///
/// # Required Methods
///
/// - [`core`](ModelAdapter::core) - shared identity, config, and credential state
/// - [`ensure_client`](ModelAdapter::ensure_client) - obtain a credential and client
/// - [`prepare_request`](ModelAdapter::prepare_request) - translate history to the wire shape
/// - [`handle_response`](ModelAdapter::handle_response) - normalize a complete reply
/// - [`handle_stream`](ModelAdapter::handle_stream) - map vendor events to text deltas
///
/// # Optional Methods
///
/// - [`before_send`](ModelAdapter::before_send) - last-moment request mutation (identity by default)
/// - [`send_raw`](ModelAdapter::send_raw) - dispatch through the shared transport
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    fn core(&self) -> &AdapterCore;

    /// Provider name used for key lookup (e.g. "openai", "deepseek").
    fn provider(&self) -> &str {
        self.core().provider()
    }

    fn kind(&self) -> AdapterKind {
        self.core().kind()
    }

    fn get_config(&self) -> Params {
        self.core().config()
    }

    /// Merge params into the live config.
    fn set_config(&self, params: Params) {
        self.core().merge_config(params)
    }

    /// Use this key instead of asking the key pool.
    fn set_api_key(&self, key: ApiKey) {
        self.core().set_api_key(key)
    }

    fn supports_files(&self) -> bool {
        false
    }

    fn supports_tools(&self) -> bool {
        false
    }

    /// Accepted attachment MIME types; empty accepts anything.
    fn supported_file_types(&self) -> &[&str] {
        &[]
    }

    fn supports_file_type(&self, mime: &str) -> bool {
        let supported = self.supported_file_types();
        supported.is_empty() || supported.contains(&mime)
    }

    /// Known model names; empty accepts any model.
    fn supported_models(&self) -> &[&str] {
        &[]
    }

    fn supports_model(&self, model: &str) -> bool {
        let supported = self.supported_models();
        supported.is_empty() || supported.contains(&model)
    }

    async fn ensure_client(&self) -> Result<()>;

    async fn prepare_request(
        &self,
        history: &[Message],
        options: &SendOptions,
    ) -> Result<ProviderRequest>;

    fn before_send(&self, _history: &[Message], request: ProviderRequest) -> ProviderRequest {
        request
    }

    async fn send_raw(&self, request: ProviderRequest) -> Result<RawResponse> {
        self.core().context().transport.execute(request).await
    }

    fn handle_response(&self, raw: Value) -> Result<Message>;

    fn handle_stream(&self, events: EventStream) -> TextStream;

    /// Run the full send pipeline.
    async fn send(&self, history: &[Message], options: &SendOptions) -> Result<Reply> {
        self.ensure_client().await?;
        let request = self.prepare_request(history, options).await?;
        let request = self.before_send(history, request);
        let streaming = request.stream;
        debug!(provider = self.provider(), streaming, "dispatching request");

        match self.send_raw(request).await? {
            RawResponse::Events(events) if streaming => Ok(Reply::Stream(self.handle_stream(events))),
            RawResponse::Complete(body) if !streaming => {
                Ok(Reply::Message(self.handle_response(body)?))
            }
            other => Err(Error::Decode(format!(
                "expected a {} response, got {other:?}",
                if streaming { "streaming" } else { "complete" }
            ))),
        }
    }
}

impl std::fmt::Debug for dyn ModelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAdapter")
            .field("provider", &self.provider())
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::StaticSource;
    use crate::mock::FixtureTransport;
    use crate::registry::params;
    use serde_json::json;

    fn core(keys: KeyManager) -> AdapterCore {
        let context = AdapterContext::new(
            Arc::new(keys),
            Arc::new(FixtureTransport::new()),
            Arc::new(DefaultLoader::new()),
        );
        AdapterCore::new("openai", AdapterKind::OpenAi, None, context)
    }

    #[test]
    fn ensure_client_pulls_key_from_pool() {
        let keys = KeyManager::with_source(Arc::new(StaticSource::new()));
        keys.add_key("openai", "sk-pool");
        let core = core(keys);

        let client = core.ensure_client("https://api.openai.com/v1").unwrap();
        assert_eq!(client.api_key.expose_secret(), "sk-pool");
        assert_eq!(client.base_url, "https://api.openai.com/v1");

        // Idempotent: the pool is not asked again.
        core.ensure_client("https://api.openai.com/v1").unwrap();
        assert_eq!(core.context().keys.get_usage_counts("openai")["sk-pool"], 1);
    }

    #[test]
    fn concurrent_first_calls_draw_one_key() {
        let keys = KeyManager::with_source(Arc::new(StaticSource::new()));
        keys.add_key("openai", "sk-a");
        keys.add_key("openai", "sk-b");
        let core = core(keys);

        let clients: Vec<ClientHandle> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| core.ensure_client("https://api.openai.com/v1").unwrap()))
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let first = clients[0].api_key.expose_secret().to_string();
        assert!(clients.iter().all(|client| client.api_key.expose_secret() == first));
        let total: u64 = core.context().keys.get_usage_counts("openai").values().sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn ensure_client_without_key_is_auth_error() {
        let core = core(KeyManager::with_source(Arc::new(StaticSource::new())));
        let err = core.ensure_client("https://api.openai.com/v1").unwrap_err();
        assert!(matches!(err, Error::Auth { provider } if provider == "openai"));
    }

    #[test]
    fn explicit_key_bypasses_pool() {
        let core = core(KeyManager::with_source(Arc::new(StaticSource::new())));
        core.set_api_key(ApiKey::new("sk-explicit"));
        let client = core.ensure_client("https://api.openai.com/v1").unwrap();
        assert_eq!(client.api_key.expose_secret(), "sk-explicit");
    }

    #[test]
    fn call_overrides_win_over_config() {
        let core = core(KeyManager::with_source(Arc::new(StaticSource::new())));
        core.merge_config(params(json!({ "temperature": 0.7, "model": "gpt-4o" })));

        let options = SendOptions::new().param("temperature", 0.1);
        let effective = core.request_params(&options);
        assert_eq!(effective["temperature"], 0.1);
        assert_eq!(effective["model"], "gpt-4o");

        // The instance config itself is untouched.
        assert_eq!(core.config()["temperature"], 0.7);
    }

    #[test]
    fn stream_flag_precedence() {
        let config = params(json!({ "stream": true }));
        assert!(wants_stream(&config, &SendOptions::new()));
        assert!(!wants_stream(&config, &SendOptions::new().stream(false)));
        assert!(!wants_stream(&Params::new(), &SendOptions::new()));
    }

    #[test]
    fn missing_model_is_configuration_error() {
        let core = core(KeyManager::with_source(Arc::new(StaticSource::new())));
        let err = core.model(&Params::new()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn collect_text_concatenates_stream() {
        let chunks = vec![Ok("Hel".to_string()), Ok("lo".to_string())];
        let reply = Reply::Stream(Box::pin(tokio_stream::iter(chunks)));
        assert_eq!(reply.collect_text().await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn text_deltas_skip_empty_events() {
        let events: EventStream = Box::pin(tokio_stream::iter(vec![
            Ok(json!({ "t": "a" })),
            Ok(json!({})),
            Ok(json!({ "t": "b" })),
        ]));
        fn decode(event: Value) -> Result<Option<String>> {
            Ok(event.get("t").and_then(Value::as_str).map(str::to_string))
        }
        let text = Reply::Stream(text_deltas(events, decode)).collect_text().await.unwrap();
        assert_eq!(text, "ab");
    }
}
