//! Chat sessions
//!
//! A [`ChatSession`] owns an ordered history, an optional system prompt and a
//! default model. [`ChatSession::send`] resolves an adapter through the
//! [`ModelFactory`], appends the user turn, and either records the complete
//! reply or hands back a live stream.
//!
//! # Example
//!
//! ```ignore
//! use parley_core::{ChatSession, SendArgs};
//!
//! let mut session = ChatSession::new(factory).with_default_model("openai:gpt-4o");
//! session.set_system_prompt("Answer in one sentence.");
//! let reply = session.send("What is Rust?", SendArgs::new()).await?;
//! println!("{}", reply.collect_text().await?);
//! ```

mod persist;

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use parley_models::{Message, ModelAdapter, ModelFactory, Params, Reply, SendOptions, ToolCall, ToolSpec};

use crate::error::Result;

/// Model a session talks to: a factory identifier or a concrete adapter.
#[derive(Debug, Clone)]
pub enum ModelRef {
    /// `"provider"` or `"provider:model"`, resolved through the factory.
    Named(String),
    Adapter(Arc<dyn ModelAdapter>),
}

impl From<&str> for ModelRef {
    fn from(identifier: &str) -> Self {
        ModelRef::Named(identifier.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(identifier: String) -> Self {
        ModelRef::Named(identifier)
    }
}

impl From<Arc<dyn ModelAdapter>> for ModelRef {
    fn from(adapter: Arc<dyn ModelAdapter>) -> Self {
        ModelRef::Adapter(adapter)
    }
}

/// Attachments, offered tools and priority of a user turn.
#[derive(Debug, Clone)]
pub struct UserTurn {
    files: Vec<String>,
    tools: Vec<ToolSpec>,
    priority: f64,
}

impl Default for UserTurn {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            tools: Vec::new(),
            priority: 1.0,
        }
    }
}

impl UserTurn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Offered tools are recorded as `tool:<name>` calls on the message.
    fn into_message(self, text: impl Into<String>) -> Message {
        let offered: Vec<ToolCall> = self.tools.iter().map(ToolSpec::to_tool_call).collect();
        Message::user(text)
            .with_files(self.files)
            .with_tool_calls(offered)
            .with_priority(self.priority)
    }
}

/// Per-call arguments for [`ChatSession::send`].
#[derive(Debug, Clone, Default)]
pub struct SendArgs {
    model: Option<ModelRef>,
    turn: UserTurn,
    stream: Option<bool>,
    params: Params,
}

impl SendArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this model instead of the session default.
    pub fn model(mut self, model: impl Into<ModelRef>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.turn = self.turn.files(files);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.turn = self.turn.tools(tools);
        self
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.turn = self.turn.priority(priority);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Extra request parameter for this call only.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Ordered conversation with one logical owner.
#[derive(Debug)]
pub struct ChatSession {
    factory: Arc<ModelFactory>,
    history: Vec<Message>,
    system_prompt: Option<String>,
    default_model: Option<ModelRef>,
    /// Stored and persisted; not enforced.
    max_history_token: u64,
    stream: bool,
}

impl ChatSession {
    /// Create an empty session resolving models through `factory`.
    pub fn new(factory: Arc<ModelFactory>) -> Self {
        Self {
            factory,
            history: Vec::new(),
            system_prompt: None,
            default_model: None,
            max_history_token: 0,
            stream: false,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<ModelRef>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn factory(&self) -> &Arc<ModelFactory> {
        &self.factory
    }

    // ────────────────────────────────────────────────────────────────────────
    // Settings
    // ────────────────────────────────────────────────────────────────────────

    /// Replace the system prompt. It is prepended to each request, never stored in history.
    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        self.system_prompt = Some(text.into());
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn set_default_model(&mut self, model: Option<ModelRef>) {
        self.default_model = model;
    }

    pub fn default_model(&self) -> Option<&ModelRef> {
        self.default_model.as_ref()
    }

    pub fn set_stream(&mut self, stream: bool) {
        self.stream = stream;
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    pub fn set_max_history_token(&mut self, max_history_token: u64) {
        self.max_history_token = max_history_token;
    }

    pub fn max_history_token(&self) -> u64 {
        self.max_history_token
    }

    // ────────────────────────────────────────────────────────────────────────
    // History
    // ────────────────────────────────────────────────────────────────────────

    /// Append a message as-is.
    pub fn add_message(&mut self, message: Message) -> &Message {
        self.history.push(message);
        &self.history[self.history.len() - 1]
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) -> &Message {
        self.add_message(Message::user(text))
    }

    /// Append a user message carrying attachments, offered tools or a priority.
    pub fn add_user_turn(&mut self, text: impl Into<String>, turn: UserTurn) -> &Message {
        self.add_message(turn.into_message(text))
    }

    pub fn add_assistant_message(
        &mut self,
        text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> &Message {
        self.add_message(Message::assistant(text).with_tool_calls(tool_calls))
    }

    /// Append a tool result. Strings are stored verbatim, anything else as JSON text.
    pub fn add_tool_message(
        &mut self,
        result: impl Into<Value>,
        tool_call_id: impl Into<String>,
    ) -> &Message {
        let text = match result.into() {
            Value::String(text) => text,
            other => other.to_string(),
        };
        self.add_message(Message::tool(text, tool_call_id))
    }

    pub fn get_history(&self) -> &[Message] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Number of complete (user, assistant) rounds.
    pub fn get_current_round(&self) -> usize {
        self.history.len() / 2
    }

    /// Keep only the last `rounds` rounds.
    ///
    /// Rounds are positional pairs: entries `2r` and `2r + 1`. Tool turns
    /// interleaved in history count as ordinary entries.
    pub fn truncate_history(&mut self, rounds: usize) {
        let keep = rounds.saturating_mul(2);
        if keep < self.history.len() {
            let drop = self.history.len() - keep;
            self.history.drain(..drop);
            debug!(dropped = drop, kept = keep, "truncated history");
        }
    }

    /// Set the priority of both messages in a round. Out-of-range rounds are ignored.
    pub fn set_priority(&mut self, round: i64, priority: f64) {
        let Ok(round) = usize::try_from(round) else {
            return;
        };
        if round >= self.get_current_round() {
            return;
        }
        let index = round * 2;
        for message in &mut self.history[index..index + 2] {
            message.priority = priority;
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Sending
    // ────────────────────────────────────────────────────────────────────────

    fn resolve_model(&self, explicit: Option<ModelRef>) -> Result<Arc<dyn ModelAdapter>> {
        match explicit.or_else(|| self.default_model.clone()) {
            Some(ModelRef::Adapter(adapter)) => Ok(adapter),
            Some(ModelRef::Named(identifier)) => Ok(self.factory.get_model(&identifier, Params::new())?),
            None => Err(parley_models::Error::Configuration(
                "no model specified and no default model set".to_string(),
            )
            .into()),
        }
    }

    /// History as sent: the system prompt, if set, first.
    fn outgoing_history(&self) -> Vec<Message> {
        let mut outgoing = Vec::with_capacity(self.history.len() + 1);
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            outgoing.push(Message::system(prompt));
        }
        outgoing.extend(self.history.iter().cloned());
        outgoing
    }

    /// Send a user turn and collect the reply.
    ///
    /// A complete reply is appended to history and returned. A streaming
    /// reply is returned untouched and not recorded; only the user turn is.
    pub async fn send(&mut self, text: impl Into<String>, args: SendArgs) -> Result<Reply> {
        let adapter = self.resolve_model(args.model)?;

        let tools = args.turn.tools.clone();
        self.add_user_turn(text, args.turn);

        let mut options = SendOptions::new();
        options.params = args.params;
        if !tools.is_empty() {
            options = options.tools(tools);
        }
        match args.stream {
            Some(stream) => options = options.stream(stream),
            None if self.stream => options = options.stream(true),
            None => {}
        }

        debug!(
            provider = adapter.provider(),
            messages = self.history.len(),
            "sending chat turn"
        );
        let reply = adapter.send(&self.outgoing_history(), &options).await?;
        match reply {
            Reply::Message(message) => {
                self.add_message(message.clone());
                Ok(Reply::Message(message))
            }
            stream @ Reply::Stream(_) => Ok(stream),
        }
    }
}
