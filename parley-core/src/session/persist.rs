//! JSON session documents
//!
//! ```text
//! {
//!   "system_prompt": string | null,
//!   "history": [ { role, text, priority, files, timestamp, tool_calls, tool_call_id, name } ],
//!   "max_history_token": integer,
//!   "stream": boolean,
//!   "default_model": null | "provider[:model]" | { "type": "<adapter kind>", "config": { ... } }
//! }
//! ```
//!
//! Vendor-native `content` payloads are not persisted.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use parley_models::{AdapterKind, Message, Params, Role, ToolCall, now_seconds};

use super::{ChatSession, ModelRef};
use crate::error::{Result, SessionError};

#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    history: Vec<StoredMessage>,
    #[serde(default)]
    max_history_token: u64,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    default_model: Option<StoredModel>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    role: Role,
    #[serde(default)]
    text: Option<String>,
    #[serde(default = "default_priority")]
    priority: f64,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default = "now_seconds")]
    timestamp: f64,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn default_priority() -> f64 {
    1.0
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredModel {
    Identifier(String),
    Record {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        config: Params,
    },
}

impl From<&Message> for StoredMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            text: message.text.clone(),
            priority: message.priority,
            files: message.files.clone(),
            timestamp: message.timestamp,
            tool_calls: message.tool_calls.clone(),
            tool_call_id: message.tool_call_id.clone(),
            name: message.name.clone(),
        }
    }
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        Message {
            role: stored.role,
            text: stored.text,
            files: stored.files,
            priority: stored.priority,
            timestamp: stored.timestamp,
            tool_calls: stored.tool_calls,
            tool_call_id: stored.tool_call_id,
            name: stored.name,
            content: None,
        }
    }
}

impl From<&ModelRef> for StoredModel {
    fn from(model: &ModelRef) -> Self {
        match model {
            ModelRef::Named(identifier) => StoredModel::Identifier(identifier.clone()),
            ModelRef::Adapter(adapter) => StoredModel::Record {
                kind: adapter.kind().name().to_string(),
                config: adapter.get_config(),
            },
        }
    }
}

impl ChatSession {
    /// Write the session document to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let document = SessionDocument {
            system_prompt: self.system_prompt.clone(),
            history: self.history.iter().map(StoredMessage::from).collect(),
            max_history_token: self.max_history_token,
            stream: self.stream,
            default_model: self.default_model.as_ref().map(StoredModel::from),
        };
        let json = serde_json::to_string_pretty(&document).map_err(SessionError::Encode)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), messages = self.history.len(), "saved session");
        Ok(())
    }

    /// Replace this session's state with the document at `path`.
    ///
    /// All-or-nothing: on any error the session is left unchanged.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SessionError::NotFound(path.to_path_buf()),
            _ => SessionError::Io(e),
        })?;
        let document: SessionDocument =
            serde_json::from_str(&raw).map_err(|source| SessionError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let default_model = match document.default_model {
            None => None,
            Some(StoredModel::Identifier(identifier)) if identifier.is_empty() => None,
            Some(StoredModel::Identifier(identifier)) => Some(ModelRef::Named(identifier)),
            Some(StoredModel::Record { kind, config }) => {
                let kind: AdapterKind = kind.parse()?;
                Some(ModelRef::Adapter(self.factory.adapter_from_record(kind, config)?))
            }
        };

        self.system_prompt = document.system_prompt;
        self.history = document.history.into_iter().map(Message::from).collect();
        self.max_history_token = document.max_history_token;
        self.stream = document.stream;
        self.default_model = default_model;
        info!(path = %path.display(), messages = self.history.len(), "loaded session");
        Ok(())
    }
}
