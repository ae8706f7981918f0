//! Conversation message model shared by every adapter.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of tool-call ids that record a tool offered on a user turn.
pub const OFFERED_TOOL_PREFIX: &str = "tool:";

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message setting context/behavior.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
    /// Tool/function result.
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function name plus JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON document string.
    pub arguments: String,
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Always `"function"` for the vendors supported here.
    #[serde(rename = "type", default = "default_call_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Create a function tool call.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: default_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Whether this entry records a tool offered to the model rather than an invocation.
    pub fn is_offered_tool(&self) -> bool {
        self.id.starts_with(OFFERED_TOOL_PREFIX)
    }

    /// Decode the JSON arguments, treating malformed or empty input as an empty object.
    pub fn arguments_value(&self) -> Value {
        serde_json::from_str(&self.function.arguments)
            .unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema object for the arguments.
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolSpec {
    /// Create a tool with an argument schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            required: Vec::new(),
        }
    }

    /// Create a tool whose arguments are unknown (empty object schema).
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, "", empty_object_schema())
    }

    /// Set required argument names.
    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = names.into_iter().map(Into::into).collect();
        self
    }

    /// Full argument schema, with `required` folded in when set.
    pub fn schema(&self) -> Value {
        let mut schema = match &self.parameters {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        schema
            .entry("type")
            .or_insert_with(|| Value::String("object".to_string()));
        schema
            .entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
        if !self.required.is_empty() {
            schema.insert("required".to_string(), serde_json::json!(self.required));
        }
        Value::Object(schema)
    }

    /// Record this tool on a user turn.
    pub fn to_tool_call(&self) -> ToolCall {
        let record = serde_json::json!({
            "description": self.description,
            "parameters": self.schema(),
        });
        ToolCall::function(
            format!("{OFFERED_TOOL_PREFIX}{}", self.name),
            self.name.clone(),
            record.to_string(),
        )
    }

    /// Recover a tool recorded by [`to_tool_call`](Self::to_tool_call).
    pub fn from_tool_call(call: &ToolCall) -> Option<Self> {
        if !call.is_offered_tool() {
            return None;
        }
        let record = call.arguments_value();
        let description = record
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let parameters = record
            .get("parameters")
            .cloned()
            .unwrap_or_else(empty_object_schema);
        Some(Self::new(call.function.name.clone(), description, parameters))
    }
}

/// One conversational unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub text: Option<String>,
    /// Local paths or URLs, in attachment order.
    #[serde(default)]
    pub files: Vec<String>,
    /// Caller-assigned weight; stored, never interpreted.
    #[serde(default = "default_priority")]
    pub priority: f64,
    /// Seconds since the Unix epoch.
    #[serde(default = "now_seconds")]
    pub timestamp: f64,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Vendor-native payload that replaces `text`/`files` translation when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

fn default_priority() -> f64 {
    1.0
}

/// Current time as fractional seconds since the Unix epoch.
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl Message {
    /// Create a message with the given role and text.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: Some(text.into()),
            files: Vec::new(),
            priority: default_priority(),
            timestamp: now_seconds(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            content: None,
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Create a tool result message.
    pub fn tool(text: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut message = Self::new(Role::Tool, text);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = Some(content);
        self
    }

    /// Text content, or an empty string when unset.
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// Tool calls that are real invocations (excludes tools offered on user turns).
    pub fn invocations(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_calls.iter().filter(|call| !call.is_offered_tool())
    }
}
