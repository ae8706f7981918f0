//! Provider registry.
//!
//! Maps a provider name to the metadata needed to build its adapter: which
//! adapter family speaks its wire format, an optional base URL, and default
//! request parameters. Registering a "new provider" means pointing an existing
//! [`AdapterKind`] at a different endpoint with different defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::{Error, Result};

/// Free-form request parameters (`model`, `temperature`, `max_tokens`, ...).
pub type Params = serde_json::Map<String, Value>;

/// Build [`Params`] from a JSON object literal. Non-object values yield empty params.
pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

/// Adapter family that speaks a vendor's wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// OpenAI chat completions, and any endpoint compatible with it.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Google Gemini generateContent API.
    Google,
    /// OpenRouter (OpenAI wire format, Claude-aware caching).
    OpenRouter,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 4] = [
        AdapterKind::OpenAi,
        AdapterKind::Anthropic,
        AdapterKind::Google,
        AdapterKind::OpenRouter,
    ];

    /// Persisted name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            AdapterKind::OpenAi => "openai",
            AdapterKind::Anthropic => "anthropic",
            AdapterKind::Google => "google",
            AdapterKind::OpenRouter => "openrouter",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AdapterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| Error::config(format!("unknown adapter kind: {s}")))
    }
}

/// Resolved registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEntry {
    pub kind: AdapterKind,
    pub base_url: Option<String>,
    pub openai_compatible: bool,
    pub default_params: Params,
}

impl ProviderEntry {
    pub fn new(kind: AdapterKind) -> Self {
        Self {
            kind,
            base_url: None,
            openai_compatible: false,
            default_params: Params::new(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn openai_compatible(mut self) -> Self {
        self.openai_compatible = true;
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.default_params = self::params(params);
        self
    }

    /// Default model name, if the entry sets one.
    pub fn default_model(&self) -> Option<&str> {
        self.default_params.get("model").and_then(Value::as_str)
    }
}

/// Unvalidated registration, as written in config files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Adapter kind name; the OpenAI-compatible adapter when omitted.
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub openai_compatible: bool,
    #[serde(default)]
    pub params: Params,
}

impl ProviderSpec {
    /// Validate and resolve into a registry entry.
    pub fn resolve(&self) -> Result<ProviderEntry> {
        let kind = match &self.adapter {
            Some(name) => name.parse()?,
            None => AdapterKind::OpenAi,
        };
        if self.openai_compatible && kind != AdapterKind::OpenAi {
            return Err(Error::config(format!(
                "adapter '{kind}' cannot be registered as OpenAI-compatible"
            )));
        }
        Ok(ProviderEntry {
            kind,
            base_url: self.base_url.clone(),
            openai_compatible: self.openai_compatible,
            default_params: self.params.clone(),
        })
    }
}

/// Registry of known providers, keyed by name.
///
/// Shared between the factory and the application through `Arc`; lookups and
/// upserts are individually atomic.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    entries: RwLock<BTreeMap<String, ProviderEntry>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in providers.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        {
            let mut entries = registry.write();
            for (name, entry) in default_providers() {
                entries.insert(name.to_string(), entry);
            }
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ProviderEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ProviderEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace a provider from an unvalidated spec.
    ///
    /// An invalid spec leaves the registry untouched.
    pub fn register_provider(&self, name: &str, spec: &ProviderSpec) -> Result<()> {
        let entry = spec.resolve()?;
        self.register(name, entry)
    }

    /// Insert or replace a resolved entry.
    pub fn register(&self, name: &str, entry: ProviderEntry) -> Result<()> {
        if name.is_empty() || name.contains(':') {
            return Err(Error::config(format!("invalid provider name: '{name}'")));
        }
        if entry.openai_compatible && entry.kind != AdapterKind::OpenAi {
            return Err(Error::config(format!(
                "adapter '{}' cannot be registered as OpenAI-compatible",
                entry.kind
            )));
        }
        debug!(provider = name, kind = %entry.kind, "registered provider");
        self.write().insert(name.to_string(), entry);
        Ok(())
    }

    /// Look up a provider.
    pub fn get(&self, name: &str) -> Option<ProviderEntry> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn list_providers(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Providers using the given adapter kind, sorted by name.
    pub fn providers_of_kind(&self, kind: AdapterKind) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Built-in provider table.
fn default_providers() -> Vec<(&'static str, ProviderEntry)> {
    vec![
        (
            "openai",
            ProviderEntry::new(AdapterKind::OpenAi).params(json!({
                "temperature": 0.7,
                "max_tokens": 8192,
                "model": "gpt-4o-mini",
            })),
        ),
        (
            "glm",
            ProviderEntry::new(AdapterKind::OpenAi)
                .base_url("https://open.bigmodel.cn/api/paas/v4/chat/completions")
                .openai_compatible()
                .params(json!({ "temperature": 0.7, "max_tokens": 4095 })),
        ),
        (
            "qwen",
            ProviderEntry::new(AdapterKind::OpenAi)
                .base_url("https://dashscope-intl.aliyuncs.com/compatible-mode/v1")
                .openai_compatible()
                .params(json!({ "temperature": 0.7, "max_tokens": 4095 })),
        ),
        (
            "anthropic",
            ProviderEntry::new(AdapterKind::Anthropic).params(json!({
                "temperature": 0.7,
                "max_tokens": 4096,
                "model": "claude-3-5-haiku-20241022",
            })),
        ),
        (
            "deepseek",
            ProviderEntry::new(AdapterKind::OpenAi)
                .base_url("https://api.deepseek.com/beta")
                .openai_compatible()
                .params(json!({
                    "temperature": 0.7,
                    "max_tokens": 8192,
                    "model": "deepseek-chat",
                })),
        ),
        (
            "openrouter",
            ProviderEntry::new(AdapterKind::OpenRouter)
                .base_url("https://openrouter.ai/api/v1")
                .params(json!({
                    "temperature": 0.7,
                    "max_tokens": 8192,
                    "stream": false,
                    "model": "anthropic/claude-3-5-haiku-20241022",
                })),
        ),
        (
            "google",
            ProviderEntry::new(AdapterKind::Google).params(json!({
                "temperature": 0.7,
                "max_tokens": 8192,
                "model": "gemini-1.5-pro",
            })),
        ),
    ]
}
