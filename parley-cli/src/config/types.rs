use std::collections::BTreeMap;

use parley_models::ProviderSpec;
use serde::{Deserialize, Serialize};

/// Model used when no config layer names one.
pub const DEFAULT_MODEL: &str = "openai";

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawParleyConfig {
    #[serde(default)]
    pub session: RawSessionConfig,

    #[serde(default)]
    pub keys: KeysConfig,

    /// Provider registrations layered over the built-in table
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSpec>,
}

/// Session defaults as stored in TOML (optional fields for proper merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSessionConfig {
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    pub stream: Option<bool>,
    pub max_history_token: Option<u64>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParleyConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub keys: KeysConfig,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// `provider` or `provider:model` for new sessions
    pub default_model: String,

    /// System prompt for new sessions
    pub system_prompt: Option<String>,

    /// Stream replies by default
    pub stream: bool,

    /// Stored with saved sessions
    pub max_history_token: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
            stream: false,
            max_history_token: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KeysConfig {
    /// One-shot seed pinning the first key lookup
    pub seed: Option<String>,
}
