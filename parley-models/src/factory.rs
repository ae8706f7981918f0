//! Adapter factory.
//!
//! Resolves `"provider"` or `"provider:model"` identifiers against a
//! [`ProviderRegistry`] and memoizes one adapter instance per distinct
//! identifier. Config precedence, lowest first:
//!
//! ```text
//! registry defaults  <  model from identifier  <  stored instance config  <  call overrides
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use parley_models::{KeyManager, ModelFactory, ProviderRegistry};
//! use parley_models::registry::params;
//! use serde_json::json;
//!
//! let factory = ModelFactory::http(Arc::new(ProviderRegistry::with_defaults()), Arc::new(KeyManager::new()));
//! let adapter = factory.get_model("openai:gpt-4o", params(json!({ "temperature": 0.2 })))?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::adapters::{
    AdapterContext, AnthropicAdapter, GoogleAdapter, ModelAdapter, OpenAiAdapter, OpenRouterAdapter,
};
use crate::keys::KeyManager;
use crate::registry::{AdapterKind, Params, ProviderEntry, ProviderRegistry};
use crate::{Error, Result};

/// Split an identifier into provider and optional model. An empty model is no model.
pub fn parse_identifier(identifier: &str) -> (&str, Option<&str>) {
    match identifier.split_once(':') {
        Some((provider, model)) if !model.is_empty() => (provider, Some(model)),
        Some((provider, _)) => (provider, None),
        None => (identifier, None),
    }
}

/// Builds and memoizes adapters for registered providers.
pub struct ModelFactory {
    registry: Arc<ProviderRegistry>,
    context: AdapterContext,
    instances: Mutex<HashMap<String, Arc<dyn ModelAdapter>>>,
}

impl std::fmt::Debug for ModelFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelFactory")
            .field("registry", &self.registry)
            .field("cached", &self.instances().len())
            .finish_non_exhaustive()
    }
}

impl ModelFactory {
    pub fn new(registry: Arc<ProviderRegistry>, context: AdapterContext) -> Self {
        Self {
            registry,
            context,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Factory whose adapters talk HTTP and draw keys from `keys`.
    pub fn http(registry: Arc<ProviderRegistry>, keys: Arc<KeyManager>) -> Self {
        Self::new(registry, AdapterContext::http(keys))
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &AdapterContext {
        &self.context
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn ModelAdapter>>> {
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adapter for `identifier`, created on first use.
    ///
    /// A repeated identifier returns the same instance with `overrides`
    /// merged into its live config.
    pub fn get_model(&self, identifier: &str, overrides: Params) -> Result<Arc<dyn ModelAdapter>> {
        let mut instances = self.instances();
        if let Some(adapter) = instances.get(identifier) {
            debug!(identifier, "factory cache hit");
            if !overrides.is_empty() {
                adapter.set_config(overrides);
            }
            return Ok(adapter.clone());
        }

        let (provider, model) = parse_identifier(identifier);
        let entry = self
            .registry
            .get(provider)
            .ok_or_else(|| Error::config(format!("unknown provider: '{provider}'")))?;

        let adapter = self.build(provider, &entry);
        if let Some(model) = model {
            adapter.set_config(Params::from_iter([("model".to_string(), serde_json::Value::from(model))]));
        }
        adapter.set_config(overrides);

        debug!(identifier, provider, kind = %entry.kind, "factory cache miss");
        instances.insert(identifier.to_string(), adapter.clone());
        Ok(adapter)
    }

    /// Merge params into the instance for `identifier`, creating it if needed.
    pub fn set_model_config(&self, identifier: &str, params: Params) -> Result<()> {
        self.get_model(identifier, params).map(|_| ())
    }

    /// Rebuild a persisted `{type, config}` model.
    ///
    /// Uses the provider named after the kind if registered, else the first
    /// provider of that kind by name. The instance is not memoized.
    pub fn adapter_from_record(&self, kind: AdapterKind, config: Params) -> Result<Arc<dyn ModelAdapter>> {
        let candidates = self.registry.providers_of_kind(kind);
        let provider = candidates
            .iter()
            .find(|name| name.as_str() == kind.name())
            .or_else(|| candidates.first())
            .ok_or_else(|| Error::config(format!("no provider registered for adapter '{kind}'")))?;
        let entry = self
            .registry
            .get(provider)
            .ok_or_else(|| Error::config(format!("unknown provider: '{provider}'")))?;

        let adapter = self.build(provider, &entry);
        adapter.set_config(config);
        Ok(adapter)
    }

    /// Drop every memoized adapter.
    pub fn clear_cache(&self) {
        self.instances().clear();
    }

    pub fn cached_identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self.instances().keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    fn build(&self, provider: &str, entry: &ProviderEntry) -> Arc<dyn ModelAdapter> {
        let base_url = entry.base_url.clone();
        let context = self.context.clone();
        let adapter: Arc<dyn ModelAdapter> = match entry.kind {
            AdapterKind::OpenAi => Arc::new(OpenAiAdapter::new(provider, base_url, context)),
            AdapterKind::Anthropic => Arc::new(AnthropicAdapter::new(provider, base_url, context)),
            AdapterKind::Google => Arc::new(GoogleAdapter::new(provider, base_url, context)),
            AdapterKind::OpenRouter => Arc::new(OpenRouterAdapter::new(provider, base_url, context)),
        };
        adapter.set_config(entry.default_params.clone());
        adapter
    }
}
