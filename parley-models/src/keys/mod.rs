//! API key pool with rotation.
//!
//! [`KeyManager`] holds any number of keys per provider and hands them out
//! least-used first, so load is spread across keys. A one-shot seed pins the
//! next selection to a reproducible key for testing or routing.
//!
//! Keys are read lazily from a [`KeySource`]. The default source is the
//! process environment, where `<PROVIDER>_KEY` holds a comma-separated list.
//!
//! # Example
//!
//! ```ignore
//! use parley_models::keys::KeyManager;
//!
//! let keys = KeyManager::new();
//! keys.add_key("openai", "sk-one");
//! keys.add_key("openai", "sk-two");
//!
//! let key = keys.get_key("openai").expect("key");
//! ```

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::seq::SliceRandom;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

/// A secure API key that prevents accidental logging.
///
/// The key is wrapped in `SecretString` which:
/// - Implements `Debug` as `"[REDACTED]"`
/// - Zeroizes memory on drop
/// - Requires explicit `.expose_secret()` to access the value
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Create a new API key from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }

    /// Expose the secret key value.
    ///
    /// Use sparingly - only when attaching it to a request.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey([REDACTED])")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Name of the variable holding keys for a provider (`openai` -> `OPENAI_KEY`).
pub fn env_var_for_provider(provider: &str) -> String {
    format!("{}_KEY", provider.to_uppercase())
}

/// Split a comma-separated key list, dropping blanks.
fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Key sources
// ────────────────────────────────────────────────────────────────────────────

/// External key-value store that key lists are loaded from.
pub trait KeySource: Send + Sync {
    /// Raw value stored under `name`, if any.
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Reads key lists from process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl KeySource for EnvSource {
    fn lookup(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }
}

/// Fixed in-memory key source.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    values: HashMap<String, String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, e.g. `("OPENAI_KEY", "sk-a,sk-b")`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl KeySource for StaticSource {
    fn lookup(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// KeyManager
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ProviderKeys {
    /// Insertion-ordered, no duplicates.
    keys: Vec<String>,
    usage: HashMap<String, u64>,
}

impl ProviderKeys {
    fn add(&mut self, key: String) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        self.usage.insert(key.clone(), 0);
        self.keys.push(key);
        true
    }

    fn bump(&mut self, key: &str) {
        *self.usage.entry(key.to_string()).or_insert(0) += 1;
    }
}

#[derive(Default)]
struct Pool {
    providers: HashMap<String, ProviderKeys>,
    seed: Option<String>,
}

/// Thread-safe pool of API keys per provider.
///
/// All reads and writes go through one mutex, so concurrent selections never
/// race on the same usage counter. Share it between adapters with `Arc`.
pub struct KeyManager {
    source: Arc<dyn KeySource>,
    pool: Mutex<Pool>,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("providers", &self.providers())
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Create a key manager backed by the process environment.
    pub fn new() -> Self {
        Self::with_source(Arc::new(EnvSource))
    }

    /// Create a key manager backed by a custom key source.
    pub fn with_source(source: Arc<dyn KeySource>) -> Self {
        Self {
            source,
            pool: Mutex::new(Pool::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_locked(&self, pool: &mut Pool, provider: &str) -> bool {
        let var = env_var_for_provider(provider);
        let keys = self
            .source
            .lookup(&var)
            .map(|raw| parse_key_list(&raw))
            .unwrap_or_default();
        if keys.is_empty() {
            debug!(provider, var = %var, "no keys found in key source");
            return false;
        }

        let entry = pool.providers.entry(provider.to_string()).or_default();
        let added = keys.into_iter().filter(|key| entry.add(key.clone())).count();
        debug!(provider, added, total = entry.keys.len(), "loaded keys from key source");
        true
    }

    /// Load `<PROVIDER>_KEY` from the key source, merging new keys into the pool.
    ///
    /// Returns whether the source held any keys. A missing or empty variable
    /// is not an error.
    pub fn load_from_environment(&self, provider: &str) -> bool {
        let mut pool = self.lock();
        self.load_locked(&mut pool, provider)
    }

    /// Add a key for a provider. Adding a key that is already present is a no-op.
    pub fn add_key(&self, provider: &str, key: impl Into<String>) {
        let mut pool = self.lock();
        pool.providers
            .entry(provider.to_string())
            .or_default()
            .add(key.into());
    }

    /// Pin the next key lookup, for any provider, to a seed-derived key.
    ///
    /// Replaces any seed that has not been consumed yet.
    pub fn set_seed_once(&self, seed: impl Into<String>) {
        self.lock().seed = Some(seed.into());
    }

    /// Select a key for a provider.
    ///
    /// A pending seed picks `keys[md5(seed:provider) % len]` and is consumed.
    /// Otherwise a key with the lowest usage count is picked at random. The
    /// chosen key's counter is incremented either way. Keys are loaded from the
    /// key source when the provider has none yet.
    pub fn get_key(&self, provider: &str) -> Option<ApiKey> {
        let mut pool = self.lock();

        let has_keys = pool
            .providers
            .get(provider)
            .is_some_and(|entry| !entry.keys.is_empty());
        if !has_keys && !self.load_locked(&mut pool, provider) {
            return None;
        }

        let seed = pool.seed.take();
        let entry = pool.providers.get_mut(provider)?;

        let key = match seed {
            Some(seed) => {
                let index = seeded_index(&seed, provider, entry.keys.len());
                debug!(provider, index, "selected key from seed");
                entry.keys[index].clone()
            }
            None => {
                let min = entry
                    .keys
                    .iter()
                    .map(|key| entry.usage.get(key).copied().unwrap_or(0))
                    .min()?;
                let candidates: Vec<&String> = entry
                    .keys
                    .iter()
                    .filter(|key| entry.usage.get(*key).copied().unwrap_or(0) == min)
                    .collect();
                let chosen = candidates.choose(&mut rand::thread_rng())?;
                debug!(provider, usage = min, "selected least-used key");
                (*chosen).clone()
            }
        };

        entry.bump(&key);
        Some(ApiKey::new(key))
    }

    /// Usage count per key for a provider (empty for unknown providers).
    pub fn get_usage_counts(&self, provider: &str) -> HashMap<String, u64> {
        self.lock()
            .providers
            .get(provider)
            .map(|entry| entry.usage.clone())
            .unwrap_or_default()
    }

    /// Reset usage counters for one provider, or for all when `None`.
    pub fn clear_usage_counts(&self, provider: Option<&str>) {
        let mut pool = self.lock();
        match provider {
            Some(provider) => {
                if let Some(entry) = pool.providers.get_mut(provider) {
                    entry.usage.values_mut().for_each(|count| *count = 0);
                }
            }
            None => {
                for entry in pool.providers.values_mut() {
                    entry.usage.values_mut().for_each(|count| *count = 0);
                }
            }
        }
    }

    /// Providers that currently have keys, sorted by name.
    pub fn providers(&self) -> Vec<String> {
        let pool = self.lock();
        let mut names: Vec<String> = pool
            .providers
            .iter()
            .filter(|(_, entry)| !entry.keys.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Stable key index for a seed: big-endian md5 of `"{seed}:{provider}"` modulo `len`.
fn seeded_index(seed: &str, provider: &str, len: usize) -> usize {
    let digest = md5::compute(format!("{seed}:{provider}"));
    (u128::from_be_bytes(digest.0) % len as u128) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn manager_with(provider: &str, keys: &[&str]) -> KeyManager {
        let manager = KeyManager::with_source(Arc::new(StaticSource::new()));
        for key in keys {
            manager.add_key(provider, *key);
        }
        manager
    }

    fn seeded_key<'a>(keys: &[&'a str], seed: &str, provider: &str) -> &'a str {
        keys[seeded_index(seed, provider, keys.len())]
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-secret-key-12345");
        let debug = format!("{:?}", key);
        assert_eq!(debug, "ApiKey([REDACTED])");
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn api_key_from_string() {
        let key: ApiKey = "my-key".into();
        assert_eq!(key.expose_secret(), "my-key");
    }

    #[test]
    fn env_var_name_is_upper_cased() {
        assert_eq!(env_var_for_provider("openai"), "OPENAI_KEY");
        assert_eq!(env_var_for_provider("OpenRouter"), "OPENROUTER_KEY");
    }

    #[test]
    fn key_list_parsing_drops_blanks() {
        assert_eq!(parse_key_list(" a, ,b ,,"), vec!["a", "b"]);
        assert!(parse_key_list("").is_empty());
    }

    #[test]
    fn add_key_is_idempotent() {
        let manager = manager_with("openai", &["k1", "k1", "k2"]);
        let counts = manager.get_usage_counts("openai");
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["k1"], 0);
    }

    #[test]
    fn unknown_provider_has_no_key() {
        let manager = manager_with("openai", &["k1"]);
        assert!(manager.get_key("anthropic").is_none());
        assert!(manager.get_usage_counts("anthropic").is_empty());
    }

    #[test]
    fn least_used_selection_rotates_evenly() {
        let manager = manager_with("openai", &["k1", "k2", "k3"]);
        for _ in 0..6 {
            manager.get_key("openai").unwrap();
        }
        let counts = manager.get_usage_counts("openai");
        assert!(counts.values().all(|&count| count == 2), "{counts:?}");
    }

    #[test]
    fn seed_selects_reproducible_key() {
        let keys = ["k1", "k2", "k3", "k4", "k5"];
        let expected = seeded_key(&keys, "run-7", "openai");

        for _ in 0..3 {
            let manager = manager_with("openai", &keys);
            manager.set_seed_once("run-7");
            assert_eq!(manager.get_key("openai").unwrap().expose_secret(), expected);
        }
    }

    #[test]
    fn seed_is_consumed_by_one_lookup() {
        let manager = manager_with("openai", &["k1", "k2"]);
        let seeded = seeded_key(&["k1", "k2"], "s", "openai");

        manager.set_seed_once("s");
        assert_eq!(manager.get_key("openai").unwrap().expose_secret(), seeded);

        // Falls back to least-used: the seeded key now has count 1.
        let next = manager.get_key("openai").unwrap();
        assert_ne!(next.expose_secret(), seeded);
    }

    #[test]
    fn seed_is_shared_across_providers() {
        let manager = manager_with("openai", &["k1", "k2"]);
        manager.add_key("anthropic", "a1");

        manager.set_seed_once("s");
        manager.get_key("anthropic").unwrap();

        // Seed already consumed by the anthropic lookup.
        manager.get_key("openai").unwrap();
        manager.get_key("openai").unwrap();
        let counts = manager.get_usage_counts("openai");
        assert_eq!(counts["k1"], 1);
        assert_eq!(counts["k2"], 1);
    }

    #[test]
    fn clear_usage_counts_resets_one_or_all() {
        let manager = manager_with("openai", &["k1"]);
        manager.add_key("google", "g1");
        manager.get_key("openai");
        manager.get_key("google");

        manager.clear_usage_counts(Some("openai"));
        assert_eq!(manager.get_usage_counts("openai")["k1"], 0);
        assert_eq!(manager.get_usage_counts("google")["g1"], 1);

        manager.clear_usage_counts(None);
        assert_eq!(manager.get_usage_counts("google")["g1"], 0);
    }

    #[test]
    fn lazy_load_from_source() {
        let source = StaticSource::new().with("DEEPSEEK_KEY", "d1, d2");
        let manager = KeyManager::with_source(Arc::new(source));

        assert!(manager.get_key("deepseek").is_some());
        assert_eq!(manager.get_usage_counts("deepseek").len(), 2);
        assert_eq!(manager.providers(), vec!["deepseek".to_string()]);
    }

    #[test]
    fn load_from_environment_merges_keys() {
        let source = StaticSource::new().with("OPENAI_KEY", "k2,k3");
        let manager = KeyManager::with_source(Arc::new(source));
        manager.add_key("openai", "k1");
        manager.get_key("openai");

        assert!(manager.load_from_environment("openai"));
        let counts = manager.get_usage_counts("openai");
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["k1"], 1);
        assert!(!manager.load_from_environment("google"));
    }

    #[test]
    #[serial]
    fn env_source_reads_process_environment() {
        // SAFETY: serialized with other env-mutating tests
        unsafe { env::set_var("PARLEYTEST_KEY", "e1,e2") };

        let manager = KeyManager::new();
        let found = manager.load_from_environment("parleytest");

        // SAFETY: serialized with other env-mutating tests
        unsafe { env::remove_var("PARLEYTEST_KEY") };

        assert!(found);
        assert_eq!(manager.get_usage_counts("parleytest").len(), 2);
    }
}
