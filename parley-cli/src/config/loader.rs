use super::types::{KeysConfig, ParleyConfig, RawParleyConfig, RawSessionConfig, SessionConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<ParleyConfig> {
        let mut raw = RawParleyConfig::default();

        // Layer 1: User config
        if let Some(user_config) = Self::read_layer(&Self::user_config_path())? {
            raw = Self::merge_raw(raw, user_config);
        }

        // Layer 2: Project config
        if let Some(project_config) = Self::read_layer(&Self::project_config_path())? {
            raw = Self::merge_raw(raw, project_config);
        }

        Ok(Self::finalize(raw))
    }

    /// Load a single config file, applying defaults. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<ParleyConfig> {
        let raw = Self::read_layer(path)?.unwrap_or_default();
        Ok(Self::finalize(raw))
    }

    /// User config path (`$XDG_CONFIG_HOME/parley/config.toml`)
    pub fn user_config_path() -> PathBuf {
        parley_paths::config_file()
    }

    /// Get project config path
    /// Can be overridden with PARLEY_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("PARLEY_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".parley/config.toml")
        }
    }

    fn read_layer(path: &Path) -> Result<Option<RawParleyConfig>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let layer = toml::from_str(&contents)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        debug!(path = %path.display(), "loaded config layer");
        Ok(Some(layer))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawParleyConfig, overlay: RawParleyConfig) -> RawParleyConfig {
        let mut providers = base.providers;
        providers.extend(overlay.providers);

        RawParleyConfig {
            session: RawSessionConfig {
                default_model: overlay.session.default_model.or(base.session.default_model),
                system_prompt: overlay.session.system_prompt.or(base.session.system_prompt),
                stream: overlay.session.stream.or(base.session.stream),
                max_history_token: overlay
                    .session
                    .max_history_token
                    .or(base.session.max_history_token),
            },
            keys: KeysConfig {
                seed: overlay.keys.seed.or(base.keys.seed),
            },
            providers,
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawParleyConfig) -> ParleyConfig {
        let defaults = SessionConfig::default();
        ParleyConfig {
            session: SessionConfig {
                default_model: raw
                    .session
                    .default_model
                    .filter(|model| !model.is_empty())
                    .unwrap_or(defaults.default_model),
                system_prompt: raw.session.system_prompt,
                stream: raw.session.stream.unwrap_or(defaults.stream),
                max_history_token: raw
                    .session
                    .max_history_token
                    .unwrap_or(defaults.max_history_token),
            },
            keys: raw.keys,
            providers: raw.providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_models::ProviderSpec;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::TempDir;

    // ==================== Load Tests ====================

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.toml");

        let config = ConfigLoader::load_from_path(&path).unwrap();

        assert_eq!(config.session.default_model, "openai");
        assert!(!config.session.stream);
    }

    #[test]
    fn test_load_from_valid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[session]
default_model = "anthropic:claude-3-5-haiku-20241022"
system_prompt = "Be concise."
stream = true

[keys]
seed = "ci"

[providers.local]
base_url = "http://localhost:11434/v1"
"#
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();

        assert_eq!(
            config.session.default_model,
            "anthropic:claude-3-5-haiku-20241022"
        );
        assert_eq!(config.session.system_prompt.as_deref(), Some("Be concise."));
        assert!(config.session.stream);
        assert_eq!(config.keys.seed.as_deref(), Some("ci"));
        assert!(config.providers.contains_key("local"));
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("invalid.toml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "this is not valid toml {{{{").unwrap();

        let result = ConfigLoader::load_from_path(&path);
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_raw_overlay_overrides_base() {
        let mut base = RawParleyConfig::default();
        base.session.default_model = Some("base-model".to_string());
        base.session.max_history_token = Some(1000);
        base.keys.seed = Some("base-seed".to_string());
        base.providers.insert(
            "shared".to_string(),
            ProviderSpec {
                base_url: Some("http://base".to_string()),
                ..Default::default()
            },
        );
        base.providers.insert("base-only".to_string(), ProviderSpec::default());

        let mut overlay = RawParleyConfig::default();
        overlay.session.default_model = Some("overlay-model".to_string());
        overlay.providers.insert(
            "shared".to_string(),
            ProviderSpec {
                base_url: Some("http://overlay".to_string()),
                ..Default::default()
            },
        );

        let merged = ConfigLoader::merge_raw(base, overlay);

        assert_eq!(
            merged.session.default_model,
            Some("overlay-model".to_string())
        );
        // overlay's None falls through to base value via .or()
        assert_eq!(merged.session.max_history_token, Some(1000));
        assert_eq!(merged.keys.seed, Some("base-seed".to_string()));
        assert_eq!(
            merged.providers["shared"].base_url.as_deref(),
            Some("http://overlay")
        );
        assert!(merged.providers.contains_key("base-only"));
    }

    #[test]
    fn test_empty_default_model_falls_back() {
        let mut raw = RawParleyConfig::default();
        raw.session.default_model = Some(String::new());
        let config = ConfigLoader::finalize(raw);
        assert_eq!(config.session.default_model, "openai");
    }

    #[test]
    #[serial]
    fn test_project_config_path() {
        // SAFETY: serialized with other env-mutating tests.
        unsafe {
            std::env::remove_var("PARLEY_PROJECT_CONFIG_DIR");
        }
        let path = ConfigLoader::project_config_path();
        assert_eq!(path, PathBuf::from(".parley/config.toml"));
    }

    #[test]
    #[serial]
    fn test_project_layer_overrides_user_layer() {
        let user_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(user_dir.path().join("parley")).unwrap();
        std::fs::write(
            user_dir.path().join("parley/config.toml"),
            "[session]\ndefault_model = \"google\"\nstream = true\n",
        )
        .unwrap();
        std::fs::write(
            project_dir.path().join("config.toml"),
            "[session]\ndefault_model = \"deepseek\"\n",
        )
        .unwrap();

        // SAFETY: serialized with other env-mutating tests.
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", user_dir.path());
            std::env::set_var("PARLEY_PROJECT_CONFIG_DIR", project_dir.path());
        }
        let config = ConfigLoader::load().unwrap();
        // SAFETY: as above.
        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
            std::env::remove_var("PARLEY_PROJECT_CONFIG_DIR");
        }

        assert_eq!(config.session.default_model, "deepseek");
        assert!(config.session.stream);
    }
}
