//! Config loader — reads `~/.palaver/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.palaver/config.json`
//! 3. Environment variables `PALAVER_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::schema::{Config, StorageBackend};

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    load_config_from_path(&config_path)
}

fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `PALAVER_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `PALAVER_BACKEND__API_BASE`, `__API_KEY`, `__MODEL`, `__SYSTEM_PROMPT`,
///   `__MAX_TOKENS`, `__TEMPERATURE`, `__TIMEOUT_SECS`
/// - `PALAVER_SESSIONS__HISTORY_LIMIT`, `__CONTEXT_MESSAGES`, `__REPLY_TIMEOUT_SECS`
/// - `PALAVER_STORAGE__BACKEND`, `PALAVER_STORAGE__PATH`
/// - `PALAVER_CHANNELS__TELEGRAM__TOKEN`
fn apply_env_overrides(mut config: Config) -> Config {
    // Backend
    if let Ok(val) = std::env::var("PALAVER_BACKEND__API_BASE") {
        config.backend.api_base = val;
    }
    if let Ok(val) = std::env::var("PALAVER_BACKEND__API_KEY") {
        config.backend.api_key = val;
    }
    if let Ok(val) = std::env::var("PALAVER_BACKEND__MODEL") {
        config.backend.model = val;
    }
    if let Ok(val) = std::env::var("PALAVER_BACKEND__SYSTEM_PROMPT") {
        config.backend.system_prompt = Some(val);
    }
    parse_env("PALAVER_BACKEND__MAX_TOKENS", &mut config.backend.max_tokens);
    parse_env("PALAVER_BACKEND__TEMPERATURE", &mut config.backend.temperature);
    parse_env("PALAVER_BACKEND__TIMEOUT_SECS", &mut config.backend.timeout_secs);

    // Sessions
    parse_env("PALAVER_SESSIONS__HISTORY_LIMIT", &mut config.sessions.history_limit);
    parse_env(
        "PALAVER_SESSIONS__CONTEXT_MESSAGES",
        &mut config.sessions.context_messages,
    );
    parse_env(
        "PALAVER_SESSIONS__REPLY_TIMEOUT_SECS",
        &mut config.sessions.reply_timeout_secs,
    );

    // Storage
    if let Ok(val) = std::env::var("PALAVER_STORAGE__BACKEND") {
        match StorageBackend::from_str(&val) {
            Ok(backend) => config.storage.backend = backend,
            Err(e) => warn!("Ignoring PALAVER_STORAGE__BACKEND: {}", e),
        }
    }
    if let Ok(val) = std::env::var("PALAVER_STORAGE__PATH") {
        config.storage.path = Some(val);
    }

    // Channels
    if let Ok(val) = std::env::var("PALAVER_CHANNELS__TELEGRAM__TOKEN") {
        config.channels.telegram.token = val;
    }

    config
}

/// Overwrite `target` when the env var is set and parses.
fn parse_env<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        match val.parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warn!("Ignoring unparsable {}={}", key, val),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp_json(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_missing_file() {
        let config = load_config_from_path(Path::new("/nonexistent/path/config.json"));
        assert_eq!(config.sessions.history_limit, 50);
        assert_eq!(config.backend.timeout_secs, 120);
    }

    #[test]
    fn test_load_valid_json() {
        let file = write_temp_json(
            r#"{
            "backend": { "model": "gpt-4o", "maxTokens": 2048 },
            "storage": { "backend": "memory" }
        }"#,
        );

        let config = load_config_from_path(file.path());
        assert_eq!(config.backend.model, "gpt-4o");
        assert_eq!(config.backend.max_tokens, 2048);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        // Default preserved
        assert_eq!(config.backend.temperature, 0.7);
    }

    #[test]
    fn test_load_invalid_json_returns_defaults() {
        let file = write_temp_json("not valid json {{{");
        let config = load_config_from_path(file.path());
        assert_eq!(config.backend.max_tokens, 4096);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.backend.model = "deepseek-chat".to_string();
        config.backend.api_key = "sk-test".to_string();
        config.storage.backend = StorageBackend::Sqlite;

        save_config(&config, Some(&path)).unwrap();

        let reloaded = load_config_from_path(&path);
        assert_eq!(reloaded.backend.model, "deepseek-chat");
        assert_eq!(reloaded.backend.api_key, "sk-test");
        assert_eq!(reloaded.storage.backend, StorageBackend::Sqlite);
    }

    #[test]
    fn test_env_override_model() {
        std::env::set_var("PALAVER_BACKEND__MODEL", "test-model");
        let config = apply_env_overrides(Config::default());
        assert_eq!(config.backend.model, "test-model");
        std::env::remove_var("PALAVER_BACKEND__MODEL");
    }

    #[test]
    fn test_env_override_numeric() {
        std::env::set_var("PALAVER_SESSIONS__CONTEXT_MESSAGES", "4");
        let config = apply_env_overrides(Config::default());
        assert_eq!(config.sessions.context_messages, 4);
        std::env::remove_var("PALAVER_SESSIONS__CONTEXT_MESSAGES");
    }

    #[test]
    fn test_env_override_unparsable_is_ignored() {
        std::env::set_var("PALAVER_SESSIONS__REPLY_TIMEOUT_SECS", "soon");
        let config = apply_env_overrides(Config::default());
        assert_eq!(config.sessions.reply_timeout_secs, 180);
        std::env::remove_var("PALAVER_SESSIONS__REPLY_TIMEOUT_SECS");
    }

    #[test]
    fn test_env_override_storage_backend() {
        std::env::set_var("PALAVER_STORAGE__BACKEND", "sqlite");
        let config = apply_env_overrides(Config::default());
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        std::env::remove_var("PALAVER_STORAGE__BACKEND");
    }

    #[test]
    fn test_saved_json_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        save_config(&Config::default(), Some(&path)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert!(raw["backend"].get("apiBase").is_some());
        assert!(raw["backend"].get("api_base").is_none());
    }
}
