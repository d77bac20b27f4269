//! Configuration schema.
//!
//! Hierarchy: `Config` → `BackendConfig`, `SessionsConfig`, `StorageConfig`,
//! `ChannelsConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::{expand_home, get_conversations_path, get_database_path};

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.palaver/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub backend: BackendConfig,
    pub sessions: SessionsConfig,
    pub storage: StorageConfig,
    pub channels: ChannelsConfig,
}

// ─────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────

/// Reasoning backend settings (any OpenAI-compatible chat endpoint).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendConfig {
    /// Base URL, without the trailing `/chat/completions`.
    pub api_base: String,
    /// API key for authentication.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Optional system prompt sent ahead of every exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Maximum tokens to generate per reply.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: None,
            max_tokens: 4096,
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

impl BackendConfig {
    /// Whether an API key has been configured.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────

/// Session manager tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionsConfig {
    /// Default `get_history` limit.
    pub history_limit: usize,
    /// How many prior messages are rendered into each prompt.
    pub context_messages: usize,
    /// Upper bound on one exchange, enforced by adapters.
    pub reply_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            context_messages: 10,
            reply_timeout_secs: 180,
        }
    }
}

// ─────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────

/// Which `ConversationStore` implementation to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local; lost on exit.
    Memory,
    /// One append-only JSONL file per user.
    #[default]
    Jsonl,
    /// Single SQLite database.
    Sqlite,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Jsonl => "jsonl",
            StorageBackend::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "jsonl" => Ok(StorageBackend::Jsonl),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Durable transcript storage.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory (jsonl) or database file (sqlite). `~` is expanded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl StorageConfig {
    /// Resolve the on-disk location for the selected backend.
    pub fn resolved_path(&self) -> PathBuf {
        match (&self.path, self.backend) {
            (Some(p), _) => expand_home(p),
            (None, StorageBackend::Sqlite) => get_database_path(),
            (None, _) => get_conversations_path(),
        }
    }
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

/// All channel configurations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Telegram channel config.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    /// Empty list allows everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl TelegramConfig {
    pub fn is_enabled(&self) -> bool {
        !self.token.is_empty()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend.model, "gpt-4o-mini");
        assert_eq!(config.backend.max_tokens, 4096);
        assert_eq!(config.sessions.history_limit, 50);
        assert_eq!(config.sessions.context_messages, 10);
        assert_eq!(config.storage.backend, StorageBackend::Jsonl);
        assert!(!config.channels.telegram.is_enabled());
    }

    #[test]
    fn test_config_from_json_camel_case() {
        let json = serde_json::json!({
            "backend": {
                "apiBase": "http://localhost:8000/v1",
                "model": "llama3",
                "maxTokens": 1024,
                "systemPrompt": "Be brief."
            },
            "sessions": { "historyLimit": 20 },
            "storage": { "backend": "sqlite", "path": "/tmp/p.db" }
        });

        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.backend.api_base, "http://localhost:8000/v1");
        assert_eq!(config.backend.model, "llama3");
        assert_eq!(config.backend.max_tokens, 1024);
        assert_eq!(config.backend.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(config.sessions.history_limit, 20);
        // Defaults preserved for missing fields
        assert_eq!(config.sessions.context_messages, 10);
        assert_eq!(config.backend.temperature, 0.7);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.resolved_path(), PathBuf::from("/tmp/p.db"));
    }

    #[test]
    fn test_config_json_uses_camel_case() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert!(json["backend"].get("maxTokens").is_some());
        assert!(json["sessions"].get("replyTimeoutSecs").is_some());
        assert!(json["backend"].get("max_tokens").is_none());
        assert_eq!(json["storage"]["backend"], "jsonl");
    }

    #[test]
    fn test_storage_default_paths() {
        let jsonl = StorageConfig::default();
        assert!(jsonl.resolved_path().ends_with("conversations"));

        let sqlite = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: None,
        };
        assert!(sqlite.resolved_path().ends_with("palaver.db"));
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("SQLite".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("redis".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_channel_config_from_json() {
        let json = serde_json::json!({
            "channels": {
                "telegram": { "token": "123:abc", "allowedUsers": ["42"] }
            }
        });
        let config: Config = serde_json::from_value(json).unwrap();
        assert!(config.channels.telegram.is_enabled());
        assert_eq!(config.channels.telegram.allowed_users, vec!["42"]);
    }

    #[test]
    fn test_empty_json_gives_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.backend.api_base, "https://api.openai.com/v1");
        assert!(!config.backend.is_configured());
    }
}
