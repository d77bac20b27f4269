//! Shared CLI helpers — building the session manager and printing replies.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use palaver_agent::session::SessionSettings;
use palaver_agent::SessionManager;
use palaver_core::config::Config;
use palaver_core::store::open_store;
use palaver_core::UserId;
use palaver_providers::HttpBackend;

/// Wire the configured backend and store into a [`SessionManager`].
pub fn build_manager(config: &Config) -> Result<Arc<SessionManager>> {
    let store = open_store(&config.storage).with_context(|| {
        format!(
            "failed to open {} store at {}",
            config.storage.backend,
            config.storage.resolved_path().display()
        )
    })?;
    let backend =
        HttpBackend::from_config(&config.backend).context("failed to create HTTP backend")?;

    Ok(Arc::new(SessionManager::new(
        Arc::new(backend),
        store,
        settings(config),
    )))
}

pub fn settings(config: &Config) -> SessionSettings {
    SessionSettings {
        history_limit: config.sessions.history_limit,
        context_messages: config.sessions.context_messages,
        system_prompt: config.backend.system_prompt.clone(),
    }
}

pub fn parse_user(raw: &str) -> Result<UserId> {
    UserId::parse(raw).with_context(|| format!("invalid user id {raw:?}"))
}

pub fn print_reply(reply: &str) {
    println!();
    println!("{}", "Agent".cyan().bold());
    println!("{reply}");
    println!();
}

pub fn print_warning(text: &str) {
    eprintln!("{}", format!("⚠ {text}").yellow());
}

pub fn print_banner(user: &UserId) {
    println!();
    println!(
        "{}  v{}",
        "Palaver".cyan().bold(),
        env!("CARGO_PKG_VERSION").dimmed()
    );
    println!("{}", format!("Chatting as {user}. Type /help for commands, /quit to leave.").dimmed());
    println!();
}

pub fn print_thinking() {
    eprint!("{}", "⠿ thinking...".dimmed());
}

pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::config::{StorageBackend, StorageConfig};

    #[test]
    fn test_settings_follow_config() {
        let mut config = Config::default();
        config.sessions.history_limit = 7;
        config.sessions.context_messages = 3;
        config.backend.system_prompt = Some("Be brief.".into());

        let s = settings(&config);
        assert_eq!(s.history_limit, 7);
        assert_eq!(s.context_messages, 3);
        assert_eq!(s.system_prompt.as_deref(), Some("Be brief."));
    }

    #[test]
    fn test_parse_user_rejects_blank() {
        assert!(parse_user("cli:default").is_ok());
        assert!(parse_user("  ").is_err());
    }

    #[test]
    fn test_build_manager_with_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: Some(dir.path().join("palaver.db").to_string_lossy().into_owned()),
        };
        let manager = build_manager(&config).unwrap();
        assert_eq!(manager.store().backend_name(), "sqlite");
        assert_eq!(manager.history_limit(), 50);
    }
}
