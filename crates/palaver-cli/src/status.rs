//! `palaver status` — show configuration, backend, and storage.

use anyhow::Result;
use colored::Colorize;

use palaver_core::config::{get_config_path, load_config};

fn mark(ok: bool, missing: &str) -> String {
    if ok {
        "✓".green().to_string()
    } else {
        missing.red().to_string()
    }
}

pub fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();

    println!();
    println!("{}", "Palaver Status".cyan().bold());
    println!();

    println!(
        "  {:<14} {} {}",
        "Config:".bold(),
        config_path.display(),
        mark(config_path.exists(), "(not found)")
    );

    let backend = &config.backend;
    println!("  {:<14} {}", "Backend:".bold(), backend.api_base);
    println!("  {:<14} {}", "Model:".bold(), backend.model);
    println!(
        "  {:<14} {}",
        "API key:".bold(),
        if backend.is_configured() {
            format!("{} (set)", "✓".green())
        } else {
            "· not set".dimmed().to_string()
        }
    );
    println!(
        "  {:<14} {}",
        "Parameters:".bold(),
        format!(
            "temp {} | max_tokens {} | timeout {}s",
            backend.temperature, backend.max_tokens, backend.timeout_secs
        )
        .dimmed()
    );

    let storage_path = config.storage.resolved_path();
    println!();
    println!(
        "  {:<14} {} at {} {}",
        "Storage:".bold(),
        config.storage.backend,
        storage_path.display(),
        mark(storage_path.exists(), "(not created yet)")
    );
    println!(
        "  {:<14} {}",
        "Sessions:".bold(),
        format!(
            "history {} | context {} | reply timeout {}s",
            config.sessions.history_limit,
            config.sessions.context_messages,
            config.sessions.reply_timeout_secs
        )
        .dimmed()
    );

    println!();
    println!(
        "  {:<14} {}",
        "Telegram:".bold(),
        if config.channels.telegram.is_enabled() {
            format!(
                "{} token set, {} allowed user(s)",
                "✓".green(),
                config.channels.telegram.allowed_users.len()
            )
        } else {
            "· not configured".dimmed().to_string()
        }
    );
    println!();
    Ok(())
}
