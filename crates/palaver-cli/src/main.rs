//! Palaver CLI — entry point.
//!
//! # Commands
//!
//! - `palaver chat [-m MESSAGE] [-u USER]` — chat (single-shot or REPL)
//! - `palaver gateway` — Telegram + dispatcher until Ctrl+C
//! - `palaver history -u USER [--all]` — print stored conversations
//! - `palaver status` — show configuration and storage
//! - `palaver onboard` — write a default config

mod gateway;
mod helpers;
mod history;
mod onboard;
mod repl;
mod status;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use palaver_core::config::load_config;

/// Palaver — per-user conversational sessions over any OpenAI-compatible backend
#[derive(Parser)]
#[command(name = "palaver", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant (single-shot or interactive REPL)
    Chat {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// User the conversation belongs to
        #[arg(short, long, default_value = "cli:default")]
        user: String,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Run the Telegram channel and the dispatcher until Ctrl+C
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Print a user's stored conversation
    History {
        /// User to look up (e.g. "telegram:42")
        #[arg(short, long)]
        user: String,

        /// Print every conversation, not just the active one
        #[arg(long, default_value_t = false)]
        all: bool,
    },

    /// Show configuration and storage status
    Status,

    /// Write a default config to ~/.palaver/config.json
    Onboard,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            message,
            user,
            logs,
        } => {
            init_logging(logs);
            run_chat(message, &user).await
        }
        Commands::Gateway { logs } => {
            init_logging(logs);
            gateway::run().await
        }
        Commands::History { user, all } => {
            init_logging(false);
            history::run(&user, all).await
        }
        Commands::Status => status::run(),
        Commands::Onboard => onboard::run(),
    }
}

async fn run_chat(message: Option<String>, user: &str) -> Result<()> {
    let config = load_config(None);
    let user = helpers::parse_user(user)?;
    let manager = helpers::build_manager(&config)?;
    let reply_timeout = Duration::from_secs(config.sessions.reply_timeout_secs);

    let result = match message {
        Some(text) => {
            info!(user = %user, "Processing single message");
            let outcome = tokio::time::timeout(reply_timeout, manager.on_user_text(&user, &text))
                .await
                .context("the assistant took too long to reply")?
                .map_err(|e| anyhow::anyhow!("{}", e.user_message()))?;
            helpers::print_reply(&outcome.reply);
            if let Some(warning) = outcome.storage_warning {
                helpers::print_warning(warning.user_message());
            }
            Ok(())
        }
        None => repl::run(&manager, &user, reply_timeout).await,
    };

    manager.shutdown().await;
    result
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("palaver=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
