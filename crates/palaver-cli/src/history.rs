//! `palaver history` — print a user's stored conversations.

use anyhow::{anyhow, Result};
use colored::Colorize;

use palaver_agent::History;
use palaver_core::config::load_config;
use palaver_core::{Conversation, Role};

use crate::helpers;

pub async fn run(user: &str, all: bool) -> Result<()> {
    let config = load_config(None);
    let user = helpers::parse_user(user)?;
    let manager = helpers::build_manager(&config)?;

    if !all {
        let history = manager
            .get_history(&user, None)
            .await
            .map_err(|e| anyhow!(e))?;
        if history.is_empty() {
            println!("No active conversation for {user}.");
        } else {
            println!("{}", format!("Active conversation for {user}").bold());
            println!("{}", format_transcript(&history));
        }
        return Ok(());
    }

    let conversations = manager.conversations(&user).await.map_err(|e| anyhow!(e))?;
    if conversations.is_empty() {
        println!("No conversations for {user}.");
        return Ok(());
    }
    for conv in conversations.iter().rev() {
        println!("{}", header(conv).bold());
        match manager
            .conversation_messages(&user, conv.id)
            .await
            .map_err(|e| anyhow!(e))?
        {
            Some(history) if !history.is_empty() => println!("{}", format_transcript(&history)),
            _ => println!("{}", "(no messages)".dimmed()),
        }
        println!();
    }
    Ok(())
}

fn header(conv: &Conversation) -> String {
    let ended = conv
        .ended_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "now".to_string());
    format!(
        "#{} [{}] {} → {} ({} messages)",
        conv.id,
        conv.status(),
        conv.started_at.format("%Y-%m-%d %H:%M"),
        ended,
        conv.message_count
    )
}

/// One `[HH:MM:SS] You: …` line per message.
fn format_transcript(history: &History) -> String {
    history
        .iter()
        .map(|m| {
            let who = match m.role {
                Role::User => "You",
                Role::Assistant => "Agent",
            };
            format!("[{}] {who}: {}", m.timestamp.format("%H:%M:%S"), m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
