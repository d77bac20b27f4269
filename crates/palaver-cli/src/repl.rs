//! Interactive REPL built on `rustyline`, with history persisted under
//! `~/.palaver/history`.

use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::debug;

use palaver_agent::commands::{self, Command};
use palaver_agent::{SessionError, SessionManager};
use palaver_core::UserId;

use crate::helpers;

/// Bare words that also end the session.
const EXIT_WORDS: &[&str] = &["exit", "quit", ":q"];

pub async fn run(manager: &SessionManager, user: &UserId, reply_timeout: Duration) -> Result<()> {
    helpers::print_banner(user);
    let mut editor = create_editor()?;

    loop {
        let input = match editor.readline("You: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(trimmed);

        if is_exit_word(trimmed) {
            break;
        }

        if let Some(command) = Command::parse(trimmed) {
            if command == Command::Quit {
                break;
            }
            match commands::execute(manager, user, &command).await {
                Ok(text) => println!("\n{text}\n"),
                Err(e) => helpers::print_warning(e.user_message()),
            }
            continue;
        }

        debug!(user = %user, len = trimmed.len(), "Sending message");
        helpers::print_thinking();
        let result = tokio::time::timeout(reply_timeout, manager.on_user_text(user, trimmed)).await;
        helpers::clear_thinking();

        match result {
            Ok(Ok(outcome)) => {
                helpers::print_reply(&outcome.reply);
                if let Some(warning) = outcome.storage_warning {
                    helpers::print_warning(warning.user_message());
                }
            }
            Ok(Err(e)) => helpers::print_warning(e.user_message()),
            Err(_) => helpers::print_warning(
                SessionError::BackendUnavailable("timed out".into()).user_message(),
            ),
        }
    }

    println!("\n{}", "Goodbye!".dimmed());
    save_history(&mut editor);
    Ok(())
}

fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let path = history_path();
    if path.exists() {
        if let Err(e) = editor.load_history(&path) {
            debug!(error = %e, "Failed to load REPL history");
        }
    }
    Ok(editor)
}

fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!(error = %e, "Failed to save REPL history");
    }
}

fn history_path() -> std::path::PathBuf {
    palaver_core::utils::get_data_path()
        .join("history")
        .join("cli_history")
}

fn is_exit_word(input: &str) -> bool {
    EXIT_WORDS.contains(&input.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_words() {
        assert!(is_exit_word("exit"));
        assert!(is_exit_word("QUIT"));
        assert!(is_exit_word(":q"));
        assert!(!is_exit_word("/quit"));
        assert!(!is_exit_word("what's my ROAS?"));
    }

    #[test]
    fn test_history_path_under_data_dir() {
        let path = history_path();
        assert!(path.ends_with("history/cli_history"));
        assert!(path.to_string_lossy().contains(".palaver"));
    }
}
