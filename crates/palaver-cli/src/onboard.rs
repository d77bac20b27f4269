//! `palaver onboard` — write a default config and create the data directory.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use palaver_core::config::{get_config_path, load_config, save_config, StorageBackend};
use palaver_core::utils::get_data_path;

pub fn run() -> Result<()> {
    println!();
    println!("{}", "Palaver — Setup".cyan().bold());
    println!();

    let config_path = get_config_path();
    let created = ensure_config(&config_path)?;
    if created {
        println!("  {} created config at {}", "✓".green(), config_path.display());
    } else {
        println!("  {} config already exists at {}", "✓".green(), config_path.display());
    }

    let config = load_config(Some(&config_path));
    let data_dir = get_data_path();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    if config.storage.backend == StorageBackend::Jsonl {
        let dir = config.storage.resolved_path();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        println!("  {} transcripts in {}", "✓".green(), dir.display());
    }
    std::fs::create_dir_all(data_dir.join("history"))?;

    println!();
    println!("  Next steps:");
    println!("    1. Set backend.apiKey (or PALAVER_BACKEND__API_KEY)");
    println!("    2. Run `palaver chat`");
    println!();
    Ok(())
}

/// Write the default config to `path` unless a file is already there.
fn ensure_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    save_config(&load_config(Some(path)), Some(path))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_config_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert!(ensure_config(&path).unwrap());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"apiBase\""));
        assert!(written.contains("\"historyLimit\""));

        std::fs::write(&path, "{}").unwrap();
        assert!(!ensure_config(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }
}
