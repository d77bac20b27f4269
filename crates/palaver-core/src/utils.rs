//! Utility helpers — path resolution and string manipulation.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Get the Palaver data directory (e.g. `~/.palaver/`).
pub fn get_data_path() -> PathBuf {
    let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".palaver")
}

/// Directory for JSONL conversation transcripts (e.g. `~/.palaver/conversations/`).
pub fn get_conversations_path() -> PathBuf {
    get_data_path().join("conversations")
}

/// Default SQLite database file (e.g. `~/.palaver/palaver.db`).
pub fn get_database_path() -> PathBuf {
    get_data_path().join("palaver.db")
}

/// Truncate a string to `max_len` characters, adding "..." if truncated.
/// Unicode-safe.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Longest name [`encode_filename`] returns, leaving room for an extension
/// under the usual 255-byte limit.
pub const MAX_ENCODED_NAME: usize = 200;

/// Encode an arbitrary key as a file name.
///
/// Alphanumerics, `-`, `_` and `.` pass through; every other byte becomes
/// `%XX`, so distinct keys never share a file. Names longer than
/// [`MAX_ENCODED_NAME`] are cut short and end in `~` plus the SHA-256 of the
/// whole key; `~` never appears in a plain encoding.
pub fn encode_filename(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
            out.push(byte as char);
        } else if byte == b'.' && !out.is_empty() {
            out.push('.');
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    if out.len() <= MAX_ENCODED_NAME {
        return out;
    }

    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    // The encoding is ASCII, so any byte offset is a char boundary.
    out.truncate(MAX_ENCODED_NAME - digest.len() - 1);
    out.push('~');
    out.push_str(&digest);
    out
}

/// Expand `~` to the home directory in a path string.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(path.get(2..).unwrap_or(""))
    } else {
        PathBuf::from(path)
    }
}
