//! Markdown to Telegram HTML, and splitting for Telegram's length limit.
//!
//! Backends answer in Markdown. Telegram renders a small HTML subset, so
//! replies are converted before sending:
//!
//! | Markdown          | HTML                         |
//! |-------------------|------------------------------|
//! | ```` ```code``` ````  | `<pre><code>…</code></pre>` |
//! | `` `code` ``      | `<code>…</code>`             |
//! | `**bold**`        | `<b>…</b>`                   |
//! | `_italic_`        | `<i>…</i>`                   |
//! | `[text](url)`     | `<a href="url">text</a>`     |
//! | `# Heading`       | plain line                   |
//! | `- item`          | `• item`                     |

use std::sync::LazyLock;

use regex::{Captures, Regex};

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {pattern:?}: {e}"))
}

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| regex(r"(?s)```[\w+-]*\n?(.*?)```"));
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| regex(r"`([^`\n]+)`"));
static HEADING: LazyLock<Regex> = LazyLock::new(|| regex(r"(?m)^#{1,6}[ \t]+(.+)$"));
static LINK: LazyLock<Regex> = LazyLock::new(|| regex(r"\[([^\]]+)\]\(([^)\s]+)\)"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| regex(r"\*\*(.+?)\*\*"));
// No lookbehind in `regex`: capture the neighbours so snake_case survives.
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(^|[^\w])_([^_\n]+?)_($|[^\w])"));
static BULLET: LazyLock<Regex> = LazyLock::new(|| regex(r"(?m)^[ \t]*[-*][ \t]+"));

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Convert a Markdown reply to Telegram HTML.
///
/// Code spans are cut out first so nothing inside them is reinterpreted,
/// then restored escaped.
pub fn markdown_to_telegram_html(text: &str) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let text = CODE_BLOCK.replace_all(text, |caps: &Captures| {
        blocks.push(format!("<pre><code>{}</code></pre>", escape_html(&caps[1])));
        format!("\x00{}\x00", blocks.len() - 1)
    });
    let text = INLINE_CODE.replace_all(&text, |caps: &Captures| {
        blocks.push(format!("<code>{}</code>", escape_html(&caps[1])));
        format!("\x00{}\x00", blocks.len() - 1)
    });

    let text = HEADING.replace_all(&text, "$1");
    let text = escape_html(&text);
    let text = LINK.replace_all(&text, r#"<a href="$2">$1</a>"#);
    let text = BOLD.replace_all(&text, "<b>$1</b>");
    let text = ITALIC.replace_all(&text, "$1<i>$2</i>$3");
    let mut text = BULLET.replace_all(&text, "• ").into_owned();

    for (idx, html) in blocks.iter().enumerate() {
        text = text.replace(&format!("\x00{idx}\x00"), html);
    }
    text
}

/// Split `text` into chunks of at most `max_len` bytes, preferring to break
/// at a newline and never inside a UTF-8 character.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max_len {
        let mut end = max_len;
        while end > 0 && !rest.is_char_boundary(end) {
            end -= 1;
        }
        let cut = match rest[..end].rfind('\n') {
            Some(nl) if nl > 0 => nl,
            _ => end.max(rest.chars().next().map_or(1, char::len_utf8)),
        };
        let (chunk, tail) = rest.split_at(cut);
        chunks.push(chunk.to_string());
        rest = tail.strip_prefix('\n').unwrap_or(tail);
    }
    chunks.push(rest.to_string());
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_styles() {
        assert_eq!(
            markdown_to_telegram_html("ROAS is **3.2x**, up _slightly_."),
            "ROAS is <b>3.2x</b>, up <i>slightly</i>."
        );
    }

    #[test]
    fn test_snake_case_is_not_italic() {
        assert_eq!(
            markdown_to_telegram_html("group by campaign_id_raw"),
            "group by campaign_id_raw"
        );
    }

    #[test]
    fn test_html_is_escaped_outside_and_inside_code() {
        assert_eq!(
            markdown_to_telegram_html("spend < budget & `a<b`"),
            "spend &lt; budget &amp; <code>a&lt;b</code>"
        );
    }

    #[test]
    fn test_code_block_is_left_alone() {
        let out = markdown_to_telegram_html("```sql\nSELECT **x** FROM t\n```");
        assert_eq!(out, "<pre><code>SELECT **x** FROM t\n</code></pre>");
    }

    #[test]
    fn test_links_headings_bullets() {
        let out = markdown_to_telegram_html(
            "## Report\n- see [dashboard](https://example.com/d)\n* done",
        );
        assert_eq!(
            out,
            "Report\n• see <a href=\"https://example.com/d\">dashboard</a>\n• done"
        );
    }

    #[test]
    fn test_split_short_and_empty() {
        assert_eq!(split_message("short", 4096), vec!["short"]);
        assert_eq!(split_message("", 4096), vec![""]);
    }

    #[test]
    fn test_split_prefers_newline() {
        let text = format!("{}\n{}", "a".repeat(50), "b".repeat(50));
        assert_eq!(split_message(&text, 60), vec!["a".repeat(50), "b".repeat(50)]);
    }

    #[test]
    fn test_split_hard_cut() {
        let chunks = split_message(&"a".repeat(100), 60);
        assert_eq!(chunks.iter().map(String::len).collect::<Vec<_>>(), vec![60, 40]);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "é".repeat(10); // 20 bytes
        let chunks = split_message(&text, 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), text);
    }
}
