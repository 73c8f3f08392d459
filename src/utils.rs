//! Text helpers shared by the sources, plus output directory checks.
//!
//! - Hashtag extraction and serialization for the `URL/Hashtags` column
//! - Whitespace and tag stripping for scraped text
//! - String truncation for log lines
//! - File system validation for the snapshot directory

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, instrument};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[a-z][^>]*>").expect("static regex"));

/// Extract hashtags from post content.
///
/// A hashtag is any whitespace-separated word starting with `#`. Leading and
/// trailing `#` characters are trimmed; words that are nothing but `#` are
/// dropped.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(extract_hashtags("new #GPT release #ai"), vec!["GPT", "ai"]);
/// ```
pub fn extract_hashtags(content: &str) -> Vec<String> {
    content
        .split_whitespace()
        .filter(|word| word.starts_with('#'))
        .map(|word| word.trim_matches('#'))
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serialize a tag list for the `URL/Hashtags` column as a JSON array.
pub fn tags_to_field(tags: &[String]) -> String {
    format!(
        "[{}]",
        tags.iter()
            .map(|t| serde_json::Value::String(t.clone()).to_string())
            .join(",")
    )
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

/// Remove HTML tags from a fragment and collapse the remaining whitespace.
pub fn strip_tags(s: &str) -> String {
    collapse_whitespace(&HTML_TAG.replace_all(s, " "))
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to at most `max` bytes, on a character
/// boundary, with an ellipsis and a count of the dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then creates and immediately
/// removes a probe file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable
/// (permission denied, read-only filesystem, etc.).
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn ensure_writable_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)?;
    let probe_path = path.join("..__probe_write__");
    fs::File::create(&probe_path)?;
    let _ = fs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
