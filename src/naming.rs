//! Deterministic names for queued downloads.

use chrono::{DateTime, Utc};

/// Longest title fragment kept in an output filename.
pub const MAX_TITLE_LEN: usize = 100;
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Keeps ASCII letters, digits and spaces, then joins the remaining words
/// with underscores. `"Tech & Stuff!"` becomes `"Tech_Stuff"`.
pub fn sanitize(value: &str) -> String {
    let kept: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join("_")
}

/// `{channel}_{YYYYMMDDHHmmss}` using the publish time, not the wall clock.
pub fn name_prefix(channel_name: &str, published_at: DateTime<Utc>) -> String {
    format!(
        "{}_{}",
        sanitize(channel_name),
        published_at.format("%Y%m%d%H%M%S")
    )
}

/// Output filename for queueing backends that need one up front.
pub fn output_filename(title: &str, prefix: Option<&str>) -> String {
    let mut stem: String = sanitize(title).chars().take(MAX_TITLE_LEN).collect();
    if stem.is_empty() {
        stem.push_str("video");
    }
    match prefix.filter(|prefix| !prefix.is_empty()) {
        Some(prefix) => format!("{prefix}_{stem}.{OUTPUT_EXTENSION}"),
        None => format!("{stem}.{OUTPUT_EXTENSION}"),
    }
}
