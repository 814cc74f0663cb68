//! Heuristic classification of short-form uploads.
//!
//! The feed carries no duration, so the decision is made from the title and
//! the watch URL only.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::CandidateVideo;

static SHORTS_TITLE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "#shorts" hashtag anywhere in the title.
        r"(?i)#shorts\b",
        // "shorts" as a standalone word.
        r"(?i)\bshorts\b",
        // "Shorts: something" style prefixes.
        r"(?i)^\s*shorts\s*:",
        // Titles that are nothing but a numbered hashtag, e.g. "#42".
        r"^\s*#\d+\s*$",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

pub fn title_looks_like_short(title: &str) -> bool {
    SHORTS_TITLE.iter().any(|pattern| pattern.is_match(title))
}

pub fn url_looks_like_short(url: &str) -> bool {
    url.to_ascii_lowercase().contains("/shorts/")
}

/// Video ids carry no reliable signal; kept as an explicit extension point
/// so the classifier reads the same way for every field.
fn video_id_looks_like_short(_video_id: &str) -> bool {
    false
}

pub fn is_short(candidate: &CandidateVideo) -> bool {
    title_looks_like_short(&candidate.title)
        || url_looks_like_short(&candidate.video_url)
        || video_id_looks_like_short(&candidate.video_id)
}
