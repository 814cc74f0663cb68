//! Turns a channel's Atom feed into candidate videos.

use feed_rs::model::Entry;
use feed_rs::parser;
use tracing::debug;

use crate::error::CheckError;
use crate::model::CandidateVideo;
use crate::shorts;

const VIDEO_ID_PREFIX: &str = "yt:video:";

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Public thumbnail location for a video id, used when the feed has none.
pub fn thumbnail_url(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg")
}

/// Parses a feed document, preserving entry order. With `filter_shorts`
/// set, entries classified as short-form are dropped here so they are never
/// persisted. A malformed document fails as a whole.
pub fn parse_feed(xml: &str, filter_shorts: bool) -> Result<Vec<CandidateVideo>, CheckError> {
    let feed = parser::parse(xml.as_bytes()).map_err(|err| CheckError::Parse(err.to_string()))?;

    let mut candidates = Vec::with_capacity(feed.entries.len());
    for entry in &feed.entries {
        let Some(candidate) = entry_to_candidate(entry)? else {
            continue;
        };
        if filter_shorts && shorts::is_short(&candidate) {
            debug!(video_id = %candidate.video_id, title = %candidate.title, "skipping short");
            continue;
        }
        candidates.push(candidate);
    }
    Ok(candidates)
}

/// Entries without a recognizable video id are skipped; entries with an id
/// but no timestamp make the document malformed.
fn entry_to_candidate(entry: &Entry) -> Result<Option<CandidateVideo>, CheckError> {
    let Some(video_id) = video_id(entry) else {
        return Ok(None);
    };

    let published_at = entry
        .published
        .or(entry.updated)
        .ok_or_else(|| CheckError::Parse(format!("entry {video_id} has no publish time")))?;

    let media = entry.media.first();
    let title = entry
        .title
        .as_ref()
        .or_else(|| media.and_then(|media| media.title.as_ref()))
        .map(|text| text.content.trim().to_string())
        .unwrap_or_default();
    let description = media
        .and_then(|media| media.description.as_ref())
        .map(|text| text.content.clone())
        .unwrap_or_default();
    let thumbnail_url = media
        .and_then(|media| media.thumbnails.first())
        .map(|thumbnail| thumbnail.image.uri.clone())
        .filter(|uri| !uri.trim().is_empty())
        .unwrap_or_else(|| thumbnail_url(&video_id));
    let video_url = entry
        .links
        .iter()
        .find(|link| link.rel.as_deref().is_none_or(|rel| rel == "alternate"))
        .map(|link| link.href.clone())
        .filter(|href| !href.trim().is_empty())
        .unwrap_or_else(|| watch_url(&video_id));

    Ok(Some(CandidateVideo {
        video_id,
        title,
        description,
        published_at,
        thumbnail_url,
        video_url,
    }))
}

fn video_id(entry: &Entry) -> Option<String> {
    if let Some(id) = entry.id.trim().strip_prefix(VIDEO_ID_PREFIX)
        && !id.is_empty()
    {
        return Some(id.to_string());
    }
    // Fall back to the `v=` parameter of the watch link.
    entry.links.iter().find_map(|link| {
        let (_, query) = link.href.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("v="))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    })
}
