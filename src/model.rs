//! Entities shared between the store, the feed pipeline and the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked channel. `id` is the store's row id; `channel_id` is the
/// platform identifier used to build the feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub channel_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One entry read from a channel feed that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateVideo {
    pub video_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: String,
    pub video_url: String,
}

/// A persisted video. Only `download_requested_at` changes after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: i64,
    pub video_id: String,
    pub channel: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: String,
    pub video_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_requested_at: Option<DateTime<Utc>>,
}

impl Video {
    pub fn from_candidate(id: i64, channel: i64, candidate: &CandidateVideo) -> Self {
        Self {
            id,
            video_id: candidate.video_id.clone(),
            channel,
            title: candidate.title.clone(),
            description: candidate.description.clone(),
            published_at: candidate.published_at,
            thumbnail_url: candidate.thumbnail_url.clone(),
            video_url: candidate.video_url.clone(),
            download_requested_at: None,
        }
    }
}

/// A video joined with the display name of its channel, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct VideoListing {
    #[serde(flatten)]
    pub video: Video,
    pub channel_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Direct submit of the watch URL to a MeTube-style queue.
    Metube,
    /// Resolve a media URL with yt-dlp, then queue it on aria2 over JSON-RPC.
    Aria2,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metube => "metube",
            Self::Aria2 => "aria2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "metube" => Some(Self::Metube),
            "aria2" | "aria2c" => Some(Self::Aria2),
            _ => None,
        }
    }
}

pub const DEFAULT_METUBE_URL: &str = "http://localhost:8081";
pub const DEFAULT_ARIA2_HOST: &str = "localhost";
pub const DEFAULT_ARIA2_PORT: u16 = 6800;
pub const DEFAULT_DOWNLOAD_FOLDER: &str = "/downloads";

/// The single active settings record, reloaded before every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub backend: BackendKind,
    pub metube_url: String,
    pub aria2_host: String,
    pub aria2_port: u16,
    pub download_folder: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    pub filter_shorts: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Metube,
            metube_url: DEFAULT_METUBE_URL.to_string(),
            aria2_host: DEFAULT_ARIA2_HOST.to_string(),
            aria2_port: DEFAULT_ARIA2_PORT,
            download_folder: DEFAULT_DOWNLOAD_FOLDER.to_string(),
            username: String::new(),
            password: String::new(),
            filter_shorts: false,
        }
    }
}

impl Settings {
    /// Credentials are only sent when a username is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.trim().is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }

    pub fn aria2_rpc_url(&self) -> String {
        format!("http://{}:{}/jsonrpc", self.aria2_host, self.aria2_port)
    }
}
