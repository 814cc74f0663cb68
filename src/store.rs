//! libsql persistence for settings, tracked channels and discovered videos.
//!
//! The `videos.video_id` UNIQUE constraint is the only deduplication
//! mechanism in the system: inserts go through `ON CONFLICT DO NOTHING
//! RETURNING id`, so a returned row is the only signal that a video is new.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Row, params};
use thiserror::Error;

use crate::model::{
    BackendKind, CandidateVideo, Channel, DEFAULT_ARIA2_HOST, DEFAULT_ARIA2_PORT,
    DEFAULT_DOWNLOAD_FOLDER, DEFAULT_METUBE_URL, Settings, Video, VideoListing,
};

/// Errors callers are expected to branch on. Everything else is `anyhow`.
#[derive(Debug, Error)]
pub enum ChannelStoreError {
    #[error("channel {0} already exists")]
    AlreadyExists(String),
    #[error("channel {0} not found")]
    NotFound(String),
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        PRAGMA busy_timeout=5000;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            backend TEXT NOT NULL DEFAULT 'metube',
            metube_url TEXT NOT NULL DEFAULT 'http://localhost:8081',
            aria2_host TEXT NOT NULL DEFAULT 'localhost',
            aria2_port INTEGER NOT NULL DEFAULT 6800,
            download_folder TEXT NOT NULL DEFAULT '/downloads',
            username TEXT NOT NULL DEFAULT '',
            password TEXT NOT NULL DEFAULT '',
            filter_shorts INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT
        );

        INSERT OR IGNORE INTO settings (id) VALUES (1);

        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            video_id TEXT UNIQUE NOT NULL,
            channel_id INTEGER NOT NULL REFERENCES channels (id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            published_at TEXT NOT NULL,
            thumbnail_url TEXT NOT NULL DEFAULT '',
            video_url TEXT NOT NULL,
            download_requested_at TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_videos_channel ON videos(channel_id);
        CREATE INDEX IF NOT EXISTS idx_videos_published ON videos(published_at);
        "#,
    )
    .await?;
    Ok(())
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .with_context(|| format!("parsing stored timestamp {value:?}"))
}

/// Handle on the database. Cheap to share behind an `Arc`.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (and if necessary creates) the database and its schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening database {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    pub async fn load_settings(&self) -> Result<Settings> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT backend, metube_url, aria2_host, aria2_port, download_folder,
                       username, password, filter_shorts
                FROM settings
                WHERE id = 1
                "#,
                params![],
            )
            .await?;
        let row = rows.next().await?.context("settings row missing")?;

        let backend: String = row.get(0)?;
        let port: i64 = row.get(3)?;
        Ok(Settings {
            backend: BackendKind::parse(&backend)
                .ok_or_else(|| anyhow!("unknown backend {backend:?} in settings"))?,
            metube_url: row.get(1)?,
            aria2_host: row.get(2)?,
            aria2_port: u16::try_from(port).context("aria2 port out of range")?,
            download_folder: row.get(4)?,
            username: row.get(5)?,
            password: row.get(6)?,
            filter_shorts: row.get::<i64>(7)? != 0,
        })
    }

    /// Replaces the settings record. Blank fields fall back to the defaults
    /// so a half-filled form never leaves the backend unaddressable.
    pub async fn update_settings(&self, settings: &Settings) -> Result<Settings> {
        let or_default = |value: &str, default: &str| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed.to_string()
            }
        };
        let normalized = Settings {
            backend: settings.backend,
            metube_url: or_default(&settings.metube_url, DEFAULT_METUBE_URL)
                .trim_end_matches('/')
                .to_string(),
            aria2_host: or_default(&settings.aria2_host, DEFAULT_ARIA2_HOST),
            aria2_port: if settings.aria2_port == 0 {
                DEFAULT_ARIA2_PORT
            } else {
                settings.aria2_port
            },
            download_folder: or_default(&settings.download_folder, DEFAULT_DOWNLOAD_FOLDER),
            username: settings.username.trim().to_string(),
            password: settings.password.clone(),
            filter_shorts: settings.filter_shorts,
        };

        self.conn
            .execute(
                r#"
                UPDATE settings SET
                    backend = ?1,
                    metube_url = ?2,
                    aria2_host = ?3,
                    aria2_port = ?4,
                    download_folder = ?5,
                    username = ?6,
                    password = ?7,
                    filter_shorts = ?8,
                    updated_at = ?9
                WHERE id = 1
                "#,
                params![
                    normalized.backend.as_str(),
                    normalized.metube_url.as_str(),
                    normalized.aria2_host.as_str(),
                    i64::from(normalized.aria2_port),
                    normalized.download_folder.as_str(),
                    normalized.username.as_str(),
                    normalized.password.as_str(),
                    i64::from(normalized.filter_shorts),
                    timestamp(Utc::now()),
                ],
            )
            .await?;

        Ok(normalized)
    }

    pub async fn add_channel(&self, channel_id: &str, name: &str) -> Result<Channel> {
        let channel_id = channel_id.trim();
        let name = name.trim();
        if channel_id.is_empty() || name.is_empty() {
            anyhow::bail!("channel id and name are required");
        }

        let created_at = Utc::now();
        let inserted = self
            .conn
            .execute(
                r#"
                INSERT INTO channels (channel_id, name, created_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(channel_id) DO NOTHING
                "#,
                params![channel_id, name, timestamp(created_at)],
            )
            .await?;
        if inserted == 0 {
            return Err(ChannelStoreError::AlreadyExists(channel_id.to_string()).into());
        }

        self.get_channel(channel_id)
            .await?
            .ok_or_else(|| anyhow!("channel {channel_id} vanished after insert"))
    }

    /// Tracked channels ordered by display name.
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, channel_id, name, created_at FROM channels ORDER BY name COLLATE NOCASE ASC, id ASC",
                params![],
            )
            .await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            channels.push(row_to_channel(&row)?);
        }
        Ok(channels)
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Option<Channel>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, channel_id, name, created_at FROM channels WHERE channel_id = ?1",
                params![channel_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_channel(&row)?)),
            None => Ok(None),
        }
    }

    /// Deletes a channel; its videos go with it through the foreign key.
    pub async fn remove_channel(&self, channel_id: &str) -> Result<()> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM channels WHERE channel_id = ?1",
                params![channel_id],
            )
            .await?;
        if removed == 0 {
            return Err(ChannelStoreError::NotFound(channel_id.to_string()).into());
        }
        Ok(())
    }

    /// Atomic insert-if-absent keyed on the video id. Returns the stored
    /// video when this call created the row and `None` when it already
    /// existed.
    pub async fn insert_video_if_absent(
        &self,
        channel: i64,
        candidate: &CandidateVideo,
    ) -> Result<Option<Video>> {
        let mut rows = self
            .conn
            .query(
                r#"
                INSERT INTO videos (
                    video_id, channel_id, title, description, published_at,
                    thumbnail_url, video_url, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(video_id) DO NOTHING
                RETURNING id
                "#,
                params![
                    candidate.video_id.as_str(),
                    channel,
                    candidate.title.as_str(),
                    candidate.description.as_str(),
                    timestamp(candidate.published_at),
                    candidate.thumbnail_url.as_str(),
                    candidate.video_url.as_str(),
                    timestamp(Utc::now()),
                ],
            )
            .await
            .with_context(|| format!("inserting video {}", candidate.video_id))?;

        // No returned row means the conflict clause fired.
        match rows.next().await? {
            Some(row) => Ok(Some(Video::from_candidate(row.get(0)?, channel, candidate))),
            None => Ok(None),
        }
    }

    pub async fn mark_download_requested(&self, video_id: &str, at: DateTime<Utc>) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE videos SET download_requested_at = ?1 WHERE video_id = ?2",
                params![timestamp(at), video_id],
            )
            .await?;
        if updated == 0 {
            anyhow::bail!("video {video_id} not found");
        }
        Ok(())
    }

    /// Fetches one video together with its channel's display name.
    pub async fn get_video(&self, video_id: &str) -> Result<Option<VideoListing>> {
        let mut rows = self
            .conn
            .query(
                &format!("{VIDEO_SELECT} WHERE v.video_id = ?1"),
                params![video_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_listing(&row)?)),
            None => Ok(None),
        }
    }

    /// Newest videos first, across every channel.
    pub async fn list_videos(&self, limit: u32) -> Result<Vec<VideoListing>> {
        let mut rows = self
            .conn
            .query(
                &format!("{VIDEO_SELECT} ORDER BY v.published_at DESC, v.id DESC LIMIT ?1"),
                params![i64::from(limit)],
            )
            .await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_listing(&row)?);
        }
        Ok(videos)
    }

    pub async fn count_videos(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM videos", params![])
            .await?;
        let row = rows.next().await?.context("missing count row")?;
        let count: i64 = row.get(0)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

const VIDEO_SELECT: &str = r#"
    SELECT v.id, v.video_id, v.channel_id, v.title, v.description, v.published_at,
           v.thumbnail_url, v.video_url, v.download_requested_at, c.name
    FROM videos v
    JOIN channels c ON v.channel_id = c.id
"#;

fn row_to_channel(row: &Row) -> Result<Channel> {
    let created_at: String = row.get(3)?;
    Ok(Channel {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Column order must match `VIDEO_SELECT`.
fn row_to_listing(row: &Row) -> Result<VideoListing> {
    let published_at: String = row.get(5)?;
    let requested_at: Option<String> = row.get(8)?;
    Ok(VideoListing {
        video: Video {
            id: row.get(0)?,
            video_id: row.get(1)?,
            channel: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            published_at: parse_timestamp(&published_at)?,
            thumbnail_url: row.get(6)?,
            video_url: row.get(7)?,
            download_requested_at: requested_at.as_deref().map(parse_timestamp).transpose()?,
        },
        channel_name: row.get(9)?,
    })
}
