//! One sequential pass over the tracked channels.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::dedup;
use crate::dispatch::{self, DownloadBackend};
use crate::error::CheckError;
use crate::feed;
use crate::fetch::FeedSource;
use crate::model::{Channel, Settings};
use crate::store::Store;

/// Pause between channels, bounding request rate against upstream services.
pub const DEFAULT_CHANNEL_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelError {
    pub channel: String,
    pub message: String,
}

/// A new video the backend did not accept. It stays stored without a
/// request time and is not retried by later passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDispatch {
    pub channel: String,
    pub video_id: String,
    pub title: String,
    pub category: String,
    pub message: String,
}

/// Result of checking a single channel.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ChannelReport {
    pub videos_seen: usize,
    pub videos_added: usize,
    pub videos_dispatched: usize,
    pub failed_dispatches: Vec<FailedDispatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub channels_checked: usize,
    pub videos_seen: usize,
    pub videos_added: usize,
    pub videos_dispatched: usize,
    pub errors: Vec<ChannelError>,
    pub failed_dispatches: Vec<FailedDispatch>,
}

impl RunSummary {
    /// A summary with no work recorded, stamped with the current time.
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            channels_checked: 0,
            videos_seen: 0,
            videos_added: 0,
            videos_dispatched: 0,
            errors: Vec::new(),
            failed_dispatches: Vec::new(),
        }
    }

    fn absorb(&mut self, report: ChannelReport) {
        self.videos_seen += report.videos_seen;
        self.videos_added += report.videos_added;
        self.videos_dispatched += report.videos_dispatched;
        self.failed_dispatches.extend(report.failed_dispatches);
    }
}

/// Everything one pass reads from. Settings are loaded by the caller at the
/// start of the pass and stay fixed until it ends.
pub struct Walker<'a> {
    pub store: &'a Store,
    pub feeds: &'a dyn FeedSource,
    pub backend: &'a dyn DownloadBackend,
    pub settings: &'a Settings,
    pub delay: Duration,
}

impl Walker<'_> {
    /// Fetch, parse, ingest, then dispatch exactly the newly stored videos.
    pub async fn check_channel(&self, channel: &Channel) -> Result<ChannelReport, CheckError> {
        let xml = self.feeds.fetch(&channel.channel_id).await?;
        let candidates = feed::parse_feed(&xml, self.settings.filter_shorts)?;
        let outcome = dedup::ingest(self.store, channel, &candidates).await?;

        let mut report = ChannelReport {
            videos_seen: outcome.seen(),
            videos_added: outcome.inserted.len(),
            ..ChannelReport::default()
        };
        for video in &outcome.inserted {
            match dispatch::dispatch(self.store, self.backend, video, &channel.name).await {
                Ok(_) => report.videos_dispatched += 1,
                Err(err) => {
                    warn!(
                        channel = %channel.name,
                        video_id = %video.video_id,
                        error = %err,
                        "download dispatch failed"
                    );
                    report.failed_dispatches.push(FailedDispatch {
                        channel: channel.name.clone(),
                        video_id: video.video_id.clone(),
                        title: video.title.clone(),
                        category: err.category().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Checks every channel in order. A failing channel is recorded and
    /// skipped; it never ends the pass.
    pub async fn walk(&self, channels: &[Channel]) -> RunSummary {
        let mut summary = RunSummary::empty();
        for (index, channel) in channels.iter().enumerate() {
            summary.channels_checked += 1;
            match self.check_channel(channel).await {
                Ok(report) => {
                    info!(
                        channel = %channel.name,
                        seen = report.videos_seen,
                        added = report.videos_added,
                        dispatched = report.videos_dispatched,
                        "channel checked"
                    );
                    summary.absorb(report);
                }
                Err(err) => {
                    warn!(channel = %channel.name, error = %err, "channel check failed");
                    summary.errors.push(ChannelError {
                        channel: channel.name.clone(),
                        message: err.to_string(),
                    });
                }
            }

            if index + 1 < channels.len() && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        summary.finished_at = Utc::now();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::RecordingBackend;
    use crate::feed::tests::{FeedEntry, feed_xml};
    use crate::fetch::tests::StubFeeds;
    use tempfile::{TempDir, tempdir};

    async fn store_with_channels(names: &[(&str, &str)]) -> (TempDir, Store, Vec<Channel>) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("dvr.db")).await.unwrap();
        let mut channels = Vec::new();
        for (channel_id, name) in names {
            channels.push(store.add_channel(channel_id, name).await.unwrap());
        }
        (dir, store, channels)
    }

    fn walker<'a>(
        store: &'a Store,
        feeds: &'a StubFeeds,
        backend: &'a RecordingBackend,
        settings: &'a Settings,
    ) -> Walker<'a> {
        Walker {
            store,
            feeds,
            backend,
            settings,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn new_entries_are_stored_and_dispatched_once() {
        let (_dir, store, channels) = store_with_channels(&[("UC1", "Alpha")]).await;
        let feeds = StubFeeds::default().with(
            "UC1",
            feed_xml(&[
                FeedEntry::new("aaaaaaaaaa1", "One"),
                FeedEntry::new("aaaaaaaaaa2", "Two"),
                FeedEntry::new("aaaaaaaaaa3", "Three"),
            ]),
        );
        let backend = RecordingBackend::default();
        let settings = Settings::default();
        let walker = walker(&store, &feeds, &backend, &settings);

        let first = walker.walk(&channels).await;
        assert_eq!(first.channels_checked, 1);
        assert_eq!(first.videos_seen, 3);
        assert_eq!(first.videos_added, 3);
        assert_eq!(first.videos_dispatched, 3);
        assert!(first.errors.is_empty());
        assert_eq!(
            backend.submitted_ids(),
            ["aaaaaaaaaa1", "aaaaaaaaaa2", "aaaaaaaaaa3"]
        );

        let second = walker.walk(&channels).await;
        assert_eq!(second.videos_seen, 3);
        assert_eq!(second.videos_added, 0);
        assert_eq!(second.videos_dispatched, 0);
        assert_eq!(backend.submitted_ids().len(), 3);
        assert_eq!(store.count_videos().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn failing_channel_does_not_stop_the_pass() {
        let (_dir, store, channels) =
            store_with_channels(&[("UC1", "Alpha"), ("UC2", "Beta"), ("UC3", "Gamma")]).await;
        let feeds = StubFeeds::default()
            .with("UC1", feed_xml(&[FeedEntry::new("aaaaaaaaaa1", "One")]))
            .with("UC3", feed_xml(&[FeedEntry::new("cccccccccc1", "Three")]));
        let backend = RecordingBackend::default();
        let settings = Settings::default();

        let summary = walker(&store, &feeds, &backend, &settings)
            .walk(&channels)
            .await;

        assert_eq!(summary.channels_checked, 3);
        assert_eq!(summary.videos_added, 2);
        assert_eq!(summary.videos_dispatched, 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].channel, "Beta");
        assert!(summary.errors[0].message.contains("404"));
    }

    #[tokio::test]
    async fn malformed_feed_is_a_channel_error() {
        let (_dir, store, channels) = store_with_channels(&[("UC1", "Alpha")]).await;
        let feeds = StubFeeds::default().with("UC1", "<html>oops</html>".into());
        let backend = RecordingBackend::default();
        let settings = Settings::default();

        let summary = walker(&store, &feeds, &backend, &settings)
            .walk(&channels)
            .await;
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].message.starts_with("malformed feed"));
        assert_eq!(store.count_videos().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejected_dispatch_is_recorded_but_not_retried() {
        let (_dir, store, channels) = store_with_channels(&[("UC1", "Alpha")]).await;
        let feeds = StubFeeds::default().with(
            "UC1",
            feed_xml(&[
                FeedEntry::new("aaaaaaaaaa1", "One"),
                FeedEntry::new("aaaaaaaaaa2", "Two"),
            ]),
        );
        let backend = RecordingBackend::rejecting("aaaaaaaaaa1");
        let settings = Settings::default();
        let walker = walker(&store, &feeds, &backend, &settings);

        let summary = walker.walk(&channels).await;
        assert_eq!(summary.videos_added, 2);
        assert_eq!(summary.videos_dispatched, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.failed_dispatches.len(), 1);
        assert_eq!(summary.failed_dispatches[0].video_id, "aaaaaaaaaa1");

        let rejected = store.get_video("aaaaaaaaaa1").await.unwrap().unwrap();
        assert!(rejected.video.download_requested_at.is_none());
        let accepted = store.get_video("aaaaaaaaaa2").await.unwrap().unwrap();
        assert!(accepted.video.download_requested_at.is_some());

        walker.walk(&channels).await;
        assert_eq!(backend.submitted_ids().len(), 2);
    }

    #[tokio::test]
    async fn filtered_shorts_are_never_stored() {
        let (_dir, store, channels) = store_with_channels(&[("UC1", "Alpha")]).await;
        let feeds = StubFeeds::default().with(
            "UC1",
            feed_xml(&[
                FeedEntry::new("aaaaaaaaaa1", "Quick tip #shorts"),
                FeedEntry::new("aaaaaaaaaa2", "Full episode"),
            ]),
        );
        let backend = RecordingBackend::default();
        let settings = Settings {
            filter_shorts: true,
            ..Settings::default()
        };

        let summary = walker(&store, &feeds, &backend, &settings)
            .walk(&channels)
            .await;
        assert_eq!(summary.videos_added, 1);
        assert!(store.get_video("aaaaaaaaaa1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_runs_between_channels_only() {
        let (_dir, store, channels) =
            store_with_channels(&[("UC1", "Alpha"), ("UC2", "Beta"), ("UC3", "Gamma")]).await;
        let feeds = StubFeeds::default()
            .with("UC1", feed_xml(&[]))
            .with("UC2", feed_xml(&[]))
            .with("UC3", feed_xml(&[]));
        let backend = RecordingBackend::default();
        let settings = Settings::default();
        let walker = Walker {
            delay: DEFAULT_CHANNEL_DELAY,
            ..walker(&store, &feeds, &backend, &settings)
        };

        let started = tokio::time::Instant::now();
        walker.walk(&channels).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= DEFAULT_CHANNEL_DELAY * 2);
        assert!(elapsed < DEFAULT_CHANNEL_DELAY * 3);
    }
}
