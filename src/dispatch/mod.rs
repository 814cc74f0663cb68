//! Hand-off of new videos to the download backend.
//!
//! Two unrelated backends exist (direct submit and resolve-then-queue); both
//! are reached through [`DownloadBackend`], and the active one is chosen from
//! the freshly loaded [`Settings`] by a [`BackendProvider`].

pub mod aria2;
pub mod metube;
pub mod resolver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::DispatchError;
use crate::model::{BackendKind, Settings, Video};
use crate::naming;
use crate::store::Store;

pub use aria2::Aria2Backend;
pub use metube::MetubeBackend;
pub use resolver::{MediaResolver, YtDlpResolver};

/// Everything a backend needs to queue one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub video_id: String,
    /// Canonical watch URL; resolving backends turn it into a media URL.
    pub url: String,
    pub title: String,
    pub name_prefix: Option<String>,
}

impl DownloadRequest {
    pub fn for_video(video: &Video, channel_name: &str) -> Self {
        let name_prefix = Some(naming::name_prefix(channel_name, video.published_at))
            .filter(|_| !naming::sanitize(channel_name).is_empty());
        Self {
            video_id: video.video_id.clone(),
            url: video.video_url.clone(),
            title: video.title.clone(),
            name_prefix,
        }
    }
}

/// Accepted submission. `job_id` is whatever the backend handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: Option<String>,
}

#[async_trait]
pub trait DownloadBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit(&self, request: &DownloadRequest) -> Result<Submission, DispatchError>;

    /// Cheap reachability check, returning a short description of the peer.
    async fn probe(&self) -> Result<String, DispatchError>;
}

pub trait BackendProvider: Send + Sync {
    fn backend_for(&self, settings: &Settings) -> Arc<dyn DownloadBackend>;
}

/// Builds the real backends from settings.
pub struct ConfiguredBackends {
    timeout: Duration,
    resolver: Arc<dyn MediaResolver>,
}

impl ConfiguredBackends {
    pub fn new(timeout: Duration, resolver: Arc<dyn MediaResolver>) -> Self {
        Self { timeout, resolver }
    }
}

impl BackendProvider for ConfiguredBackends {
    fn backend_for(&self, settings: &Settings) -> Arc<dyn DownloadBackend> {
        match settings.backend {
            BackendKind::Metube => Arc::new(MetubeBackend::new(&settings.metube_url, self.timeout)),
            BackendKind::Aria2 => Arc::new(Aria2Backend::new(
                settings,
                self.resolver.clone(),
                self.timeout,
            )),
        }
    }
}

/// Submits one stored video and records when the backend accepted it.
pub async fn dispatch(
    store: &Store,
    backend: &dyn DownloadBackend,
    video: &Video,
    channel_name: &str,
) -> Result<DateTime<Utc>, DispatchError> {
    let request = DownloadRequest::for_video(video, channel_name);
    let submission = backend.submit(&request).await?;

    let requested_at = Utc::now();
    store
        .mark_download_requested(&video.video_id, requested_at)
        .await
        .map_err(|err| DispatchError::Persistence(format!("{err:#}")))?;

    info!(
        backend = backend.name(),
        video_id = %video.video_id,
        title = %video.title,
        job_id = submission.job_id.as_deref().unwrap_or("-"),
        "download requested"
    );
    Ok(requested_at)
}

/// Runs a blocking HTTP exchange off the async workers.
pub(crate) async fn run_blocking<T, F>(backend: &'static str, call: F) -> Result<T, DispatchError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
{
    tokio::task::spawn_blocking(call).await.map_err(|err| {
        DispatchError::ConnectionRefused(format!("{backend} request task failed: {err}"))
    })?
}

pub(crate) fn transport_error(backend: &str, transport: &ureq::Transport) -> DispatchError {
    if is_timeout(transport) {
        DispatchError::Timeout(format!("{backend}: {transport}"))
    } else {
        DispatchError::ConnectionRefused(format!("{backend}: {transport}"))
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        {
            return true;
        }
        source = err.source();
    }
    transport.to_string().to_ascii_lowercase().contains("timed out")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::CandidateVideo;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use tempfile::tempdir;

    /// Backend double that records submissions and rejects chosen ids.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub(crate) requests: Mutex<Vec<DownloadRequest>>,
        pub(crate) reject: Mutex<HashSet<String>>,
        pub(crate) submit_delay: Duration,
    }

    impl RecordingBackend {
        pub(crate) fn rejecting(video_id: &str) -> Self {
            let backend = Self::default();
            backend.reject.lock().insert(video_id.to_string());
            backend
        }

        pub(crate) fn with_submit_delay(mut self, delay: Duration) -> Self {
            self.submit_delay = delay;
            self
        }

        pub(crate) fn submitted_ids(&self) -> Vec<String> {
            self.requests
                .lock()
                .iter()
                .map(|request| request.video_id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl DownloadBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn submit(&self, request: &DownloadRequest) -> Result<Submission, DispatchError> {
            if !self.submit_delay.is_zero() {
                tokio::time::sleep(self.submit_delay).await;
            }
            self.requests.lock().push(request.clone());
            if self.reject.lock().contains(&request.video_id) {
                return Err(DispatchError::BackendRejected {
                    status: 500,
                    message: "Internal Server Error".into(),
                });
            }
            Ok(Submission {
                job_id: Some(format!("job-{}", request.video_id)),
            })
        }

        async fn probe(&self) -> Result<String, DispatchError> {
            Ok("recording backend".into())
        }
    }

    /// Hands out the same backend regardless of settings.
    pub(crate) struct FixedBackend(pub(crate) Arc<RecordingBackend>);

    impl BackendProvider for FixedBackend {
        fn backend_for(&self, _settings: &Settings) -> Arc<dyn DownloadBackend> {
            self.0.clone()
        }
    }

    async fn stored_video(store: &Store, channel_name: &str) -> Video {
        let channel = store.add_channel("UC123", channel_name).await.unwrap();
        store
            .insert_video_if_absent(
                channel.id,
                &CandidateVideo {
                    video_id: "abc12345678".into(),
                    title: "Launch day".into(),
                    description: String::new(),
                    published_at: Utc.with_ymd_and_hms(2024, 3, 5, 8, 7, 9).unwrap(),
                    thumbnail_url: String::new(),
                    video_url: "https://www.youtube.com/watch?v=abc12345678".into(),
                },
            )
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn request_carries_channel_prefix() {
        let video = Video {
            id: 1,
            video_id: "abc12345678".into(),
            channel: 1,
            title: "Launch day".into(),
            description: String::new(),
            published_at: Utc.with_ymd_and_hms(2024, 3, 5, 8, 7, 9).unwrap(),
            thumbnail_url: String::new(),
            video_url: "https://www.youtube.com/watch?v=abc12345678".into(),
            download_requested_at: None,
        };
        let request = DownloadRequest::for_video(&video, "Tech & Stuff!");
        assert_eq!(
            request.name_prefix.as_deref(),
            Some("Tech_Stuff_20240305080709")
        );
        assert_eq!(request.url, video.video_url);

        let unnamed = DownloadRequest::for_video(&video, "!!!");
        assert!(unnamed.name_prefix.is_none());
    }

    #[tokio::test]
    async fn dispatch_records_request_time_on_success() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("dvr.db")).await.unwrap();
        let video = stored_video(&store, "Tech & Stuff!").await;
        let backend = RecordingBackend::default();

        let at = dispatch(&store, &backend, &video, "Tech & Stuff!")
            .await
            .unwrap();

        let stored = store.get_video(&video.video_id).await.unwrap().unwrap();
        assert!(stored.video.download_requested_at.is_some());
        assert!(
            (stored.video.download_requested_at.unwrap() - at)
                .num_seconds()
                .abs()
                <= 1
        );
        assert_eq!(backend.submitted_ids(), ["abc12345678"]);
    }

    #[tokio::test]
    async fn rejected_dispatch_leaves_video_unmarked() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("dvr.db")).await.unwrap();
        let video = stored_video(&store, "Alpha").await;
        let backend = RecordingBackend::rejecting("abc12345678");

        let err = dispatch(&store, &backend, &video, "Alpha")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::BackendRejected { status: 500, .. }));

        let stored = store.get_video(&video.video_id).await.unwrap().unwrap();
        assert!(stored.video.download_requested_at.is_none());
    }

    #[test]
    fn configured_backends_follow_settings() {
        let provider = ConfiguredBackends::new(
            Duration::from_secs(1),
            Arc::new(YtDlpResolver::new("yt-dlp", Duration::from_secs(1))),
        );
        let metube = provider.backend_for(&Settings::default());
        assert_eq!(metube.name(), "metube");

        let aria2 = provider.backend_for(&Settings {
            backend: BackendKind::Aria2,
            ..Settings::default()
        });
        assert_eq!(aria2.name(), "aria2");
    }
}
