//! JSON control endpoints for the scheduler and manual actions.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::engine::{Engine, EngineError};
use crate::scheduler::{Scheduler, SchedulerError, SchedulerStatus};
use crate::walker::{ChannelReport, RunSummary};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub scheduler: Scheduler,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    fn busy() -> Self {
        Self::new(StatusCode::CONFLICT, "a check is already running")
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(what) => Self::new(StatusCode::NOT_FOUND, format!("{what} not found")),
            EngineError::Check(err) => Self::new(StatusCode::BAD_GATEWAY, err.to_string()),
            EngineError::Dispatch(err) => Self {
                status: StatusCode::BAD_GATEWAY,
                message: err.category().to_string(),
                detail: Some(err.to_string()),
            },
            EngineError::Store(err) => Self::internal(format!("{err:#}")),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Busy => Self::busy(),
            SchedulerError::Run(err) => Self::internal(format!("{err:#}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.detail {
            Some(detail) => json!({ "error": self.message, "detail": detail }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct SchedulerChange {
    pub active: bool,
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct DownloadRequested {
    pub video_id: String,
    pub download_requested_at: DateTime<Utc>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/scheduler", get(scheduler_status))
        .route("/api/scheduler/start", post(start_scheduler))
        .route("/api/scheduler/stop", post(stop_scheduler))
        .route("/api/check", post(run_check))
        .route("/api/channels/{channel_id}/check", post(check_channel))
        .route("/api/videos/{video_id}/download", post(download_video))
        .fallback(|| async { ApiError::new(StatusCode::NOT_FOUND, "endpoint not found") })
        .with_state(state)
}

async fn scheduler_status(State(state): State<ApiState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

async fn start_scheduler(State(state): State<ApiState>) -> Json<SchedulerChange> {
    let changed = state.scheduler.start();
    Json(SchedulerChange {
        active: true,
        changed,
    })
}

async fn stop_scheduler(State(state): State<ApiState>) -> Json<SchedulerChange> {
    let changed = state.scheduler.stop();
    Json(SchedulerChange {
        active: false,
        changed,
    })
}

async fn run_check(State(state): State<ApiState>) -> ApiResult<Json<RunSummary>> {
    Ok(Json(state.scheduler.run_now().await?))
}

async fn check_channel(
    State(state): State<ApiState>,
    Path(channel_id): Path<String>,
) -> ApiResult<Json<ChannelReport>> {
    let engine = state.engine.clone();
    let report = state
        .scheduler
        .run_exclusive(async move { engine.check_channel(&channel_id).await })
        .await??;
    Ok(Json(report))
}

async fn download_video(
    State(state): State<ApiState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<DownloadRequested>> {
    let requested_at = state.engine.redispatch(&video_id).await.map_err(|err| {
        warn!(video_id = %video_id, error = %err, "manual download failed");
        ApiError::from(err)
    })?;
    Ok(Json(DownloadRequested {
        video_id,
        download_requested_at: requested_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{FixedBackend, RecordingBackend};
    use crate::feed::tests::{FeedEntry, feed_xml};
    use crate::fetch::tests::StubFeeds;
    use crate::scheduler::ScheduleConfig;
    use crate::store::Store;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    struct ApiTestContext {
        _dir: TempDir,
        state: ApiState,
        feeds: Arc<StubFeeds>,
        backend: Arc<RecordingBackend>,
    }

    impl ApiTestContext {
        async fn new(backend: RecordingBackend) -> Self {
            let dir = tempdir().unwrap();
            let store = Store::open(&dir.path().join("dvr.db")).await.unwrap();
            store.add_channel("UC1", "Alpha").await.unwrap();
            let feeds = Arc::new(StubFeeds::default().with(
                "UC1",
                feed_xml(&[
                    FeedEntry::new("aaaaaaaaaa1", "One"),
                    FeedEntry::new("aaaaaaaaaa2", "Two"),
                ]),
            ));
            let backend = Arc::new(backend);
            let engine = Arc::new(Engine::new(
                store,
                feeds.clone(),
                Arc::new(FixedBackend(backend.clone())),
                Duration::ZERO,
            ));
            let scheduler = Scheduler::new(engine.clone(), ScheduleConfig::default());
            Self {
                _dir: dir,
                state: ApiState { engine, scheduler },
                feeds,
                backend,
            }
        }
    }

    #[tokio::test]
    async fn start_and_stop_report_transitions() {
        let ctx = ApiTestContext::new(RecordingBackend::default()).await;

        let Json(change) = start_scheduler(State(ctx.state.clone())).await;
        assert!(change.active && change.changed);
        let Json(change) = start_scheduler(State(ctx.state.clone())).await;
        assert!(!change.changed);

        let Json(status) = scheduler_status(State(ctx.state.clone())).await;
        assert!(status.active);
        assert_eq!(status.interval_secs, 1800);

        let Json(change) = stop_scheduler(State(ctx.state.clone())).await;
        assert!(!change.active && change.changed);
        let Json(status) = scheduler_status(State(ctx.state.clone())).await;
        assert!(!status.active);
    }

    #[tokio::test]
    async fn manual_check_runs_a_pass() {
        let ctx = ApiTestContext::new(RecordingBackend::default()).await;

        let Json(summary) = run_check(State(ctx.state.clone())).await.unwrap();
        assert_eq!(summary.videos_added, 2);
        assert_eq!(summary.videos_dispatched, 2);

        let Json(status) = scheduler_status(State(ctx.state.clone())).await;
        assert_eq!(status.last_run.map(|run| run.videos_added), Some(2));
    }

    #[tokio::test]
    async fn checks_are_refused_while_busy() {
        let ctx = ApiTestContext::new(RecordingBackend::default()).await;
        let guard = ctx.state.scheduler.try_begin().unwrap();

        let err = run_check(State(ctx.state.clone())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
        let err = check_channel(State(ctx.state.clone()), Path("UC1".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(ctx.feeds.calls(), 0);

        drop(guard);
        let Json(report) = check_channel(State(ctx.state.clone()), Path("UC1".into()))
            .await
            .unwrap();
        assert_eq!(report.videos_added, 2);
    }

    #[tokio::test]
    async fn disconnected_channel_check_still_dispatches() {
        let backend = RecordingBackend::default().with_submit_delay(Duration::from_millis(200));
        let ctx = ApiTestContext::new(backend).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            check_channel(State(ctx.state.clone()), Path("UC1".into())),
        )
        .await;
        assert!(abandoned.is_err());

        ctx.state.scheduler.wait_idle().await;
        let store = ctx.state.engine.store();
        for video_id in ["aaaaaaaaaa1", "aaaaaaaaaa2"] {
            let stored = store.get_video(video_id).await.unwrap().unwrap();
            assert!(stored.video.download_requested_at.is_some(), "{video_id}");
        }
        assert_eq!(ctx.backend.submitted_ids().len(), 2);
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let ctx = ApiTestContext::new(RecordingBackend::default()).await;
        let err = check_channel(State(ctx.state.clone()), Path("UCnope".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(!ctx.state.scheduler.status().checking);
    }

    #[tokio::test]
    async fn manual_download_sets_request_time() {
        let ctx = ApiTestContext::new(RecordingBackend::default()).await;
        run_check(State(ctx.state.clone())).await.unwrap();

        let Json(done) = download_video(State(ctx.state.clone()), Path("aaaaaaaaaa1".into()))
            .await
            .unwrap();
        assert_eq!(done.video_id, "aaaaaaaaaa1");
        assert_eq!(ctx.backend.submitted_ids().len(), 3);

        let err = download_video(State(ctx.state.clone()), Path("missing".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failed_download_reports_category() {
        let ctx = ApiTestContext::new(RecordingBackend::rejecting("aaaaaaaaaa1")).await;
        run_check(State(ctx.state.clone())).await.unwrap();

        let err = download_video(State(ctx.state.clone()), Path("aaaaaaaaaa1".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.message, "backend rejected the request");
        assert!(err.detail.is_some());
    }
}
