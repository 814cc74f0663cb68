//! Wires storage, feed retrieval and the configured backend into passes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::dispatch::{self, BackendProvider};
use crate::error::{CheckError, DispatchError};
use crate::fetch::FeedSource;
use crate::scheduler::CheckRunner;
use crate::store::Store;
use crate::walker::{ChannelReport, RunSummary, Walker};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Check(#[from] CheckError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct Engine {
    store: Store,
    feeds: Arc<dyn FeedSource>,
    backends: Arc<dyn BackendProvider>,
    channel_delay: Duration,
}

impl Engine {
    pub fn new(
        store: Store,
        feeds: Arc<dyn FeedSource>,
        backends: Arc<dyn BackendProvider>,
        channel_delay: Duration,
    ) -> Self {
        Self {
            store,
            feeds,
            backends,
            channel_delay,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Full pass over every tracked channel. Settings are read once here, so
    /// edits made mid-pass apply from the next pass.
    pub async fn run_pass(&self) -> Result<RunSummary> {
        let settings = self.store.load_settings().await?;
        let channels = self.store.list_channels().await?;
        let backend = self.backends.backend_for(&settings);
        let walker = Walker {
            store: &self.store,
            feeds: self.feeds.as_ref(),
            backend: backend.as_ref(),
            settings: &settings,
            delay: self.channel_delay,
        };
        Ok(walker.walk(&channels).await)
    }

    pub async fn check_channel(&self, channel_id: &str) -> Result<ChannelReport, EngineError> {
        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("channel {channel_id}")))?;
        let settings = self.store.load_settings().await?;
        let backend = self.backends.backend_for(&settings);
        let walker = Walker {
            store: &self.store,
            feeds: self.feeds.as_ref(),
            backend: backend.as_ref(),
            settings: &settings,
            delay: Duration::ZERO,
        };
        Ok(walker.check_channel(&channel).await?)
    }

    /// Operator-initiated submission of an already stored video, regardless
    /// of whether it was requested before.
    pub async fn redispatch(&self, video_id: &str) -> Result<DateTime<Utc>, EngineError> {
        let listing = self
            .store
            .get_video(video_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("video {video_id}")))?;
        let settings = self.store.load_settings().await?;
        let backend = self.backends.backend_for(&settings);
        Ok(dispatch::dispatch(
            &self.store,
            backend.as_ref(),
            &listing.video,
            &listing.channel_name,
        )
        .await?)
    }

    /// Reachability of the backend the current settings select.
    pub async fn probe_backend(&self) -> Result<(&'static str, String), EngineError> {
        let settings = self.store.load_settings().await?;
        let backend = self.backends.backend_for(&settings);
        let description = backend.probe().await?;
        Ok((backend.name(), description))
    }
}

#[async_trait]
impl CheckRunner for Engine {
    async fn run_pass(&self) -> Result<RunSummary> {
        Engine::run_pass(self).await
    }
}
