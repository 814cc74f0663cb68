//! Interval scheduling with a single-flight guard.
//!
//! Idle means no timers are registered. `start` registers a recurring timer
//! plus one delayed initial run; `stop` cancels both but never interrupts a
//! pass already in progress. Every pass, whether timed or manual, must hold a
//! [`PassGuard`], and at most one guard exists at a time. Guarded work always
//! runs on its own task: a pass that has stored new videos must reach their
//! dispatch even when whoever asked for it stops waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::walker::RunSummary;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(60);

#[async_trait]
pub trait CheckRunner: Send + Sync + 'static {
    async fn run_pass(&self) -> Result<RunSummary>;
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub initial_delay: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("a check is already running")]
    Busy,
    #[error(transparent)]
    Run(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub active: bool,
    pub checking: bool,
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
    pub last_run: Option<RunSummary>,
    pub last_error: Option<LastError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastError {
    pub at: DateTime<Utc>,
    pub message: String,
}

struct Inner {
    runner: Arc<dyn CheckRunner>,
    config: ScheduleConfig,
    checking: AtomicBool,
    idle: Notify,
    timers: Mutex<Option<CancellationToken>>,
    last_run: Mutex<Option<RunSummary>>,
    last_error: Mutex<Option<LastError>>,
}

/// Proof that the caller owns the single pass slot. Dropping it, including
/// during a panic unwind, frees the slot.
pub struct PassGuard {
    inner: Arc<Inner>,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.inner.checking.store(false, Ordering::SeqCst);
        self.inner.idle.notify_waiters();
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn CheckRunner>, config: ScheduleConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                config,
                checking: AtomicBool::new(false),
                idle: Notify::new(),
                timers: Mutex::new(None),
                last_run: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Claims the pass slot, or `None` when a pass is already running.
    pub fn try_begin(&self) -> Option<PassGuard> {
        try_begin(&self.inner)
    }

    /// Idle to Active. Returns false when already active.
    pub fn start(&self) -> bool {
        let mut timers = self.inner.timers.lock();
        if timers.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        let ScheduleConfig {
            interval,
            initial_delay,
        } = self.inner.config;

        let inner = self.inner.clone();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(initial_delay) => fire(&inner, "initial"),
            }
        });

        let inner = self.inner.clone();
        let cancelled = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => fire(&inner, "interval"),
                }
            }
        });

        *timers = Some(token);
        info!(
            interval_secs = interval.as_secs(),
            initial_delay_secs = initial_delay.as_secs(),
            "scheduler started"
        );
        true
    }

    /// Active to Idle. Returns false when already idle.
    pub fn stop(&self) -> bool {
        match self.inner.timers.lock().take() {
            Some(token) => {
                token.cancel();
                info!("scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.timers.lock().is_some()
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            active: self.is_active(),
            checking: self.inner.checking.load(Ordering::SeqCst),
            interval_secs: self.inner.config.interval.as_secs(),
            initial_delay_secs: self.inner.config.initial_delay.as_secs(),
            last_run: self.inner.last_run.lock().clone(),
            last_error: self.inner.last_error.lock().clone(),
        }
    }

    /// Runs a full pass now and waits for it.
    pub async fn run_now(&self) -> Result<RunSummary, SchedulerError> {
        let inner = self.inner.clone();
        let summary = self
            .run_exclusive(async move { execute(&inner, "manual").await })
            .await??;
        Ok(summary)
    }

    /// Claims the pass slot and runs `work` on its own task while holding it.
    /// Dropping the returned future stops the wait, never the work.
    pub async fn run_exclusive<F>(&self, work: F) -> Result<F::Output, SchedulerError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.try_begin().ok_or(SchedulerError::Busy)?;
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        handle
            .await
            .map_err(|err| SchedulerError::Run(anyhow!("check task failed: {err}")))
    }

    /// Resolves once no pass holds the slot.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.inner.checking.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

fn try_begin(inner: &Arc<Inner>) -> Option<PassGuard> {
    inner
        .checking
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .ok()
        .map(|_| PassGuard {
            inner: inner.clone(),
        })
}

/// Timer callback. The pass gets its own task so cancelling the timers
/// leaves it running.
fn fire(inner: &Arc<Inner>, trigger: &'static str) {
    let Some(guard) = try_begin(inner) else {
        info!(trigger, "check already running, skipping");
        return;
    };
    let inner = inner.clone();
    tokio::spawn(async move {
        let _guard = guard;
        let _ = execute(&inner, trigger).await;
    });
}

async fn execute(inner: &Inner, trigger: &'static str) -> Result<RunSummary> {
    info!(trigger, "starting check");
    let result = inner.runner.run_pass().await;
    match &result {
        Ok(summary) => {
            info!(
                trigger,
                channels = summary.channels_checked,
                seen = summary.videos_seen,
                added = summary.videos_added,
                dispatched = summary.videos_dispatched,
                errors = summary.errors.len(),
                failed_dispatches = summary.failed_dispatches.len(),
                "check finished"
            );
            *inner.last_run.lock() = Some(summary.clone());
            *inner.last_error.lock() = None;
        }
        Err(err) => {
            error!(trigger, error = %format!("{err:#}"), "check failed");
            *inner.last_error.lock() = Some(LastError {
                at: Utc::now(),
                message: format!("{err:#}"),
            });
        }
    }
    result
}
