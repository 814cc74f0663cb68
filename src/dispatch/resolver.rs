//! Watch URL to direct media URL, via an external yt-dlp process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::DispatchError;

/// Single progressive file, best first.
pub const PREFERRED_FORMAT: &str = "b[height>=1080][ext=mp4]/b[height>=720][ext=mp4]/b[ext=mp4]";
/// Whatever single file the extractor can produce.
pub const FALLBACK_FORMAT: &str = "b/best";

const SOCKET_TIMEOUT_SECS: u64 = 30;
const CLIENT_HINT: &str = "youtube:player_client=android";

/// stderr fragments meaning the content itself cannot be fetched.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "private video",
    "video unavailable",
    "sign in to confirm your age",
    "members-only",
    "not available in your country",
    "blocked it in your country",
    "this video is not available",
    "has been removed",
];

#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, watch_url: &str) -> Result<String, DispatchError>;

    /// Version string of the underlying tool.
    async fn version(&self) -> Result<String, DispatchError>;
}

#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    program: PathBuf,
    timeout: Duration,
}

enum AttemptError {
    /// The process never ran; retrying with another selector cannot help.
    Spawn(DispatchError),
    Failed(DispatchError),
}

impl YtDlpResolver {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn attempt(&self, watch_url: &str, selector: &str) -> Result<String, AttemptError> {
        let mut command = Command::new(&self.program);
        command
            .arg("--get-url")
            .arg("--format")
            .arg(selector)
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--socket-timeout")
            .arg(SOCKET_TIMEOUT_SECS.to_string())
            .arg("--extractor-args")
            .arg(CLIENT_HINT)
            .arg(watch_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| {
            AttemptError::Spawn(DispatchError::Resolution(format!(
                "failed to start {}: {err}",
                self.program.display()
            )))
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(AttemptError::Failed(DispatchError::Resolution(format!(
                    "waiting for {}: {err}",
                    self.program.display()
                ))));
            }
            Err(_) => {
                return Err(AttemptError::Failed(DispatchError::Resolution(format!(
                    "resolver timed out after {}s",
                    self.timeout.as_secs_f32()
                ))));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_url = stdout.lines().map(str::trim).find(|line| !line.is_empty());
        if output.status.success() {
            return first_url.map(str::to_string).ok_or_else(|| {
                AttemptError::Failed(DispatchError::Resolution(format!(
                    "no media URL for format {selector}"
                )))
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(AttemptError::Failed(classify_failure(
            &stderr,
            &output.status.to_string(),
        )))
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, watch_url: &str) -> Result<String, DispatchError> {
        match self.attempt(watch_url, PREFERRED_FORMAT).await {
            Ok(url) => {
                debug!(watch_url, "resolved preferred format");
                Ok(url)
            }
            Err(AttemptError::Spawn(err)) => Err(err),
            Err(AttemptError::Failed(err)) => {
                warn!(watch_url, error = %err, "preferred format failed, trying fallback");
                match self.attempt(watch_url, FALLBACK_FORMAT).await {
                    Ok(url) => Ok(url),
                    Err(AttemptError::Spawn(err) | AttemptError::Failed(err)) => Err(err),
                }
            }
        }
    }

    async fn version(&self) -> Result<String, DispatchError> {
        let mut command = Command::new(&self.program);
        command
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| DispatchError::Resolution("version check timed out".into()))?
            .map_err(|err| {
                DispatchError::Resolution(format!(
                    "failed to start {}: {err}",
                    self.program.display()
                ))
            })?;
        if !output.status.success() {
            return Err(DispatchError::Resolution(format!(
                "{} --version exited with {}",
                self.program.display(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// The last non-empty stderr line is the tool's own error message.
fn classify_failure(stderr: &str, status: &str) -> DispatchError {
    let message = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| format!("resolver exited with {status}"));
    let lowered = stderr.to_ascii_lowercase();
    if UNAVAILABLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        DispatchError::ResolutionUnavailable(message)
    } else {
        DispatchError::Resolution(message)
    }
}
