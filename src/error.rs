//! Error taxonomy for channel checks and download dispatch.

use thiserror::Error;

/// Failure of one stage of a channel check. Any of these aborts the
/// remaining steps for that channel only.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("network error: {0}")]
    Network(String),
    #[error("feed request failed: HTTP {status}: {message}")]
    Fetch { status: u16, message: String },
    #[error("malformed feed: {0}")]
    Parse(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CheckError {
    pub fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{err:#}"))
    }
}

/// Failure to hand a video to the download backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("backend rejected request: {status} {message}")]
    BackendRejected { status: u16, message: String },
    #[error("could not resolve media URL: {0}")]
    Resolution(String),
    #[error("video unavailable: {0}")]
    ResolutionUnavailable(String),
    #[error("could not record download request: {0}")]
    Persistence(String),
}

impl DispatchError {
    /// Stable, human-readable category shown to operators instead of the
    /// raw transport error.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConnectionRefused(_) => {
                "backend unreachable: check the settings and make sure the download service is running"
            }
            Self::Timeout(_) => "backend timed out: check the settings",
            Self::BackendRejected { .. } => "backend rejected the request",
            Self::Resolution(_) => "no suitable format could be resolved for this video",
            Self::ResolutionUnavailable(_) => {
                "video not available for download (private, age or region restricted)"
            }
            Self::Persistence(_) => "download was queued but could not be recorded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_dispatch_error_has_a_distinct_category() {
        let errors = [
            DispatchError::ConnectionRefused("x".into()),
            DispatchError::Timeout("x".into()),
            DispatchError::BackendRejected {
                status: 500,
                message: "x".into(),
            },
            DispatchError::Resolution("x".into()),
            DispatchError::ResolutionUnavailable("x".into()),
            DispatchError::Persistence("x".into()),
        ];
        let mut categories: Vec<_> = errors.iter().map(DispatchError::category).collect();
        categories.sort_unstable();
        categories.dedup();
        assert_eq!(categories.len(), errors.len());
    }

    #[test]
    fn fetch_error_keeps_status_in_message() {
        let err = CheckError::Fetch {
            status: 404,
            message: "Not Found".into(),
        };
        assert_eq!(err.to_string(), "feed request failed: HTTP 404: Not Found");
    }
}
