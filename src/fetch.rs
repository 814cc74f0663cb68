//! Retrieval of raw channel feeds.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CheckError;

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Returns the raw feed body for a channel. One attempt, no retries.
    async fn fetch(&self, channel_id: &str) -> Result<String, CheckError>;
}

/// Fetches feeds over HTTP with a per-request timeout.
#[derive(Clone)]
pub struct HttpFeedSource {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpFeedSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.into(),
        }
    }

    pub fn feed_url(&self, channel_id: &str) -> String {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}channel_id={channel_id}", self.base_url)
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, channel_id: &str) -> Result<String, CheckError> {
        let agent = self.agent.clone();
        let url = self.feed_url(channel_id);
        tokio::task::spawn_blocking(move || fetch_blocking(&agent, &url))
            .await
            .map_err(|err| CheckError::Network(format!("feed request task failed: {err}")))?
    }
}

fn fetch_blocking(agent: &ureq::Agent, url: &str) -> Result<String, CheckError> {
    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(status, response)) => {
            return Err(CheckError::Fetch {
                status,
                message: response.status_text().to_string(),
            });
        }
        Err(ureq::Error::Transport(transport)) => {
            return Err(CheckError::Network(transport.to_string()));
        }
    };

    if response.status() != 200 {
        return Err(CheckError::Fetch {
            status: response.status(),
            message: response.status_text().to_string(),
        });
    }

    response
        .into_string()
        .map_err(|err| CheckError::Network(format!("reading feed body: {err}")))
}
