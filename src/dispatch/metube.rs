//! Direct-submit backend: the service takes a watch URL and does the rest.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{DownloadBackend, DownloadRequest, Submission, run_blocking, transport_error};
use crate::error::DispatchError;

const NAME: &str = "metube";

pub struct MetubeBackend {
    agent: ureq::Agent,
    base_url: String,
}

/// Body of a 200 reply. The service reports some failures in-band.
#[derive(Debug, Default, Deserialize)]
struct AddReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

impl MetubeBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn payload(request: &DownloadRequest) -> Value {
        let mut payload = json!({
            "url": request.url,
            "quality": "best",
            "format": "any",
            "playlist_strict_mode": false,
            "auto_start": true,
        });
        if let Some(prefix) = &request.name_prefix {
            payload["custom_name_prefix"] = Value::String(prefix.clone());
        }
        payload
    }
}

#[async_trait]
impl DownloadBackend for MetubeBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn submit(&self, request: &DownloadRequest) -> Result<Submission, DispatchError> {
        let agent = self.agent.clone();
        let url = format!("{}/add", self.base_url);
        let payload = Self::payload(request);
        run_blocking(NAME, move || submit_blocking(&agent, &url, &payload)).await
    }

    async fn probe(&self) -> Result<String, DispatchError> {
        let agent = self.agent.clone();
        let url = self.base_url.clone();
        run_blocking(NAME, move || match agent.get(&url).call() {
            Ok(_) => Ok(format!("MeTube reachable at {url}")),
            Err(ureq::Error::Status(status, response)) => Err(DispatchError::BackendRejected {
                status,
                message: response.status_text().to_string(),
            }),
            Err(ureq::Error::Transport(transport)) => Err(transport_error(NAME, &transport)),
        })
        .await
    }
}

fn submit_blocking(
    agent: &ureq::Agent,
    url: &str,
    payload: &Value,
) -> Result<Submission, DispatchError> {
    let response = match agent.post(url).send_json(payload) {
        Ok(response) => response,
        Err(ureq::Error::Status(status, response)) => {
            let reason = response.status_text().to_string();
            let body = response.into_string().unwrap_or_default();
            let message = if body.trim().is_empty() {
                reason
            } else {
                body.trim().to_string()
            };
            return Err(DispatchError::BackendRejected { status, message });
        }
        Err(ureq::Error::Transport(transport)) => return Err(transport_error(NAME, &transport)),
    };

    let status = response.status();
    if status != 200 {
        return Err(DispatchError::BackendRejected {
            status,
            message: response.status_text().to_string(),
        });
    }

    let reply: AddReply = response
        .into_string()
        .ok()
        .and_then(|body| serde_json::from_str(&body).ok())
        .unwrap_or_default();
    if reply.status.as_deref() == Some("error") {
        return Err(DispatchError::BackendRejected {
            status,
            message: reply.msg.unwrap_or_else(|| "rejected".to_string()),
        });
    }
    Ok(Submission { job_id: None })
}
