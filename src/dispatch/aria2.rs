//! Resolve-then-queue backend: a generic downloader reached over JSON-RPC.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::resolver::MediaResolver;
use super::{DownloadBackend, DownloadRequest, Submission, run_blocking, transport_error};
use crate::error::DispatchError;
use crate::model::Settings;
use crate::naming;

const NAME: &str = "aria2";
const CONNECTIONS: &str = "16";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub struct Aria2Backend {
    agent: ureq::Agent,
    rpc_url: String,
    download_folder: String,
    credentials: Option<(String, String)>,
    resolver: Arc<dyn MediaResolver>,
}

#[derive(Debug, Deserialize)]
struct RpcReply<T> {
    result: Option<T>,
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    version: String,
}

impl Aria2Backend {
    pub fn new(settings: &Settings, resolver: Arc<dyn MediaResolver>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            rpc_url: settings.aria2_rpc_url(),
            download_folder: settings.download_folder.clone(),
            credentials: settings
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            resolver,
        }
    }

    fn options(&self, request: &DownloadRequest) -> Value {
        let mut options = Map::new();
        options.insert("dir".into(), json!(self.download_folder));
        options.insert(
            "out".into(),
            json!(naming::output_filename(
                &request.title,
                request.name_prefix.as_deref()
            )),
        );
        options.insert("continue".into(), json!("true"));
        options.insert("max-connection-per-server".into(), json!(CONNECTIONS));
        options.insert("split".into(), json!(CONNECTIONS));
        if let Some((user, pass)) = &self.credentials {
            options.insert("http-user".into(), json!(user));
            options.insert("http-passwd".into(), json!(pass));
        }
        Value::Object(options)
    }

    async fn call<T>(&self, method: &'static str, params: Value) -> Result<T, DispatchError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        let url = self.rpc_url.clone();
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": format!("dvr-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            "method": method,
            "params": params,
        });
        run_blocking(NAME, move || call_blocking(&agent, &url, &envelope)).await
    }
}

#[async_trait]
impl DownloadBackend for Aria2Backend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn submit(&self, request: &DownloadRequest) -> Result<Submission, DispatchError> {
        let media_url = self.resolver.resolve(&request.url).await?;
        debug!(video_id = %request.video_id, "resolved media url");

        let gid: String = self
            .call("aria2.addUri", json!([[media_url], self.options(request)]))
            .await?;
        Ok(Submission { job_id: Some(gid) })
    }

    async fn probe(&self) -> Result<String, DispatchError> {
        let info: VersionInfo = self.call("aria2.getVersion", json!([])).await?;
        Ok(format!("aria2 {} at {}", info.version, self.rpc_url))
    }
}

fn call_blocking<T: DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
    envelope: &Value,
) -> Result<T, DispatchError> {
    let (status, body) = match agent.post(url).send_json(envelope) {
        Ok(response) => (response.status(), response.into_string()),
        Err(ureq::Error::Status(status, response)) => (status, response.into_string()),
        Err(ureq::Error::Transport(transport)) => return Err(transport_error(NAME, &transport)),
    };
    let body = body.map_err(|err| DispatchError::BackendRejected {
        status,
        message: format!("unreadable reply: {err}"),
    })?;

    let reply: RpcReply<T> =
        serde_json::from_str(&body).map_err(|err| DispatchError::BackendRejected {
            status,
            message: format!("malformed reply: {err}"),
        })?;
    if let Some(fault) = reply.error {
        return Err(DispatchError::BackendRejected {
            status,
            message: format!("{} (code {})", fault.message, fault.code),
        });
    }
    if status != 200 {
        return Err(DispatchError::BackendRejected {
            status,
            message: body.trim().to_string(),
        });
    }
    reply.result.ok_or_else(|| DispatchError::BackendRejected {
        status,
        message: "reply carried no result".into(),
    })
}
