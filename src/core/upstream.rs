//! Outbound HTTP to the upstream task store and to spawn-supplied completion
//! callbacks. Both are best-effort: failures are warn-logged, never
//! propagated, and the 10 s timeout bounds every request.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::core::scrub::scrub_secrets;
use crate::core::store::types::AgentStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionCallback {
    pub agent_id: String,
    pub task_id: String,
    pub status: AgentStatus,
    pub exit_code: Option<i64>,
    pub completed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct UpstreamClient {
    base_url: String,
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(config: &EngineConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.callback_timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: config.suite_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Post an agent's final result as a comment on the upstream task.
    pub async fn post_comment(&self, task_id: &str, body: &str) {
        let url = format!("{}/api/tasks/{}/comments", self.base_url, task_id);
        let payload = serde_json::json!({ "content": body });
        match self.http.post(&url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(task_id, "result comment posted");
            }
            Ok(resp) => warn!(task_id, status = %resp.status(), "result comment rejected"),
            // Transport errors can echo the request URL; scrub before the
            // text reaches the log stream.
            Err(e) => {
                let error = scrub_secrets(&e.to_string());
                warn!(task_id, error = %error, "result comment failed");
            }
        }
    }

    /// Notify a spawn-supplied callback URL that an agent reached a terminal
    /// state.
    pub async fn post_callback(&self, url: &str, callback: &CompletionCallback) {
        match self.http.post(url).json(callback).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(agent_id = %callback.agent_id, "completion callback delivered");
            }
            Ok(resp) => {
                warn!(agent_id = %callback.agent_id, status = %resp.status(), "completion callback rejected");
            }
            // The callback URL is caller-supplied and may carry credentials;
            // failure text from the client tends to include it.
            Err(e) => {
                let error = scrub_secrets(&e.to_string());
                warn!(agent_id = %callback.agent_id, error = %error, "completion callback failed");
            }
        }
    }
}
