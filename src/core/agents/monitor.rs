//! Exit handling: turns an observed sandbox exit into a terminal agent row,
//! a posted result comment, and a completion callback.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::AgentLifecycle;
use super::result::{extract_result_block, result_text, truncate_comment};
use crate::core::store::types::AgentStatus;
use crate::core::upstream::CompletionCallback;

/// Finalize an agent after its sandbox exited with `exit_code`. Safe to call
/// for agents that were already moved to killed/timeout; their status is
/// preserved.
pub(super) async fn finalize(lifecycle: &Arc<AgentLifecycle>, id: &str, exit_code: i64) {
    if let Err(e) = lifecycle.sink.flush_agent(id).await {
        warn!(agent_id = %id, error = %e, "flush on exit failed");
    }

    let agent = match lifecycle.store.get_agent(id).await {
        Ok(agent) => agent,
        Err(e) => {
            warn!(agent_id = %id, error = %e, "finalize: agent row missing");
            return;
        }
    };

    let status = if agent.status.is_terminal() {
        agent.status
    } else if exit_code == 0 {
        AgentStatus::Completed
    } else {
        AgentStatus::Failed
    };
    let error = (status == AgentStatus::Failed)
        .then(|| format!("agent exited with code {}", exit_code));
    if let Err(e) = lifecycle
        .store
        .finish_agent(id, status, Some(exit_code), error.as_deref())
        .await
    {
        warn!(agent_id = %id, error = %e, "finalize: store update failed");
    }
    if status == AgentStatus::Failed
        && let Err(e) = lifecycle.fail_task_and_entry(&agent.task_id).await
    {
        warn!(agent_id = %id, error = %e, "finalize: task update failed");
    }

    info!(agent_id = %id, status = status.as_str(), exit_code, "agent finished");

    // Final JSON result block from the collected log, posted upstream.
    match lifecycle.store.collect_agent_log_text(id).await {
        Ok(log_text) => {
            if let Some(block) =
                extract_result_block(&log_text, lifecycle.config.result_scan_limit)
                && let Some(text) = result_text(&block)
            {
                let body = truncate_comment(
                    &text,
                    lifecycle.config.comment_max_len,
                    lifecycle.config.comment_truncate_at,
                );
                lifecycle.upstream.post_comment(&agent.task_id, &body).await;
            }
        }
        Err(e) => warn!(agent_id = %id, error = %e, "finalize: log read failed"),
    }

    // Clear the timer and in-memory tracking before the callback, so a slow
    // callback endpoint cannot hold the entry alive.
    let callback_url = {
        let mut active = lifecycle.active.lock().await;
        active.remove(id).map(|entry| {
            entry.timer.abort();
            entry.callback_url
        })
    }
    .flatten();
    lifecycle.sink.forget(id).await;

    if let Some(url) = callback_url {
        lifecycle
            .upstream
            .post_callback(
                &url,
                &CompletionCallback {
                    agent_id: id.to_string(),
                    task_id: agent.task_id.clone(),
                    status,
                    exit_code: Some(exit_code),
                    completed_at: Utc::now(),
                    error,
                },
            )
            .await;
    }

    // The workspace survives failures for debugging; purged only on success.
    if status == AgentStatus::Completed {
        lifecycle.workspace.purge(id).await;
    }
}
