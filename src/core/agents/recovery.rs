//! Startup reconciliation of agents left `running` by a previous process.
//! Best-effort: every failure marks the row failed and moves on; the sweep
//! never blocks startup.

use std::sync::Arc;

use tracing::{info, warn};

use super::AgentLifecycle;
use crate::core::sandbox::SandboxState;
use crate::core::store::types::{AgentRecord, AgentStatus};

const RESTART_ERROR: &str = "server restarted while agent was running";
const RECOVERY_ERROR: &str = "recovery failed";

pub async fn recover_orphans(lifecycle: &Arc<AgentLifecycle>) {
    let orphans = match lifecycle
        .store
        .list_agents_by_status(AgentStatus::Running)
        .await
    {
        Ok(orphans) => orphans,
        Err(e) => {
            warn!(error = %e, "recovery: listing running agents failed");
            return;
        }
    };
    if orphans.is_empty() {
        return;
    }
    info!(count = orphans.len(), "reconciling orphaned agents");

    for agent in orphans {
        let outcome = reconcile(lifecycle, &agent).await;
        let _ = lifecycle
            .store
            .service_log(
                "warn",
                &format!("recovery: agent {} -> {}", agent.id, outcome),
            )
            .await;
    }
}

async fn reconcile(lifecycle: &Arc<AgentLifecycle>, agent: &AgentRecord) -> String {
    let Some(handle) = agent.sandbox_id.as_deref() else {
        fail(lifecycle, agent, None, RECOVERY_ERROR).await;
        return "failed (no sandbox handle)".into();
    };

    if agent.kind.is_host_mode() {
        // A host pid from a previous process cannot be adopted.
        fail(lifecycle, agent, None, RESTART_ERROR).await;
        return "failed (host process)".into();
    }

    match lifecycle.sandbox.inspect(handle).await {
        Ok(SandboxState::Exited(code)) => {
            let status = if code == 0 {
                AgentStatus::Completed
            } else {
                AgentStatus::Failed
            };
            if let Err(e) = lifecycle
                .store
                .finish_agent(&agent.id, status, Some(code), None)
                .await
            {
                warn!(agent_id = %agent.id, error = %e, "recovery: store update failed");
            }
            if status == AgentStatus::Failed {
                let _ = lifecycle.fail_task_and_entry(&agent.task_id).await;
            }
            let _ = lifecycle.sandbox.remove(handle).await;
            format!("{} (exit {})", status.as_str(), code)
        }
        Ok(SandboxState::Running) => {
            // Still running with no monitor attached; terminate rather than
            // leave an untracked container behind.
            let _ = lifecycle.sandbox.kill(handle).await;
            let _ = lifecycle.sandbox.remove(handle).await;
            fail(lifecycle, agent, Some(handle), RESTART_ERROR).await;
            "failed (container killed)".into()
        }
        Ok(SandboxState::Gone) => {
            fail(lifecycle, agent, None, RECOVERY_ERROR).await;
            "failed (container gone)".into()
        }
        Err(e) => {
            warn!(agent_id = %agent.id, error = %e, "recovery: inspect failed");
            fail(lifecycle, agent, None, RECOVERY_ERROR).await;
            "failed (inspect error)".into()
        }
    }
}

async fn fail(
    lifecycle: &Arc<AgentLifecycle>,
    agent: &AgentRecord,
    handle: Option<&str>,
    error: &str,
) {
    if let Err(e) = lifecycle
        .store
        .finish_agent(&agent.id, AgentStatus::Failed, None, Some(error))
        .await
    {
        warn!(agent_id = %agent.id, error = %e, "recovery: store update failed");
    }
    let _ = lifecycle.fail_task_and_entry(&agent.task_id).await;
    if let Some(handle) = handle {
        let _ = lifecycle.sandbox.remove(handle).await;
    }
}
