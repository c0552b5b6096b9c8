//! Agent lifecycle manager: owns the set of active agents, their sandboxes,
//! timers, and log pipelines, and is the only writer of agent rows.

pub mod logs;
mod monitor;
mod recovery;
pub mod result;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult};
use crate::core::prompt::PromptBuilder;
use crate::core::sandbox::{SandboxDriver, SandboxSpec};
use crate::core::scrub::scrub_secrets;
use crate::core::store::Store;
use crate::core::store::types::{
    AgentAnalytics, AgentKind, AgentLogLine, AgentRecord, AgentStatus, TaskRecord, TaskStatus,
};
use crate::core::upstream::UpstreamClient;
use crate::core::workspace::{PROMPT_FILE, WorkspaceManager, branch_plan};
use logs::LogSink;

pub use recovery::recover_orphans;

/// Everything a caller can say about the agent they want. Kind-specific
/// fields are optional and ignored by kinds that do not use them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSpawnRequest {
    pub task_id: String,
    pub repo: String,
    pub title: String,
    pub description: String,
    pub kind: AgentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_areas: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_branch: Option<String>,
    /// Pre-built prompt text; when absent the prompt builder runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    Killed,
    Timeout,
}

impl KillReason {
    fn status(self) -> AgentStatus {
        match self {
            KillReason::Killed => AgentStatus::Killed,
            KillReason::Timeout => AgentStatus::Timeout,
        }
    }
}

/// In-memory tracking for one running agent. Exists exactly while the store
/// row is non-terminal and the monitor has not finalized it.
struct ActiveAgent {
    task_id: String,
    kind: AgentKind,
    handle: String,
    callback_url: Option<String>,
    timer: JoinHandle<()>,
}

pub struct AgentLifecycle {
    config: Arc<EngineConfig>,
    store: Store,
    sandbox: Arc<dyn SandboxDriver>,
    host: Arc<dyn SandboxDriver>,
    workspace: WorkspaceManager,
    prompts: Arc<dyn PromptBuilder>,
    upstream: UpstreamClient,
    sink: Arc<LogSink>,
    active: Mutex<HashMap<String, ActiveAgent>>,
}

impl AgentLifecycle {
    pub fn new(
        config: Arc<EngineConfig>,
        store: Store,
        sandbox: Arc<dyn SandboxDriver>,
        host: Arc<dyn SandboxDriver>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> Arc<Self> {
        let workspace = WorkspaceManager::new(&config);
        let upstream = UpstreamClient::new(&config);
        let sink = Arc::new(LogSink::new(store.clone(), config.log_ring_capacity));
        Arc::new(Self {
            config,
            store,
            sandbox,
            host,
            workspace,
            prompts,
            upstream,
            sink,
            active: Mutex::new(HashMap::new()),
        })
    }

    fn driver_for(&self, kind: AgentKind) -> &Arc<dyn SandboxDriver> {
        if kind.is_host_mode() { &self.host } else { &self.sandbox }
    }

    /// Spawn a new agent for a task. Returns once the sandbox is running;
    /// completion is observed asynchronously by the exit monitor.
    pub async fn spawn(self: &Arc<Self>, request: AgentSpawnRequest) -> EngineResult<AgentRecord> {
        if request.task_id.is_empty() {
            return Err(EngineError::Validation("taskId is required".into()));
        }
        let task = self.store.get_task(&request.task_id).await?;
        let kind = request.kind;
        let id = mint_agent_id(kind);

        let mut metadata_request = request.clone();
        metadata_request.prompt = None;
        let row = AgentRecord {
            id: id.clone(),
            task_id: request.task_id.clone(),
            sandbox_id: None,
            kind,
            status: AgentStatus::Starting,
            started_at: Utc::now(),
            completed_at: None,
            exit_code: None,
            error: None,
            metadata: serde_json::to_value(&metadata_request)
                .unwrap_or(serde_json::Value::Null),
        };
        self.store.insert_agent(&row).await?;
        self.store.assign_task(&request.task_id, &id).await?;

        match self.start_sandbox(&id, &request, &task).await {
            Ok(()) => {
                info!(agent_id = %id, kind = %kind, task_id = %request.task_id, "agent running");
                self.store.get_agent(&id).await
            }
            Err(e) => {
                let scrubbed = scrub_secrets(&e.to_string());
                warn!(agent_id = %id, error = %scrubbed, "spawn failed before monitor attach");
                let _ = self
                    .store
                    .finish_agent(&id, AgentStatus::Failed, None, Some(&scrubbed))
                    .await;
                let _ = self
                    .store
                    .update_task_status(&request.task_id, TaskStatus::Queued)
                    .await;
                self.workspace.purge(&id).await;
                Err(e)
            }
        }
    }

    async fn start_sandbox(
        self: &Arc<Self>,
        id: &str,
        request: &AgentSpawnRequest,
        task: &TaskRecord,
    ) -> EngineResult<()> {
        let kind = request.kind;
        let driver = self.driver_for(kind);

        if !kind.is_host_mode()
            && !driver.image_available(&self.config.sandbox_image).await?
        {
            return Err(EngineError::Sandbox(format!(
                "image missing: {}",
                self.config.sandbox_image
            )));
        }

        let plan = branch_plan(
            kind,
            request.branch.as_deref(),
            request.existing_branch.as_deref(),
            id,
        );
        let workspace_dir = self
            .workspace
            .prepare(id, kind, &request.repo, &plan)
            .await?;

        let prompt_text = match &request.prompt {
            Some(text) => text.clone(),
            None => self.prompts.build(request, task),
        };
        let prompt_path = self.workspace.write_prompt(id, &prompt_text).await?;

        let (command, env) = self.sandbox_invocation(id, request, &prompt_path);
        let spec = SandboxSpec {
            name: id.to_string(),
            image: self.config.sandbox_image.clone(),
            workspace: workspace_dir,
            command,
            env,
            memory_limit_mb: self.config.container_memory_mb,
            cpus: self.config.container_cpus,
        };

        let crate::core::sandbox::RunningSandbox {
            handle,
            logs: mut log_rx,
            exit,
        } = driver.launch(spec).await?;
        self.store.mark_agent_running(id, &handle).await?;

        let timer = self.arm_timer(id.to_string(), kind);
        self.active.lock().await.insert(
            id.to_string(),
            ActiveAgent {
                task_id: request.task_id.clone(),
                kind,
                handle,
                callback_url: request.callback_url.clone(),
                timer,
            },
        );

        // Log pump: raw chunks into the per-agent ring.
        let sink = self.sink.clone();
        let pump_id = id.to_string();
        tokio::spawn(async move {
            while let Some(chunk) = log_rx.recv().await {
                sink.push_chunk(&pump_id, chunk).await;
            }
        });

        // Exit monitor.
        let lifecycle = self.clone();
        let monitor_id = id.to_string();
        tokio::spawn(async move {
            let code = exit.await.unwrap_or(-1);
            monitor::finalize(&lifecycle, &monitor_id, code).await;
        });

        Ok(())
    }

    fn sandbox_invocation(
        &self,
        id: &str,
        request: &AgentSpawnRequest,
        prompt_path: &std::path::Path,
    ) -> (Vec<String>, Vec<(String, String)>) {
        let kind = request.kind;
        let container_prompt = format!("/workspace/{}", PROMPT_FILE);
        let command = if kind.is_host_mode() {
            vec![
                self.config.agent_program.clone(),
                "--kind".to_string(),
                kind.to_string(),
                "--prompt".to_string(),
                prompt_path.to_string_lossy().to_string(),
            ]
        } else {
            vec!["--prompt".to_string(), container_prompt.clone()]
        };
        let prompt_env = if kind.is_host_mode() {
            prompt_path.to_string_lossy().to_string()
        } else {
            container_prompt
        };
        let env = vec![
            ("TASK_ID".to_string(), request.task_id.clone()),
            ("AGENT_ID".to_string(), id.to_string()),
            ("AGENT_KIND".to_string(), kind.to_string()),
            ("PROMPT_PATH".to_string(), prompt_env),
            ("VIBEFLOW_URL".to_string(), self.config.engine_url()),
            ("VIBE_SUITE_URL".to_string(), self.config.suite_url.clone()),
            ("GITHUB_TOKEN".to_string(), self.config.github_token.clone()),
        ];
        (command, env)
    }

    fn arm_timer(self: &Arc<Self>, id: String, kind: AgentKind) -> JoinHandle<()> {
        let lifecycle = self.clone();
        let timeout = self.config.timeout_for(kind);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(agent_id = %id, "watchdog fired");
            // The kill path aborts this timer task; run it detached so the
            // abort cannot cancel the kill itself.
            tokio::spawn(async move {
                if let Err(e) = lifecycle.kill(&id, KillReason::Timeout).await {
                    warn!(agent_id = %id, error = %e, "timeout kill failed");
                }
            });
        })
    }

    /// Move an agent to `killed`/`timeout`. Idempotent: unknown or already
    /// terminal agents are a no-op.
    pub async fn kill(&self, id: &str, reason: KillReason) -> EngineResult<()> {
        let agent = match self.store.get_agent(id).await {
            Ok(agent) => agent,
            Err(EngineError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if agent.status.is_terminal() {
            return Ok(());
        }

        info!(agent_id = %id, reason = ?reason, "killing agent");
        self.store
            .finish_agent(id, reason.status(), None, None)
            .await?;
        self.fail_task_and_entry(&agent.task_id).await?;
        if let Err(e) = self.sink.flush_agent(id).await {
            warn!(agent_id = %id, error = %e, "flush on kill failed");
        }

        let entry = {
            let mut active = self.active.lock().await;
            active.get_mut(id).map(|a| {
                a.timer.abort();
                (a.kind, a.handle.clone())
            })
        };
        if let Some((kind, handle)) = entry
            && let Err(e) = self.driver_for(kind).kill(&handle).await
        {
            warn!(agent_id = %id, error = %e, "sandbox kill failed");
        }
        Ok(())
    }

    /// Spawn a fresh agent for the same task, reusing the original request
    /// captured in the agent's metadata.
    pub async fn retry(self: &Arc<Self>, id: &str) -> EngineResult<AgentRecord> {
        let agent = self.store.get_agent(id).await?;
        if !self.store.task_exists(&agent.task_id).await? {
            return Err(EngineError::NotFound(format!(
                "task {} for agent {}",
                agent.task_id, id
            )));
        }
        let mut request: AgentSpawnRequest =
            serde_json::from_value(agent.metadata.clone()).unwrap_or_default();
        if request.task_id.is_empty() {
            request.task_id = agent.task_id.clone();
            request.kind = agent.kind;
        }
        self.spawn(request).await
    }

    pub async fn list(&self, limit: usize) -> EngineResult<Vec<AgentRecord>> {
        self.store.list_agents(limit).await
    }

    pub async fn get_by_id(&self, id: &str) -> EngineResult<AgentRecord> {
        self.store.get_agent(id).await
    }

    pub async fn get_logs(&self, id: &str) -> EngineResult<Vec<AgentLogLine>> {
        // Surface buffered lines too, so readers never miss the tail.
        let _ = self.sink.flush_agent(id).await;
        self.store.get_agent_logs(id).await
    }

    /// Snapshot of agents with an in-memory tracking entry.
    pub async fn get_active(&self) -> EngineResult<Vec<AgentRecord>> {
        let ids: Vec<String> = self.active.lock().await.keys().cloned().collect();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_agent(&id).await {
                Ok(record) => records.push(record),
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }

    pub async fn analytics(&self) -> EngineResult<AgentAnalytics> {
        self.store.agent_analytics().await
    }

    pub async fn is_tracked(&self, id: &str) -> bool {
        self.active.lock().await.contains_key(id)
    }

    /// Fail a task and close out its queue entry, if it has one. Keeps the
    /// queue's view of terminal tasks consistent for the stop-on-failure
    /// gate and the audit trail.
    pub(crate) async fn fail_task_and_entry(&self, task_id: &str) -> EngineResult<()> {
        self.store
            .update_task_status(task_id, TaskStatus::Failed)
            .await?;
        self.store
            .set_queue_entry_status(task_id, crate::core::store::types::QueueEntryStatus::Failed)
            .await
    }

    /// Flush all buffered log lines; called by the periodic ticker and at
    /// shutdown.
    pub async fn flush_logs(&self) -> EngineResult<()> {
        self.sink.flush_all().await
    }

    /// Drop every timer and flush buffers. Part of process shutdown.
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        for (_, agent) in active.iter() {
            agent.timer.abort();
        }
        active.clear();
        drop(active);
        if let Err(e) = self.sink.flush_all().await {
            warn!(error = %e, "final log flush failed");
        }
    }
}

fn mint_agent_id(kind: AgentKind) -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    format!("{}-{}", kind, &uuid[..8])
}

#[cfg(test)]
pub(crate) mod tests;
