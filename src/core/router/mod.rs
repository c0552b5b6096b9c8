//! Event router: polls the spool, interprets each pending event in filename
//! order, and turns it into agent spawns or terminal state changes. One
//! poisoned event never blocks the others, and a failed handler leaves its
//! event pending for the next tick.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::agents::{AgentLifecycle, AgentSpawnRequest};
use crate::core::error::{EngineError, EngineResult};
use crate::core::spool::event::{AuditFindingBody, BugReport, EventPayload};
use crate::core::spool::{Event, EventSpool};
use crate::core::store::Store;
use crate::core::store::types::{AgentKind, QueueEntryStatus, TaskRecord, TaskStatus};

/// Bounded set of recently processed event ids. Guards against re-handling
/// when a manual mark-processed races an in-flight tick; the on-disk rename
/// stays authoritative.
struct ProcessedLru {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl ProcessedLru {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    fn insert(&mut self, id: String) {
        if !self.seen.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            // Trim the oldest half in one go.
            for _ in 0..self.order.len() / 2 {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct EventRouter {
    store: Store,
    spool: EventSpool,
    lifecycle: Arc<AgentLifecycle>,
    processed: Mutex<ProcessedLru>,
    /// Single-flight gate: concurrent ticks are forbidden.
    gate: Mutex<()>,
}

impl EventRouter {
    pub fn new(
        store: Store,
        spool: EventSpool,
        lifecycle: Arc<AgentLifecycle>,
        lru_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            spool,
            lifecycle,
            processed: Mutex::new(ProcessedLru::new(lru_capacity)),
            gate: Mutex::new(()),
        })
    }

    /// One poll: list pending events and handle them strictly sequentially.
    /// Returns the number of events successfully processed. If another tick
    /// is in flight, this one is a no-op.
    pub async fn tick(self: &Arc<Self>) -> usize {
        let Ok(_guard) = self.gate.try_lock() else {
            debug!("router tick skipped; previous tick still running");
            return 0;
        };

        let pending = match self.spool.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "router: listing pending events failed");
                return 0;
            }
        };

        let mut handled = 0;
        for event in pending {
            if self.processed.lock().await.contains(&event.id) {
                continue;
            }
            let kind = event.payload.kind().to_string();
            let id = event.id.clone();
            match self.handle(&event).await {
                Ok(true) => match self.spool.mark_processed(&id).await {
                    Ok(_) | Err(EngineError::NotFound(_)) => {
                        self.processed.lock().await.insert(id);
                        handled += 1;
                    }
                    Err(e) => warn!(event = %kind, error = %e, "mark processed failed"),
                },
                // Unknown kind: warn, leave pending.
                Ok(false) => {}
                Err(e) => {
                    warn!(event = %kind, id = %id, error = %e, "event handler failed; will retry");
                }
            }
        }
        handled
    }

    /// Apply one event's side effects. `Ok(false)` means the kind was not
    /// recognized and the event must stay pending.
    async fn handle(self: &Arc<Self>, event: &Event) -> EngineResult<bool> {
        match &event.payload {
            EventPayload::TaskAssigned {
                task_id,
                title,
                description,
                repo,
                repos,
                investigation_only,
            } => {
                self.mirror_task(
                    task_id,
                    title,
                    description,
                    repo.as_deref(),
                    repos.clone().unwrap_or_default(),
                    investigation_only.unwrap_or(false),
                )
                .await?;
                let task = self.store.get_task(task_id).await?;
                self.spawn_for(&task, AgentKind::Triage, |_| {}).await?;
            }
            EventPayload::TaskPlanCreated { task_id, plan, .. } => {
                let plan_json = serde_json::to_value(plan)
                    .map_err(|e| EngineError::Validation(format!("plan encode: {}", e)))?;
                self.store.set_task_plan(task_id, &plan_json).await?;
                let task = self.store.get_task(task_id).await?;
                self.spawn_for(&task, AgentKind::Coding, |_| {}).await?;
            }
            EventPayload::TaskClosed { task_id, reason, resolution } => {
                info!(task_id = %task_id, ?resolution, reason = %reason, "task closed");
                self.complete_task(task_id).await?;
            }
            EventPayload::DeployRequested { task_id, .. } | EventPayload::PrMerged { task_id, .. } => {
                let task = self.store.get_task(task_id).await?;
                self.spawn_for(&task, AgentKind::Deployer, |_| {}).await?;
            }
            EventPayload::PrCreated { task_id, pr_number, pr_url, branch, .. }
            | EventPayload::PrUpdated { task_id, pr_number, pr_url, branch, .. } => {
                let task = self.store.get_task(task_id).await?;
                self.spawn_for(&task, AgentKind::Reviewer, |req| {
                    req.pr_number = Some(*pr_number);
                    req.pr_url = Some(pr_url.clone());
                    req.branch = Some(branch.clone());
                })
                .await?;
            }
            EventPayload::PrChangesRequested {
                task_id,
                pr_number,
                branch,
                review_comments,
                ..
            } => {
                let task = self.store.get_task(task_id).await?;
                // Fix-up coding: work on the existing PR branch, carrying the
                // review feedback and the plan already on the task row.
                self.spawn_for(&task, AgentKind::Coding, |req| {
                    req.pr_number = Some(*pr_number);
                    req.existing_branch = Some(branch.clone());
                    req.review_feedback = Some(review_comments.clone());
                })
                .await?;
                // The spawn marks the task assigned; fix-up work is tracked
                // as in_progress, keeping the agent binding.
                self.store
                    .update_task_status(task_id, TaskStatus::InProgress)
                    .await?;
            }
            EventPayload::DeployCompleted { task_id, url, .. } => {
                let task = self.store.get_task(task_id).await?;
                self.spawn_for(&task, AgentKind::Verifier, |req| {
                    req.deployment_url = Some(url.clone());
                })
                .await?;
            }
            EventPayload::DeployFailed { task_id, error, .. } => {
                warn!(task_id = %task_id, error = %error, "deploy failed");
                self.fail_task(task_id).await?;
            }
            EventPayload::VerifyPassed { task_id, summary, .. } => {
                info!(task_id = %task_id, summary = %summary, "verification passed");
                self.complete_task(task_id).await?;
            }
            EventPayload::VerifyFailed { task_id, repo, bug } => {
                self.file_verification_bug(task_id, repo, bug).await?;
                self.fail_task(task_id).await?;
            }
            EventPayload::AuditRequested { task_id, url, focus_areas, .. } => {
                let task = self.store.get_task(task_id).await?;
                self.spawn_for(&task, AgentKind::Auditor, |req| {
                    req.deployment_url = Some(url.clone());
                    req.focus_areas = focus_areas.clone();
                })
                .await?;
            }
            EventPayload::AuditFinding { task_id, repo, parent_id, finding } => {
                self.file_audit_finding(task_id, repo, parent_id.as_deref(), finding)
                    .await?;
            }
            EventPayload::AuditCompleted { task_id, summary, findings_count, .. } => {
                info!(task_id = %task_id, findings = findings_count, summary = %summary, "audit completed");
                self.complete_task(task_id).await?;
            }
            EventPayload::AgentEscalation { task_id, agent_id, reason, .. } => {
                warn!(task_id = %task_id, agent_id = %agent_id, reason = %reason, "agent escalation");
                self.store
                    .service_log(
                        "warn",
                        &format!("escalation from {} on {}: {}", agent_id, task_id, reason),
                    )
                    .await?;
            }
            EventPayload::Unknown(raw) => {
                warn!(kind = event.payload.kind(), id = %event.id, "unknown event kind; leaving pending");
                let _ = raw;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Insert the local task mirror if this engine has not seen it yet.
    async fn mirror_task(
        &self,
        task_id: &str,
        title: &str,
        description: &str,
        repo: Option<&str>,
        repos: Vec<String>,
        investigation_only: bool,
    ) -> EngineResult<()> {
        if self.store.task_exists(task_id).await? {
            return Ok(());
        }
        let now = Utc::now();
        self.store
            .insert_task(&TaskRecord {
                id: task_id.to_string(),
                title: title.to_string(),
                description: description.to_string(),
                kind: "feature".to_string(),
                status: TaskStatus::Queued,
                repo: repo.map(str::to_string),
                repos,
                investigation_only,
                execution_plan: None,
                assigned_agent_id: None,
                created_at: now,
                updated_at: now,
            })
            .await
    }

    async fn spawn_for(
        self: &Arc<Self>,
        task: &TaskRecord,
        kind: AgentKind,
        customize: impl FnOnce(&mut AgentSpawnRequest),
    ) -> EngineResult<()> {
        let repo = task
            .primary_repo()
            .ok_or_else(|| EngineError::Validation(format!("task {} has no repository", task.id)))?
            .to_string();
        let mut request = AgentSpawnRequest {
            task_id: task.id.clone(),
            repo,
            title: task.title.clone(),
            description: task.description.clone(),
            kind,
            ..Default::default()
        };
        customize(&mut request);
        self.lifecycle.spawn(request).await?;
        Ok(())
    }

    async fn complete_task(&self, task_id: &str) -> EngineResult<()> {
        self.store
            .update_task_status(task_id, TaskStatus::Completed)
            .await?;
        self.store
            .set_queue_entry_status(task_id, QueueEntryStatus::Completed)
            .await
    }

    async fn fail_task(&self, task_id: &str) -> EngineResult<()> {
        self.store
            .update_task_status(task_id, TaskStatus::Failed)
            .await?;
        self.store
            .set_queue_entry_status(task_id, QueueEntryStatus::Failed)
            .await
    }

    /// A failed verification files a reproducible bug task.
    async fn file_verification_bug(
        &self,
        task_id: &str,
        repo: &str,
        bug: &BugReport,
    ) -> EngineResult<()> {
        let description = format!(
            "{}\n\n## Steps to reproduce\n{}\n\n## Expected\n{}\n\n## Actual\n{}",
            bug.description, bug.steps, bug.expected, bug.actual
        );
        self.insert_bug_task(
            format!("Verification failure in {}", repo),
            description,
            repo,
            task_id,
        )
        .await
    }

    async fn file_audit_finding(
        &self,
        task_id: &str,
        repo: &str,
        parent_id: Option<&str>,
        finding: &AuditFindingBody,
    ) -> EngineResult<()> {
        let title = format!(
            "[{}/{}] {}",
            finding.severity.as_str(),
            finding.category.as_str(),
            finding.title
        );
        let mut description = finding.description.clone();
        if let Some(steps) = &finding.steps {
            description.push_str("\n\n## Steps\n");
            description.push_str(steps);
        }
        if let Some(parent) = parent_id {
            description.push_str(&format!("\n\nParent finding: {}", parent));
        }
        self.insert_bug_task(title, description, repo, task_id).await
    }

    async fn insert_bug_task(
        &self,
        title: String,
        description: String,
        repo: &str,
        origin_task_id: &str,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let id = format!("bug-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        info!(bug_task = %id, origin = %origin_task_id, "filing bug task");
        self.store
            .insert_task(&TaskRecord {
                id,
                title,
                description,
                kind: "bug".to_string(),
                status: TaskStatus::Pending,
                repo: Some(repo.to_string()),
                repos: Vec::new(),
                investigation_only: false,
                execution_plan: None,
                assigned_agent_id: None,
                created_at: now,
                updated_at: now,
            })
            .await
    }
}
