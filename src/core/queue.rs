//! Queue processor: drains the task queue under the configured gates and
//! hands work to the pipeline, either by appending a `task.assigned` event or
//! by spawning the triage agent directly.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::agents::{AgentLifecycle, AgentSpawnRequest};
use crate::core::error::EngineResult;
use crate::core::spool::{EventPayload, EventSpool};
use crate::core::store::Store;
use crate::core::store::types::{AgentKind, QueueEntryStatus, TaskStatus};

pub struct QueueProcessor {
    config: Arc<EngineConfig>,
    store: Store,
    spool: EventSpool,
    lifecycle: Arc<AgentLifecycle>,
}

impl QueueProcessor {
    pub fn new(
        config: Arc<EngineConfig>,
        store: Store,
        spool: EventSpool,
        lifecycle: Arc<AgentLifecycle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            spool,
            lifecycle,
        })
    }

    /// One scheduling pass. At most one entry is claimed per tick; the
    /// single-instance ticker makes the claim race-free.
    pub async fn tick(self: &Arc<Self>) -> EngineResult<()> {
        let settings = self.store.get_queue_settings().await?;
        if settings.paused {
            debug!("queue paused");
            return Ok(());
        }
        if settings.stop_on_failure && self.store.any_failed_task_in_queue().await? {
            debug!("queue halted: failed task present and stop_on_failure set");
            return Ok(());
        }
        if self.store.count_processing_queue().await? >= settings.max_concurrent {
            debug!("queue at max_concurrent");
            return Ok(());
        }

        let Some(entry) = self.store.get_pending_queue_head(1).await?.into_iter().next() else {
            return Ok(());
        };
        let task = self.store.get_task(&entry.task_id).await?;

        let Some(repo) = task.primary_repo().map(str::to_string) else {
            warn!(task_id = %task.id, "task has no repository; dropping from queue");
            self.store
                .update_task_status(&task.id, TaskStatus::Failed)
                .await?;
            self.store.delete_queue_entry(&task.id).await?;
            return Ok(());
        };

        self.store
            .set_queue_entry_status(&task.id, QueueEntryStatus::Processing)
            .await?;
        info!(task_id = %task.id, position = entry.position, "claimed queue entry");

        let dispatched = if self.config.multi_agent_events {
            self.spool
                .append(
                    EventPayload::TaskAssigned {
                        task_id: task.id.clone(),
                        title: task.title.clone(),
                        description: task.description.clone(),
                        repo: Some(repo),
                        repos: (!task.repos.is_empty()).then(|| task.repos.clone()),
                        investigation_only: task.investigation_only.then_some(true),
                    },
                    "queue-processor",
                )
                .await
                .map(|_| ())
        } else {
            self.lifecycle
                .spawn(AgentSpawnRequest {
                    task_id: task.id.clone(),
                    repo,
                    title: task.title.clone(),
                    description: task.description.clone(),
                    kind: AgentKind::Triage,
                    ..Default::default()
                })
                .await
                .map(|_| ())
        };
        if let Err(e) = dispatched {
            // Release the claim so a later tick can retry the entry.
            self.store
                .set_queue_entry_status(&task.id, QueueEntryStatus::Queued)
                .await?;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agents::tests::{harness, harness_with, init_project_repo};
    use crate::core::store::tests::sample_task;
    use crate::core::store::types::QueueEntryStatus;

    struct QueueHarness {
        inner: crate::core::agents::tests::Harness,
        spool: EventSpool,
        processor: Arc<QueueProcessor>,
    }

    async fn queue_harness(multi_agent_events: bool) -> QueueHarness {
        let inner = if multi_agent_events {
            harness_with(|cfg| cfg.multi_agent_events = true).await
        } else {
            harness().await
        };
        let spool = EventSpool::open(inner.tempdir.path().join("events")).unwrap();
        let config = Arc::new({
            let mut cfg =
                crate::config::EngineConfig::defaults(inner.tempdir.path().to_path_buf());
            cfg.multi_agent_events = multi_agent_events;
            cfg
        });
        let processor = QueueProcessor::new(
            config,
            inner.store.clone(),
            spool.clone(),
            inner.lifecycle.clone(),
        );
        init_project_repo(&inner.tempdir.path().join("projects"), "svc-a");
        QueueHarness {
            inner,
            spool,
            processor,
        }
    }

    #[tokio::test]
    async fn claims_head_and_emits_event_in_event_mode() {
        let h = queue_harness(true).await;
        h.inner.store.enqueue_task("t1").await.unwrap();

        h.processor.tick().await.unwrap();

        assert_eq!(
            h.inner.store.get_queue_entry("t1").await.unwrap().status,
            QueueEntryStatus::Processing
        );
        let pending = h.spool.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload.kind(), "task.assigned");
        assert_eq!(pending[0].source, "queue-processor");
        // No direct spawn in event mode.
        assert_eq!(h.inner.driver.launch_count(), 0);
    }

    #[tokio::test]
    async fn claims_head_and_spawns_directly_otherwise() {
        let h = queue_harness(false).await;
        h.inner.store.enqueue_task("t1").await.unwrap();

        h.processor.tick().await.unwrap();

        assert_eq!(h.inner.driver.launch_count(), 1);
        assert!(h.inner.driver.launched_specs()[0].name.starts_with("triage-"));
        assert!(h.spool.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn paused_queue_claims_nothing() {
        let h = queue_harness(false).await;
        h.inner.store.enqueue_task("t1").await.unwrap();
        h.inner
            .store
            .set_queue_setting("paused", "true")
            .await
            .unwrap();

        h.processor.tick().await.unwrap();

        assert_eq!(
            h.inner.store.get_queue_entry("t1").await.unwrap().status,
            QueueEntryStatus::Queued
        );
        assert_eq!(h.inner.driver.launch_count(), 0);

        // Unpausing lifts the gate.
        h.inner
            .store
            .set_queue_setting("paused", "false")
            .await
            .unwrap();
        h.processor.tick().await.unwrap();
        assert_eq!(h.inner.driver.launch_count(), 1);
    }

    #[tokio::test]
    async fn stop_on_failure_halts_until_cleared() {
        let h = queue_harness(false).await;
        h.inner.store.insert_task(&sample_task("t2")).await.unwrap();
        h.inner.store.enqueue_task("t1").await.unwrap();
        h.inner.store.enqueue_task("t2").await.unwrap();
        h.inner
            .store
            .set_queue_setting("stop_on_failure", "true")
            .await
            .unwrap();
        h.inner
            .store
            .update_task_status("t1", crate::core::store::types::TaskStatus::Failed)
            .await
            .unwrap();

        h.processor.tick().await.unwrap();
        assert_eq!(h.inner.driver.launch_count(), 0);
        assert_eq!(
            h.inner.store.get_queue_entry("t2").await.unwrap().status,
            QueueEntryStatus::Queued
        );

        // Resolving the failed task lifts the gate; the next tick spawns t2.
        h.inner
            .store
            .update_task_status("t1", crate::core::store::types::TaskStatus::Completed)
            .await
            .unwrap();
        h.processor.tick().await.unwrap();
        assert_eq!(h.inner.driver.launch_count(), 1);
        assert_eq!(
            h.inner.store.get_queue_entry("t2").await.unwrap().status,
            QueueEntryStatus::Processing
        );
    }

    #[tokio::test]
    async fn max_concurrent_caps_processing_entries() {
        let h = queue_harness(false).await;
        h.inner.store.insert_task(&sample_task("t2")).await.unwrap();
        h.inner.store.enqueue_task("t1").await.unwrap();
        h.inner.store.enqueue_task("t2").await.unwrap();

        // Default cap is 1: first tick claims t1, second claims nothing.
        h.processor.tick().await.unwrap();
        h.processor.tick().await.unwrap();
        assert_eq!(h.inner.store.count_processing_queue().await.unwrap(), 1);
        assert_eq!(
            h.inner.store.get_queue_entry("t2").await.unwrap().status,
            QueueEntryStatus::Queued
        );

        // Raising the cap lets the next entry through.
        h.inner
            .store
            .set_queue_setting("max_concurrent", "2")
            .await
            .unwrap();
        h.processor.tick().await.unwrap();
        assert_eq!(h.inner.store.count_processing_queue().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_repo_fails_task_and_drops_entry() {
        let h = queue_harness(false).await;
        let mut task = sample_task("t3");
        task.repo = None;
        task.repos = Vec::new();
        h.inner.store.insert_task(&task).await.unwrap();
        h.inner.store.enqueue_task("t3").await.unwrap();

        h.processor.tick().await.unwrap();

        assert_eq!(
            h.inner.store.get_task("t3").await.unwrap().status,
            crate::core::store::types::TaskStatus::Failed
        );
        assert!(h.inner.store.get_queue_entry("t3").await.is_err());
        assert_eq!(h.inner.driver.launch_count(), 0);
    }

    #[tokio::test]
    async fn repos_list_supplies_primary_when_repo_absent() {
        let h = queue_harness(false).await;
        let mut task = sample_task("t4");
        task.repo = None;
        task.repos = vec!["svc-a".into()];
        h.inner.store.insert_task(&task).await.unwrap();
        h.inner.store.enqueue_task("t4").await.unwrap();

        h.processor.tick().await.unwrap();

        assert_eq!(h.inner.driver.launch_count(), 1);
        assert_eq!(
            h.inner.store.get_queue_entry("t4").await.unwrap().status,
            QueueEntryStatus::Processing
        );
    }

    #[tokio::test]
    async fn empty_queue_is_a_quiet_tick() {
        let h = queue_harness(false).await;
        h.processor.tick().await.unwrap();
        assert_eq!(h.inner.driver.launch_count(), 0);
    }
}
