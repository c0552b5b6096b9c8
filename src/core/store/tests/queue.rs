use super::{open_store, sample_task};
use crate::core::store::types::{QueueEntryStatus, TaskStatus};

#[tokio::test]
async fn enqueue_assigns_increasing_positions() {
    let store = open_store();
    store.insert_task(&sample_task("t1")).await.unwrap();
    store.insert_task(&sample_task("t2")).await.unwrap();

    let e1 = store.enqueue_task("t1").await.unwrap();
    let e2 = store.enqueue_task("t2").await.unwrap();
    assert!(e1.position < e2.position);
    assert_eq!(e1.status, QueueEntryStatus::Queued);
}

#[tokio::test]
async fn one_entry_per_task() {
    let store = open_store();
    store.insert_task(&sample_task("t1")).await.unwrap();
    store.enqueue_task("t1").await.unwrap();
    assert!(store.enqueue_task("t1").await.is_err());
}

#[tokio::test]
async fn pending_head_requires_task_also_queued() {
    let store = open_store();
    let mut t1 = sample_task("t1");
    t1.status = TaskStatus::Assigned;
    store.insert_task(&t1).await.unwrap();
    store.insert_task(&sample_task("t2")).await.unwrap();
    store.enqueue_task("t1").await.unwrap();
    store.enqueue_task("t2").await.unwrap();

    let head = store.get_pending_queue_head(10).await.unwrap();
    assert_eq!(head.len(), 1);
    assert_eq!(head[0].task_id, "t2");
}

#[tokio::test]
async fn pending_head_orders_by_position() {
    let store = open_store();
    for id in ["t1", "t2", "t3"] {
        store.insert_task(&sample_task(id)).await.unwrap();
        store.enqueue_task(id).await.unwrap();
    }
    let head = store.get_pending_queue_head(1).await.unwrap();
    assert_eq!(head[0].task_id, "t1");
}

#[tokio::test]
async fn processing_count_and_terminal_entries() {
    let store = open_store();
    store.insert_task(&sample_task("t1")).await.unwrap();
    store.insert_task(&sample_task("t2")).await.unwrap();
    store.enqueue_task("t1").await.unwrap();
    store.enqueue_task("t2").await.unwrap();

    store
        .set_queue_entry_status("t1", QueueEntryStatus::Processing)
        .await
        .unwrap();
    assert_eq!(store.count_processing_queue().await.unwrap(), 1);

    store
        .set_queue_entry_status("t1", QueueEntryStatus::Completed)
        .await
        .unwrap();
    assert_eq!(store.count_processing_queue().await.unwrap(), 0);

    // Terminal entries keep their row for audit.
    let entry = store.get_queue_entry("t1").await.unwrap();
    assert_eq!(entry.status, QueueEntryStatus::Completed);
    assert!(entry.completed_at.is_some());
}

#[tokio::test]
async fn stop_on_failure_gate_sees_failed_tasks() {
    let store = open_store();
    store.insert_task(&sample_task("t1")).await.unwrap();
    store.enqueue_task("t1").await.unwrap();
    assert!(!store.any_failed_task_in_queue().await.unwrap());

    store
        .update_task_status("t1", TaskStatus::Failed)
        .await
        .unwrap();
    assert!(store.any_failed_task_in_queue().await.unwrap());

    // Lifting the failure lifts the gate.
    store
        .update_task_status("t1", TaskStatus::Completed)
        .await
        .unwrap();
    assert!(!store.any_failed_task_in_queue().await.unwrap());
}

#[tokio::test]
async fn delete_and_clear() {
    let store = open_store();
    store.insert_task(&sample_task("t1")).await.unwrap();
    store.insert_task(&sample_task("t2")).await.unwrap();
    store.enqueue_task("t1").await.unwrap();
    store.enqueue_task("t2").await.unwrap();

    assert!(store.delete_queue_entry("t1").await.unwrap());
    assert!(!store.delete_queue_entry("t1").await.unwrap());
    assert_eq!(store.clear_queue().await.unwrap(), 1);
    assert!(store.list_queue().await.unwrap().is_empty());
}

#[tokio::test]
async fn settings_default_and_override() {
    let store = open_store();
    let settings = store.get_queue_settings().await.unwrap();
    assert!(!settings.paused);
    assert!(!settings.stop_on_failure);
    assert_eq!(settings.max_concurrent, 1);

    store.set_queue_setting("paused", "true").await.unwrap();
    store.set_queue_setting("max_concurrent", "3").await.unwrap();
    store.set_queue_setting("paused", "false").await.unwrap();

    let settings = store.get_queue_settings().await.unwrap();
    assert!(!settings.paused);
    assert_eq!(settings.max_concurrent, 3);
}
