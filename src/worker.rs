//! Background task processing.
//!
//! Simulates long-running work on a task: flips it to `in_progress`, waits a
//! fixed interval, then flips it to `completed`. Invocations are fire and
//! forget; the request that triggered one has already returned by the time it
//! finishes, so failures are recorded to the task's audit log instead of
//! being propagated.

use std::time::Duration;
use tracing::{error, info, warn};

use crate::store::{StoreError, TaskPatch, TaskStatus, TaskStore};

/// Spawn a processing run for `task_id`, discarding the join handle.
///
/// There is no queue, no retry and no cancellation; a process restart loses
/// any in-flight run.
pub fn spawn(store: TaskStore, task_id: i64, delay: Duration) {
    tokio::spawn(process_task(store, task_id, delay));
}

/// Drive one task through `in_progress` -> wait -> `completed`.
pub async fn process_task(store: TaskStore, task_id: i64, delay: Duration) {
    if let Err(e) = run(&store, task_id, delay).await {
        error!("Background task: error processing task {}: {}", task_id, e);
        if let Err(log_err) = store
            .create_task_log(
                task_id,
                &format!("Error during background processing: {e}"),
            )
            .await
        {
            error!(
                "Background task: failed to record error for task {}: {}",
                task_id, log_err
            );
        }
    }
}

async fn run(store: &TaskStore, task_id: i64, delay: Duration) -> Result<(), StoreError> {
    info!("Background task: setting task {} to in_progress", task_id);
    let started = store
        .update_task(task_id, TaskPatch::with_status(TaskStatus::InProgress))
        .await?;
    if started.is_none() {
        // Gone before we began; no audit entry, never reaches completed.
        warn!("Background task: task {} not found for processing", task_id);
        return Ok(());
    }

    tokio::time::sleep(delay).await;

    info!("Background task: setting task {} to completed", task_id);
    store
        .update_task(task_id, TaskPatch::with_status(TaskStatus::Completed))
        .await?;
    info!("Background task: task {} marked as completed", task_id);
    Ok(())
}
