//! In-memory registry for long-running operations a back-end hands back as
//! a `TaskRef` rather than blocking the RPC open (spec.md §4.1 "poll, never
//! block"). Shared by every back-end in this crate; nothing here is
//! hypervisor-specific.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use virtrigaud_provider::error::ProviderError;
use virtrigaud_provider::types::{TaskRef, TaskStatusResult};

#[derive(Debug, Clone)]
enum Slot {
    Running { progress_percent: u32 },
    Done,
    Failed(String),
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, Slot>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new task id and spawns `work` in the background, updating
    /// the slot when it finishes. `work` reports intermediate progress
    /// through the passed sender if it wants to; a back-end that can't
    /// estimate progress can just ignore it.
    pub async fn spawn<F>(&self, work: F) -> TaskRef
    where
        F: FnOnce() -> Result<(), ProviderError> + Send + 'static,
    {
        let id = uuid::Uuid::new_v4().to_string();
        self.tasks.lock().await.insert(id.clone(), Slot::Running { progress_percent: 0 });

        let tasks = self.tasks.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            let slot = match tokio::task::spawn_blocking(work).await {
                Ok(Ok(())) => Slot::Done,
                Ok(Err(e)) => Slot::Failed(e.to_string()),
                Err(_join_err) => Slot::Failed("task panicked".to_string()),
            };
            tasks.lock().await.insert(task_id, slot);
        });

        debug!(task_id = %id, "registered task");
        TaskRef(id)
    }

    pub async fn status(&self, task: &TaskRef) -> Result<TaskStatusResult, ProviderError> {
        let tasks = self.tasks.lock().await;
        match tasks.get(&task.0) {
            None => Err(ProviderError::NotFound(format!("unknown task: {}", task.0))),
            Some(Slot::Running { progress_percent }) => {
                Ok(TaskStatusResult { done: false, error: None, progress_percent: *progress_percent })
            }
            Some(Slot::Done) => Ok(TaskStatusResult { done: true, error: None, progress_percent: 100 }),
            Some(Slot::Failed(msg)) => Ok(TaskStatusResult { done: true, error: Some(msg.clone()), progress_percent: 100 }),
        }
    }
}
