//! Registry of the tasks created by one client.
//!
//! The inbound router reads from it while new tasks are being registered, so
//! lookups clone the task handle and release the lock right away.

use crate::task::Task;
use pek_core::TaskId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Tasks keyed by their id.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_count", &self.tasks.try_read().map(|t| t.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task.
    ///
    /// # Arguments
    /// * `task` - Handle to the task; its id becomes the routing key
    ///
    /// # Returns
    /// `true` if the task was newly registered, `false` if it replaced a task
    /// with the same id.
    pub async fn register(&self, task: Task) -> bool {
        let id = task.id().clone();
        debug!(task_id = %id, "Registering task");

        let mut tasks = self.tasks.write().await;
        let was_new = tasks.insert(id.clone(), task).is_none();

        if !was_new {
            warn!(task_id = %id, "Task replaced in registry");
        }

        was_new
    }

    /// Looks up a task by id.
    ///
    /// # Arguments
    /// * `id` - The task id, which is also the topic its results arrive on
    ///
    /// # Returns
    /// A clone of the task handle if found, `None` otherwise.
    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Removes a task so its results are no longer routed.
    ///
    /// # Arguments
    /// * `id` - The task id to remove
    ///
    /// # Returns
    /// `true` if the task was registered.
    pub async fn unregister(&self, id: &TaskId) -> bool {
        debug!(task_id = %id, "Unregistering task");

        let removed = self.tasks.write().await.remove(id).is_some();
        if !removed {
            warn!(task_id = %id, "Attempted to unregister unknown task");
        }

        removed
    }

    /// Ids of every registered task, sorted.
    pub async fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handles to every registered task, ordered by id.
    pub async fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.id().cmp(b.id()));
        tasks
    }

    /// Number of registered tasks.
    pub async fn count(&self) -> usize {
        self.tasks.read().await.len()
    }
}
