//! Client-side task registry.
//!
//! Holds every task the user has enqueued, in creation order. Only the
//! owning context mutates it; readers either borrow the current contents or
//! watch the revision counter to learn that something changed.

pub mod model;

use model::{StatusUpdate, Task, TaskStatus};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-status counts over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchSummary {
    pub pending: usize,
    pub uploading: usize,
    pub processing: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    /// Number of tasks not yet in a terminal status.
    pub fn in_flight(&self) -> usize {
        self.pending + self.uploading + self.processing
    }
}

/// In-process store of tasks.
pub struct TaskRegistry {
    tasks: Vec<Task>,
    revision: watch::Sender<u64>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            tasks: Vec::new(),
            revision,
        }
    }

    /// Allocate a new pending task and return its id.
    pub fn create_task(&mut self, label: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.tasks.push(Task::new(id.clone(), label));
        debug!(task_id = %id, label, "Task created");
        self.bump();
        id
    }

    /// Move a task to a new status. Unknown ids are ignored.
    ///
    /// Updates that would leave a terminal status are dropped, except requeueing
    /// a failed task. This absorbs late or duplicated events for finished tasks.
    pub fn set_status(&mut self, id: &str, update: StatusUpdate) {
        let Some(task) = self.find_mut(id) else {
            debug!(task_id = %id, "Status update for unknown task ignored");
            return;
        };

        let target = update.status();
        if !task.status.can_transition_to(&target) {
            warn!(
                task_id = %id,
                from = %task.status,
                to = %target,
                "Ignoring transition out of terminal status"
            );
            return;
        }

        task.apply(update);
        debug!(task_id = %id, status = %target, "Task status updated");
        self.bump();
    }

    /// Record upload progress, clamped to 0..=100. Progress never goes backwards.
    pub fn set_progress(&mut self, id: &str, progress: i64) {
        let Some(task) = self.find_mut(id) else {
            return;
        };

        let clamped = progress.clamp(0, 100) as u8;
        if clamped > task.progress {
            task.progress = clamped;
            self.bump();
        }
    }

    /// Delete a task. Absent ids are ignored.
    pub fn remove_task(&mut self, id: &str) {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        if self.tasks.len() != before {
            self.bump();
        }
    }

    /// Remove every task in a terminal status. Returns how many were removed.
    pub fn sweep_terminal(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.status.is_terminal());
        let removed = before - self.tasks.len();
        if removed > 0 {
            debug!(removed, "Swept terminal tasks");
            self.bump();
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// All tasks in creation order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Uploading => summary.uploading += 1,
                TaskStatus::Processing => summary.processing += 1,
                TaskStatus::Success => summary.succeeded += 1,
                TaskStatus::Error => summary.failed += 1,
            }
        }
        summary
    }

    /// Watch the registry revision; it increases on every visible change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
