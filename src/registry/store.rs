use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::task::{Task, TaskParams, TaskStatus, TaskType, TaskUpdate};
use crate::clock::Clock;

/// Filters applied by [`TaskRegistry::list`]; all optional, AND-combined.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub owner: Option<String>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
}

/// Point-in-time listing result.
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub total: usize,
    pub tasks: Vec<Task>,
}

/// Thread-safe store of task lifecycle records.
///
/// Every operation is atomic with respect to every other operation; the whole
/// map sits behind one mutex and no operation touches I/O while holding it.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, Task>>,
    clock: Arc<dyn Clock>,
}

impl TaskRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Allocate a new pending task and return its id. Always succeeds.
    pub fn create(&self, owner: &str, params: TaskParams) -> String {
        let id = Uuid::new_v4().to_string();
        let task_type = params.task_type();
        let task = Task {
            id: id.clone(),
            task_type,
            status: TaskStatus::Pending,
            owner: owner.to_string(),
            created_at: self.clock.now(),
            started_at: None,
            completed_at: None,
            progress: 0.0,
            message: "queued".to_string(),
            params,
            results: None,
            error: None,
        };

        self.tasks.lock().unwrap().insert(id.clone(), task);
        info!(task_id = %id, ?task_type, owner, "Task created");
        id
    }

    /// Merge `update` into the stored task.
    ///
    /// Returns false only when the id is unknown. Lifecycle bookkeeping:
    /// `started_at` is set once on the first transition to running,
    /// `completed_at` is set once on the first transition into a terminal
    /// state (which also forces progress to 100). A cancelled task never
    /// leaves the cancelled state; late updates from a job that kept running
    /// after cancellation are dropped.
    pub fn update(&self, id: &str, update: TaskUpdate) -> bool {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(id) else {
            warn!(task_id = %id, "Update for unknown task");
            return false;
        };

        if task.status == TaskStatus::Cancelled {
            debug!(task_id = %id, "Dropping update for cancelled task");
            return true;
        }

        if let Some(progress) = update.progress {
            // Progress is kept non-decreasing per task even though callers
            // report absolute values.
            if progress > task.progress {
                task.progress = progress.min(100.0);
            }
        }
        if let Some(message) = update.message {
            task.message = message;
        }
        if let Some(results) = update.results {
            task.results = Some(results);
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }

        if let Some(status) = update.status {
            task.status = status;
            if status == TaskStatus::Running && task.started_at.is_none() {
                task.started_at = Some(self.clock.now());
            }
            if status.is_terminal() && task.completed_at.is_none() {
                task.completed_at = Some(self.clock.now());
                task.progress = 100.0;
            }
        }

        true
    }

    /// Defensive copy of the task, absent if unknown.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(id).cloned()
    }

    /// Snapshot listing: filter, sort by creation time descending, paginate.
    pub fn list(&self, filter: &TaskFilter, limit: usize, offset: usize) -> TaskPage {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<&Task> = tasks
            .values()
            .filter(|task| {
                filter
                    .owner
                    .as_deref()
                    .is_none_or(|owner| task.owner == owner)
                    && filter.task_type.is_none_or(|ty| task.task_type == ty)
                    && filter.status.is_none_or(|status| task.status == status)
            })
            .collect();

        // Newest first; id as tie-break so pagination stays stable.
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matched.len();
        let tasks = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        TaskPage { total, tasks }
    }

    /// Cancel a pending or running task.
    ///
    /// Cancelling an already-terminal task is a no-op returning false, not an
    /// error. Cancellation is cooperative: the background job is expected to
    /// poll the task status between steps and bail out.
    pub fn cancel(&self, id: &str) -> bool {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(id) else {
            return false;
        };

        if task.status.is_terminal() {
            return false;
        }

        task.status = TaskStatus::Cancelled;
        task.message = "cancelled by user".to_string();
        task.completed_at = Some(self.clock.now());
        task.progress = 100.0;
        info!(task_id = %id, "Task cancelled");
        true
    }

    /// Remove the record entirely.
    pub fn delete(&self, id: &str) -> bool {
        self.tasks.lock().unwrap().remove(id).is_some()
    }

    /// Convenience wrapper for frequent incremental updates from a running job.
    pub fn report_progress(&self, id: &str, progress: f32, message: Option<&str>) -> bool {
        self.update(
            id,
            TaskUpdate {
                progress: Some(progress),
                message: message.map(str::to_string),
                ..TaskUpdate::default()
            },
        )
    }

    /// Drop terminal tasks whose completion is older than `older_than`.
    ///
    /// Retention policy for the otherwise unbounded in-memory map; driven by
    /// a periodic sweeper.
    pub fn prune_terminal(&self, older_than: Duration) -> usize {
        let cutoff = self.clock.now() - older_than;
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|_, task| {
            !(task.status.is_terminal()
                && task.completed_at.is_some_and(|done| done < cutoff))
        });
        let pruned = before - tasks.len();
        if pruned > 0 {
            info!(pruned, "Pruned terminal tasks");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn text_params(model: &str) -> TaskParams {
        TaskParams::TextInference {
            model: model.to_string(),
            prompt: "hello".to_string(),
            max_tokens: None,
            temperature: None,
        }
    }

    fn registry() -> (Arc<ManualClock>, TaskRegistry) {
        let clock = Arc::new(ManualClock::at_epoch());
        let registry = TaskRegistry::new(clock.clone());
        (clock, registry)
    }

    #[test]
    fn create_then_get_returns_pending_defaults() {
        let (_, registry) = registry();
        let id = registry.create("alice", text_params("m1"));

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0.0);
        assert_eq!(task.owner, "alice");
        assert_eq!(task.message, "queued");
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn started_at_is_set_exactly_once() {
        let (clock, registry) = registry();
        let id = registry.create("alice", text_params("m1"));

        assert!(registry.update(&id, TaskUpdate::status(TaskStatus::Running)));
        let first = registry.get(&id).unwrap().started_at.unwrap();

        clock.advance(Duration::seconds(30));
        assert!(registry.update(&id, TaskUpdate::status(TaskStatus::Running)));
        assert_eq!(registry.get(&id).unwrap().started_at.unwrap(), first);
    }

    #[test]
    fn terminal_transition_sets_completed_at_and_forces_progress() {
        let (_, registry) = registry();
        let id = registry.create("alice", text_params("m1"));

        registry.update(&id, TaskUpdate::status(TaskStatus::Running));
        registry.report_progress(&id, 40.0, None);
        registry.update(
            &id,
            TaskUpdate {
                status: Some(TaskStatus::Completed),
                results: Some(json!({"text": "done"})),
                ..TaskUpdate::default()
            },
        );

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100.0);
        assert!(task.completed_at.is_some());
        assert_eq!(task.results.unwrap()["text"], "done");
    }

    #[test]
    fn update_unknown_task_returns_false() {
        let (_, registry) = registry();
        assert!(!registry.update("missing", TaskUpdate::status(TaskStatus::Running)));
    }

    #[test]
    fn progress_is_non_decreasing() {
        let (_, registry) = registry();
        let id = registry.create("alice", text_params("m1"));

        registry.report_progress(&id, 60.0, None);
        registry.report_progress(&id, 25.0, Some("stale worker report"));

        let task = registry.get(&id).unwrap();
        assert_eq!(task.progress, 60.0);
        // Message still applied; only the regressing value is ignored.
        assert_eq!(task.message, "stale worker report");
    }

    #[test]
    fn cancel_pending_task() {
        let (_, registry) = registry();
        let id = registry.create("alice", text_params("m1"));

        assert!(registry.cancel(&id));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.message, "cancelled by user");
        assert_eq!(task.progress, 100.0);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn cancel_terminal_task_is_noop() {
        let (clock, registry) = registry();
        let id = registry.create("alice", text_params("m1"));
        registry.update(&id, TaskUpdate::status(TaskStatus::Completed));
        let completed_at = registry.get(&id).unwrap().completed_at;

        clock.advance(Duration::seconds(10));
        assert!(!registry.cancel(&id));
        assert_eq!(registry.get(&id).unwrap().completed_at, completed_at);
    }

    #[test]
    fn cancelled_task_ignores_late_job_updates() {
        let (_, registry) = registry();
        let id = registry.create("alice", text_params("m1"));
        registry.update(&id, TaskUpdate::status(TaskStatus::Running));
        registry.cancel(&id);

        // The job did not poll the status and finished anyway.
        assert!(registry.update(
            &id,
            TaskUpdate {
                status: Some(TaskStatus::Completed),
                results: Some(json!({"late": true})),
                ..TaskUpdate::default()
            },
        ));

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.results.is_none());
    }

    #[test]
    fn list_filters_and_paginates_newest_first() {
        let (clock, registry) = registry();
        let first = registry.create("alice", text_params("m1"));
        clock.advance(Duration::seconds(1));
        let second = registry.create("alice", text_params("m2"));
        clock.advance(Duration::seconds(1));
        registry.create("bob", text_params("m3"));

        let filter = TaskFilter {
            owner: Some("alice".to_string()),
            ..TaskFilter::default()
        };

        let page0 = registry.list(&filter, 1, 0);
        assert_eq!(page0.total, 2);
        assert_eq!(page0.tasks[0].id, second);

        let page1 = registry.list(&filter, 1, 1);
        assert_eq!(page1.total, 2);
        assert_eq!(page1.tasks[0].id, first);
    }

    #[test]
    fn list_by_status_and_type() {
        let (_, registry) = registry();
        let id = registry.create(
            "alice",
            TaskParams::Embedding {
                model: "e1".to_string(),
                input: vec!["a".to_string()],
            },
        );
        registry.create("alice", text_params("m1"));
        registry.update(&id, TaskUpdate::status(TaskStatus::Running));

        let filter = TaskFilter {
            task_type: Some(TaskType::Embedding),
            status: Some(TaskStatus::Running),
            ..TaskFilter::default()
        };
        let page = registry.list(&filter, 10, 0);
        assert_eq!(page.total, 1);
        assert_eq!(page.tasks[0].id, id);
    }

    #[test]
    fn delete_task() {
        let (_, registry) = registry();
        let id = registry.create("alice", text_params("m1"));

        assert!(registry.delete(&id));
        assert!(!registry.delete(&id));
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn prune_drops_only_old_terminal_tasks() {
        let (clock, registry) = registry();
        let done = registry.create("alice", text_params("m1"));
        let live = registry.create("alice", text_params("m2"));
        registry.update(&done, TaskUpdate::status(TaskStatus::Failed));
        registry.update(&live, TaskUpdate::status(TaskStatus::Running));

        clock.advance(Duration::hours(2));
        let pruned = registry.prune_terminal(Duration::hours(1));
        assert_eq!(pruned, 1);
        assert!(registry.get(&done).is_none());
        assert!(registry.get(&live).is_some());
    }
}
