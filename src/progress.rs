//! Narrow progress-reporting interface for long-running jobs.
//!
//! Jobs receive a [`ProgressSink`] instead of the registry's full API; the
//! concrete [`ProgressTracker`] rescales 0..1 fractions to the registry's
//! 0-100 range.

use std::sync::Arc;

use crate::registry::TaskRegistry;

pub trait ProgressSink: Send + Sync {
    /// Report progress as a fraction in 0..=1 with an optional description.
    fn report(&self, fraction: f32, description: Option<&str>);
}

/// Forwards progress for one task into the registry.
pub struct ProgressTracker {
    task_id: String,
    registry: Arc<TaskRegistry>,
}

impl ProgressTracker {
    pub fn new(task_id: String, registry: Arc<TaskRegistry>) -> Self {
        Self { task_id, registry }
    }
}

impl ProgressSink for ProgressTracker {
    fn report(&self, fraction: f32, description: Option<&str>) {
        let progress = (fraction * 100.0).clamp(0.0, 100.0);
        self.registry
            .report_progress(&self.task_id, progress, description);
    }
}

/// Sink for synchronous invocations that have no task to update.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _fraction: f32, _description: Option<&str>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::TaskParams;

    #[test]
    fn tracker_rescales_to_percent() {
        let registry = Arc::new(TaskRegistry::new(Arc::new(ManualClock::at_epoch())));
        let id = registry.create(
            "alice",
            TaskParams::TextInference {
                model: "m1".to_string(),
                prompt: "hi".to_string(),
                max_tokens: None,
                temperature: None,
            },
        );

        let tracker = ProgressTracker::new(id.clone(), registry.clone());
        tracker.report(0.25, Some("loading model"));

        let task = registry.get(&id).unwrap();
        assert_eq!(task.progress, 25.0);
        assert_eq!(task.message, "loading model");

        tracker.report(1.5, None);
        assert_eq!(registry.get(&id).unwrap().progress, 100.0);
    }
}
