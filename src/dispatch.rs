//! Model invocation with failover guarding, plus the background job runner.
//!
//! The actual model call is an external collaborator behind [`ModelInvoker`];
//! this layer wires it to the failover manager (exactly one alternate attempt
//! per failed request) and to the task registry for fire-and-forget jobs.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::failover::FailoverManager;
use crate::progress::{ProgressSink, ProgressTracker};
use crate::registry::{TaskParams, TaskRegistry, TaskStatus, TaskUpdate};

/// Suggested retry delay when no alternate model is eligible.
pub const RETRY_UNAVAILABLE_SECS: u64 = 300;
/// Longer suggested delay when the alternate also failed.
pub const RETRY_EXHAUSTED_SECS: u64 = 600;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("model call failed: {0}")]
    ModelFailure(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

/// Opaque model-invocation collaborator.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        model_id: &str,
        params: &TaskParams,
        progress: &dyn ProgressSink,
    ) -> Result<Value, InvokeError>;
}

/// Structured dispatch failures rendered directly as 503 responses.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("model {model} is unavailable and no alternative is eligible")]
    ModelUnavailable {
        model: String,
        model_type: String,
        retry_after_secs: u64,
    },
    #[error("all available models failed (original {original}, alternative {alternate})")]
    FailoverExhausted {
        original: String,
        alternate: String,
        retry_after_secs: u64,
    },
}

/// Successful invocation, possibly served by an alternate model.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub payload: Value,
    pub served_by: String,
    /// Present when an alternate served the request: (original, alternate).
    pub failover: Option<(String, String)>,
}

/// Invoke `model` and, on failure, retry exactly once against a chosen
/// alternate of the same `model_type`.
pub async fn invoke_with_failover(
    failover: &FailoverManager,
    invoker: &dyn ModelInvoker,
    model_type: &str,
    model: &str,
    params: &TaskParams,
    progress: &dyn ProgressSink,
) -> Result<DispatchOutcome, DispatchError> {
    match invoker.invoke(model, params, progress).await {
        Ok(payload) => {
            failover.mark_success(model);
            return Ok(DispatchOutcome {
                payload,
                served_by: model.to_string(),
                failover: None,
            });
        }
        Err(err) => {
            error!(model, %err, "Primary model invocation failed");
            failover.mark_failure(model);
        }
    }

    let Some(alternate) = failover.get_alternative(model_type, model) else {
        return Err(DispatchError::ModelUnavailable {
            model: model.to_string(),
            model_type: model_type.to_string(),
            retry_after_secs: RETRY_UNAVAILABLE_SECS,
        });
    };

    info!(original = model, alternate = %alternate, "Attempting failover");
    match invoker.invoke(&alternate, params, progress).await {
        Ok(payload) => {
            failover.record_failover(model, &alternate, true, None);
            failover.mark_success(&alternate);
            Ok(DispatchOutcome {
                payload,
                served_by: alternate.clone(),
                failover: Some((model.to_string(), alternate)),
            })
        }
        Err(err) => {
            failover.mark_failure(&alternate);
            failover.record_failover(model, &alternate, false, Some(err.to_string()));
            Err(DispatchError::FailoverExhausted {
                original: model.to_string(),
                alternate,
                retry_after_secs: RETRY_EXHAUSTED_SECS,
            })
        }
    }
}

/// Run one submitted task to completion as a detached background job.
///
/// Cancellation is cooperative: the job polls the task's status between steps
/// and bails out instead of writing over a cancellation.
pub async fn run_background_job(
    registry: Arc<TaskRegistry>,
    failover: Arc<FailoverManager>,
    invoker: Arc<dyn ModelInvoker>,
    task_id: String,
) {
    let Some(task) = registry.get(&task_id) else {
        return;
    };
    if task.status == TaskStatus::Cancelled {
        debug!(task_id = %task_id, "Job cancelled before start");
        return;
    }

    registry.update(
        &task_id,
        TaskUpdate {
            status: Some(TaskStatus::Running),
            message: Some("processing".to_string()),
            ..TaskUpdate::default()
        },
    );

    let progress = ProgressTracker::new(task_id.clone(), registry.clone());
    let model = task.params.model().to_string();
    let model_type = task.task_type.failover_class();

    let outcome = invoke_with_failover(
        &failover,
        invoker.as_ref(),
        model_type,
        &model,
        &task.params,
        &progress,
    )
    .await;

    if registry
        .get(&task_id)
        .is_none_or(|t| t.status == TaskStatus::Cancelled)
    {
        debug!(task_id = %task_id, "Job finished after cancellation, result dropped");
        return;
    }

    match outcome {
        Ok(outcome) => {
            info!(task_id = %task_id, served_by = %outcome.served_by, "Job completed");
            registry.update(
                &task_id,
                TaskUpdate {
                    status: Some(TaskStatus::Completed),
                    message: Some("completed".to_string()),
                    results: Some(json!({
                        "model": outcome.served_by,
                        "output": outcome.payload,
                    })),
                    ..TaskUpdate::default()
                },
            );
        }
        Err(err) => {
            error!(task_id = %task_id, %err, "Job failed");
            registry.update(
                &task_id,
                TaskUpdate {
                    status: Some(TaskStatus::Failed),
                    message: Some("failed".to_string()),
                    error: Some(err.to_string()),
                    ..TaskUpdate::default()
                },
            );
        }
    }
}

/// Built-in invoker that simulates staged model work and echoes its inputs.
///
/// Real model integrations implement [`ModelInvoker`] themselves; this one
/// keeps the pipeline exercisable end to end without any model runtime.
pub struct EchoInvoker {
    step_delay: StdDuration,
}

impl EchoInvoker {
    pub fn new(step_delay: StdDuration) -> Self {
        Self { step_delay }
    }

    /// No artificial delay between progress steps; used in tests.
    pub fn instant() -> Self {
        Self::new(StdDuration::ZERO)
    }
}

impl Default for EchoInvoker {
    fn default() -> Self {
        Self::new(StdDuration::from_millis(10))
    }
}

#[async_trait]
impl ModelInvoker for EchoInvoker {
    async fn invoke(
        &self,
        model_id: &str,
        params: &TaskParams,
        progress: &dyn ProgressSink,
    ) -> Result<Value, InvokeError> {
        for (fraction, stage) in [
            (0.25, "loading model"),
            (0.5, "running inference"),
            (0.75, "post-processing"),
        ] {
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
            progress.report(fraction, Some(stage));
        }

        let output = match params {
            TaskParams::TextInference { prompt, .. } => json!({
                "text": format!("echo: {prompt}"),
            }),
            TaskParams::Embedding { input, .. } => json!({
                "vectors": input.iter().map(|_| vec![0.0f32; 4]).collect::<Vec<_>>(),
            }),
            TaskParams::TranscriptionMonologue { media_path, .. }
            | TaskParams::TranscriptionMultispeaker { media_path, .. } => json!({
                "segments": [],
                "media_path": media_path,
            }),
            other => json!({
                "echo": serde_json::to_value(other)
                    .map_err(|e| InvokeError::InvalidParams(e.to_string()))?,
            }),
        };

        Ok(json!({ "model": model_id, "result": output }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::progress::NullProgress;
    use std::collections::{HashMap, HashSet};

    /// Invoker that fails for a configured set of model ids.
    struct FlakyInvoker {
        failing: HashSet<String>,
    }

    impl FlakyInvoker {
        fn failing(models: &[&str]) -> Self {
            Self {
                failing: models.iter().map(|m| m.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl ModelInvoker for FlakyInvoker {
        async fn invoke(
            &self,
            model_id: &str,
            _params: &TaskParams,
            _progress: &dyn ProgressSink,
        ) -> Result<Value, InvokeError> {
            if self.failing.contains(model_id) {
                Err(InvokeError::ModelFailure(format!("{model_id} is down")))
            } else {
                Ok(json!({ "served": model_id }))
            }
        }
    }

    fn failover_with_text_config() -> Arc<FailoverManager> {
        let manager = FailoverManager::new(Arc::new(ManualClock::at_epoch()));
        let mut alternates = HashMap::new();
        alternates.insert("A".to_string(), vec!["B".to_string()]);
        manager.register_config("text", alternates, chrono::Duration::seconds(100));
        Arc::new(manager)
    }

    fn text_params(model: &str) -> TaskParams {
        TaskParams::TextInference {
            model: model.to_string(),
            prompt: "hi".to_string(),
            max_tokens: None,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn primary_success_has_no_failover_note() {
        let failover = failover_with_text_config();
        let invoker = FlakyInvoker::failing(&[]);

        let outcome = invoke_with_failover(
            &failover,
            &invoker,
            "text",
            "A",
            &text_params("A"),
            &NullProgress,
        )
        .await
        .unwrap();

        assert_eq!(outcome.served_by, "A");
        assert!(outcome.failover.is_none());
        assert_eq!(failover.health_report().metrics.total_failovers, 0);
    }

    #[tokio::test]
    async fn failed_primary_is_served_by_alternate() {
        let failover = failover_with_text_config();
        let invoker = FlakyInvoker::failing(&["A"]);

        let outcome = invoke_with_failover(
            &failover,
            &invoker,
            "text",
            "A",
            &text_params("A"),
            &NullProgress,
        )
        .await
        .unwrap();

        assert_eq!(outcome.served_by, "B");
        assert_eq!(
            outcome.failover,
            Some(("A".to_string(), "B".to_string()))
        );

        let report = failover.health_report();
        assert_eq!(report.metrics.successful_failovers, 1);
        assert!(!report.models["A"].available);
        assert!(report.models["B"].available);
    }

    #[tokio::test]
    async fn no_eligible_alternate_is_unavailable() {
        let failover = failover_with_text_config();
        failover.mark_failure("B");
        let invoker = FlakyInvoker::failing(&["A"]);

        let err = invoke_with_failover(
            &failover,
            &invoker,
            "text",
            "A",
            &text_params("A"),
            &NullProgress,
        )
        .await
        .unwrap_err();

        match err {
            DispatchError::ModelUnavailable {
                model,
                retry_after_secs,
                ..
            } => {
                assert_eq!(model, "A");
                assert_eq!(retry_after_secs, RETRY_UNAVAILABLE_SECS);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn alternate_failure_exhausts_failover() {
        let failover = failover_with_text_config();
        let invoker = FlakyInvoker::failing(&["A", "B"]);

        let err = invoke_with_failover(
            &failover,
            &invoker,
            "text",
            "A",
            &text_params("A"),
            &NullProgress,
        )
        .await
        .unwrap_err();

        match err {
            DispatchError::FailoverExhausted {
                original,
                alternate,
                retry_after_secs,
            } => {
                assert_eq!(original, "A");
                assert_eq!(alternate, "B");
                assert_eq!(retry_after_secs, RETRY_EXHAUSTED_SECS);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(failover.health_report().metrics.failed_failovers, 1);
    }

    #[tokio::test]
    async fn background_job_completes_task() {
        let registry = Arc::new(TaskRegistry::new(Arc::new(ManualClock::at_epoch())));
        let failover = failover_with_text_config();
        let invoker: Arc<dyn ModelInvoker> = Arc::new(EchoInvoker::instant());

        let id = registry.create("alice", text_params("A"));
        run_background_job(registry.clone(), failover, invoker, id.clone()).await;

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100.0);
        assert!(task.started_at.is_some());
        let results = task.results.unwrap();
        assert_eq!(results["model"], "A");
    }

    #[tokio::test]
    async fn background_job_skips_cancelled_task() {
        let registry = Arc::new(TaskRegistry::new(Arc::new(ManualClock::at_epoch())));
        let failover = failover_with_text_config();
        let invoker: Arc<dyn ModelInvoker> = Arc::new(EchoInvoker::instant());

        let id = registry.create("alice", text_params("A"));
        registry.cancel(&id);
        run_background_job(registry.clone(), failover, invoker, id.clone()).await;

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.results.is_none());
    }

    #[tokio::test]
    async fn background_job_records_failure() {
        let registry = Arc::new(TaskRegistry::new(Arc::new(ManualClock::at_epoch())));
        let failover = failover_with_text_config();
        let invoker: Arc<dyn ModelInvoker> = Arc::new(FlakyInvoker::failing(&["A", "B"]));

        let id = registry.create("alice", text_params("A"));
        run_background_job(registry.clone(), failover, invoker, id.clone()).await;

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("A"));
    }
}
