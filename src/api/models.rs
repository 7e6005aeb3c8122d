//! Wire-format request and response bodies.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::observability::MetricsSnapshot;
use crate::registry::{Task, TaskStatus, TaskType};

/// Body of the 202 returned when a task is accepted for background execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAcceptedResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Body of a synchronous inference response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// Model that actually served the request (may differ from the one asked
    /// for when failover kicked in).
    pub model: String,
    pub output: Value,
}

/// Full task state as reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub progress: f32,
    pub message: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Task> for TaskStatusResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type,
            status: task.status,
            progress: task.progress,
            message: task.message,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            results: task.results,
            error: task.error,
        }
    }
}

/// Query parameters accepted by the task listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub status: Option<TaskStatus>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
}

fn default_list_limit() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub tasks: Vec<TaskStatusResponse>,
}

/// Generic acknowledgement used by cancel/reset style endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateCacheRequest {
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateCacheResponse {
    pub invalidated: usize,
}
