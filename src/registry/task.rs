use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of asynchronous work the backend dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    TextInference,
    ImageGeneration,
    Embedding,
    TranscriptionMonologue,
    TranscriptionMultispeaker,
    VideoManipulation,
    VideoNonverbal,
    Batch,
    Chained,
    SystemFinal,
}

impl TaskType {
    /// Failover routing class for this kind of work.
    ///
    /// Failover configurations are declared per class ("text", "video", ...),
    /// not per task type, matching how model alternates are grouped.
    pub fn failover_class(&self) -> &'static str {
        match self {
            TaskType::TextInference
            | TaskType::Batch
            | TaskType::Chained
            | TaskType::SystemFinal => "text",
            TaskType::ImageGeneration => "image",
            TaskType::Embedding => "embedding",
            TaskType::TranscriptionMonologue | TaskType::TranscriptionMultispeaker => {
                "transcription"
            }
            TaskType::VideoManipulation | TaskType::VideoNonverbal => "video",
        }
    }
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Typed, internally tagged job inputs.
///
/// The tag values match [`TaskType`]'s wire names, so clients still submit an
/// opaque JSON object with a `type` discriminator and get the same blob back
/// when polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskParams {
    TextInference {
        model: String,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f32>,
    },
    ImageGeneration {
        model: String,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
    Embedding {
        model: String,
        input: Vec<String>,
    },
    TranscriptionMonologue {
        model: String,
        media_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    TranscriptionMultispeaker {
        model: String,
        media_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_speakers: Option<u32>,
    },
    VideoManipulation {
        model: String,
        media_path: String,
    },
    VideoNonverbal {
        model: String,
        media_path: String,
    },
    Batch {
        model: String,
        items: Vec<Value>,
    },
    Chained {
        model: String,
        stages: Vec<Value>,
    },
    SystemFinal {
        model: String,
        payload: Value,
    },
}

impl TaskParams {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskParams::TextInference { .. } => TaskType::TextInference,
            TaskParams::ImageGeneration { .. } => TaskType::ImageGeneration,
            TaskParams::Embedding { .. } => TaskType::Embedding,
            TaskParams::TranscriptionMonologue { .. } => TaskType::TranscriptionMonologue,
            TaskParams::TranscriptionMultispeaker { .. } => TaskType::TranscriptionMultispeaker,
            TaskParams::VideoManipulation { .. } => TaskType::VideoManipulation,
            TaskParams::VideoNonverbal { .. } => TaskType::VideoNonverbal,
            TaskParams::Batch { .. } => TaskType::Batch,
            TaskParams::Chained { .. } => TaskType::Chained,
            TaskParams::SystemFinal { .. } => TaskType::SystemFinal,
        }
    }

    /// Model identifier this job targets.
    pub fn model(&self) -> &str {
        match self {
            TaskParams::TextInference { model, .. }
            | TaskParams::ImageGeneration { model, .. }
            | TaskParams::Embedding { model, .. }
            | TaskParams::TranscriptionMonologue { model, .. }
            | TaskParams::TranscriptionMultispeaker { model, .. }
            | TaskParams::VideoManipulation { model, .. }
            | TaskParams::VideoNonverbal { model, .. }
            | TaskParams::Batch { model, .. }
            | TaskParams::Chained { model, .. }
            | TaskParams::SystemFinal { model, .. } => model,
        }
    }
}

/// One unit of asynchronous work.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f32,
    pub message: String,
    pub params: TaskParams,
    pub results: Option<Value>,
    pub error: Option<String>,
}

/// Partial update merged into a stored task.
///
/// `id`, `owner` and `created_at` are deliberately not representable here:
/// a caller-supplied attempt to change them deserializes into nothing and is
/// silently dropped rather than rejected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub results: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}
