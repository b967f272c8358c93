use serde::{Deserialize, Serialize};

pub const REASON_MODERATION: &str = "content rejected by moderation policy";
pub const REASON_GENERATION: &str = "generation failed";
pub const REASON_UNPARSEABLE: &str = "unparseable response";
pub const REASON_TIMEOUT: &str = "timeout";

/// Terminal result of a task. Exactly one is produced per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Completed { images: Vec<String> },
    Failed { reason: String },
}

impl Outcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLink {
    pub url: String,
}

/// Body posted to the caller's webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageLink>>,
    /// First image, kept for receivers that predate `images`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookPayload {
    pub fn from_outcome(task_id: &str, outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Completed { images } => Self {
                task_id: task_id.to_string(),
                status: TaskStatus::Completed,
                images: Some(
                    images
                        .iter()
                        .map(|url| ImageLink { url: url.clone() })
                        .collect(),
                ),
                result_url: images.first().cloned(),
                error: None,
            },
            Outcome::Failed { reason } => Self {
                task_id: task_id.to_string(),
                status: TaskStatus::Failed,
                images: None,
                result_url: None,
                error: Some(reason.clone()),
            },
        }
    }
}
