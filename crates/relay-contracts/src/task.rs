use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body accepted by the intake endpoint.
///
/// Every field is optional at the wire level so that a missing `prompt`
/// surfaces as a validation error instead of a deserialization rejection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("prompt is required")]
    MissingPrompt,
    #[error("webhookUrl is required when no default webhook is configured")]
    MissingWebhook,
    #[error("provide either imageUrl or imageBase64, not both")]
    ConflictingImages,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Url(String),
    /// Raw base64 payload with any `data:` prefix already removed.
    Inline {
        mime: Option<String>,
        data: String,
    },
}

impl ImageRef {
    pub fn from_inline(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if let Some((header, payload)) = rest.split_once(',') {
                let mime = header
                    .split(';')
                    .next()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string);
                return Self::Inline {
                    mime,
                    data: payload.trim().to_string(),
                };
            }
        }
        Self::Inline {
            mime: None,
            data: trimmed.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::Inline { .. } => "inline",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    pub style: Option<String>,
    pub image: Option<ImageRef>,
    pub webhook_url: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Text segment sent upstream: the prompt, with the style appended when given.
    pub fn prompt_text(&self) -> String {
        match self.style.as_deref() {
            Some(style) => format!("{}\nStyle: {}", self.prompt, style),
            None => self.prompt.clone(),
        }
    }
}

impl TaskRequest {
    pub fn into_task(
        self,
        default_webhook: Option<&str>,
        generate_id: impl FnOnce() -> String,
    ) -> Result<Task, ValidationError> {
        let prompt = non_empty(self.prompt).ok_or(ValidationError::MissingPrompt)?;
        let webhook_url = non_empty(self.webhook_url)
            .or_else(|| non_empty(default_webhook.map(str::to_string)))
            .ok_or(ValidationError::MissingWebhook)?;

        let image = match (non_empty(self.image_url), non_empty(self.image_base64)) {
            (Some(_), Some(_)) => return Err(ValidationError::ConflictingImages),
            (Some(url), None) => Some(ImageRef::Url(url)),
            (None, Some(raw)) => Some(ImageRef::from_inline(&raw)),
            (None, None) => None,
        };

        Ok(Task {
            id: non_empty(self.task_id).unwrap_or_else(generate_id),
            prompt,
            style: non_empty(self.style),
            image,
            webhook_url,
            created_at: Utc::now(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
