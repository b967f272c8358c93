use relay_contracts::lifecycle::LifecycleError;
use relay_contracts::parsing::FailureKind;

/// Failure of a single call to the upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("no response from AI service: {0}")]
    Transport(String),
    #[error("AI service responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("AI service returned an unexpected payload: {0}")]
    InvalidResponse(String),
}

/// Terminal task failures. `reason()` is what the webhook receives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("No response from AI service: {0}")]
    UpstreamTransport(String),
    #[error("AI service responded with status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },
    #[error("content rejected by moderation policy")]
    Moderation,
    #[error("generation failed")]
    Generation,
    #[error("unparseable response")]
    Unparseable,
    #[error("timeout")]
    PollTimeout,
    #[error("{0}")]
    Internal(String),
}

impl TaskError {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<FailureKind> for TaskError {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Moderation => Self::Moderation,
            FailureKind::Generation => Self::Generation,
        }
    }
}

impl From<LifecycleError> for TaskError {
    fn from(err: LifecycleError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<UpstreamError> for TaskError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Transport(message) => Self::UpstreamTransport(message),
            UpstreamError::Status { status, body } => Self::UpstreamStatus { status, body },
            UpstreamError::InvalidResponse(message) => Self::Internal(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook URL is not configured")]
    MissingWebhookUrl,
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("webhook request failed: {0}")]
    Transport(String),
    #[error("webhook responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

impl NotifyError {
    /// Configuration faults are detected before any request is attempted.
    pub fn is_config_fault(&self) -> bool {
        matches!(self, Self::MissingWebhookUrl | Self::MissingSecret)
    }
}
