use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Accepted,
    Building,
    Calling,
    DirectResult,
    Polling,
    Parsing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Building => "building",
            Self::Calling => "calling",
            Self::DirectResult => "direct_result",
            Self::Polling => "polling",
            Self::Parsing => "parsing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn allows(self, next: TaskState) -> bool {
        use TaskState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Accepted, Building)
                | (Building, Calling)
                | (Calling, DirectResult)
                | (Calling, Polling)
                | (Polling, Polling)
                | (DirectResult, Parsing)
                | (Polling, Parsing)
                | (Parsing, Completed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task_id}: illegal transition {from} -> {to}")]
pub struct LifecycleError {
    pub task_id: String,
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: TaskState,
    pub at: DateTime<Utc>,
}

/// Per-task state machine. Lives only as long as the task's own execution.
#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    task_id: String,
    history: Vec<Transition>,
}

impl TaskLifecycle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            history: vec![Transition {
                state: TaskState::Accepted,
                at: Utc::now(),
            }],
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn state(&self) -> TaskState {
        self.history
            .last()
            .map(|transition| transition.state)
            .unwrap_or(TaskState::Accepted)
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn advance(&mut self, next: TaskState) -> Result<(), LifecycleError> {
        let current = self.state();
        if !current.allows(next) {
            return Err(LifecycleError {
                task_id: self.task_id.clone(),
                from: current.as_str(),
                to: next.as_str(),
            });
        }
        let at = Utc::now();
        tracing::info!(
            task_id = %self.task_id,
            from = current.as_str(),
            to = next.as_str(),
            ts = %at.to_rfc3339_opts(SecondsFormat::Micros, false),
            "task state changed"
        );
        self.history.push(Transition { state: next, at });
        Ok(())
    }

    /// Count of entries into `state`, e.g. the number of poll attempts.
    pub fn visits(&self, state: TaskState) -> usize {
        self.history
            .iter()
            .filter(|transition| transition.state == state)
            .count()
    }
}
