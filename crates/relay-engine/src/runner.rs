//! Background execution of a single task, from request building to webhook.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures::FutureExt as _;
use relay_contracts::chat::UpstreamRequest;
use relay_contracts::lifecycle::{TaskLifecycle, TaskState};
use relay_contracts::outcome::{Outcome, WebhookPayload};
use relay_contracts::parsing::{Classification, ResponsePatterns};
use relay_contracts::task::Task;
use tokio::task::JoinHandle;
use tracing::Instrument as _;

use crate::config::{mask_secret, RelayConfig};
use crate::error::{TaskError, UpstreamError};
use crate::image_ref::image_wire_url;
use crate::notifier::Notifier;
use crate::upstream::UpstreamProvider;

/// Owns the lifecycle of every task handed to it. Tasks share nothing but
/// the immutable configuration and the two outbound seams.
pub struct TaskRunner {
    config: Arc<RelayConfig>,
    patterns: ResponsePatterns,
    provider: Arc<dyn UpstreamProvider>,
    notifier: Arc<dyn Notifier>,
}

impl TaskRunner {
    pub fn new(
        config: Arc<RelayConfig>,
        provider: Arc<dyn UpstreamProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let patterns = config.response_patterns()?;
        Ok(Self {
            config,
            patterns,
            provider,
            notifier,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Detaches the task. The handle is only useful to tests; intake drops it.
    pub fn spawn(self: &Arc<Self>, task: Task) -> JoinHandle<Outcome> {
        let runner = Arc::clone(self);
        let span = tracing::info_span!("task", task_id = %task.id);
        tokio::spawn(async move { runner.execute(task).await }.instrument(span))
    }

    /// Runs the task to a terminal outcome and notifies exactly once.
    pub async fn execute(&self, task: Task) -> Outcome {
        let outcome = self.run_to_outcome(&task).await;
        let payload = WebhookPayload::from_outcome(&task.id, &outcome);
        self.notifier.notify(&task.webhook_url, &payload).await;
        outcome
    }

    async fn run_to_outcome(&self, task: &Task) -> Outcome {
        let mut lifecycle = TaskLifecycle::new(task.id.clone());
        tracing::debug!(
            provider = self.provider.name(),
            model = %self.config.upstream.model,
            api_key = %mask_secret(&self.config.upstream.api_key),
            image = task.image.as_ref().map(|image| image.kind()).unwrap_or("none"),
            "task started"
        );

        let result = AssertUnwindSafe(self.run(task, &mut lifecycle))
            .catch_unwind()
            .await;
        let outcome = match result {
            Ok(Ok(images)) => Outcome::Completed { images },
            Ok(Err(err)) => {
                tracing::error!(error = %err, "task failed");
                Outcome::failed(err.reason())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(error = %message, "task panicked");
                Outcome::failed(message)
            }
        };

        let terminal = match &outcome {
            Outcome::Completed { .. } => TaskState::Completed,
            Outcome::Failed { .. } => TaskState::Failed,
        };
        if let Err(err) = lifecycle.advance(terminal) {
            tracing::error!(error = %err, "terminal transition rejected");
        }
        tracing::info!(
            status = outcome.status().as_str(),
            elapsed_ms = (chrono::Utc::now() - task.created_at).num_milliseconds(),
            "task finished"
        );
        outcome
    }

    async fn run(&self, task: &Task, lifecycle: &mut TaskLifecycle) -> Result<Vec<String>, TaskError> {
        lifecycle.advance(TaskState::Building)?;
        let request = self.build_request(task)?;

        lifecycle.advance(TaskState::Calling)?;
        tracing::info!(has_image = request.has_image(), "calling upstream provider");
        let upstream = &self.config.upstream;
        let text = tokio::time::timeout(upstream.request_timeout, self.provider.complete(&request))
            .await
            .map_err(|_| {
                UpstreamError::Transport(format!(
                    "timed out after {}s",
                    upstream.request_timeout.as_secs()
                ))
            })??;
        tracing::debug!(raw_response = %text, "upstream responded");

        let images = match self.patterns.classify(&text) {
            Classification::Completed(images) => {
                lifecycle.advance(TaskState::DirectResult)?;
                images
            }
            Classification::Pending(job_id) => {
                tracing::info!(job_id = %job_id, "upstream returned a pending job");
                self.poll_job(&job_id, lifecycle).await?
            }
            Classification::Failed(kind) => {
                tracing::warn!(raw_response = %text, "upstream reported a failure");
                return Err(kind.into());
            }
            Classification::Unparseable => {
                tracing::warn!(raw_response = %text, "could not parse upstream response");
                return Err(TaskError::Unparseable);
            }
        };

        lifecycle.advance(TaskState::Parsing)?;
        tracing::info!(count = images.len(), "result images extracted");
        Ok(images)
    }

    fn build_request(&self, task: &Task) -> Result<UpstreamRequest, TaskError> {
        let image_url = task
            .image
            .as_ref()
            .map(|image| image_wire_url(image, self.config.storage_rewrite.as_ref()))
            .transpose()?;
        Ok(UpstreamRequest::user_message(
            &self.config.upstream.model,
            task.prompt_text(),
            image_url,
        ))
    }

    async fn poll_job(
        &self,
        job_id: &str,
        lifecycle: &mut TaskLifecycle,
    ) -> Result<Vec<String>, TaskError> {
        let upstream = &self.config.upstream;
        for attempt in 1..=upstream.max_poll_attempts {
            lifecycle.advance(TaskState::Polling)?;
            tokio::time::sleep(upstream.poll_interval).await;

            let text = match tokio::time::timeout(upstream.poll_timeout, self.provider.poll(job_id)).await {
                Ok(Ok(text)) => text,
                Ok(Err(err)) => {
                    tracing::warn!(attempt, error = %err, "poll attempt failed");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        attempt,
                        timeout_s = upstream.poll_timeout.as_secs(),
                        "poll attempt timed out"
                    );
                    continue;
                }
            };
            tracing::debug!(attempt, raw_response = %text, "poll responded");

            match self.patterns.classify(&text) {
                Classification::Completed(images) => return Ok(images),
                Classification::Failed(kind) => {
                    tracing::warn!(attempt, raw_response = %text, "job reported a failure");
                    return Err(kind.into());
                }
                Classification::Pending(_) | Classification::Unparseable => {
                    tracing::debug!(attempt, "job not finished yet");
                }
            }
        }
        tracing::warn!(
            attempts = upstream.max_poll_attempts,
            job_id,
            "poll budget exhausted"
        );
        Err(TaskError::PollTimeout)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "task panicked".to_string()
}
