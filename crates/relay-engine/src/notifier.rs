use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_contracts::outcome::WebhookPayload;
use reqwest::Client as HttpClient;

use crate::config::WebhookConfig;
use crate::error::NotifyError;
use crate::util::{error_chain_text, truncate_text};

pub const WORKER_SECRET_HEADER: &str = "x-worker-secret";

const ERROR_BODY_MAX_CHARS: usize = 512;

/// Reports a task's terminal outcome. Implementations never fail outward:
/// delivery problems are logged and dropped.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, webhook_url: &str, payload: &WebhookPayload);
}

pub struct WebhookNotifier {
    secret: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            secret: config.secret.clone(),
            timeout: config.timeout,
            http,
        })
    }

    /// Single delivery attempt. No retry.
    pub async fn deliver(
        &self,
        webhook_url: &str,
        payload: &WebhookPayload,
    ) -> Result<(), NotifyError> {
        let webhook_url = webhook_url.trim();
        if webhook_url.is_empty() {
            return Err(NotifyError::MissingWebhookUrl);
        }
        let Some(secret) = self.secret.as_deref().filter(|value| !value.trim().is_empty()) else {
            return Err(NotifyError::MissingSecret);
        };

        let response = self
            .http
            .post(webhook_url)
            .header(WORKER_SECRET_HEADER, secret)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|err| NotifyError::Transport(error_chain_text(&err, ERROR_BODY_MAX_CHARS)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body: truncate_text(&body, ERROR_BODY_MAX_CHARS),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, webhook_url: &str, payload: &WebhookPayload) {
        let task_id = payload.task_id.as_str();
        let status = payload.status.as_str();
        match self.deliver(webhook_url, payload).await {
            Ok(()) => {
                tracing::info!(task_id, status, "webhook notified");
            }
            Err(err) if err.is_config_fault() => {
                tracing::error!(
                    task_id,
                    status,
                    fatal = true,
                    error = %err,
                    "cannot notify webhook; outcome dropped"
                );
            }
            Err(err) => {
                tracing::error!(
                    task_id,
                    status,
                    webhook_url,
                    error = %err,
                    "webhook notification failed; outcome dropped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use relay_contracts::outcome::Outcome;
    use serde_json::{json, Value};

    use super::*;

    #[derive(Clone)]
    struct Receiver {
        status: StatusCode,
        hits: Arc<AtomicUsize>,
        received: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    impl Receiver {
        fn new(status: StatusCode) -> Self {
            Self {
                status,
                hits: Arc::new(AtomicUsize::new(0)),
                received: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    async fn receive(
        State(receiver): State<Receiver>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, &'static str) {
        receiver.hits.fetch_add(1, Ordering::SeqCst);
        let secret = headers
            .get(WORKER_SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        receiver.received.lock().unwrap().push((secret, body));
        (receiver.status, "receiver says hi")
    }

    async fn spawn_receiver(receiver: Receiver) -> anyhow::Result<String> {
        let app = Router::new()
            .route("/api/webhook", post(receive))
            .with_state(receiver);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{addr}/api/webhook"))
    }

    fn notifier(secret: Option<&str>) -> anyhow::Result<WebhookNotifier> {
        WebhookNotifier::new(&WebhookConfig {
            default_url: None,
            secret: secret.map(str::to_string),
            timeout: Duration::from_secs(5),
        })
    }

    fn completed_payload() -> WebhookPayload {
        WebhookPayload::from_outcome(
            "t-1",
            &Outcome::Completed {
                images: vec!["https://cdn.example.com/a.png".to_string()],
            },
        )
    }

    #[tokio::test]
    async fn posts_payload_with_secret_header() -> anyhow::Result<()> {
        let receiver = Receiver::new(StatusCode::OK);
        let url = spawn_receiver(receiver.clone()).await?;

        notifier(Some("shh"))?.deliver(&url, &completed_payload()).await?;

        let received = receiver.received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.as_deref(), Some("shh"));
        assert_eq!(
            received[0].1,
            json!({
                "taskId": "t-1",
                "status": "completed",
                "images": [{"url": "https://cdn.example.com/a.png"}],
                "resultUrl": "https://cdn.example.com/a.png",
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn receiver_error_is_reported_and_not_retried() -> anyhow::Result<()> {
        let receiver = Receiver::new(StatusCode::INTERNAL_SERVER_ERROR);
        let url = spawn_receiver(receiver.clone()).await?;
        let notifier = notifier(Some("shh"))?;
        let payload = WebhookPayload::from_outcome("t-1", &Outcome::failed("timeout"));

        let err = notifier.deliver(&url, &payload).await.unwrap_err();
        assert_eq!(
            err,
            NotifyError::Status {
                status: 500,
                body: "receiver says hi".to_string()
            }
        );
        assert_eq!(receiver.hits.load(Ordering::SeqCst), 1);

        notifier.notify(&url, &payload).await;
        assert_eq!(receiver.hits.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn missing_secret_is_detected_before_sending() -> anyhow::Result<()> {
        let receiver = Receiver::new(StatusCode::OK);
        let url = spawn_receiver(receiver.clone()).await?;

        let err = notifier(None)?
            .deliver(&url, &completed_payload())
            .await
            .unwrap_err();
        assert_eq!(err, NotifyError::MissingSecret);
        assert!(err.is_config_fault());
        assert_eq!(receiver.hits.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_webhook_url_is_detected_before_sending() -> anyhow::Result<()> {
        let err = notifier(Some("shh"))?
            .deliver("  ", &completed_payload())
            .await
            .unwrap_err();
        assert_eq!(err, NotifyError::MissingWebhookUrl);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_receiver_is_a_transport_error() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);

        let err = notifier(Some("shh"))?
            .deliver(&format!("http://{addr}/api/webhook"), &completed_payload())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
        Ok(())
    }
}
