use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_contracts::chat::{completion_text, UpstreamRequest};
use reqwest::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::util::{error_chain_text, truncate_text};

const ERROR_BODY_MAX_CHARS: usize = 512;

/// Seam between the task runner and the generative-AI service.
///
/// Both calls return the free-text content of the reply; interpretation is
/// left to the response classifier.
#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &UpstreamRequest) -> Result<String, UpstreamError>;

    async fn poll(&self, job_id: &str) -> Result<String, UpstreamError>;
}

/// OpenAI-compatible chat-completions transport.
pub struct ChatCompletionsProvider {
    config: UpstreamConfig,
    http: HttpClient,
}

impl ChatCompletionsProvider {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .build()
            .context("failed to build upstream HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }
}

#[async_trait]
impl UpstreamProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "chat-completions"
    }

    async fn complete(&self, request: &UpstreamRequest) -> Result<String, UpstreamError> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(|err| UpstreamError::Transport(error_chain_text(&err, ERROR_BODY_MAX_CHARS)))?;
        let body = response_text_or_error(response).await?;
        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            UpstreamError::InvalidResponse(format!(
                "AI service returned invalid JSON ({err}): {}",
                truncate_text(&body, ERROR_BODY_MAX_CHARS)
            ))
        })?;
        completion_text(&parsed).ok_or_else(|| {
            UpstreamError::InvalidResponse(format!(
                "AI service response has no choices[0].message.content: {}",
                truncate_text(&body, ERROR_BODY_MAX_CHARS)
            ))
        })
    }

    async fn poll(&self, job_id: &str) -> Result<String, UpstreamError> {
        let poll_url = self.config.poll_url(job_id);
        let response = self
            .http
            .get(&poll_url)
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.poll_timeout)
            .send()
            .await
            .map_err(|err| UpstreamError::Transport(error_chain_text(&err, ERROR_BODY_MAX_CHARS)))?;
        let body = response_text_or_error(response).await?;
        Ok(poll_text(&body))
    }
}

/// Poll replies may be chat-completion shaped or a bare status document.
fn poll_text(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|parsed| completion_text(&parsed))
        .unwrap_or_else(|| body.to_string())
}

async fn response_text_or_error(response: HttpResponse) -> Result<String, UpstreamError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Status {
            status: status.as_u16(),
            body: truncate_text(&body, ERROR_BODY_MAX_CHARS),
        });
    }
    response
        .text()
        .await
        .map_err(|err| UpstreamError::Transport(error_chain_text(&err, ERROR_BODY_MAX_CHARS)))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured {
        auth: Arc<Mutex<Vec<String>>>,
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn spawn_upstream(app: Router) -> anyhow::Result<String> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{addr}"))
    }

    fn config(base: &str) -> UpstreamConfig {
        UpstreamConfig {
            endpoint: format!("{base}/v1/chat/completions"),
            poll_url_template: format!("{base}/v1/tasks/{{job_id}}"),
            api_key: "sk-test".to_string(),
            model: "gpt-4o-image-vip".to_string(),
            request_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 3,
        }
    }

    #[tokio::test]
    async fn complete_sends_bearer_and_reads_content() -> anyhow::Result<()> {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(
                    |State(captured): State<Captured>, headers: HeaderMap, Json(body): Json<Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        captured.auth.lock().unwrap().push(auth);
                        captured.bodies.lock().unwrap().push(body);
                        Json(json!({
                            "choices": [{"message": {"role": "assistant", "content": "![img](https://filesystem.site/x)"}}]
                        }))
                    },
                ),
            )
            .with_state(captured.clone());
        let base = spawn_upstream(app).await?;
        let provider = ChatCompletionsProvider::new(config(&base))?;

        let request = UpstreamRequest::user_message("gpt-4o-image-vip", "a cat".to_string(), None);
        let text = provider.complete(&request).await?;

        assert_eq!(text, "![img](https://filesystem.site/x)");
        assert_eq!(captured.auth.lock().unwrap().as_slice(), ["Bearer sk-test"]);
        assert_eq!(
            captured.bodies.lock().unwrap()[0],
            json!({"model": "gpt-4o-image-vip", "messages": [{"role": "user", "content": "a cat"}]})
        );
        Ok(())
    }

    #[tokio::test]
    async fn non_success_status_keeps_code_and_body() -> anyhow::Result<()> {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base = spawn_upstream(app).await?;
        let provider = ChatCompletionsProvider::new(config(&base))?;

        let request = UpstreamRequest::user_message("m", "a cat".to_string(), None);
        let err = provider.complete(&request).await.unwrap_err();
        assert_eq!(
            err,
            UpstreamError::Status {
                status: 429,
                body: "slow down".to_string()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn body_without_choices_is_invalid() -> anyhow::Result<()> {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({"id": "x"})) }),
        );
        let base = spawn_upstream(app).await?;
        let provider = ChatCompletionsProvider::new(config(&base))?;

        let request = UpstreamRequest::user_message("m", "a cat".to_string(), None);
        let err = provider.complete(&request).await.unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidResponse(_)));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);
        let provider = ChatCompletionsProvider::new(config(&format!("http://{addr}")))?;

        let request = UpstreamRequest::user_message("m", "a cat".to_string(), None);
        let err = provider.complete(&request).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)));
        Ok(())
    }

    #[tokio::test]
    async fn poll_targets_job_url_and_accepts_raw_bodies() -> anyhow::Result<()> {
        let app = Router::new().route(
            "/v1/tasks/{job_id}",
            get(|Path(job_id): Path<String>| async move {
                if job_id == "task_chat" {
                    Json(json!({"choices": [{"message": {"content": "still working on task_chat"}}]}))
                } else {
                    Json(json!({"status": "done", "url": "https://cdn.example.com/a.png"}))
                }
            }),
        );
        let base = spawn_upstream(app).await?;
        let provider = ChatCompletionsProvider::new(config(&base))?;

        assert_eq!(provider.poll("task_chat").await?, "still working on task_chat");
        let raw = provider.poll("task_raw").await?;
        assert!(raw.contains("https://cdn.example.com/a.png"));
        Ok(())
    }

    #[tokio::test]
    async fn status_survives_an_unreadable_error_body() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(read) => request.extend_from_slice(&buf[..read]),
                }
            }
            // Promises more body than it sends, then hangs up.
            let _ = stream
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 64\r\n\r\npartial")
                .await;
            let _ = stream.shutdown().await;
        });
        let provider = ChatCompletionsProvider::new(config(&format!("http://{addr}")))?;

        let err = provider.poll("task_cut").await.unwrap_err();
        assert!(
            matches!(err, UpstreamError::Status { status: 502, .. }),
            "unexpected error: {err:?}"
        );
        Ok(())
    }

    #[test]
    fn poll_text_falls_back_to_raw_body() {
        assert_eq!(poll_text("plain status: queued"), "plain status: queued");
        assert_eq!(
            poll_text(r#"{"choices":[{"message":{"content":"done"}}]}"#),
            "done"
        );
    }
}
