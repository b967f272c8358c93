//! Process-wide configuration, read once at startup and shared read-only.

use std::env;
use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use relay_contracts::parsing::{ResponsePatterns, DEFAULT_RESULT_HOST};
use url::Url;

pub const DEFAULT_UPSTREAM_ENDPOINT: &str = "https://yunwu.ai/v1/chat/completions";
pub const DEFAULT_UPSTREAM_MODEL: &str = "gpt-4o-image-vip";
pub const JOB_ID_PLACEHOLDER: &str = "{job_id}";

#[derive(Clone)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub poll_url_template: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout: Duration,
    pub poll_timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl UpstreamConfig {
    pub fn poll_url(&self, job_id: &str) -> String {
        self.poll_url_template.replace(JOB_ID_PLACEHOLDER, job_id)
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("endpoint", &self.endpoint)
            .field("poll_url_template", &self.poll_url_template)
            .field("api_key", &mask_secret(&self.api_key))
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .field("poll_timeout", &self.poll_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .finish()
    }
}

#[derive(Clone)]
pub struct WebhookConfig {
    pub default_url: Option<String>,
    pub secret: Option<String>,
    pub timeout: Duration,
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("default_url", &self.default_url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Rewrites storage-bucket object URLs into the host the provider can fetch from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRewrite {
    pub storage_host: String,
    pub path_prefix: String,
    pub display_base: String,
}

#[derive(Clone)]
pub struct RelayConfig {
    pub upstream: UpstreamConfig,
    pub webhook: WebhookConfig,
    pub storage_rewrite: Option<StorageRewrite>,
    pub result_host: Option<String>,
    pub failure_keywords: Option<Vec<String>>,
    pub moderation_keywords: Option<Vec<String>>,
    pub intake_secret: Option<String>,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("upstream", &self.upstream)
            .field("webhook", &self.webhook)
            .field("storage_rewrite", &self.storage_rewrite)
            .field("result_host", &self.result_host)
            .field("failure_keywords", &self.failure_keywords)
            .field("moderation_keywords", &self.moderation_keywords)
            .field(
                "intake_secret",
                &self.intake_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let first = |keys: &[&str]| keys.iter().find_map(|key| get(key));

        let Some(api_key) = first(&["RELAY_UPSTREAM_API_KEY", "YUNWU_API_KEY"]) else {
            bail!("RELAY_UPSTREAM_API_KEY (or YUNWU_API_KEY) not set");
        };
        let endpoint = get("RELAY_UPSTREAM_ENDPOINT")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_UPSTREAM_ENDPOINT.to_string());
        let endpoint_url = Url::parse(&endpoint)
            .with_context(|| format!("RELAY_UPSTREAM_ENDPOINT is not a valid URL ({endpoint})"))?;
        let poll_url_template = match get("RELAY_UPSTREAM_POLL_URL") {
            Some(template) => template,
            None => format!(
                "{}/v1/tasks/{JOB_ID_PLACEHOLDER}",
                endpoint_url.origin().ascii_serialization()
            ),
        };
        if !poll_url_template.contains(JOB_ID_PLACEHOLDER) {
            bail!("RELAY_UPSTREAM_POLL_URL must contain {JOB_ID_PLACEHOLDER}");
        }

        let max_poll_attempts = parse_number(&get, "RELAY_POLL_MAX_ATTEMPTS", 60)?;
        if max_poll_attempts == 0 {
            bail!("RELAY_POLL_MAX_ATTEMPTS must be at least 1");
        }

        let upstream = UpstreamConfig {
            endpoint,
            poll_url_template,
            api_key,
            model: get("RELAY_UPSTREAM_MODEL").unwrap_or_else(|| DEFAULT_UPSTREAM_MODEL.to_string()),
            request_timeout: parse_secs(&get, "RELAY_UPSTREAM_TIMEOUT_SECS", 300)?,
            poll_timeout: parse_secs(&get, "RELAY_POLL_TIMEOUT_SECS", 30)?,
            poll_interval: parse_secs(&get, "RELAY_POLL_INTERVAL_SECS", 5)?,
            max_poll_attempts: max_poll_attempts as u32,
        };

        let webhook = WebhookConfig {
            default_url: first(&["RELAY_WEBHOOK_URL", "VERCEL_WEBHOOK_URL"]),
            secret: first(&["RELAY_WEBHOOK_SECRET", "WORKER_SECRET"]),
            timeout: parse_secs(&get, "RELAY_WEBHOOK_TIMEOUT_SECS", 30)?,
        };

        let storage_rewrite = match (
            get("RELAY_STORAGE_HOST"),
            get("RELAY_STORAGE_PATH_PREFIX"),
            get("RELAY_DISPLAY_BASE_URL"),
        ) {
            (Some(storage_host), Some(path_prefix), Some(display_base)) => Some(StorageRewrite {
                storage_host: storage_host.to_ascii_lowercase(),
                path_prefix,
                display_base: display_base.trim_end_matches('/').to_string(),
            }),
            (None, None, None) => None,
            _ => bail!(
                "RELAY_STORAGE_HOST, RELAY_STORAGE_PATH_PREFIX and RELAY_DISPLAY_BASE_URL must be set together"
            ),
        };

        let result_host = match get("RELAY_RESULT_HOST") {
            Some(host) if host.eq_ignore_ascii_case("none") => None,
            Some(host) => Some(host),
            None => Some(DEFAULT_RESULT_HOST.to_string()),
        };

        Ok(Self {
            upstream,
            webhook,
            storage_rewrite,
            result_host,
            failure_keywords: get("RELAY_FAILURE_KEYWORDS").map(|raw| split_list(&raw)),
            moderation_keywords: get("RELAY_MODERATION_KEYWORDS").map(|raw| split_list(&raw)),
            intake_secret: get("RELAY_INTAKE_SECRET"),
        })
    }

    pub fn response_patterns(&self) -> Result<ResponsePatterns> {
        let mut patterns = ResponsePatterns::new(self.result_host.as_deref())
            .context("failed to compile response patterns")?;
        if let Some(keywords) = &self.failure_keywords {
            patterns = patterns.with_failure_keywords(keywords.iter().map(String::as_str));
        }
        if let Some(keywords) = &self.moderation_keywords {
            patterns = patterns.with_moderation_keywords(keywords.iter().map(String::as_str));
        }
        Ok(patterns)
    }
}

/// Shows only the last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "[REDACTED]".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("sk-.......{tail}")
}

fn parse_number(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match get(key) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a non-negative integer (got '{raw}')")),
        None => Ok(default),
    }
}

fn parse_secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    parse_number(get, key, default).map(Duration::from_secs)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}
