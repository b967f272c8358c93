//! Classification of the free-text content returned by the upstream provider.
//!
//! The upstream reply has no schema. A reply is read, in fixed priority order, as
//! a finished result (one or more image URLs), a pending job handle, an explicit
//! failure, or nothing recognizable.

use regex::Regex;

pub const DEFAULT_RESULT_HOST: &str = "filesystem.site";

pub const DEFAULT_FAILURE_KEYWORDS: &[&str] = &[
    "生成失败",
    "失败",
    "错误",
    "failed",
    "failure",
    "error",
];

pub const DEFAULT_MODERATION_KEYWORDS: &[&str] = &[
    "违规",
    "内容审核",
    "敏感内容",
    "content policy",
    "moderation",
    "safety system",
];

/// A whole `https://` token; the extension is checked on its path afterwards.
const URL_TOKEN_PATTERN: &str = r#"(?i)https://[^\s<>"'()\[\]{}，。；：！？、（）【】「」]+"#;
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp"];
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];
const JOB_ID_PATTERN: &str = r"(?:^|[^A-Za-z0-9_])(task_[A-Za-z0-9]+)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Moderation,
    Generation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Image URLs in first-occurrence order; never empty.
    Completed(Vec<String>),
    Pending(String),
    Failed(FailureKind),
    Unparseable,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Pending(_) => "pending",
            Self::Failed(FailureKind::Moderation) => "moderation",
            Self::Failed(FailureKind::Generation) => "generation_failed",
            Self::Unparseable => "unparseable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponsePatterns {
    url_token: Regex,
    markdown_image: Option<Regex>,
    job_id: Regex,
    failure_keywords: Vec<String>,
    moderation_keywords: Vec<String>,
}

impl ResponsePatterns {
    /// Builds the default pattern set. Markdown image links are only trusted
    /// when `result_host` is given.
    pub fn new(result_host: Option<&str>) -> Result<Self, regex::Error> {
        let markdown_image = result_host
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(|host| {
                Regex::new(&format!(
                    r"(?i)!\[[^\]]*\]\((https://{}(?:[/:?#][^\s)]*)?)\)",
                    regex::escape(host)
                ))
            })
            .transpose()?;
        Ok(Self {
            url_token: Regex::new(URL_TOKEN_PATTERN)?,
            markdown_image,
            job_id: Regex::new(JOB_ID_PATTERN)?,
            failure_keywords: normalize_keywords(DEFAULT_FAILURE_KEYWORDS.iter().copied()),
            moderation_keywords: normalize_keywords(DEFAULT_MODERATION_KEYWORDS.iter().copied()),
        })
    }

    pub fn with_failure_keywords<'a>(mut self, keywords: impl IntoIterator<Item = &'a str>) -> Self {
        self.failure_keywords = normalize_keywords(keywords);
        self
    }

    pub fn with_moderation_keywords<'a>(
        mut self,
        keywords: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.moderation_keywords = normalize_keywords(keywords);
        self
    }

    pub fn classify(&self, text: &str) -> Classification {
        let urls = self.extract_image_urls(text);
        if !urls.is_empty() {
            return Classification::Completed(urls);
        }
        if let Some(job_id) = self.extract_job_id(text) {
            return Classification::Pending(job_id);
        }
        if let Some(kind) = self.detect_failure(text) {
            return Classification::Failed(kind);
        }
        Classification::Unparseable
    }

    /// Both extraction strategies run; matches are merged by position and a
    /// span claimed by one strategy is not counted again by the other.
    pub fn extract_image_urls(&self, text: &str) -> Vec<String> {
        let mut spans: Vec<(usize, usize)> = self
            .url_token
            .find_iter(text)
            .filter_map(|found| {
                image_url_span(found.as_str()).map(|len| (found.start(), found.start() + len))
            })
            .collect();
        if let Some(markdown) = &self.markdown_image {
            spans.extend(
                markdown
                    .captures_iter(text)
                    .filter_map(|caps| caps.get(1))
                    .map(|found| (found.start(), found.end())),
            );
        }
        spans.sort_by_key(|(start, end)| (*start, std::cmp::Reverse(*end)));

        let mut urls = Vec::new();
        let mut claimed_until = 0usize;
        for (start, end) in spans {
            if start < claimed_until {
                continue;
            }
            urls.push(text[start..end].to_string());
            claimed_until = end;
        }
        urls
    }

    pub fn extract_job_id(&self, text: &str) -> Option<String> {
        self.job_id
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|found| found.as_str().to_string())
    }

    /// Moderation keywords win over generic failure keywords.
    pub fn detect_failure(&self, text: &str) -> Option<FailureKind> {
        let lowered = text.to_lowercase();
        if contains_any(&lowered, &self.moderation_keywords) {
            return Some(FailureKind::Moderation);
        }
        if contains_any(&lowered, &self.failure_keywords) {
            return Some(FailureKind::Generation);
        }
        None
    }
}

fn normalize_keywords<'a>(keywords: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    keywords
        .into_iter()
        .map(|keyword| keyword.trim().to_lowercase())
        .filter(|keyword| !keyword.is_empty())
        .collect()
}

/// Length of the image URL at the head of `token`, if its path (query and
/// fragment excluded) names an image file.
fn image_url_span(token: &str) -> Option<usize> {
    let token = token.trim_end_matches(TRAILING_PUNCTUATION);
    let path_end = token.find(&['?', '#'][..]).unwrap_or(token.len());
    let path = token[..path_end].to_ascii_lowercase();
    let has_path = path["https://".len()..].contains('/');
    (has_path && IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))).then_some(token.len())
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle.as_str()))
}
