use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use relay_contracts::task::ImageRef;
use url::Url;

use crate::config::StorageRewrite;
use crate::error::TaskError;

const DEFAULT_INLINE_MIME: &str = "image/png";

/// Resolves a task's image reference into the URL placed in the `image_url` part.
pub fn image_wire_url(image: &ImageRef, rewrite: Option<&StorageRewrite>) -> Result<String, TaskError> {
    match image {
        ImageRef::Url(url) => Ok(match rewrite {
            Some(rule) => rewrite_storage_url(url, rule),
            None => url.clone(),
        }),
        ImageRef::Inline { mime, data } => {
            let compact: String = data.chars().filter(|ch| !ch.is_whitespace()).collect();
            if compact.is_empty() {
                return Err(TaskError::Internal("inline image payload is empty".to_string()));
            }
            BASE64
                .decode(compact.as_bytes())
                .map_err(|err| TaskError::Internal(format!("inline image is not valid base64: {err}")))?;
            let mime = mime.as_deref().unwrap_or(DEFAULT_INLINE_MIME);
            Ok(format!("data:{mime};base64,{compact}"))
        }
    }
}

/// Maps `https://<storage_host><path_prefix><object>` onto `<display_base>/<object>`.
///
/// Anything that does not parse, or does not have the expected shape, is
/// returned untouched.
pub fn rewrite_storage_url(raw: &str, rule: &StorageRewrite) -> String {
    let Ok(parsed) = Url::parse(raw.trim()) else {
        return raw.to_string();
    };
    let Some(host) = parsed.host_str() else {
        return raw.to_string();
    };
    if !host.eq_ignore_ascii_case(&rule.storage_host) {
        return raw.to_string();
    }
    let prefix = format!("/{}/", rule.path_prefix.trim_matches('/'));
    let Some(object) = parsed.path().strip_prefix(prefix.as_str()) else {
        return raw.to_string();
    };
    if object.is_empty() {
        return raw.to_string();
    }
    match parsed.query() {
        Some(query) => format!("{}/{}?{}", rule.display_base, object, query),
        None => format!("{}/{}", rule.display_base, object),
    }
}
