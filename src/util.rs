//! Shared utility functions.

use axum::http::HeaderMap;
use chrono::Utc;
use rand::Rng;

pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Current time in epoch milliseconds. All date fields in the purchase model
/// are epoch ms.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Short random key carried through the log lines of one request.
pub fn random_log_key() -> String {
    random_string(12)
}

pub fn random_string(length: usize) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Extract the caller origin for the allow-list check: `Referer` first, then
/// `Origin`, with any trailing slash dropped.
pub fn get_referrer(headers: &HeaderMap) -> Option<String> {
    let value = headers
        .get("referer")
        .or_else(|| headers.get("origin"))
        .and_then(|v| v.to_str().ok())?;
    Some(remove_trailing_slash(value).to_string())
}

pub fn remove_trailing_slash(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}
