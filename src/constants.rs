use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const EMAIL_PATH: &str = "/api/email/";
pub const EMAIL_HISTORY_PATH: &str = "/api/email/history/";
pub const MESSAGES_PATH: &str = "/api/messages/";
pub const CLEAR_DOMAIN_CACHE_PATH: &str = "/clear-domain-cache/";

pub const CSRF_COOKIE: &str = "csrftoken";
pub const CSRF_HEADER: &str = "x-csrftoken";
pub const SESSION_COOKIE: &str = "sessionid";

// Polling knobs
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const MIN_POLL_INTERVAL_SECS: u64 = 4;
pub const MAX_POLL_INTERVAL_SECS: u64 = 10;
pub const BACKGROUND_POLL_INTERVAL_SECS: u64 = 300;
pub const CRITICAL_WINDOW_SECS: u64 = 25;
pub const BACKGROUND_MIN_REMAINING_SECS: u64 = 10;
pub const MAX_RETRIES: u32 = 5;
pub const RETRY_BASE_MILLIS: u64 = 1000;
pub const ALERT_DURATION_SECS: u64 = 10;

// Frame readiness and inline images
pub const FRAME_READY_TIMEOUT_MILLIS: u64 = 5000;
pub const FRAME_READY_POLL_MILLIS: u64 = 100;

// Markers the server uses when the session's mailbox is gone
pub const SESSION_NOT_FOUND_MARKERS: &[&str] = &[
    "session not found",
    "sessão não encontrada",
    "sesión no encontrada",
];

pub const GENERIC_RESET_ERROR: &str = "Could not create a new address. Please try again.";
pub const GENERIC_RENAME_ERROR: &str = "Could not change the address. Please try again.";
pub const GENERIC_DOWNLOAD_ERROR: &str = "Download failed. Please try again.";

pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("user-agent", concat!("tempmail-client-rs/", env!("CARGO_PKG_VERSION"))),
    ("accept", "application/json"),
    ("accept-language", "en-US,en;q=0.5"),
    ("x-requested-with", "XMLHttpRequest"),
];

pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (k, v) in DEFAULT_HEADERS {
        let name = HeaderName::from_static(k);
        if let Ok(val) = HeaderValue::from_str(v) {
            headers.insert(name, val);
        }
    }
    headers
}

pub fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}
