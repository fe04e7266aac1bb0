//! Public data models exchanged with the temp mail server.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;

/// Client and polling configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server root, e.g. `https://tempmail.example`.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Optional proxy for all requests.
    pub proxy_url: Option<String>,
    /// Foreground poll period.
    pub poll_interval: Duration,
    /// Poll period while hidden and outside the critical window.
    pub background_interval: Duration,
    /// Remaining time under which polling continues while hidden.
    pub critical_window: Duration,
    /// Background polls only run with more than this much time left.
    pub background_min_remaining: Duration,
    /// Consecutive failures retried with backoff before giving up.
    pub max_retries: u32,
    /// How long the new-mail title alert keeps blinking.
    pub alert_duration: Duration,
    /// Where downloads are written.
    pub download_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: default_timeout(),
            proxy_url: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            background_interval: Duration::from_secs(BACKGROUND_POLL_INTERVAL_SECS),
            critical_window: Duration::from_secs(CRITICAL_WINDOW_SECS),
            background_min_remaining: Duration::from_secs(BACKGROUND_MIN_REMAINING_SECS),
            max_retries: MAX_RETRIES,
            alert_duration: Duration::from_secs(ALERT_DURATION_SECS),
            download_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Poll period clamped to the supported 4–10s range.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.clamp(
            Duration::from_secs(MIN_POLL_INTERVAL_SECS),
            Duration::from_secs(MAX_POLL_INTERVAL_SECS),
        )
    }
}

/// Mailbox binding returned by `GET`/`POST /api/email/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSession {
    /// Full address, `user@domain`.
    pub email: String,
    /// Seconds until the server expires this session.
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub session_start: Option<String>,
    #[serde(default)]
    pub is_new_session: bool,
    /// Informational text ("Email changed successfully", ...).
    #[serde(default)]
    pub message: Option<String>,
}

impl EmailSession {
    /// Domain part of the address, if it has one.
    pub fn domain(&self) -> Option<&str> {
        self.email.split_once('@').map(|(_, domain)| domain)
    }
}

/// Previously used address from `/api/email/history/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub address: String,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub in_cooldown: bool,
    #[serde(default)]
    pub can_reuse: bool,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub cooldown_until: Option<String>,
}

impl HistoryEntry {
    /// Whether switching back to this address can succeed.
    pub fn is_reusable(&self) -> bool {
        (self.available || self.can_reuse) && !self.in_cooldown
    }
}

/// Summary row from `/api/messages/`, in server order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: u64,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub text_preview: String,
    #[serde(default)]
    pub received_at: Option<String>,
}

/// Attachment metadata; the blob is scoped to its message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default, rename = "contentType", alias = "content_type")]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
}

/// Full message from `/api/messages/{id}/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDetail {
    pub id: u64,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub to_addresses: Vec<serde_json::Value>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub received_at: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Downloaded blob with the server's suggested name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

/// Response of the admin `/clear-domain-cache/` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheClearResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_accepts_camel_case_content_type() {
        let att: Attachment = serde_json::from_str(
            r#"{"id":"a1","filename":"report.pdf","contentType":"application/pdf","size":2048}"#,
        )
        .unwrap();
        assert_eq!(att.content_type, "application/pdf");
        assert_eq!(att.size, 2048);
    }

    #[test]
    fn history_reusable_subset() {
        let mut entry = HistoryEntry {
            address: "a@b.c".into(),
            available: false,
            in_cooldown: false,
            can_reuse: true,
            expires_at: None,
            cooldown_until: None,
        };
        assert!(entry.is_reusable());
        entry.in_cooldown = true;
        assert!(!entry.is_reusable());
    }

    #[test]
    fn poll_interval_is_clamped() {
        let cfg = Config {
            poll_interval: Duration::from_secs(1),
            ..Config::default()
        };
        assert_eq!(cfg.effective_poll_interval(), Duration::from_secs(4));
    }

    #[test]
    fn session_domain() {
        let session = EmailSession {
            email: "joe@mail.example".into(),
            expires_in: 60,
            session_start: None,
            is_new_session: false,
            message: None,
        };
        assert_eq!(session.domain(), Some("mail.example"));
    }
}
