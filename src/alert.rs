//! Low-intrusion "new mail" signal: a blinking window title.

use std::time::Duration;

const BLINK_PERIOD: Duration = Duration::from_secs(1);

/// Alternates the title between the original and a new-mail banner
/// until the user focuses the window or the alert times out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleAlert {
    original: String,
    banner: String,
    duration: Duration,
    cancelled: bool,
}

impl TitleAlert {
    pub fn new(original: impl Into<String>, new_messages: usize, duration: Duration) -> Self {
        let banner = if new_messages == 1 {
            "(1) New email!".to_string()
        } else {
            format!("({new_messages}) New emails!")
        };
        Self {
            original: original.into(),
            banner,
            duration,
            cancelled: false,
        }
    }

    /// Focus regained.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_active(&self, elapsed: Duration) -> bool {
        !self.cancelled && elapsed < self.duration
    }

    /// Title to show `elapsed` after the alert started.
    pub fn title_at(&self, elapsed: Duration) -> &str {
        if !self.is_active(elapsed) {
            return &self.original;
        }
        let phase = elapsed.as_millis() / BLINK_PERIOD.as_millis();
        if phase % 2 == 0 {
            &self.banner
        } else {
            &self.original
        }
    }
}
