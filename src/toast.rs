//! Transient user-facing messages, shown one at a time.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl ToastLevel {
    pub fn duration(self) -> Duration {
        match self {
            ToastLevel::Info | ToastLevel::Success => Duration::from_secs(3),
            ToastLevel::Warning => Duration::from_secs(4),
            ToastLevel::Error => Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

impl Toast {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: ToastLevel::Info, message: message.into() }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { level: ToastLevel::Success, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: ToastLevel::Warning, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: ToastLevel::Error, message: message.into() }
    }
}

/// FIFO of pending toasts plus the one currently on screen.
#[derive(Debug, Default)]
pub struct ToastQueue {
    pending: VecDeque<Toast>,
    visible: Option<(Toast, Instant)>,
}

impl ToastQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a toast. A repeat of the last queued (or visible) toast is dropped.
    pub fn push(&mut self, toast: Toast) {
        let last = self
            .pending
            .back()
            .or_else(|| self.visible.as_ref().map(|(t, _)| t));
        if last == Some(&toast) {
            return;
        }
        self.pending.push_back(toast);
    }

    /// Expire the visible toast and promote the next one. Returns the
    /// toast that became visible, if any.
    pub fn advance(&mut self, now: Instant) -> Option<&Toast> {
        if let Some((toast, shown_at)) = &self.visible {
            if now.duration_since(*shown_at) < toast.level.duration() {
                return None;
            }
            self.visible = None;
        }
        let next = self.pending.pop_front()?;
        self.visible = Some((next, now));
        self.visible.as_ref().map(|(t, _)| t)
    }

    /// Close the visible toast early.
    pub fn dismiss(&mut self) {
        self.visible = None;
    }

    pub fn visible(&self) -> Option<&Toast> {
        self.visible.as_ref().map(|(t, _)| t)
    }

    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.visible.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shows_one_at_a_time() {
        let mut queue = ToastQueue::new();
        let t0 = Instant::now();
        queue.push(Toast::info("first"));
        queue.push(Toast::error("second"));

        assert_eq!(queue.advance(t0).map(|t| t.message.as_str()), Some("first"));
        assert!(queue.advance(t0 + Duration::from_secs(1)).is_none());
        assert_eq!(
            queue.advance(t0 + Duration::from_secs(3)).map(|t| t.message.as_str()),
            Some("second")
        );
        assert!(queue.advance(t0 + Duration::from_secs(7)).is_none());
        assert!(queue.advance(t0 + Duration::from_secs(8)).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn collapses_repeats() {
        let mut queue = ToastQueue::new();
        queue.push(Toast::warning("offline"));
        queue.push(Toast::warning("offline"));
        assert_eq!(queue.len(), 1);
        queue.push(Toast::error("offline"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn dismiss_frees_the_slot() {
        let mut queue = ToastQueue::new();
        let now = Instant::now();
        queue.push(Toast::success("a"));
        queue.push(Toast::success("b"));
        queue.advance(now);
        queue.dismiss();
        assert_eq!(queue.advance(now).map(|t| t.message.as_str()), Some("b"));
    }
}
