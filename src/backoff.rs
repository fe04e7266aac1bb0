use std::time::Duration;

use crate::constants::{MAX_RETRIES, RETRY_BASE_MILLIS};

/// Exponential retry delays for failed polls.
///
/// The n-th consecutive failure (1-based) waits `2^n` seconds, up to
/// `max_retries`. The failure after that clears the counter and schedules
/// nothing; polling resumes on its normal period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    retry_count: u32,
    max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(MAX_RETRIES)
    }
}

impl Backoff {
    pub fn new(max_retries: u32) -> Self {
        Self {
            retry_count: 0,
            max_retries,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Record a failure; returns the delay before the retry, if any.
    pub fn on_failure(&mut self) -> Option<Duration> {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            let factor = 1u64.checked_shl(self.retry_count).unwrap_or(u64::MAX);
            Some(Duration::from_millis(factor.saturating_mul(RETRY_BASE_MILLIS)))
        } else {
            self.retry_count = 0;
            None
        }
    }

    pub fn on_success(&mut self) {
        self.retry_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_give_up() {
        let mut backoff = Backoff::default();
        let delays: Vec<Option<u64>> = (0..6)
            .map(|_| backoff.on_failure().map(|d| d.as_secs()))
            .collect();
        assert_eq!(
            delays,
            vec![Some(2), Some(4), Some(8), Some(16), Some(32), None]
        );
        assert_eq!(backoff.retry_count(), 0);
    }

    #[test]
    fn success_resets_counter() {
        let mut backoff = Backoff::default();
        backoff.on_failure();
        backoff.on_failure();
        backoff.on_success();
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn cycle_restarts_after_giving_up() {
        let mut backoff = Backoff::new(2);
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.on_failure(), None);
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(2)));
    }
}
