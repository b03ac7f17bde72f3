use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::executor::CancelToken;

pub const MIN_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(15);
pub const MAX_BACKOFF_CEILING: Duration = Duration::from_secs(180);
const BACKOFF_FACTOR: u32 = 2;
// Never spin faster than this, even right before a deadline.
const MIN_SLEEP: Duration = Duration::from_millis(5);

/// Exponential backoff without jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, next: min }
    }

    /// Backoff starting at 100ms whose cap is clamped into 15s..=180s.
    pub fn with_cap(max: Duration) -> Self {
        Self::new(MIN_BACKOFF, max.clamp(DEFAULT_MAX_BACKOFF, MAX_BACKOFF_CEILING))
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn next_delay(&mut self) -> Duration {
        let cur = self.next;
        self.next = cur.saturating_mul(BACKOFF_FACTOR).min(self.max);
        cur
    }

    pub fn reset(&mut self) {
        self.next = self.min;
    }
}

/// What one attempt of a polled operation decided.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry(Error),
    Abort(Error),
}

/// Calls `attempt` until it finishes or aborts, sleeping between tries.
/// Sleeps are cut short by `cancel` and never run past its deadline.
pub fn poll_with_backoff<T, F>(
    cancel: &CancelToken,
    mut backoff: Backoff,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Attempt<T>,
{
    let mut n: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("Context done while polling"));
        }
        n = n.saturating_add(1);
        let last_err = match attempt(n) {
            Attempt::Done(v) => return Ok(v),
            Attempt::Abort(e) => return Err(e),
            Attempt::Retry(e) => e,
        };

        let mut delay = backoff.next_delay();
        if let Some(left) = cancel.remaining() {
            delay = delay.min(left).max(MIN_SLEEP);
        }
        debug!(attempt = n, delay_ms = delay.as_millis() as u64, "retrying: {last_err}");
        if cancel.sleep(delay) {
            return Err(Error::cancelled(format!(
                "Context done while polling: {last_err}"
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let got: Vec<u128> = (0..5).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(got, vec![100, 200, 400, 500, 500]);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn cap_is_clamped() {
        assert_eq!(Backoff::with_cap(Duration::from_secs(1)).max(), Duration::from_secs(15));
        assert_eq!(Backoff::with_cap(Duration::from_secs(600)).max(), Duration::from_secs(180));
        assert_eq!(Backoff::with_cap(Duration::from_secs(60)).max(), Duration::from_secs(60));
    }

    #[test]
    fn retries_then_succeeds() {
        let got = poll_with_backoff(&CancelToken::new(), Backoff::default(), |n| {
            if n < 3 {
                Attempt::Retry(Error::msg("not yet"))
            } else {
                Attempt::Done(n)
            }
        })
        .unwrap();
        assert_eq!(got, 3);
    }

    #[test]
    fn abort_stops_immediately() {
        let mut calls = 0;
        let err = poll_with_backoff::<(), _>(&CancelToken::new(), Backoff::default(), |_| {
            calls += 1;
            Attempt::Abort(Error::config("bad"))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn deadline_ends_polling() {
        let token = CancelToken::with_timeout(Duration::from_millis(50));
        let err = poll_with_backoff::<(), _>(&token, Backoff::default(), |_| {
            Attempt::Retry(Error::msg("unable to get repository parameters"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert!(err.to_string().starts_with("Context done while polling"));
    }
}
