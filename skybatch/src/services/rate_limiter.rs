//! Request pacing
//!
//! Enforces a minimum spacing between dispatches to the transformation
//! service. One limiter belongs to one run and is only touched by the
//! orchestrator task, so it needs no lock.

use skybatch_common::RateTier;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Polling increment for pacing waits
pub const PACING_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Rate limiter enforcing `min_interval` between dispatches
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_dispatch: Option<Instant>,
    poll_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: None,
            poll_interval: PACING_POLL_INTERVAL,
        }
    }

    pub fn for_tier(tier: RateTier) -> Self {
        Self::new(tier.min_interval())
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Time still to wait before the next dispatch may go out
    ///
    /// Zero before the first dispatch.
    pub fn remaining_wait(&self) -> Duration {
        match self.last_dispatch {
            Some(last) => self.min_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Wait for the next dispatch slot
    ///
    /// Returns `false` if cancellation cut the wait short; in that case no
    /// dispatch time is recorded.
    pub async fn await_slot(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        let wait = self.remaining_wait();
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limiting: waiting");
            if !sleep_with_cancel(wait, cancel, self.poll_interval).await {
                return false;
            }
        }

        self.last_dispatch = Some(Instant::now());
        true
    }
}

/// Sleep for `total`, re-checking `cancel` every `poll_interval`
///
/// Returns `true` if the full duration elapsed, `false` if cancelled.
pub async fn sleep_with_cancel(
    total: Duration,
    cancel: &CancellationToken,
    poll_interval: Duration,
) -> bool {
    let deadline = Instant::now() + total;

    loop {
        if cancel.is_cancelled() {
            return false;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(remaining.min(poll_interval)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_slot_is_immediate() {
        let mut limiter = RateLimiter::for_tier(RateTier::Free);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        assert_eq!(limiter.remaining_wait(), Duration::ZERO);
        assert!(limiter.await_slot(&cancel).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_slot_waits_min_interval() {
        let mut limiter = RateLimiter::for_tier(RateTier::Tier1);
        let cancel = CancellationToken::new();

        assert!(limiter.await_slot(&cancel).await);
        let first = Instant::now();
        assert!(limiter.await_slot(&cancel).await);

        assert!(first.elapsed() >= Duration::from_secs(2));
        assert!(first.elapsed() < Duration::from_millis(2200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_time_counts_toward_interval() {
        let mut limiter = RateLimiter::for_tier(RateTier::Free);
        let cancel = CancellationToken::new();

        assert!(limiter.await_slot(&cancel).await);
        tokio::time::sleep(Duration::from_secs(4)).await;
        let before = Instant::now();
        assert!(limiter.await_slot(&cancel).await);

        let waited = before.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_millis(2200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let mut limiter = RateLimiter::for_tier(RateTier::Free);
        let cancel = CancellationToken::new();
        assert!(limiter.await_slot(&cancel).await);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        assert!(!limiter.await_slot(&cancel).await);
        assert!(start.elapsed() <= Duration::from_secs(1) + PACING_POLL_INTERVAL);
        // Interrupted wait does not count as a dispatch
        assert!(limiter.remaining_wait() > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_with_cancel_completes() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        assert!(sleep_with_cancel(Duration::from_secs(30), &cancel, Duration::from_millis(500)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_sleep_with_cancel_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep_with_cancel(Duration::from_secs(30), &cancel, Duration::from_millis(500)).await);
    }
}
