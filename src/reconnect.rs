//! Linear-capped reconnection backoff.
//!
//! Retry `n` (1-based) waits `min(n × base_delay, max_delay)`. The
//! [`ReconnectScheduler`] owns the attempt counter and at most one pending
//! retry timer; the connection decides what a retry does.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            base_delay: config.reconnect_base_delay,
            max_delay: config.reconnect_max_delay,
        }
    }

    /// Delay before retry number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::new(""))
    }
}

/// A retry that has been scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub attempt: u32,
    pub delay: Duration,
}

/// Attempt counter plus the single pending retry timer.
#[derive(Debug)]
pub struct ReconnectScheduler {
    policy: ReconnectPolicy,
    attempts: u32,
    pending: Option<AbortHandle>,
}

impl ReconnectScheduler {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            pending: None,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Retries scheduled since the last [`reset`](Self::reset).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Arm a timer that runs `fire` after the next backoff delay.
    ///
    /// Returns `None` without scheduling when a timer is already pending or
    /// the attempt ceiling has been reached. Must be called inside a tokio
    /// runtime.
    pub fn schedule<F, Fut>(&mut self, fire: F) -> Option<Retry>
    where
        F: FnOnce(Retry) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.pending.is_some() {
            debug!(attempts = self.attempts, "retry already pending");
            return None;
        }
        if self.is_exhausted() {
            warn!(
                max_attempts = self.policy.max_attempts,
                "reconnection attempts exhausted; giving up until connect() is called"
            );
            return None;
        }

        self.attempts += 1;
        let retry = Retry {
            attempt: self.attempts,
            delay: self.policy.delay_for(self.attempts),
        };
        debug!(
            attempt = retry.attempt,
            delay_ms = u64::try_from(retry.delay.as_millis()).unwrap_or(u64::MAX),
            "reconnection scheduled"
        );

        // Measured from scheduling, not from the task's first poll.
        let deadline = tokio::time::Instant::now() + retry.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire(retry).await;
        });
        self.pending = Some(task.abort_handle());
        Some(retry)
    }

    /// Mark the pending timer as fired. Call this first thing from the
    /// `fire` callback so a later [`cancel`](Self::cancel) does not abort
    /// the retry midway.
    pub fn fired(&mut self) {
        self.pending = None;
    }

    /// Retry `attempt` may still run: it is within the ceiling.
    pub fn permits(&self, attempt: u32) -> bool {
        attempt <= self.policy.max_attempts
    }

    /// Abort the pending timer, if any. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget previous attempts after a successful open.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn counting(
        fired: &Arc<AtomicU32>,
    ) -> impl FnOnce(Retry) -> std::future::Ready<()> + Send + 'static {
        let fired = Arc::clone(fired);
        move |retry| {
            fired.store(retry.attempt, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[test]
    fn delay_is_linear_then_capped() {
        let policy = ReconnectPolicy::default();
        for n in 1..=40u32 {
            let expected = Duration::from_millis(u64::from(n) * 1000).min(Duration::from_secs(30));
            assert_eq!(policy.delay_for(n), expected, "attempt {n}");
        }
    }

    #[test]
    fn delay_does_not_overflow() {
        let policy = ReconnectPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::MAX,
            max_delay: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut scheduler = ReconnectScheduler::new(ReconnectPolicy::default());

        let retry = scheduler.schedule(counting(&fired)).unwrap();
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.delay, Duration::from_millis(1000));

        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_timer_at_a_time() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut scheduler = ReconnectScheduler::new(ReconnectPolicy::default());
        assert!(scheduler.schedule(counting(&fired)).is_some());
        assert!(scheduler.schedule(counting(&fired)).is_none());
        assert_eq!(scheduler.attempts(), 1);
        assert!(scheduler.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut scheduler = ReconnectScheduler::new(ReconnectPolicy::default());
        scheduler.schedule(counting(&fired)).unwrap();
        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_ceiling_until_reset() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut scheduler = ReconnectScheduler::new(ReconnectPolicy {
            max_attempts: 3,
            ..ReconnectPolicy::default()
        });

        for expected in 1..=3 {
            let retry = scheduler.schedule(counting(&fired)).unwrap();
            assert_eq!(retry.attempt, expected);
            scheduler.fired();
        }
        assert!(scheduler.is_exhausted());
        assert!(scheduler.schedule(counting(&fired)).is_none());
        assert!(scheduler.permits(3));
        assert!(!scheduler.permits(4));

        scheduler.cancel();
        scheduler.reset();
        assert_eq!(scheduler.schedule(counting(&fired)).unwrap().attempt, 1);
    }
}
