//! Rate-limit-aware polling of slow, eventually-consistent remote operations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::core::rate_limit::RateLimitState;
use crate::core::{FleetError, FleetResult};

/// Default budget for a single poll.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Polls a remote status until it is ready, backing off against a shared
/// rate-limit budget.
///
/// Cloning a poller shares the underlying [`RateLimitState`], so every clone
/// participates in the same `running_polls` accounting.
#[derive(Debug, Clone)]
pub struct RateLimitedPoller {
    rate_limit: Arc<RateLimitState>,
    timeout: Duration,
}

impl RateLimitedPoller {
    /// Create a poller sharing `rate_limit` with the provider transport.
    #[must_use]
    pub const fn new(rate_limit: Arc<RateLimitState>) -> Self {
        Self {
            rate_limit,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Override the default timeout used by [`RateLimitedPoller::poll`].
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Default timeout of this poller.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Shared rate-limit state.
    #[must_use]
    pub const fn rate_limit(&self) -> &Arc<RateLimitState> {
        &self.rate_limit
    }

    /// Poll with the default timeout.
    ///
    /// # Errors
    ///
    /// See [`RateLimitedPoller::poll_with_timeout`].
    pub async fn poll<S, F, Fut, R>(&self, fetch: F, is_ready: R) -> FleetResult<S>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FleetResult<S>>,
        R: Fn(&S) -> bool,
    {
        self.poll_with_timeout(fetch, is_ready, self.timeout).await
    }

    /// Fetch a status repeatedly until `is_ready` accepts it.
    ///
    /// Once the deadline passes, exactly one more attempt is made; if that one
    /// is not ready either the poll fails with [`FleetError::Timeout`].
    ///
    /// # Errors
    ///
    /// - `FleetError::Timeout` when the operation never became ready
    /// - any error returned by `fetch`, unchanged; the poller does not retry
    ///   transport failures itself
    pub async fn poll_with_timeout<S, F, Fut, R>(
        &self,
        mut fetch: F,
        is_ready: R,
        timeout: Duration,
    ) -> FleetResult<S>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FleetResult<S>>,
        R: Fn(&S) -> bool,
    {
        let _guard = self.rate_limit.enter_poll();
        let deadline = Instant::now() + timeout;
        let mut final_attempt = false;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let status = fetch().await?;
            if is_ready(&status) {
                debug!(attempt, "poll ready");
                return Ok(status);
            }
            if final_attempt {
                return Err(FleetError::Timeout { after: timeout });
            }
            if Instant::now() > deadline {
                final_attempt = true;
                continue;
            }
            let delay = self.rate_limit.backoff_delay(timeout);
            trace!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                running_polls = self.rate_limit.running_polls(),
                "poll not ready, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_poll_ready_immediately() {
        let poller = RateLimitedPoller::new(RateLimitState::shared());
        let result = poller.poll(|| async { Ok(7_u32) }, |v| *v == 7).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(poller.rate_limit().running_polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_ready() {
        let poller = RateLimitedPoller::new(RateLimitState::shared());
        let calls = AtomicU32::new(0);
        let result = poller
            .poll(
                || async { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) },
                |v| *v >= 3,
            )
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_after_final_attempt() {
        let poller = RateLimitedPoller::new(RateLimitState::shared());
        let calls = AtomicU32::new(0);
        let timeout = Duration::from_secs(5);
        let err = poller
            .poll_with_timeout(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(false)
                },
                |ready| *ready,
                timeout,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Timeout { after } if after == timeout));
        assert_eq!(err.to_string(), "operation timed out after 5 seconds");
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(poller.rate_limit().running_polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_propagates_fetch_error() {
        let poller = RateLimitedPoller::new(RateLimitState::shared());
        let err = poller
            .poll(
                || async { Err::<u32, _>(FleetError::Transport("reset by peer".into())) },
                |_| true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Transport(_)));
        assert_eq!(poller.rate_limit().running_polls(), 0);
    }
}
