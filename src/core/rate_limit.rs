//! Shared rate-limit budget observed from provider responses.
//!
//! Every provider response that carries rate-limit metadata refreshes one
//! [`RateLimitState`]. All concurrently outstanding polls read the same state
//! and register themselves in `running_polls`, which lets each poll stretch its
//! cadence when many polls compete for a shrinking budget.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::util::clock::{now_epoch_secs, now_ms};

/// Floor applied to the time until the rate-limit window resets.
pub const MIN_RESET_WAIT: Duration = Duration::from_secs(1);

/// Ceiling on any single wait derived from provider rate-limit headers.
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_LIMIT: u64 = 5000;

/// Rate-limit metadata carried by one provider response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    /// Requests allowed per window.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// Epoch second at which the window resets.
    pub reset_epoch_secs: u64,
}

/// Process-wide rate-limit budget plus the number of polls sharing it.
#[derive(Debug)]
pub struct RateLimitState {
    limit: AtomicU64,
    remaining: AtomicU64,
    reset_epoch_secs: AtomicU64,
    running_polls: AtomicUsize,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new(RateLimitSnapshot {
            limit: DEFAULT_LIMIT,
            remaining: DEFAULT_LIMIT,
            reset_epoch_secs: now_epoch_secs(),
        })
    }
}

impl RateLimitState {
    /// Create state seeded with the given snapshot.
    #[must_use]
    pub const fn new(initial: RateLimitSnapshot) -> Self {
        Self {
            limit: AtomicU64::new(initial.limit),
            remaining: AtomicU64::new(initial.remaining),
            reset_epoch_secs: AtomicU64::new(initial.reset_epoch_secs),
            running_polls: AtomicUsize::new(0),
        }
    }

    /// Create shared state with the default budget.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the budget with the latest values reported by the provider.
    pub fn observe(&self, snapshot: RateLimitSnapshot) {
        self.limit.store(snapshot.limit, Ordering::Relaxed);
        self.remaining.store(snapshot.remaining, Ordering::Relaxed);
        self.reset_epoch_secs
            .store(snapshot.reset_epoch_secs, Ordering::Relaxed);
    }

    /// Current budget values.
    #[must_use]
    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            limit: self.limit.load(Ordering::Relaxed),
            remaining: self.remaining.load(Ordering::Relaxed),
            reset_epoch_secs: self.reset_epoch_secs.load(Ordering::Relaxed),
        }
    }

    /// Number of polls currently in flight.
    #[must_use]
    pub fn running_polls(&self) -> usize {
        self.running_polls.load(Ordering::Acquire)
    }

    /// Time until the window resets, never less than [`MIN_RESET_WAIT`].
    #[must_use]
    pub fn time_to_reset(&self) -> Duration {
        let reset_ms = u128::from(self.reset_epoch_secs.load(Ordering::Relaxed)) * 1000;
        let wait_ms = reset_ms.saturating_sub(now_ms());
        let wait = Duration::from_millis(u64::try_from(wait_ms).unwrap_or(u64::MAX));
        wait.max(MIN_RESET_WAIT)
    }

    /// Register an in-flight poll; the returned guard unregisters it on drop.
    #[must_use = "the poll is unregistered as soon as the guard is dropped"]
    pub fn enter_poll(self: &Arc<Self>) -> PollGuard {
        self.running_polls.fetch_add(1, Ordering::AcqRel);
        PollGuard {
            state: Arc::clone(self),
        }
    }

    /// Delay before the next attempt of a poll with the given budget.
    ///
    /// `timeout / 60 + time_to_reset / (max(remaining, 1) / running_polls)`:
    /// the base cadence grows when many polls share a small remaining budget
    /// and when the reset is far away. The result never exceeds
    /// [`MAX_BACKOFF`], whatever reset the provider reported.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn backoff_delay(&self, timeout: Duration) -> Duration {
        let base = timeout / 60;
        let remaining = self.remaining.load(Ordering::Relaxed).max(1) as f64;
        let polls = self.running_polls().max(1) as f64;
        let per_poll_budget = remaining / polls;
        let stretched =
            Duration::try_from_secs_f64(self.time_to_reset().as_secs_f64() / per_poll_budget)
                .unwrap_or(MAX_BACKOFF);
        base.saturating_add(stretched).min(MAX_BACKOFF)
    }
}

/// Scoped registration of one running poll.
#[derive(Debug)]
pub struct PollGuard {
    state: Arc<RateLimitState>,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.state.running_polls.fetch_sub(1, Ordering::AcqRel);
    }
}
