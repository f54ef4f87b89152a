//! Desired pool size policies.

use std::fmt;
use std::sync::Arc;

/// A pool bound that is either fixed or re-evaluated on every resize pass.
#[derive(Clone)]
pub enum PoolBound {
    /// Constant value.
    Fixed(usize),
    /// Evaluated each time the scheduler resizes.
    Dynamic(Arc<dyn Fn() -> usize + Send + Sync>),
}

impl PoolBound {
    /// Wrap a closure evaluated on every resize pass.
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    /// Current value of the bound.
    #[must_use]
    pub fn get(&self) -> usize {
        match self {
            Self::Fixed(v) => *v,
            Self::Dynamic(f) => f(),
        }
    }
}

impl From<usize> for PoolBound {
    fn from(value: usize) -> Self {
        Self::Fixed(value)
    }
}

impl fmt::Debug for PoolBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(v) => f.debug_tuple("Fixed").field(v).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// How the scheduler derives its desired size from load.
///
/// The two modes are mutually exclusive ways of configuring the same pass:
/// `Clamp` pins the pool between hard bounds, `Spare` keeps a buffer of idle
/// workers above current demand. Demand is queued jobs plus jobs in progress.
#[derive(Debug, Clone)]
pub enum SizingPolicy {
    /// `clamp(demand, min_pool_size, max_pool_size)`.
    Clamp {
        /// Lower bound, kept warm even without load.
        min_pool_size: PoolBound,
        /// Upper bound.
        max_pool_size: PoolBound,
    },
    /// `min(demand + min_spare_workers, max_pool_size)`.
    Spare {
        /// Idle buffer kept above demand.
        min_spare_workers: PoolBound,
        /// Upper bound.
        max_pool_size: PoolBound,
    },
}

impl SizingPolicy {
    /// Clamp mode with fixed bounds.
    #[must_use]
    pub const fn clamp(min_pool_size: usize, max_pool_size: usize) -> Self {
        Self::Clamp {
            min_pool_size: PoolBound::Fixed(min_pool_size),
            max_pool_size: PoolBound::Fixed(max_pool_size),
        }
    }

    /// Spare mode with fixed bounds.
    #[must_use]
    pub const fn spare(min_spare_workers: usize, max_pool_size: usize) -> Self {
        Self::Spare {
            min_spare_workers: PoolBound::Fixed(min_spare_workers),
            max_pool_size: PoolBound::Fixed(max_pool_size),
        }
    }

    /// Policy that evicts everything; used to drain a fleet.
    #[must_use]
    pub const fn drained() -> Self {
        Self::clamp(0, 0)
    }

    /// Desired number of provisioned-or-provisioning workers.
    ///
    /// Never exceeds the upper bound; in `Clamp` mode never falls below the
    /// lower bound either (a lower bound above the upper one is capped).
    #[must_use]
    pub fn desired_size(&self, queued: usize, in_progress: usize) -> usize {
        let demand = queued.saturating_add(in_progress);
        match self {
            Self::Clamp {
                min_pool_size,
                max_pool_size,
            } => {
                let max = max_pool_size.get();
                let min = min_pool_size.get().min(max);
                demand.clamp(min, max)
            }
            Self::Spare {
                min_spare_workers,
                max_pool_size,
            } => demand
                .saturating_add(min_spare_workers.get())
                .min(max_pool_size.get()),
        }
    }
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self::clamp(0, 2)
    }
}
