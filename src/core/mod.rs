//! Fleet scheduling, ship lifecycle and rate-limit aware polling.

pub mod error;
pub mod job;
pub mod operations;
pub mod poller;
pub mod provider;
pub mod rate_limit;
pub mod scheduler;
pub mod ship;
pub mod sizing;
pub mod snapshot;

pub use error::{AppResult, ExecError, FleetError, FleetResult};
pub use job::{noop_prepare, prepare_fn, JobHandle, PrepareFn};
pub use operations::{InstanceOps, DEFAULT_SHUTDOWN_ATTEMPTS};
pub use poller::{RateLimitedPoller, DEFAULT_POLL_TIMEOUT};
pub use provider::{
    connect_with_retry, ConnectPolicy, Image, ImageFilter, InstanceHandle, InstanceSpec,
    InstanceStatus, Provisioner, RemoteShell, ShellCommand, ShellSession,
};
pub use rate_limit::{PollGuard, RateLimitSnapshot, RateLimitState, MAX_BACKOFF, MIN_RESET_WAIT};
pub use scheduler::{FleetScheduler, FleetStats, LaunchOptions};
pub use ship::{Ship, ShipBlueprint, ShipId, ShipState, Teardown};
pub use sizing::{PoolBound, SizingPolicy};
pub use snapshot::{select_base_image, SnapshotBootstrapper};
