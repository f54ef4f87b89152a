//! Elastic pool of ships and the queue of jobs waiting for them.
//!
//! Every mutation (submit, settle, shutdown) runs one synchronous resize and
//! dispatch pass under a single `parking_lot::Mutex`. The lock is never held
//! across an `.await`: ship provisioning, job execution and teardown happen in
//! spawned tasks that re-enter the pass when they settle.
//!
//! Accounting: `pool_size` counts idle ships plus ships bound to a running
//! job. Ships are appended to the pool as soon as they are launched, so a job
//! dispatched to a still-provisioning ship simply waits for it.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::core::job::{JobHandle, PendingJob, PrepareFn, QueuedJob};
use crate::core::operations::InstanceOps;
use crate::core::provider::{ConnectPolicy, RemoteShell, ShellSession};
use crate::core::ship::{Ship, ShipBlueprint, ShipId, ShipState, Teardown};
use crate::core::sizing::SizingPolicy;
use crate::core::snapshot::SnapshotBootstrapper;
use crate::core::{AppResult, FleetError, FleetResult};

/// Everything [`FleetScheduler::launch`] needs besides its collaborators.
pub struct LaunchOptions {
    /// Name of the base image ships boot from.
    pub base_image: String,
    /// Prepares a scratch instance before it is snapshotted as `base_image`.
    pub prepare: PrepareFn,
    /// Prefix of ship instance names.
    pub name_prefix: String,
    /// Provider size identifier for ships.
    pub worker_size: String,
    /// Shell connection retry schedule for ships.
    pub connect: ConnectPolicy,
    /// Desired pool size policy.
    pub sizing: SizingPolicy,
}

/// Point-in-time view of the scheduler's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetStats {
    /// Idle ships plus ships running a job.
    pub pool_size: usize,
    /// Ships waiting in the pool (ready or still provisioning).
    pub idle: usize,
    /// Ships bound to a running job.
    pub in_progress: usize,
    /// Jobs waiting for a ship.
    pub queued: usize,
    /// Ships launched and not yet disposed.
    pub live_ships: usize,
    /// Ships launched since creation.
    pub created: u64,
    /// Ships disposed since creation.
    pub disposed: u64,
    /// Jobs that succeeded.
    pub completed: u64,
    /// Jobs that failed.
    pub failed: u64,
}

struct PoolState {
    pool: VecDeque<Ship>,
    queue: VecDeque<Box<dyn QueuedJob>>,
    pool_size: usize,
    sizing: SizingPolicy,
    registry: HashMap<ShipId, Ship>,
    teardowns: Vec<Teardown>,
    shut_down: bool,
    created: u64,
    disposed: u64,
    completed: u64,
    failed: u64,
}

struct SchedulerInner {
    ops: InstanceOps,
    shell: Arc<dyn RemoteShell>,
    blueprint: Arc<ShipBlueprint>,
    state: Mutex<PoolState>,
}

/// Bounded, elastic pool of ships executing submitted jobs.
///
/// Cloning is cheap; clones share the same pool.
///
/// ```rust,ignore
/// let fleet = FleetScheduler::launch(ops, shell, &bootstrapper, options).await?;
/// fleet.ready().await?;
/// let version = fleet
///     .submit(|shell| async move { Ok(shell.exec(ShellCommand::new("node --version")).await?) })
///     .await?;
/// fleet.shutdown().await;
/// ```
#[derive(Clone)]
pub struct FleetScheduler {
    inner: Arc<SchedulerInner>,
}

impl FleetScheduler {
    /// Create a scheduler for ships built from `blueprint`.
    ///
    /// Ships for the policy's minimum are launched immediately, so this must
    /// be called within a tokio runtime.
    #[must_use]
    pub fn new(
        ops: InstanceOps,
        shell: Arc<dyn RemoteShell>,
        blueprint: ShipBlueprint,
        sizing: SizingPolicy,
    ) -> Self {
        let inner = Arc::new(SchedulerInner {
            ops,
            shell,
            blueprint: Arc::new(blueprint),
            state: Mutex::new(PoolState {
                pool: VecDeque::new(),
                queue: VecDeque::new(),
                pool_size: 0,
                sizing,
                registry: HashMap::new(),
                teardowns: Vec::new(),
                shut_down: false,
                created: 0,
                disposed: 0,
                completed: 0,
                failed: 0,
            }),
        });
        {
            let mut state = inner.state.lock();
            inner.update_pool(&mut state, None);
        }
        Self { inner }
    }

    /// Ensure the base image exists, then create the scheduler.
    ///
    /// # Errors
    ///
    /// `FleetError::Bootstrap` if the base image could not be built; no ship
    /// is launched in that case.
    pub async fn launch(
        ops: InstanceOps,
        shell: Arc<dyn RemoteShell>,
        bootstrapper: &SnapshotBootstrapper,
        options: LaunchOptions,
    ) -> FleetResult<Self> {
        let LaunchOptions {
            base_image,
            prepare,
            name_prefix,
            worker_size,
            connect,
            sizing,
        } = options;
        let image = bootstrapper.ensure(&base_image, prepare).await?;
        info!(image = %image.name, id = image.id, "base image available, starting fleet");
        let blueprint = ShipBlueprint {
            name_prefix,
            size: worker_size,
            image,
            connect,
        };
        Ok(Self::new(ops, shell, blueprint, sizing))
    }

    /// Queue `work` and return a handle resolving to its result.
    ///
    /// The job is enqueued and dispatched synchronously when an idle ship is
    /// available. If the job fails, the ship it ran on is disposed.
    pub fn submit<T, F, Fut>(&self, work: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn ShellSession>) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.shut_down {
            return JobHandle::failed(FleetError::ShutDown);
        }
        let (tx, rx) = oneshot::channel();
        state.queue.push_back(Box::new(PendingJob::new(work, tx)));
        self.inner.update_pool(&mut state, None);
        JobHandle::new(rx)
    }

    /// Wait until every ship currently in the pool is connected.
    ///
    /// # Errors
    ///
    /// The first ship failure observed.
    pub async fn ready(&self) -> FleetResult<()> {
        let ships: Vec<Ship> = self.inner.state.lock().pool.iter().cloned().collect();
        try_join_all(ships.iter().map(Ship::ready)).await?;
        Ok(())
    }

    /// Current bookkeeping counters.
    #[must_use]
    pub fn stats(&self) -> FleetStats {
        let state = self.inner.state.lock();
        FleetStats {
            pool_size: state.pool_size,
            idle: state.pool.len(),
            in_progress: state.pool_size.saturating_sub(state.pool.len()),
            queued: state.queue.len(),
            live_ships: state.registry.len(),
            created: state.created,
            disposed: state.disposed,
            completed: state.completed,
            failed: state.failed,
        }
    }

    /// Replace the sizing policy and resize immediately.
    pub fn set_sizing(&self, sizing: SizingPolicy) {
        let mut state = self.inner.state.lock();
        if state.shut_down {
            return;
        }
        state.sizing = sizing;
        self.inner.update_pool(&mut state, None);
    }

    /// Drain the fleet.
    ///
    /// Queued jobs fail with `FleetError::ShutDown`, idle ships are disposed
    /// and their teardown awaited. Ships running a job are disposed when the
    /// job settles. Later submissions fail with `FleetError::ShutDown`.
    pub async fn shutdown(&self) {
        let teardowns = {
            let mut state = self.inner.state.lock();
            if !state.shut_down {
                state.shut_down = true;
                let rejected = state.queue.len();
                for job in state.queue.drain(..) {
                    job.reject(FleetError::ShutDown);
                }
                state.sizing = SizingPolicy::drained();
                self.inner.update_pool(&mut state, None);
                info!(
                    rejected,
                    in_progress = state.pool_size,
                    "fleet shutting down"
                );
            }
            std::mem::take(&mut state.teardowns)
        };
        for teardown in teardowns {
            teardown.wait().await;
        }
    }
}

impl SchedulerInner {
    /// One resize and dispatch pass. `returned` is a ship whose job just
    /// succeeded; it is not counted in `pool_size`.
    fn update_pool(self: &Arc<Self>, state: &mut PoolState, returned: Option<Ship>) {
        state.prune_failed();

        let idle = state.pool.len();
        let in_progress = state.pool_size.saturating_sub(idle);
        let desired = if state.shut_down {
            0
        } else {
            state.sizing.desired_size(state.queue.len(), in_progress)
        };

        if let Some(ship) = returned {
            if desired <= state.pool_size {
                state.retire(&ship);
            } else {
                match ship.reset() {
                    Ok(()) => {
                        state.pool.push_back(ship);
                        state.pool_size += 1;
                    }
                    Err(e) => {
                        warn!(ship_id = %ship.id(), error = %e, "returned ship cannot be reused");
                        state.registry.remove(&ship.id());
                    }
                }
            }
        }

        while state.pool_size > desired {
            let Some(ship) = state.pool.pop_back() else {
                break;
            };
            state.pool_size -= 1;
            state.retire(&ship);
        }

        while state.pool_size < desired {
            let ship = Ship::launch(
                Arc::clone(&self.blueprint),
                self.ops.clone(),
                Arc::clone(&self.shell),
            );
            state.registry.insert(ship.id(), ship.clone());
            state.pool.push_back(ship);
            state.pool_size += 1;
            state.created += 1;
        }

        while !state.queue.is_empty() && !state.pool.is_empty() {
            let (Some(job), Some(ship)) = (state.queue.pop_front(), state.pool.pop_front()) else {
                break;
            };
            debug!(ship_id = %ship.id(), "dispatching job");
            let inner = Arc::clone(self);
            job.dispatch(
                ship,
                Box::new(move |ship, succeeded| inner.on_job_settled(ship, succeeded)),
            );
        }

        state.teardowns.retain(|t| !t.is_finished());
        debug!(
            pool_size = state.pool_size,
            desired,
            idle = state.pool.len(),
            queued = state.queue.len(),
            "pool updated"
        );
    }

    fn on_job_settled(self: &Arc<Self>, ship: Ship, succeeded: bool) {
        let mut state = self.state.lock();
        state.pool_size = state.pool_size.saturating_sub(1);
        if succeeded {
            state.completed += 1;
            self.update_pool(&mut state, Some(ship));
        } else {
            state.failed += 1;
            warn!(ship_id = %ship.id(), "job failed, disposing ship");
            state.retire(&ship);
            self.update_pool(&mut state, None);
        }
    }
}

impl PoolState {
    /// Drop idle ships whose provisioning failed so they are replaced.
    fn prune_failed(&mut self) {
        let before = self.pool.len();
        let mut failed = Vec::new();
        self.pool.retain(|ship| {
            if ship.state() == ShipState::Failed {
                failed.push(ship.clone());
                false
            } else {
                true
            }
        });
        self.pool_size -= before - self.pool.len();
        for ship in &failed {
            warn!(ship_id = %ship.id(), "evicting ship that failed to provision");
            self.retire(ship);
        }
    }

    fn retire(&mut self, ship: &Ship) {
        self.registry.remove(&ship.id());
        match ship.dispose() {
            Ok(teardown) => {
                self.disposed += 1;
                self.teardowns.push(teardown);
            }
            Err(e) => error!(ship_id = %ship.id(), error = %e, "ship already disposed"),
        }
    }
}
