//! Ship: one leased instance plus its shell session, as an explicit state machine.
//!
//! ```text
//! Provisioning ──▶ Ready ──run──▶ Busy ──reset──▶ Provisioning ──▶ Ready
//!      │             │              │
//!      ▼             └────dispose───┴──────────────▶ Disposed
//!   Failed ─────────────dispose────────────────────▶ Disposed
//! ```
//!
//! Guards run synchronously under a `parking_lot::Mutex`, so an illegal call
//! (running a dirty or disposed ship) fails before anything else happens.
//! Remote work (create, rebuild, connect, teardown) is executed in order by a
//! per-ship driver task; readiness is published on a `watch` channel.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::operations::InstanceOps;
use crate::core::provider::{
    connect_with_retry, ConnectPolicy, Image, InstanceHandle, InstanceSpec, RemoteShell,
    ShellSession,
};
use crate::core::{AppResult, FleetError, FleetResult};

/// Identity of a ship, stable across resets.
pub type ShipId = Uuid;

/// Lifecycle state of a ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShipState {
    /// Instance or session is being established (initially or after a reset).
    Provisioning,
    /// Connected and idle.
    Ready,
    /// Executing a job.
    Busy,
    /// Provisioning failed; the ship can only be disposed.
    Failed,
    /// Torn down (or being torn down); every operation fails.
    Disposed,
}

/// What every ship of a fleet is built from.
#[derive(Debug, Clone)]
pub struct ShipBlueprint {
    /// Prefix of instance names.
    pub name_prefix: String,
    /// Provider size identifier.
    pub size: String,
    /// Base image ships boot from and are rebuilt from.
    pub image: Image,
    /// Shell connection retry schedule.
    pub connect: ConnectPolicy,
}

struct Connection {
    instance: InstanceHandle,
    session: Arc<dyn ShellSession>,
}

#[derive(Clone)]
enum Readiness {
    Pending,
    Connected(Arc<Connection>),
    Failed(Arc<FleetError>),
}

#[derive(Debug)]
struct Status {
    state: ShipState,
    dirty: bool,
}

enum Lifecycle {
    Provision,
    Rebuild,
    Teardown,
}

struct Shared {
    id: ShipId,
    name: String,
    status: Mutex<Status>,
    instance: Mutex<Option<InstanceHandle>>,
    readiness: watch::Sender<Readiness>,
}

/// Awaitable completion of a ship's asynchronous teardown.
#[derive(Debug)]
pub struct Teardown {
    handle: Option<JoinHandle<()>>,
}

impl Teardown {
    /// Whether teardown has already finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the instance to be released. Failures were already logged.
    pub async fn wait(self) {
        if let Some(handle) = self.handle {
            if let Err(e) = handle.await {
                error!(error = %e, "ship teardown task panicked");
            }
        }
    }
}

/// Handle to one ship. Clones refer to the same ship.
#[derive(Clone)]
pub struct Ship {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Lifecycle>,
    driver: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl fmt::Debug for Ship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ship")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl Ship {
    /// Start provisioning a ship in the background and return immediately.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn launch(
        blueprint: Arc<ShipBlueprint>,
        ops: InstanceOps,
        shell: Arc<dyn RemoteShell>,
    ) -> Self {
        let id = Uuid::new_v4();
        let short = id.simple().to_string();
        let name = format!("{}-{}", blueprint.name_prefix, &short[..8]);
        let (readiness, _) = watch::channel(Readiness::Pending);
        let shared = Arc::new(Shared {
            id,
            name,
            status: Mutex::new(Status {
                state: ShipState::Provisioning,
                dirty: false,
            }),
            instance: Mutex::new(None),
            readiness,
        });

        let (commands, rx) = mpsc::unbounded_channel();
        let _ = commands.send(Lifecycle::Provision);
        let driver = Driver {
            shared: Arc::clone(&shared),
            blueprint,
            ops,
            shell,
            connection: None,
        };
        let handle = tokio::spawn(driver.run(rx));
        debug!(ship_id = %shared.id, name = %shared.name, "ship launched");

        Self {
            shared,
            commands,
            driver: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Ship identity.
    #[must_use]
    pub fn id(&self) -> ShipId {
        self.shared.id
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ShipState {
        self.shared.status.lock().state
    }

    /// Whether a job was started since the last reset.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.shared.status.lock().dirty
    }

    /// Whether the ship has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state() == ShipState::Disposed
    }

    /// Last known instance handle, once the provider accepted the create.
    #[must_use]
    pub fn instance(&self) -> Option<InstanceHandle> {
        self.shared.instance.lock().clone()
    }

    /// Wait until the ship is connected.
    ///
    /// # Errors
    ///
    /// `FleetError::ShipFailed` if provisioning failed or the ship was disposed
    /// before it became ready.
    pub async fn ready(&self) -> FleetResult<()> {
        self.connection().await.map(|_| ())
    }

    /// Run `work` against this ship's shell session.
    ///
    /// Fails immediately, without side effects, if the ship is disposed or
    /// dirty. Otherwise marks it dirty, waits for it to become ready and
    /// executes the work. The ship does not repair itself after a failure;
    /// its owner decides whether to reset or dispose it.
    ///
    /// # Errors
    ///
    /// - `FleetError::Disposed` / `FleetError::Dirty` on an illegal call
    /// - `FleetError::ShipFailed` if the ship never became ready
    /// - `FleetError::Job` with the work's own error
    pub async fn run<T, F, Fut>(&self, work: F) -> FleetResult<T>
    where
        F: FnOnce(Arc<dyn ShellSession>) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.claim()?;
        let connection = self.connection().await?;
        self.mark_busy()?;
        debug!(ship_id = %self.shared.id, instance = %connection.instance, "running job");
        work(Arc::clone(&connection.session))
            .await
            .map_err(FleetError::Job)
    }

    /// Rebuild the instance in place from the base image and reconnect.
    ///
    /// Returns as soon as the rebuild is scheduled; the ship is clean again
    /// immediately and the next `run` waits for the fresh session.
    ///
    /// # Errors
    ///
    /// `FleetError::Disposed` if the ship was disposed.
    pub fn reset(&self) -> FleetResult<()> {
        {
            let mut status = self.shared.status.lock();
            if status.state == ShipState::Disposed {
                return Err(self.disposed_error("reset"));
            }
            status.state = ShipState::Provisioning;
            status.dirty = false;
            self.shared.readiness.send_replace(Readiness::Pending);
        }
        debug!(ship_id = %self.shared.id, "ship reset scheduled");
        let _ = self.commands.send(Lifecycle::Rebuild);
        Ok(())
    }

    /// Mark the ship disposed and tear it down in the background.
    ///
    /// Teardown closes the session and destroys the instance; failures are
    /// logged, never returned.
    ///
    /// # Errors
    ///
    /// `FleetError::Disposed` if the ship was already disposed.
    pub fn dispose(&self) -> FleetResult<Teardown> {
        {
            let mut status = self.shared.status.lock();
            if status.state == ShipState::Disposed {
                return Err(self.disposed_error("dispose"));
            }
            status.state = ShipState::Disposed;
        }
        debug!(ship_id = %self.shared.id, "ship disposed");
        let _ = self.commands.send(Lifecycle::Teardown);
        Ok(Teardown {
            handle: self.driver.lock().take(),
        })
    }

    fn claim(&self) -> FleetResult<()> {
        let mut status = self.shared.status.lock();
        if status.state == ShipState::Disposed {
            return Err(self.disposed_error("run"));
        }
        if status.dirty {
            return Err(FleetError::Dirty(self.shared.id.to_string()));
        }
        status.dirty = true;
        Ok(())
    }

    fn mark_busy(&self) -> FleetResult<()> {
        let mut status = self.shared.status.lock();
        if status.state == ShipState::Disposed {
            return Err(self.disposed_error("run"));
        }
        status.state = ShipState::Busy;
        Ok(())
    }

    async fn connection(&self) -> FleetResult<Arc<Connection>> {
        let mut rx = self.shared.readiness.subscribe();
        let readiness = match rx.wait_for(|r| !matches!(r, Readiness::Pending)).await {
            Ok(r) => r.clone(),
            Err(_) => Readiness::Failed(Arc::new(self.disposed_error("run"))),
        };
        let source = match readiness {
            Readiness::Connected(connection) => return Ok(connection),
            Readiness::Failed(source) => source,
            Readiness::Pending => Arc::new(self.disposed_error("run")),
        };
        Err(FleetError::ShipFailed {
            ship: self.shared.id.to_string(),
            source,
        })
    }

    fn disposed_error(&self, op: &'static str) -> FleetError {
        FleetError::Disposed {
            op,
            ship: self.shared.id.to_string(),
        }
    }
}

/// Executes a ship's remote lifecycle steps strictly in order.
struct Driver {
    shared: Arc<Shared>,
    blueprint: Arc<ShipBlueprint>,
    ops: InstanceOps,
    shell: Arc<dyn RemoteShell>,
    connection: Option<Arc<Connection>>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Lifecycle>) {
        while let Some(command) = commands.recv().await {
            match command {
                Lifecycle::Provision => {
                    let outcome = self.provision().await;
                    self.publish(outcome);
                }
                Lifecycle::Rebuild => {
                    let outcome = self.rebuild().await;
                    self.publish(outcome);
                }
                Lifecycle::Teardown => {
                    self.teardown().await;
                    return;
                }
            }
        }
        warn!(ship_id = %self.shared.id, "ship dropped without dispose, tearing down");
        self.shared.status.lock().state = ShipState::Disposed;
        self.teardown().await;
    }

    async fn provision(&mut self) -> FleetResult<Arc<Connection>> {
        let spec = InstanceSpec {
            name: self.shared.name.clone(),
            size: self.blueprint.size.clone(),
            image: self.blueprint.image.clone(),
        };
        let instance = self.ops.launch(&spec).await?;
        *self.shared.instance.lock() = Some(instance.clone());
        let instance = self.ops.wait_until_active(&instance).await?;
        *self.shared.instance.lock() = Some(instance.clone());
        self.connect(instance).await
    }

    async fn rebuild(&mut self) -> FleetResult<Arc<Connection>> {
        self.close_session().await;
        let known = self.shared.instance.lock().clone();
        let Some(instance) = known else {
            // The previous create never got through; start over.
            return self.provision().await;
        };
        let instance = self.ops.rebuild(&instance, &self.blueprint.image).await?;
        *self.shared.instance.lock() = Some(instance.clone());
        self.connect(instance).await
    }

    async fn connect(&mut self, instance: InstanceHandle) -> FleetResult<Arc<Connection>> {
        let session =
            connect_with_retry(self.shell.as_ref(), &instance, self.blueprint.connect).await?;
        let connection = Arc::new(Connection { instance, session });
        self.connection = Some(Arc::clone(&connection));
        Ok(connection)
    }

    fn publish(&self, outcome: FleetResult<Arc<Connection>>) {
        let mut status = self.shared.status.lock();
        let readiness = match outcome {
            Ok(connection) => {
                if status.state == ShipState::Provisioning {
                    status.state = ShipState::Ready;
                }
                info!(ship_id = %self.shared.id, instance = %connection.instance, "ship ready");
                Readiness::Connected(connection)
            }
            Err(e) => {
                if status.state == ShipState::Provisioning {
                    status.state = ShipState::Failed;
                }
                warn!(ship_id = %self.shared.id, error = %e, "ship failed to become ready");
                Readiness::Failed(Arc::new(e))
            }
        };
        self.shared.readiness.send_replace(readiness);
    }

    async fn close_session(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.session.close().await {
                error!(
                    ship_id = %self.shared.id,
                    instance = %connection.instance,
                    error = %e,
                    "failed to disconnect from instance"
                );
            }
        }
    }

    async fn teardown(&mut self) {
        self.shared
            .readiness
            .send_replace(Readiness::Failed(Arc::new(FleetError::Disposed {
                op: "run",
                ship: self.shared.id.to_string(),
            })));
        self.close_session().await;
        let instance = self.shared.instance.lock().clone();
        if let Some(instance) = instance {
            match self.ops.destroy(&instance).await {
                Ok(()) => info!(ship_id = %self.shared.id, instance = %instance, "ship destroyed"),
                Err(e) => error!(
                    ship_id = %self.shared.id,
                    instance = %instance,
                    error = %e,
                    "failed to destroy instance"
                ),
            }
        }
    }
}
