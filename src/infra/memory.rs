//! In-memory provisioner and shell simulating an eventually consistent provider.
//!
//! Actions are acknowledged immediately and take effect after a configurable
//! number of status polls, the way a real control plane behaves. Failures can
//! be scripted and every call is counted, which makes these the test doubles
//! for the whole crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::provider::{
    Image, ImageFilter, InstanceHandle, InstanceSpec, InstanceStatus, Provisioner, RemoteShell,
    ShellCommand, ShellSession,
};
use crate::core::rate_limit::RateLimitState;
use crate::core::{ExecError, FleetError, FleetResult};

/// Number of provisioner calls made, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionerCalls {
    /// `create_instance`
    pub create: usize,
    /// `destroy_instance`
    pub destroy: usize,
    /// `rebuild_instance`
    pub rebuild: usize,
    /// `shutdown_instance`
    pub shutdown: usize,
    /// `snapshot_instance`
    pub snapshot: usize,
    /// `list_images`
    pub list_images: usize,
    /// `get_instance`
    pub get_instance: usize,
}

struct SimInstance {
    handle: InstanceHandle,
    pending: Option<(InstanceStatus, usize)>,
}

#[derive(Default)]
struct ProvisionerState {
    next_id: u64,
    settle_polls: usize,
    instances: HashMap<u64, SimInstance>,
    created: Vec<InstanceSpec>,
    images: Vec<Image>,
    pending_images: Vec<(Image, usize)>,
    create_failures: u32,
    shutdown_failures: u32,
    snapshot_failures: u32,
    calls: ProvisionerCalls,
}

impl ProvisionerState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn transition(
        &mut self,
        id: u64,
        interim: InstanceStatus,
        target: InstanceStatus,
    ) -> FleetResult<()> {
        let settle = self.settle_polls;
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| FleetError::Provider(format!("instance {id} not found")))?;
        if settle == 0 {
            instance.handle.status = target;
            instance.pending = None;
        } else {
            instance.handle.status = interim;
            instance.pending = Some((target, settle));
        }
        Ok(())
    }
}

/// Take one scripted failure if any are left.
fn take_failure(remaining: &mut u32) -> bool {
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

/// Provisioner keeping instances and images in memory.
///
/// Clones share state, so a test can keep one clone for inspection and hand
/// another to the fleet.
#[derive(Clone, Default)]
pub struct InMemoryProvisioner {
    state: Arc<Mutex<ProvisionerState>>,
    rate_limit: Arc<RateLimitState>,
}

impl InMemoryProvisioner {
    /// Empty provider whose actions settle after one status poll.
    #[must_use]
    pub fn new() -> Self {
        let provisioner = Self::default();
        provisioner.state.lock().settle_polls = 1;
        provisioner
    }

    /// Provider listing a few public vendor base images.
    #[must_use]
    pub fn with_base_images() -> Self {
        let provisioner = Self::new();
        for (name, slug) in [
            ("6.7 x64", "centos-6-7-x64"),
            ("7.2 x64", "centos-7-2-x64"),
            ("7.2 x32", "centos-7-2-x32"),
        ] {
            provisioner.add_image(Image {
                id: 0,
                name: name.into(),
                slug: Some(slug.into()),
                distribution: Some("CentOS".into()),
                public: true,
            });
        }
        provisioner
    }

    /// Number of status polls after which an action takes effect.
    #[must_use]
    pub fn with_settle_polls(self, polls: usize) -> Self {
        self.state.lock().settle_polls = polls;
        self
    }

    /// Register an image; an `id` of zero is replaced with a fresh one.
    pub fn add_image(&self, mut image: Image) -> Image {
        let mut state = self.state.lock();
        if image.id == 0 {
            image.id = state.allocate_id();
        }
        state.images.push(image.clone());
        image
    }

    /// Reject the next `count` create requests.
    pub fn fail_next_creates(&self, count: u32) {
        self.state.lock().create_failures = count;
    }

    /// Reject the next `count` shutdown requests.
    pub fn fail_next_shutdowns(&self, count: u32) {
        self.state.lock().shutdown_failures = count;
    }

    /// Reject the next `count` snapshot requests.
    pub fn fail_next_snapshots(&self, count: u32) {
        self.state.lock().snapshot_failures = count;
    }

    /// Calls made so far.
    #[must_use]
    pub fn calls(&self) -> ProvisionerCalls {
        self.state.lock().calls
    }

    /// Instances that exist and have not been destroyed.
    #[must_use]
    pub fn live_instances(&self) -> Vec<InstanceHandle> {
        let state = self.state.lock();
        let mut live: Vec<_> = state.instances.values().map(|i| i.handle.clone()).collect();
        live.sort_by_key(|h| h.id);
        live
    }

    /// Every create request accepted, in order.
    #[must_use]
    pub fn created(&self) -> Vec<InstanceSpec> {
        self.state.lock().created.clone()
    }

    /// Images currently listed.
    #[must_use]
    pub fn images(&self) -> Vec<Image> {
        self.state.lock().images.clone()
    }
}

#[async_trait]
impl Provisioner for InMemoryProvisioner {
    async fn create_instance(&self, spec: &InstanceSpec) -> FleetResult<InstanceHandle> {
        let mut state = self.state.lock();
        state.calls.create += 1;
        if take_failure(&mut state.create_failures) {
            return Err(FleetError::Provider(format!("create of {} rejected", spec.name)));
        }
        let id = state.allocate_id();
        let handle = InstanceHandle {
            id,
            name: spec.name.clone(),
            status: InstanceStatus::New,
            address: Some(format!("10.0.{}.{}", id / 256, id % 256)),
        };
        state.instances.insert(
            id,
            SimInstance {
                handle: handle.clone(),
                pending: None,
            },
        );
        state.created.push(spec.clone());
        state.transition(id, InstanceStatus::New, InstanceStatus::Active)?;
        Ok(handle)
    }

    async fn destroy_instance(&self, instance: &InstanceHandle) -> FleetResult<()> {
        let mut state = self.state.lock();
        state.calls.destroy += 1;
        state
            .instances
            .remove(&instance.id)
            .map(|_| ())
            .ok_or_else(|| FleetError::Provider(format!("instance {instance} not found")))
    }

    async fn rebuild_instance(&self, instance: &InstanceHandle, _image: &Image) -> FleetResult<()> {
        let mut state = self.state.lock();
        state.calls.rebuild += 1;
        state.transition(instance.id, InstanceStatus::New, InstanceStatus::Active)
    }

    async fn shutdown_instance(&self, instance: &InstanceHandle) -> FleetResult<()> {
        let mut state = self.state.lock();
        state.calls.shutdown += 1;
        if take_failure(&mut state.shutdown_failures) {
            return Err(FleetError::Provider(format!("shutdown of {instance} rejected")));
        }
        state.transition(instance.id, InstanceStatus::Active, InstanceStatus::Off)
    }

    async fn snapshot_instance(&self, instance: &InstanceHandle, name: &str) -> FleetResult<()> {
        let mut state = self.state.lock();
        state.calls.snapshot += 1;
        if take_failure(&mut state.snapshot_failures) {
            return Err(FleetError::Provider(format!("snapshot of {instance} rejected")));
        }
        if !state.instances.contains_key(&instance.id) {
            return Err(FleetError::Provider(format!("instance {instance} not found")));
        }
        let image = Image {
            id: state.allocate_id(),
            name: name.to_owned(),
            slug: None,
            distribution: None,
            public: false,
        };
        let settle = state.settle_polls;
        if settle == 0 {
            state.images.push(image);
        } else {
            state.pending_images.push((image, settle));
        }
        Ok(())
    }

    async fn list_images(&self, filter: &ImageFilter) -> FleetResult<Vec<Image>> {
        let mut state = self.state.lock();
        state.calls.list_images += 1;
        let mut finished = Vec::new();
        state.pending_images.retain_mut(|(image, polls)| {
            *polls = polls.saturating_sub(1);
            if *polls == 0 {
                finished.push(image.clone());
                false
            } else {
                true
            }
        });
        state.images.extend(finished);
        Ok(state
            .images
            .iter()
            .filter(|image| match filter {
                ImageFilter::All => true,
                ImageFilter::Private => !image.public,
                ImageFilter::Distribution(d) => {
                    image.public && image.distribution.as_deref() == Some(d.as_str())
                }
            })
            .cloned()
            .collect())
    }

    async fn get_instance(&self, instance: &InstanceHandle) -> FleetResult<InstanceHandle> {
        let mut state = self.state.lock();
        state.calls.get_instance += 1;
        let sim = state
            .instances
            .get_mut(&instance.id)
            .ok_or_else(|| FleetError::Provider(format!("instance {instance} not found")))?;
        if let Some((target, polls)) = sim.pending.as_mut() {
            *polls = polls.saturating_sub(1);
            if *polls == 0 {
                sim.handle.status = target.clone();
                sim.pending = None;
            }
        }
        Ok(sim.handle.clone())
    }

    fn rate_limit(&self) -> Arc<RateLimitState> {
        Arc::clone(&self.rate_limit)
    }
}

/// One command executed through an [`InMemoryShell`] session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    /// Name of the instance the command ran on.
    pub instance: String,
    /// The script that was executed.
    pub script: String,
}

#[derive(Default)]
struct ShellState {
    connect_failures: u32,
    failing_commands: Vec<String>,
    exec_log: Vec<ExecRecord>,
    exec_delay: Duration,
    connects: usize,
    closes: usize,
}

/// Shell whose sessions echo commands and record them.
///
/// A command succeeds with `"<instance>$ <script>\n"` unless its script
/// contains one of the registered failure patterns, in which case it exits
/// with code 1.
#[derive(Clone, Default)]
pub struct InMemoryShell {
    state: Arc<Mutex<ShellState>>,
}

impl InMemoryShell {
    /// Shell where every connection and command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every command by `delay`.
    #[must_use]
    pub fn with_exec_delay(self, delay: Duration) -> Self {
        self.state.lock().exec_delay = delay;
        self
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Make every command whose script contains `pattern` exit non-zero.
    pub fn fail_commands_containing(&self, pattern: impl Into<String>) {
        self.state.lock().failing_commands.push(pattern.into());
    }

    /// Commands executed so far, in order.
    #[must_use]
    pub fn exec_log(&self) -> Vec<ExecRecord> {
        self.state.lock().exec_log.clone()
    }

    /// Successful connections so far.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Sessions closed so far.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }
}

#[async_trait]
impl RemoteShell for InMemoryShell {
    async fn connect(&self, instance: &InstanceHandle) -> Result<Arc<dyn ShellSession>, ExecError> {
        let mut state = self.state.lock();
        if take_failure(&mut state.connect_failures) {
            return Err(ExecError::Session(format!("connection to {instance} refused")));
        }
        state.connects += 1;
        Ok(Arc::new(InMemorySession {
            instance: instance.name.clone(),
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Session handed out by [`InMemoryShell`].
pub struct InMemorySession {
    instance: String,
    state: Arc<Mutex<ShellState>>,
    closed: AtomicBool,
}

#[async_trait]
impl ShellSession for InMemorySession {
    async fn exec(&self, command: ShellCommand) -> Result<String, ExecError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecError::Closed);
        }
        let delay = self.state.lock().exec_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.exec_log.push(ExecRecord {
            instance: self.instance.clone(),
            script: command.script.clone(),
        });
        if state
            .failing_commands
            .iter()
            .any(|pattern| command.script.contains(pattern.as_str()))
        {
            return Err(ExecError::Exit {
                code: 1,
                stdout: String::new(),
                stderr: format!("{}: command failed", command.script),
            });
        }
        Ok(format!("{}$ {}\n", self.instance, command.script))
    }

    async fn close(&self) -> Result<(), ExecError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ExecError::Closed);
        }
        self.state.lock().closes += 1;
        Ok(())
    }
}
