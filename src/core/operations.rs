//! Completed instance operations built from provisioner calls plus polling.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::poller::RateLimitedPoller;
use crate::core::provider::{
    Image, ImageFilter, InstanceHandle, InstanceSpec, InstanceStatus, Provisioner,
};
use crate::core::{FleetError, FleetResult};

/// Issue-and-poll attempts made by [`InstanceOps::shutdown`] before giving up.
pub const DEFAULT_SHUTDOWN_ATTEMPTS: u32 = 4;

/// Instance operations that resolve once the provider reports completion.
#[derive(Clone)]
pub struct InstanceOps {
    provisioner: Arc<dyn Provisioner>,
    poller: RateLimitedPoller,
    shutdown_attempts: u32,
}

impl InstanceOps {
    /// Wrap a provisioner, polling with the provisioner's own rate-limit state.
    #[must_use]
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        let poller = RateLimitedPoller::new(provisioner.rate_limit());
        Self {
            provisioner,
            poller,
            shutdown_attempts: DEFAULT_SHUTDOWN_ATTEMPTS,
        }
    }

    /// Use a custom poller (e.g. a different timeout).
    #[must_use]
    pub fn with_poller(mut self, poller: RateLimitedPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Total shutdown attempts; values below one are treated as one.
    #[must_use]
    pub fn with_shutdown_attempts(mut self, attempts: u32) -> Self {
        self.shutdown_attempts = attempts.max(1);
        self
    }

    /// The wrapped provisioner.
    #[must_use]
    pub fn provisioner(&self) -> &Arc<dyn Provisioner> {
        &self.provisioner
    }

    /// The poller used to await completion.
    #[must_use]
    pub const fn poller(&self) -> &RateLimitedPoller {
        &self.poller
    }

    /// Create an instance and wait until it is active.
    ///
    /// # Errors
    ///
    /// Provider failures, or `FleetError::Timeout` if it never became active.
    pub async fn create(&self, spec: &InstanceSpec) -> FleetResult<InstanceHandle> {
        let instance = self.launch(spec).await?;
        self.wait_until_active(&instance).await
    }

    /// Request an instance without waiting for it to boot.
    ///
    /// Callers that must clean up after a failed boot keep the returned handle
    /// and call [`InstanceOps::wait_until_active`] themselves.
    ///
    /// # Errors
    ///
    /// Provider failures.
    pub async fn launch(&self, spec: &InstanceSpec) -> FleetResult<InstanceHandle> {
        let instance = self.provisioner.create_instance(spec).await?;
        debug!(instance = %instance, image = %spec.image.name, "instance requested");
        Ok(instance)
    }

    /// Poll until the instance reports `Active`.
    ///
    /// # Errors
    ///
    /// Provider failures, or `FleetError::Timeout`.
    pub async fn wait_until_active(
        &self,
        instance: &InstanceHandle,
    ) -> FleetResult<InstanceHandle> {
        let active = self.wait_for_status(instance, &InstanceStatus::Active).await?;
        info!(instance = %active, "instance active");
        Ok(active)
    }

    /// Rebuild an instance in place and wait until it is active again.
    ///
    /// # Errors
    ///
    /// Provider failures, or `FleetError::Timeout`.
    pub async fn rebuild(
        &self,
        instance: &InstanceHandle,
        image: &Image,
    ) -> FleetResult<InstanceHandle> {
        self.provisioner.rebuild_instance(instance, image).await?;
        debug!(instance = %instance, image = %image.name, "rebuild requested");
        self.wait_until_active(instance).await
    }

    /// Power an instance off, retrying the whole issue-and-poll sequence.
    ///
    /// # Errors
    ///
    /// `FleetError::Shutdown` carrying the last failure once all attempts
    /// are exhausted.
    pub async fn shutdown(&self, instance: &InstanceHandle) -> FleetResult<InstanceHandle> {
        let mut attempt = 1;
        loop {
            match self.shutdown_once(instance).await {
                Ok(off) => {
                    info!(instance = %instance, attempt, "instance powered off");
                    return Ok(off);
                }
                Err(e) if attempt < self.shutdown_attempts => {
                    warn!(instance = %instance, attempt, error = %e, "shutdown failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(FleetError::Shutdown {
                        instance: instance.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    async fn shutdown_once(&self, instance: &InstanceHandle) -> FleetResult<InstanceHandle> {
        self.provisioner.shutdown_instance(instance).await?;
        self.wait_for_status(instance, &InstanceStatus::Off).await
    }

    /// Snapshot an instance under `name` and wait for the image to be listed.
    ///
    /// # Errors
    ///
    /// Provider failures, or `FleetError::Timeout` if no private image named
    /// `name` appeared.
    pub async fn snapshot(&self, instance: &InstanceHandle, name: &str) -> FleetResult<Image> {
        self.provisioner.snapshot_instance(instance, name).await?;
        debug!(instance = %instance, snapshot = name, "snapshot requested");
        let filter = ImageFilter::Private;
        let images = self
            .poller
            .poll(
                || self.provisioner.list_images(&filter),
                |images: &Vec<Image>| images.iter().any(|i| i.name == name && !i.public),
            )
            .await?;
        images
            .into_iter()
            .find(|i| i.name == name && !i.public)
            .ok_or_else(|| FleetError::Provider(format!("snapshot `{name}` vanished from listing")))
    }

    /// Destroy an instance.
    ///
    /// # Errors
    ///
    /// Provider failures.
    pub async fn destroy(&self, instance: &InstanceHandle) -> FleetResult<()> {
        self.provisioner.destroy_instance(instance).await?;
        debug!(instance = %instance, "instance destroyed");
        Ok(())
    }

    async fn wait_for_status(
        &self,
        instance: &InstanceHandle,
        status: &InstanceStatus,
    ) -> FleetResult<InstanceHandle> {
        self.poller
            .poll(
                || self.provisioner.get_instance(instance),
                |current: &InstanceHandle| &current.status == status,
            )
            .await
    }
}
