//! Builder turning a [`FleetConfig`] and its collaborators into a running fleet.

use std::sync::Arc;

use crate::config::FleetConfig;
use crate::core::{
    noop_prepare, FleetError, FleetResult, FleetScheduler, InstanceOps, LaunchOptions,
    PrepareFn, Provisioner, RateLimitedPoller, RemoteShell, SizingPolicy, SnapshotBootstrapper,
};

/// Assemble a [`FleetScheduler`] from configuration.
///
/// ```rust,ignore
/// let fleet = FleetBuilder::new(FleetConfig::from_env()?, provisioner, shell)
///     .prepare(prepare_fn(|shell| async move {
///         shell.exec(ShellCommand::new("yum -y update").with_pty()).await?;
///         Ok(())
///     }))
///     .launch()
///     .await?;
/// ```
pub struct FleetBuilder {
    config: FleetConfig,
    provisioner: Arc<dyn Provisioner>,
    shell: Arc<dyn RemoteShell>,
    prepare: PrepareFn,
    sizing: Option<SizingPolicy>,
}

impl FleetBuilder {
    /// Start from `config`; the base image is prepared by a no-op until
    /// [`FleetBuilder::prepare`] is called.
    pub fn new(
        config: FleetConfig,
        provisioner: Arc<dyn Provisioner>,
        shell: Arc<dyn RemoteShell>,
    ) -> Self {
        Self {
            config,
            provisioner,
            shell,
            prepare: noop_prepare(),
            sizing: None,
        }
    }

    /// Routine run on the scratch instance before the base image is snapshotted.
    #[must_use]
    pub fn prepare(mut self, prepare: PrepareFn) -> Self {
        self.prepare = prepare;
        self
    }

    /// Override the configured sizing, e.g. with dynamic bounds.
    #[must_use]
    pub fn sizing(mut self, sizing: SizingPolicy) -> Self {
        self.sizing = Some(sizing);
        self
    }

    /// The configuration being built from.
    pub const fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Instance operations honoring the configured poll timeout and shutdown attempts.
    #[must_use]
    pub fn instance_ops(&self) -> InstanceOps {
        let poller = RateLimitedPoller::new(self.provisioner.rate_limit())
            .with_timeout(self.config.poll_timeout());
        InstanceOps::new(Arc::clone(&self.provisioner))
            .with_poller(poller)
            .with_shutdown_attempts(self.config.shutdown_attempts)
    }

    /// Bootstrapper for the configured base image.
    #[must_use]
    pub fn bootstrapper(&self) -> SnapshotBootstrapper {
        let bootstrapper = SnapshotBootstrapper::new(
            self.instance_ops(),
            Arc::clone(&self.shell),
            self.config.builder_size(),
        )
        .with_connect_policy(self.config.connect_policy());
        match &self.config.distribution {
            Some(distribution) => bootstrapper.with_distribution(distribution.clone()),
            None => bootstrapper,
        }
    }

    /// Validate the configuration, ensure the base image and start the fleet.
    ///
    /// # Errors
    ///
    /// - `FleetError::InvalidConfig` if validation fails
    /// - `FleetError::Bootstrap` if the base image could not be built
    pub async fn launch(self) -> FleetResult<FleetScheduler> {
        self.config.validate().map_err(FleetError::InvalidConfig)?;
        let ops = self.instance_ops();
        let bootstrapper = self.bootstrapper();
        let options = LaunchOptions {
            base_image: self.config.base_image.clone(),
            prepare: self.prepare,
            name_prefix: self.config.name_prefix.clone(),
            worker_size: self.config.worker_size.clone(),
            connect: self.config.connect_policy(),
            sizing: self.sizing.unwrap_or_else(|| self.config.sizing_policy()),
        };
        FleetScheduler::launch(ops, self.shell, &bootstrapper, options).await
    }
}
