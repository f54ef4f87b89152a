//! Idempotent construction of the named base image ships boot from.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::core::job::PrepareFn;
use crate::core::operations::InstanceOps;
use crate::core::provider::{
    connect_with_retry, ConnectPolicy, Image, ImageFilter, InstanceHandle, InstanceSpec,
    RemoteShell,
};
use crate::core::{FleetError, FleetResult};

/// Vendor base images are named like `7.2 x64`.
static BASE_IMAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+ x64$").unwrap_or_else(|e| panic!("invalid base image pattern: {e}"))
});

type BuildOutcome = Result<Image, Arc<FleetError>>;

/// Builds each named base image at most once per bootstrapper.
///
/// The outcome of a build, success or failure, is remembered: concurrent
/// callers for one name share the same in-flight build and every later call
/// observes its result.
pub struct SnapshotBootstrapper {
    ops: InstanceOps,
    shell: Arc<dyn RemoteShell>,
    builder_size: String,
    distribution: Option<String>,
    connect: ConnectPolicy,
    builds: Mutex<HashMap<String, Arc<OnceCell<BuildOutcome>>>>,
}

impl SnapshotBootstrapper {
    /// Create a bootstrapper building on instances of `builder_size`.
    pub fn new(
        ops: InstanceOps,
        shell: Arc<dyn RemoteShell>,
        builder_size: impl Into<String>,
    ) -> Self {
        Self {
            ops,
            shell,
            builder_size: builder_size.into(),
            distribution: None,
            connect: ConnectPolicy::default(),
            builds: Mutex::new(HashMap::new()),
        }
    }

    /// Only consider public base images of this distribution.
    #[must_use]
    pub fn with_distribution(mut self, distribution: impl Into<String>) -> Self {
        self.distribution = Some(distribution.into());
        self
    }

    /// Shell connection retry schedule for the scratch instance.
    #[must_use]
    pub const fn with_connect_policy(mut self, connect: ConnectPolicy) -> Self {
        self.connect = connect;
        self
    }

    /// Return the private image `name`, building it first if it does not exist.
    ///
    /// # Errors
    ///
    /// `FleetError::Bootstrap` wrapping the listing, preparation, shutdown or
    /// snapshot failure. A failed build is not retried by later calls.
    pub async fn ensure(&self, name: &str, prepare: PrepareFn) -> FleetResult<Image> {
        let cell = {
            let mut builds = self.builds.lock();
            Arc::clone(builds.entry(name.to_owned()).or_default())
        };
        let outcome = cell
            .get_or_init(|| async { self.build(name, &prepare).await.map_err(Arc::new) })
            .await;
        outcome.clone().map_err(|source| FleetError::Bootstrap {
            name: name.to_owned(),
            source,
        })
    }

    async fn build(&self, name: &str, prepare: &PrepareFn) -> FleetResult<Image> {
        let images = self.ops.provisioner().list_images(&ImageFilter::All).await?;
        let candidates = images
            .into_iter()
            .filter(|image| self.is_candidate(image, name))
            .collect();
        let base = select_base_image(candidates, name)
            .ok_or_else(|| FleetError::NoBaseImage(name.to_owned()))?;

        if base.name == name {
            info!(image = name, "reusing existing image");
            return Ok(base);
        }

        info!(image = name, base = %base.name, "building base image");
        let spec = InstanceSpec {
            name: format!("fleet-snapshot-builder-{name}"),
            size: self.builder_size.clone(),
            image: base,
        };
        let scratch = self.ops.launch(&spec).await?;
        let outcome = self.prepare_and_snapshot(&scratch, name, prepare).await;
        if let Err(e) = self.ops.destroy(&scratch).await {
            error!(instance = %scratch, error = %e, "failed to destroy snapshot builder");
        }
        let image = outcome?;
        info!(image = %image.name, id = image.id, "base image built");
        Ok(image)
    }

    async fn prepare_and_snapshot(
        &self,
        scratch: &InstanceHandle,
        name: &str,
        prepare: &PrepareFn,
    ) -> FleetResult<Image> {
        let scratch = self.ops.wait_until_active(scratch).await?;
        let session = connect_with_retry(self.shell.as_ref(), &scratch, self.connect).await?;
        let prepared = prepare(Arc::clone(&session)).await;
        let closed = session.close().await;
        prepared.map_err(FleetError::Job)?;
        closed?;
        self.ops.shutdown(&scratch).await?;
        self.ops.snapshot(&scratch, name).await
    }

    fn is_candidate(&self, image: &Image, name: &str) -> bool {
        if image.public {
            BASE_IMAGE_NAME.is_match(&image.name)
                && self
                    .distribution
                    .as_deref()
                    .is_none_or(|d| image.distribution.as_deref() == Some(d))
        } else {
            image.name == name
        }
    }
}

/// Pick the image to build from.
///
/// An image already named `name` wins outright; otherwise the candidate with
/// the greatest slug wins. Slugs compare as strings, so `10.0` sorts below
/// `9.0`.
#[must_use]
pub fn select_base_image(candidates: Vec<Image>, name: &str) -> Option<Image> {
    let mut iter = candidates.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, |current, next| {
        if current.name == name {
            current
        } else if next.name == name || next.slug > current.slug {
            next
        } else {
            current
        }
    }))
}
