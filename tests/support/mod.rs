//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use prometheus_fleet::core::{ConnectPolicy, Image, InstanceOps, ShipBlueprint};
use prometheus_fleet::infra::{InMemoryProvisioner, InMemoryShell};

/// A simulated provider, a shell, and instance operations wired to both.
pub struct Harness {
    pub provisioner: InMemoryProvisioner,
    pub shell: InMemoryShell,
    pub ops: InstanceOps,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(InMemoryProvisioner::with_base_images(), InMemoryShell::new())
    }

    pub fn with(provisioner: InMemoryProvisioner, shell: InMemoryShell) -> Self {
        let ops = InstanceOps::new(Arc::new(provisioner.clone()));
        Self {
            provisioner,
            shell,
            ops,
        }
    }

    pub fn shell(&self) -> Arc<InMemoryShell> {
        Arc::new(self.shell.clone())
    }

    /// A private image named `name`, registered with the provider.
    pub fn add_snapshot(&self, name: &str) -> Image {
        self.provisioner.add_image(Image {
            id: 0,
            name: name.into(),
            slug: None,
            distribution: None,
            public: false,
        })
    }
}

pub fn blueprint(image: Image) -> ShipBlueprint {
    ShipBlueprint {
        name_prefix: "test-ship".into(),
        size: "512mb".into(),
        image,
        connect: ConnectPolicy {
            retries: 3,
            base_delay: Duration::from_secs(1),
        },
    }
}
