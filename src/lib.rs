//! # Prometheus Fleet
//!
//! An elastic pool of ephemeral remote compute workers ("ships") for CI and
//! batch jobs that need isolated, disposable machines.
//!
//! Provisioning a machine from scratch is slow, so the fleet keeps a bounded,
//! load-driven pool of pre-warmed ships built from a shared base image. Jobs
//! are queued, bound to an idle ship, and the ship is rebuilt in place or
//! discarded once the job settles.
//!
//! ## Components
//!
//! - **`RateLimitedPoller`**: waits for slow, eventually consistent provider
//!   operations, stretching its cadence as the shared rate-limit budget
//!   shrinks and more polls compete for it
//! - **`SnapshotBootstrapper`**: builds each named base image at most once
//! - **`Ship`**: one instance plus its shell session, as an explicit state machine
//! - **`FleetScheduler`**: the pool, the job queue and the resize/dispatch pass
//!
//! The compute provider and the remote shell are collaborators behind the
//! [`core::Provisioner`] and [`core::RemoteShell`] traits. [`infra::memory`]
//! simulates both; [`infra::http`] is the rate-limited REST transport real
//! provider backends are built on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_fleet::builders::FleetBuilder;
//! use prometheus_fleet::config::FleetConfig;
//! use prometheus_fleet::core::{prepare_fn, ShellCommand};
//! use prometheus_fleet::infra::{InMemoryProvisioner, InMemoryShell};
//!
//! let fleet = FleetBuilder::new(
//!     FleetConfig::new("node-v6"),
//!     Arc::new(InMemoryProvisioner::with_base_images()),
//!     Arc::new(InMemoryShell::new()),
//! )
//! .prepare(prepare_fn(|shell| async move {
//!     shell
//!         .exec(ShellCommand::chain(["yum -y update", "yum -y install nodejs"]).with_pty())
//!         .await?;
//!     Ok(())
//! }))
//! .launch()
//! .await?;
//!
//! let output = fleet
//!     .submit(|shell| async move { Ok(shell.exec(ShellCommand::new("node --version")).await?) })
//!     .await?;
//! fleet.shutdown().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Fleet scheduling, ship lifecycle and rate-limit aware polling.
pub mod core;
/// Configuration models for fleets, pool sizing and timeouts.
pub mod config;
/// Builders to construct fleets from configuration.
pub mod builders;
/// Provider and shell adapters.
pub mod infra;
/// Shared utilities.
pub mod util;
