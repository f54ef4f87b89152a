//! Error types for fleet operations.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by fleet components.
#[derive(Debug, Error)]
pub enum FleetError {
    /// A polled remote operation did not reach its target state in time.
    #[error("operation timed out after {} seconds", .after.as_secs())]
    Timeout {
        /// The polling budget that was exhausted.
        after: Duration,
    },
    /// Shutting an instance down kept failing.
    #[error("failed to shut down instance {instance} after {attempts} attempts: {source}")]
    Shutdown {
        /// Instance identifier.
        instance: String,
        /// Number of issue-and-poll attempts made.
        attempts: u32,
        /// The last failure observed.
        #[source]
        source: Box<FleetError>,
    },
    /// Building the named base image failed.
    #[error("failed to build base image `{name}`: {source}")]
    Bootstrap {
        /// Requested image name.
        name: String,
        /// Shared cause, identical for every caller of the same build.
        #[source]
        source: Arc<FleetError>,
    },
    /// Neither a matching private image nor a base candidate was listed.
    #[error("no base image candidate available for `{0}`")]
    NoBaseImage(String),
    /// Operation attempted on a disposed ship.
    #[error("cannot call {op} on disposed ship {ship}")]
    Disposed {
        /// Operation name.
        op: &'static str,
        /// Ship identifier.
        ship: String,
    },
    /// `run` attempted on a ship that already ran a job since its last reset.
    #[error("cannot call run on dirty ship {0}")]
    Dirty(String),
    /// The ship never became ready (creation, rebuild or connect failed).
    #[error("ship {ship} failed to become ready: {source}")]
    ShipFailed {
        /// Ship identifier.
        ship: String,
        /// Shared cause.
        #[source]
        source: Arc<FleetError>,
    },
    /// A job or preparation routine failed.
    #[error("job failed: {0:#}")]
    Job(anyhow::Error),
    /// A remote command failed.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// The provisioner reported a failure.
    #[error("provider error: {0}")]
    Provider(String),
    /// Transport-level failure talking to the provider.
    #[error("transport error: {0}")]
    Transport(String),
    /// The scheduler has been shut down.
    #[error("fleet has been shut down")]
    ShutDown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single remote command.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// The command ran and exited non-zero.
    #[error("command exited with code {code}:\n\n{stdout}\n\n{stderr}")]
    Exit {
        /// Exit status.
        code: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The session could not run the command at all.
    #[error("session error: {0}")]
    Session(String),
    /// The session was already closed.
    #[error("cannot interact with a closed connection")]
    Closed,
}

/// Application-facing result using anyhow for caller-supplied closures.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Result alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;
