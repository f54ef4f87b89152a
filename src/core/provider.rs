//! Interfaces of the remote collaborators the fleet drives.
//!
//! A [`Provisioner`] manages instance lifecycle and images on a compute
//! provider; a [`RemoteShell`] opens command sessions against running
//! instances. Both are asynchronous on the remote side: the provisioner
//! acknowledges an action and the fleet observes its completion by polling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::rate_limit::RateLimitState;
use crate::core::{ExecError, FleetResult};

/// Lifecycle status reported for an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Being created or rebuilt.
    New,
    /// Running.
    Active,
    /// Powered off.
    Off,
    /// Archived by the provider.
    Archive,
    /// Any status this crate does not interpret.
    #[serde(untagged)]
    Unknown(String),
}

/// Handle to a provisioned instance, as last reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    /// Provider-assigned identifier.
    pub id: u64,
    /// Instance name.
    pub name: String,
    /// Last observed status.
    pub status: InstanceStatus,
    /// Public address, once assigned.
    pub address: Option<String>,
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Machine image known to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Provider-assigned identifier.
    pub id: u64,
    /// Display name, e.g. `7.2 x64` or a snapshot name.
    pub name: String,
    /// Version tag for vendor images; snapshots usually have none.
    pub slug: Option<String>,
    /// Distribution family, e.g. `CentOS`.
    pub distribution: Option<String>,
    /// Whether this is a public vendor image.
    pub public: bool,
}

/// Parameters for creating an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Instance name.
    pub name: String,
    /// Provider size identifier, e.g. `512mb`.
    pub size: String,
    /// Image to boot from.
    pub image: Image,
}

/// Listing filter for [`Provisioner::list_images`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageFilter {
    /// Every image.
    All,
    /// Only images owned by the account (snapshots).
    Private,
    /// Public images of one distribution.
    Distribution(String),
}

/// A command to run in a [`ShellSession`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommand {
    /// Shell script to execute.
    pub script: String,
    /// Request pseudo-terminal semantics.
    pub pty: bool,
    /// Data written to the command's standard input.
    pub stdin: Option<Vec<u8>>,
}

impl ShellCommand {
    /// A single command.
    #[must_use]
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    /// Several commands chained with `&&`, stopping at the first failure.
    #[must_use]
    pub fn chain<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let script = commands
            .into_iter()
            .map(|c| c.as_ref().to_owned())
            .collect::<Vec<_>>()
            .join(" && ");
        Self::new(script)
    }

    /// Request a pseudo-terminal.
    #[must_use]
    pub const fn with_pty(mut self) -> Self {
        self.pty = true;
        self
    }

    /// Feed `stdin` to the command.
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// Remote control plane managing instances and images.
///
/// Implementations refresh [`Provisioner::rate_limit`] from every response and
/// retry rate-limit rejections themselves; callers never observe a `429`.
#[async_trait]
pub trait Provisioner: Send + Sync + 'static {
    /// Request a new instance. Returns as soon as the provider accepted it.
    async fn create_instance(&self, spec: &InstanceSpec) -> FleetResult<InstanceHandle>;
    /// Destroy an instance.
    async fn destroy_instance(&self, instance: &InstanceHandle) -> FleetResult<()>;
    /// Rebuild an instance in place from `image`.
    async fn rebuild_instance(&self, instance: &InstanceHandle, image: &Image) -> FleetResult<()>;
    /// Request a power-off.
    async fn shutdown_instance(&self, instance: &InstanceHandle) -> FleetResult<()>;
    /// Request a snapshot named `name`. Completion is observed via listings.
    async fn snapshot_instance(&self, instance: &InstanceHandle, name: &str) -> FleetResult<()>;
    /// List images matching `filter`.
    async fn list_images(&self, filter: &ImageFilter) -> FleetResult<Vec<Image>>;
    /// Fetch the current state of an instance.
    async fn get_instance(&self, instance: &InstanceHandle) -> FleetResult<InstanceHandle>;
    /// Rate-limit budget refreshed by this provisioner's responses.
    fn rate_limit(&self) -> Arc<RateLimitState>;
}

/// An open command-execution session on one instance.
#[async_trait]
pub trait ShellSession: Send + Sync + 'static {
    /// Resolves once the session can execute commands.
    async fn ready(&self) -> Result<(), ExecError> {
        Ok(())
    }
    /// Execute a command and return its standard output.
    async fn exec(&self, command: ShellCommand) -> Result<String, ExecError>;
    /// Close the session.
    async fn close(&self) -> Result<(), ExecError>;
}

/// Factory for [`ShellSession`]s.
#[async_trait]
pub trait RemoteShell: Send + Sync + 'static {
    /// Open a session against a running instance.
    async fn connect(&self, instance: &InstanceHandle) -> Result<Arc<dyn ShellSession>, ExecError>;
}

/// Retry schedule for opening a shell session on a freshly booted instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Delay before the first retry; doubled for every following one.
    pub base_delay: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ConnectPolicy {
    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
    }
}

/// Connect and wait for the session to be ready, retrying with exponential
/// backoff. Instances often accept connections a little after the provider
/// reports them active.
///
/// # Errors
///
/// The last connection error once `policy.retries` retries are used up.
pub async fn connect_with_retry(
    shell: &dyn RemoteShell,
    instance: &InstanceHandle,
    policy: ConnectPolicy,
) -> Result<Arc<dyn ShellSession>, ExecError> {
    let mut attempt = 0;
    loop {
        let outcome = match shell.connect(instance).await {
            Ok(session) => {
                let ready = session.ready().await;
                ready.map(|()| session)
            }
            Err(e) => Err(e),
        };
        match outcome {
            Ok(session) => return Ok(session),
            Err(e) if attempt < policy.retries => {
                let delay = policy.delay(attempt);
                warn!(
                    instance = %instance,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    error = %e,
                    "connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_joins_commands() {
        let cmd = ShellCommand::chain(["yum -y update", "cd ~", "node --version"]).with_pty();
        assert_eq!(cmd.script, "yum -y update && cd ~ && node --version");
        assert!(cmd.pty);
        assert!(cmd.stdin.is_none());
    }

    #[test]
    fn test_connect_policy_doubles() {
        let policy = ConnectPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(16));
    }

    #[test]
    fn test_status_unknown_roundtrip() {
        let status: InstanceStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(status, InstanceStatus::Active);
        let status: InstanceStatus = serde_json::from_str("\"migrating\"").unwrap();
        assert_eq!(status, InstanceStatus::Unknown("migrating".into()));
    }
}
