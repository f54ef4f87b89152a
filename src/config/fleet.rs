//! Fleet configuration: base image, ship sizes, pool bounds and timeouts.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, ConnectPolicy, SizingPolicy, DEFAULT_SHUTDOWN_ATTEMPTS};

const DEFAULT_WORKER_SIZE: &str = "512mb";
const DEFAULT_NAME_PREFIX: &str = "fleet-ship";
const DEFAULT_MAX_POOL_SIZE: usize = 2;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECT_RETRIES: u32 = 5;
const DEFAULT_CONNECT_BASE_DELAY_MS: u64 = 1000;

/// Pool sizing mode. The two modes are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SizingConfig {
    /// Keep the pool between hard bounds.
    Clamp {
        /// Ships kept warm without load.
        #[serde(default)]
        min_pool_size: usize,
        /// Upper bound on ships.
        #[serde(default = "default_max_pool_size")]
        max_pool_size: usize,
    },
    /// Keep a buffer of idle ships above demand.
    Spare {
        /// Idle ships kept above demand.
        min_spare_workers: usize,
        /// Upper bound on ships.
        #[serde(default = "default_max_pool_size")]
        max_pool_size: usize,
    },
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self::Clamp {
            min_pool_size: 0,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
        }
    }
}

impl SizingConfig {
    /// Upper bound on ships in either mode.
    #[must_use]
    pub const fn max_pool_size(&self) -> usize {
        match self {
            Self::Clamp { max_pool_size, .. } | Self::Spare { max_pool_size, .. } => *max_pool_size,
        }
    }

    /// The policy the scheduler applies.
    #[must_use]
    pub const fn policy(&self) -> SizingPolicy {
        match *self {
            Self::Clamp {
                min_pool_size,
                max_pool_size,
            } => SizingPolicy::clamp(min_pool_size, max_pool_size),
            Self::Spare {
                min_spare_workers,
                max_pool_size,
            } => SizingPolicy::spare(min_spare_workers, max_pool_size),
        }
    }
}

/// Everything needed to bring up a fleet, minus the collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Name of the base image ships boot from; built on first use.
    pub base_image: String,
    /// Provider size of ships.
    #[serde(default = "default_worker_size")]
    pub worker_size: String,
    /// Provider size of the snapshot builder; defaults to `worker_size`.
    #[serde(default)]
    pub builder_size: Option<String>,
    /// Restrict base candidates to one vendor distribution.
    #[serde(default)]
    pub distribution: Option<String>,
    /// Prefix of ship instance names.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Pool sizing mode and bounds.
    #[serde(default)]
    pub sizing: SizingConfig,
    /// Budget for each polled provider operation, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Issue-and-poll attempts for shutting an instance down.
    #[serde(default = "default_shutdown_attempts")]
    pub shutdown_attempts: u32,
    /// Shell connection retries after the first failure.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    /// Delay before the first connection retry, in milliseconds; doubled per retry.
    #[serde(default = "default_connect_base_delay_ms")]
    pub connect_base_delay_ms: u64,
}

fn default_worker_size() -> String {
    DEFAULT_WORKER_SIZE.to_string()
}

fn default_name_prefix() -> String {
    DEFAULT_NAME_PREFIX.to_string()
}

const fn default_max_pool_size() -> usize {
    DEFAULT_MAX_POOL_SIZE
}

const fn default_poll_timeout_secs() -> u64 {
    DEFAULT_POLL_TIMEOUT_SECS
}

const fn default_shutdown_attempts() -> u32 {
    DEFAULT_SHUTDOWN_ATTEMPTS
}

const fn default_connect_retries() -> u32 {
    DEFAULT_CONNECT_RETRIES
}

const fn default_connect_base_delay_ms() -> u64 {
    DEFAULT_CONNECT_BASE_DELAY_MS
}

impl FleetConfig {
    /// Configuration with defaults for everything but the base image name.
    pub fn new(base_image: impl Into<String>) -> Self {
        Self {
            base_image: base_image.into(),
            worker_size: default_worker_size(),
            builder_size: None,
            distribution: None,
            name_prefix: default_name_prefix(),
            sizing: SizingConfig::default(),
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            shutdown_attempts: DEFAULT_SHUTDOWN_ATTEMPTS,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            connect_base_delay_ms: DEFAULT_CONNECT_BASE_DELAY_MS,
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_image.trim().is_empty() {
            return Err("base_image must not be empty".into());
        }
        if self.worker_size.trim().is_empty() {
            return Err("worker_size must not be empty".into());
        }
        if self.builder_size.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err("builder_size must not be empty when set".into());
        }
        if self.name_prefix.trim().is_empty() {
            return Err("name_prefix must not be empty".into());
        }
        if self.sizing.max_pool_size() == 0 {
            return Err("max_pool_size must be greater than 0".into());
        }
        if let SizingConfig::Clamp {
            min_pool_size,
            max_pool_size,
        } = self.sizing
        {
            if min_pool_size > max_pool_size {
                return Err(format!(
                    "min_pool_size ({min_pool_size}) must not exceed max_pool_size ({max_pool_size})"
                ));
            }
        }
        if self.poll_timeout_secs == 0 {
            return Err("poll_timeout_secs must be greater than 0".into());
        }
        if self.shutdown_attempts == 0 {
            return Err("shutdown_attempts must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read configuration from `FLEET_*` environment variables, loading a
    /// `.env` file first if one exists.
    ///
    /// - `FLEET_BASE_IMAGE` (required)
    /// - `FLEET_WORKER_SIZE`, `FLEET_BUILDER_SIZE`, `FLEET_DISTRIBUTION`, `FLEET_NAME_PREFIX`
    /// - `FLEET_MIN_POOL_SIZE` or `FLEET_MIN_SPARE_WORKERS`, and `FLEET_MAX_POOL_SIZE`
    /// - `FLEET_POLL_TIMEOUT_SECS`, `FLEET_SHUTDOWN_ATTEMPTS`
    /// - `FLEET_CONNECT_RETRIES`, `FLEET_CONNECT_BASE_DELAY_MS`
    ///
    /// # Errors
    ///
    /// A missing base image, an unparsable number, both sizing modes at once,
    /// or a value rejected by [`FleetConfig::validate`].
    pub fn from_env() -> AppResult<Self> {
        // A missing .env file is fine; the process environment still applies.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`FleetConfig::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`FleetConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_image = lookup("FLEET_BASE_IMAGE")
            .ok_or_else(|| anyhow!("FLEET_BASE_IMAGE environment variable not set"))?;
        let mut cfg = Self::new(base_image);

        if let Some(size) = lookup("FLEET_WORKER_SIZE") {
            cfg.worker_size = size;
        }
        cfg.builder_size = lookup("FLEET_BUILDER_SIZE");
        cfg.distribution = lookup("FLEET_DISTRIBUTION");
        if let Some(prefix) = lookup("FLEET_NAME_PREFIX") {
            cfg.name_prefix = prefix;
        }

        let min_pool_size: Option<usize> = parse_var(&lookup, "FLEET_MIN_POOL_SIZE")?;
        let min_spare_workers: Option<usize> = parse_var(&lookup, "FLEET_MIN_SPARE_WORKERS")?;
        let max_pool_size =
            parse_var(&lookup, "FLEET_MAX_POOL_SIZE")?.unwrap_or(DEFAULT_MAX_POOL_SIZE);
        cfg.sizing = match (min_pool_size, min_spare_workers) {
            (Some(_), Some(_)) => {
                bail!("FLEET_MIN_POOL_SIZE and FLEET_MIN_SPARE_WORKERS are mutually exclusive")
            }
            (_, Some(min_spare_workers)) => SizingConfig::Spare {
                min_spare_workers,
                max_pool_size,
            },
            (min_pool_size, None) => SizingConfig::Clamp {
                min_pool_size: min_pool_size.unwrap_or(0),
                max_pool_size,
            },
        };

        if let Some(secs) = parse_var(&lookup, "FLEET_POLL_TIMEOUT_SECS")? {
            cfg.poll_timeout_secs = secs;
        }
        if let Some(attempts) = parse_var(&lookup, "FLEET_SHUTDOWN_ATTEMPTS")? {
            cfg.shutdown_attempts = attempts;
        }
        if let Some(retries) = parse_var(&lookup, "FLEET_CONNECT_RETRIES")? {
            cfg.connect_retries = retries;
        }
        if let Some(ms) = parse_var(&lookup, "FLEET_CONNECT_BASE_DELAY_MS")? {
            cfg.connect_base_delay_ms = ms;
        }

        cfg.validate().map_err(|e| anyhow!("invalid fleet configuration: {e}"))?;
        Ok(cfg)
    }

    /// Size used for the snapshot builder instance.
    #[must_use]
    pub fn builder_size(&self) -> &str {
        self.builder_size.as_deref().unwrap_or(&self.worker_size)
    }

    /// Budget for each polled provider operation.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Shell connection retry schedule.
    #[must_use]
    pub const fn connect_policy(&self) -> ConnectPolicy {
        ConnectPolicy {
            retries: self.connect_retries,
            base_delay: Duration::from_millis(self.connect_base_delay_ms),
        }
    }

    /// Sizing policy applied by the scheduler.
    #[must_use]
    pub const fn sizing_policy(&self) -> SizingPolicy {
        self.sizing.policy()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> AppResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{key} has invalid value `{raw}`"))
        })
        .transpose()
}
