//! Configuration for minilb components
//!
//! Values come from an optional TOML file (`minilb.toml`, or the path in
//! `MINILB_CONFIG`) layered under `MINILB__*` environment variables, e.g.
//! `MINILB__REGISTRAR__TTL_SECS=15`.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Minimum gap between the renewal interval and the lease TTL, in seconds.
pub const LEASE_SAFETY_MARGIN_SECS: u64 = 3;

/// Longest lease TTL a store will grant, one year.
pub const MAX_LEASE_TTL_SECS: u64 = 365 * 24 * 60 * 60;

const DEFAULT_CONFIG_FILE: &str = "minilb.toml";
const CONFIG_PATH_ENV: &str = "MINILB_CONFIG";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub registrar: RegistrarConfig,

    #[serde(default)]
    pub balancer: BalancerConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            registrar: RegistrarConfig::default(),
            balancer: BalancerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment.
    ///
    /// A missing file is not an error, every field has a default.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load configuration from a specific file path (plus environment).
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("MINILB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.registrar.validate()?;
        self.balancer.validate()
    }
}

/// Coordination store server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Bind address for the gRPC store API
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,

    /// Bind address for the admin HTTP API
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// How often expired leases are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Watch batches buffered per store before slow watchers lag
    #[serde(default = "default_watch_buffer")]
    pub watch_buffer: usize,
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 2379))
}
fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 2380))
}
fn default_sweep_interval() -> u64 {
    500
}
fn default_watch_buffer() -> usize {
    1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            http_addr: default_http_addr(),
            sweep_interval_ms: default_sweep_interval(),
            watch_buffer: default_watch_buffer(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "sweep interval must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Registrar timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Lease TTL in seconds
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Renewal interval in seconds, at most `ttl_secs - 3`
    #[serde(default = "default_renew_interval")]
    pub renew_interval_secs: u64,

    /// Upper bound on the deregistration delete at shutdown
    #[serde(default = "default_delete_timeout")]
    pub delete_timeout_ms: u64,
}

fn default_ttl() -> u64 {
    9
}
fn default_renew_interval() -> u64 {
    5
}
fn default_delete_timeout() -> u64 {
    1_000
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            renew_interval_secs: default_renew_interval(),
            delete_timeout_ms: default_delete_timeout(),
        }
    }
}

impl RegistrarConfig {
    pub fn new(ttl_secs: u64, renew_interval_secs: u64) -> Self {
        Self {
            ttl_secs,
            renew_interval_secs,
            ..Default::default()
        }
    }

    /// Check the lease timing invariant.
    ///
    /// The interval must leave at least `LEASE_SAFETY_MARGIN_SECS` before the lease
    /// would lapse.
    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(Error::InvalidConfig("ttl must be positive".into()));
        }
        if self.ttl_secs > MAX_LEASE_TTL_SECS {
            return Err(Error::InvalidConfig(format!(
                "ttl {}s exceeds the maximum of {}s",
                self.ttl_secs, MAX_LEASE_TTL_SECS
            )));
        }
        if self.renew_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "renew interval must be positive".into(),
            ));
        }
        if self.renew_interval_secs > self.ttl_secs.saturating_sub(LEASE_SAFETY_MARGIN_SECS) {
            return Err(Error::InvalidConfig(format!(
                "renew interval {}s must be at most ttl {}s minus {}s",
                self.renew_interval_secs, self.ttl_secs, LEASE_SAFETY_MARGIN_SECS
            )));
        }
        Ok(())
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_millis(self.delete_timeout_ms)
    }
}

/// Client-side connection layer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Dial timeout for a resolved address
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// How often addresses that failed to dial are retried
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
}

fn default_connect_timeout() -> u64 {
    5_000
}
fn default_retry_interval() -> u64 {
    1_000
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            retry_interval_ms: default_retry_interval(),
        }
    }
}

impl BalancerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connect timeout must be positive".into(),
            ));
        }
        if self.retry_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "retry interval must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}
