use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::peer::VersionOrdering;

/// Top-level configuration for the peerping agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Name of the local peer within the fleet.
    #[serde(default)]
    pub self_name: String,

    /// Prometheus metrics server configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Target reconciliation configuration.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// How long to wait for the event source's initial sync. Default: 60s.
    #[serde(default = "default_sync_timeout", with = "humantime_serde")]
    pub sync_timeout: Duration,

    /// Capacity of the lifecycle event channel. Default: 1024.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Prometheus metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Listen address; ":port" binds all interfaces. Default: ":8080".
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

/// Target reconciliation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Ceiling of the random delay before a new target starts probing.
    /// Zero disables the delay. Default: 2s.
    #[serde(default = "default_jitter_max", with = "humantime_serde")]
    pub jitter_max: Duration,

    /// How version tokens are compared by the staleness guard.
    #[serde(default)]
    pub version_ordering: VersionOrdering,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_event_buffer() -> usize {
    1024
}

fn default_metrics_addr() -> String {
    ":8080".to_string()
}

fn default_jitter_max() -> Duration {
    crate::reconciler::DEFAULT_JITTER_MAX
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            self_name: String::new(),
            metrics: MetricsConfig::default(),
            reconciler: ReconcilerConfig::default(),
            sync_timeout: default_sync_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            addr: default_metrics_addr(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            jitter_max: default_jitter_max(),
            version_ordering: VersionOrdering::default(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.self_name.is_empty() {
            bail!("self_name is required");
        }

        if self.sync_timeout.is_zero() {
            bail!("sync_timeout must be positive");
        }

        if self.event_buffer == 0 {
            bail!("event_buffer must be positive");
        }

        if self.metrics.addr.is_empty() {
            bail!("metrics.addr must not be empty");
        }

        Ok(())
    }
}
