//! Bridge and adapter configuration.

use crate::error::{ServerError, ServerResult};
use odin_softioc_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a [`crate::BridgeService`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Device prefix prepended to every PV name.
    pub prefix: String,
    /// Sync engine settings.
    pub engine: EngineConfig,
    /// Interval at which external parameters are sampled.
    pub poll_interval: Duration,
}

impl BridgeConfig {
    /// Creates a configuration for the given device prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            engine: EngineConfig::default(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Sets the propagation timeout.
    pub fn with_propagation_timeout(mut self, timeout: Duration) -> Self {
        self.engine = self.engine.with_propagation_timeout(timeout);
        self
    }

    /// Sets the external parameter poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new(AdapterConfig::DEFAULT_PREFIX)
    }
}

/// Options of the soft IOC adapter, as found in an adapter configuration file.
///
/// Missing keys take their defaults, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Device prefix for IOC PVs.
    pub ioc_device_prefix: String,
    /// Whether the background task starts with the adapter.
    pub background_task_enable: bool,
    /// Background task interval in seconds.
    pub background_task_interval: f64,
    /// External parameter poll interval in seconds.
    pub poll_interval: f64,
    /// Propagation timeout in milliseconds.
    pub propagation_timeout_ms: u64,
}

impl AdapterConfig {
    /// Prefix used when none is configured.
    pub const DEFAULT_PREFIX: &'static str = "DEFAULT-PREFIX";

    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            ioc_device_prefix: Self::DEFAULT_PREFIX.to_string(),
            background_task_enable: false,
            background_task_interval: 1.0,
            poll_interval: 1.0,
            propagation_timeout_ms: 100,
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> ServerResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded adapter configuration");
        Ok(config)
    }

    /// Sets the device prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ioc_device_prefix = prefix.into();
        self
    }

    /// Sets whether the background task starts enabled, and its interval.
    pub fn with_background_task(mut self, enable: bool, interval: f64) -> Self {
        self.background_task_enable = enable;
        self.background_task_interval = interval;
        self
    }

    /// Sets the poll interval in seconds.
    pub fn with_poll_interval(mut self, seconds: f64) -> Self {
        self.poll_interval = seconds;
        self
    }

    /// Checks that intervals are positive and finite.
    pub fn validate(&self) -> ServerResult<()> {
        check_interval("background_task_interval", self.background_task_interval)?;
        check_interval("poll_interval", self.poll_interval)?;
        if self.propagation_timeout_ms == 0 {
            return Err(ServerError::Config(
                "propagation_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Builds the bridge configuration these options describe.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::new(self.ioc_device_prefix.clone())
            .with_propagation_timeout(Duration::from_millis(self.propagation_timeout_ms))
            .with_poll_interval(Duration::from_secs_f64(self.poll_interval))
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks that an interval in seconds is usable as a `Duration`.
pub(crate) fn check_interval(name: &str, seconds: f64) -> ServerResult<()> {
    interval_problem(seconds).map_err(|problem| ServerError::Config(format!("{name} {problem}")))
}

/// Returns why `seconds` is not a usable interval.
pub(crate) fn interval_problem(seconds: f64) -> Result<(), String> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(())
    } else {
        Err(format!("must be a positive number of seconds, got {seconds}"))
    }
}
