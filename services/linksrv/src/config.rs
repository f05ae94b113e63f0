//! Device link configuration
//!
//! Loaded through `common::config_loader`: defaults < `config/linksrv.yaml`
//! (or `--config`) < `LINKSRV_*` environment variables.

use std::path::Path;
use std::time::Duration;

use errors::OmnitorResult;
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::reconnect::ReconnectPolicy;

/// Service name used for the config file and env prefix
pub const SERVICE_NAME: &str = "linksrv";

/// Simulated device settings (`linksrv run --simulate`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Cadence of emitted reading frames
    pub frame_interval_ms: u64,
    /// Pretend the cable is pulled after this many frames (0 = never)
    pub disconnect_after_frames: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 1000,
            disconnect_after_frames: 0,
        }
    }
}

/// Device link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Substrings matched against port description or device path
    pub device_patterns: Vec<String>,
    /// Fixed device path; skips discovery when set
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Wait after opening the port (the board resets on open)
    pub settle_delay_ms: u64,
    /// Wait between closing a faulted session and the first reconnect attempt
    pub reconnect_cooldown_ms: u64,
    /// Wait between failed reconnect attempts; retries never stop
    pub retry_interval_ms: u64,
    /// Reader sleep when no bytes are available
    pub read_idle_ms: u64,
    /// Writer pause after each frame
    pub write_pacing_ms: u64,
    /// Consumer poll cadence for `linksrv run`
    pub poll_interval_ms: u64,
    /// Bound on joining the tasks in `DeviceLink::stop`
    pub stop_timeout_ms: u64,
    pub simulator: SimulatorConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_patterns: vec!["Arduino".to_string(), "ttyACM".to_string()],
            port: None,
            baud_rate: 9600,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            settle_delay_ms: 2000,
            reconnect_cooldown_ms: 2000,
            retry_interval_ms: 2000,
            read_idle_ms: 10,
            write_pacing_ms: 10,
            poll_interval_ms: 1000,
            stop_timeout_ms: 3000,
            simulator: SimulatorConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Load and validate
    pub fn load(path: Option<&Path>) -> OmnitorResult<Self> {
        let config: Self = common::config_loader::load_config(SERVICE_NAME, path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.is_none() && self.device_patterns.iter().all(|p| p.is_empty()) {
            return Err(LinkError::config(
                "device_patterns must contain a non-empty pattern when no port is set",
            ));
        }
        if matches!(self.port.as_deref(), Some("")) {
            return Err(LinkError::config("port cannot be empty"));
        }
        if self.baud_rate == 0 {
            return Err(LinkError::config("baud_rate must be greater than zero"));
        }

        let non_zero = [
            ("read_timeout_ms", self.read_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("retry_interval_ms", self.retry_interval_ms),
            ("read_idle_ms", self.read_idle_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("stop_timeout_ms", self.stop_timeout_ms),
            ("simulator.frame_interval_ms", self.simulator.frame_interval_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(LinkError::config(format!(
                    "{field} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn read_idle(&self) -> Duration {
        Duration::from_millis(self.read_idle_ms)
    }

    pub fn write_pacing(&self) -> Duration {
        Duration::from_millis(self.write_pacing_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::from_config(self.reconnect_cooldown_ms, self.retry_interval_ms)
    }
}
