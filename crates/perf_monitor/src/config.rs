//! Monitor configuration.

use crate::alerts::AlertThreshold;
use crate::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_MEMORY_INTERVAL};
use crate::error::{PerfError, PerfResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Alerting options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlertsConfig {
    /// Activate the alert manager when the monitor is created
    pub enabled: bool,
    /// Thresholds registered in addition to the defaults
    pub thresholds: Vec<AlertThreshold>,
}

/// Configuration for the performance monitor.
///
/// Deserializes from camelCase JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Master on/off switch
    pub enabled: bool,
    /// Probability in `[0, 1]` that a tracking call is recorded
    pub sample_rate: f64,
    /// Whether custom metrics are recorded
    pub custom_metrics: bool,
    /// Requested buffer capacity (clamped by the buffer)
    pub buffer_size: usize,
    /// Sample memory periodically
    pub memory_tracking: bool,
    /// Memory sampling period in milliseconds
    pub memory_interval: u64,
    /// Whether network tracking is active
    pub network_tracking: bool,
    pub alerts: AlertsConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
            custom_metrics: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            memory_tracking: false,
            memory_interval: DEFAULT_MEMORY_INTERVAL.as_millis() as u64,
            network_tracking: true,
            alerts: AlertsConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> PerfResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is within its allowed range.
    pub fn validate(&self) -> PerfResult<()> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(PerfError::InvalidConfig(format!(
                "sampleRate must be within [0, 1], got {}",
                self.sample_rate
            )));
        }
        if self.buffer_size == 0 {
            return Err(PerfError::InvalidConfig("bufferSize must be positive".to_string()));
        }
        Ok(())
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the sample rate, clamped to `[0, 1]`. NaN disables sampling.
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    pub fn with_custom_metrics(mut self, enabled: bool) -> Self {
        self.custom_metrics = enabled;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Enable periodic memory sampling at `interval`.
    pub fn with_memory_tracking(mut self, interval: Duration) -> Self {
        self.memory_tracking = true;
        self.memory_interval = interval.as_millis() as u64;
        self
    }

    pub fn with_network_tracking(mut self, enabled: bool) -> Self {
        self.network_tracking = enabled;
        self
    }

    /// Activate alerting on creation, registering `thresholds` besides the defaults.
    pub fn with_alerts(mut self, thresholds: Vec<AlertThreshold>) -> Self {
        self.alerts = AlertsConfig {
            enabled: true,
            thresholds,
        };
        self
    }

    /// Memory sampling period.
    pub fn memory_interval(&self) -> Duration {
        Duration::from_millis(self.memory_interval)
    }
}
