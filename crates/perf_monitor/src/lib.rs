//! Client-side Performance Monitoring
//!
//! This crate collects render, memory, network and custom measurements from a
//! running application and evaluates them against alert thresholds:
//!
//! - Bounded FIFO buffer of metric records
//! - Channel-based publish/subscribe fan-out of every recorded metric
//! - Threshold alerting with trigger/resolve transitions per context
//! - Process-wide monitor facade with enable and sampling policy
//! - Pluggable memory probes for hosts with and without a memory API
//!
//! Telemetry must never destabilize the host: invalid input is ignored,
//! subscriber panics are contained, and missing platform support degrades
//! to zero-valued readings.
//!
//! # Example
//!
//! ```rust
//! use perf_monitor::{MonitorConfig, PerformanceMonitor};
//!
//! let monitor = PerformanceMonitor::new(MonitorConfig::default());
//!
//! // Report an already measured render
//! let _ = monitor.track_render("Sidebar", Some(8.5));
//!
//! // Or bracket a region of work
//! let tracker = monitor.track_render("Editor", None);
//! // ... render ...
//! tracker.complete();
//!
//! monitor.track_network_request("/api/documents", 120.0, Some(200));
//!
//! let metrics = monitor.get_metrics();
//! assert_eq!(metrics.render.len(), 2);
//! assert_eq!(metrics.network.len(), 1);
//! ```
//!
//! # Modules
//!
//! - [`buffer`] - Fixed-capacity metric store
//! - [`collector`] - Metric production and subscriber fan-out
//! - [`alerts`] - Thresholds, alert state and evaluation
//! - [`monitor`] - Monitor facade and global instance
//! - [`probe`] - Memory reading abstraction

mod aggregate;
pub mod alerts;
pub mod buffer;
pub mod collector;
mod config;
pub mod constants;
mod error;
mod metric;
pub mod monitor;
pub mod probe;

pub use alerts::{
    default_thresholds, Alert, AlertConfig, AlertContext, AlertKey, AlertManager, AlertRegistration,
    AlertSeverity, AlertThreshold,
};
pub use buffer::MetricBuffer;
pub use collector::{
    is_valid_input, MetricCallback, MetricsCollector, NetworkStats, NetworkSubscription,
    NetworkTrackingOptions, RenderTracker, SubscriptionId,
};
pub use config::{AlertsConfig, MonitorConfig};
pub use error::{PerfError, PerfResult};
pub use metric::{
    ComponentMetrics, MemoryUsage, Metric, MetricData, MetricKind, MetricsSnapshot,
    NetworkMetrics, NetworkRequest, PartitionedMetrics,
};
pub use monitor::{global_monitor, init_global_monitor, reset_global_monitor, PerformanceMonitor};
pub use probe::{HeapSample, MemoryProbe, NullMemoryProbe, ProcessMemoryProbe, StaticMemoryProbe};
