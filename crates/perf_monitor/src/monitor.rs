//! Process-wide performance monitor facade.
//!
//! [`PerformanceMonitor`] owns one [`MetricsCollector`], applies the global
//! enable and sampling policy to every tracking call, and activates an
//! [`AlertManager`] only when alerting is requested. Once active, the alert
//! manager re-evaluates the thresholds touched by every recorded metric and
//! by the metric it evicted.
//!
//! # Example
//!
//! ```rust
//! use perf_monitor::{AlertConfig, AlertSeverity, MonitorConfig, PerformanceMonitor};
//!
//! # async fn run() -> perf_monitor::PerfResult<()> {
//! let monitor = PerformanceMonitor::create(MonitorConfig::default()).await;
//!
//! let _ = monitor.track_render("Toolbar", Some(4.2));
//! monitor.track_custom_metric("search_ms", 35.0, None);
//!
//! let registration = monitor
//!     .configure_alert("search_ms", AlertConfig::new(100.0, AlertSeverity::Warning))
//!     .await?;
//! assert!(monitor.active_alerts().is_empty());
//! registration.dispose();
//! # Ok(())
//! # }
//! ```

use crate::alerts::{Alert, AlertConfig, AlertManager, AlertRegistration};
use crate::collector::{
    lock, MetricsCollector, NetworkSubscription, NetworkTrackingOptions, RenderTracker,
    SubscriptionId,
};
use crate::config::MonitorConfig;
use crate::error::PerfResult;
use crate::metric::{MemoryUsage, Metric, MetricsSnapshot, PartitionedMetrics};
use crate::probe::{MemoryProbe, ProcessMemoryProbe};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Global monitor slot
static GLOBAL_MONITOR: OnceLock<Mutex<Option<Arc<PerformanceMonitor>>>> = OnceLock::new();

fn global_slot() -> &'static Mutex<Option<Arc<PerformanceMonitor>>> {
    GLOBAL_MONITOR.get_or_init(|| Mutex::new(None))
}

/// Get the global monitor, creating one with default settings if needed.
pub fn global_monitor() -> Arc<PerformanceMonitor> {
    init_global_monitor(MonitorConfig::default())
}

/// Get the global monitor, creating it with `config` if none is installed.
///
/// An already installed monitor is returned unchanged.
pub fn init_global_monitor(config: MonitorConfig) -> Arc<PerformanceMonitor> {
    let mut slot = lock(global_slot());
    Arc::clone(slot.get_or_insert_with(|| Arc::new(PerformanceMonitor::new(config))))
}

/// Dispose of the global monitor. The next access creates a fresh one.
pub fn reset_global_monitor() {
    let previous = lock(global_slot()).take();
    if let Some(monitor) = previous {
        monitor.dispose();
        tracing::debug!(target: "perf_monitor::monitor", "global monitor reset");
    }
}

/// Facade coordinating metric collection and alerting.
#[derive(Debug)]
pub struct PerformanceMonitor {
    config: MonitorConfig,
    collector: MetricsCollector,
    alerts: OnceCell<AlertManager>,
}

impl PerformanceMonitor {
    /// Create a monitor without alerting, reading memory from this process.
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_probe(config, Arc::new(ProcessMemoryProbe))
    }

    /// Create a monitor with a specific memory probe.
    pub fn with_probe(config: MonitorConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        let sample_rate = config.sample_rate;
        let config = config.with_sample_rate(sample_rate);
        let collector = MetricsCollector::with_probe(config.buffer_size, probe);

        if !config.enabled {
            collector.disable();
        } else if config.memory_tracking {
            collector.start_memory_tracking(config.memory_interval());
        }

        tracing::debug!(
            target: "perf_monitor::monitor",
            enabled = config.enabled,
            sample_rate = config.sample_rate,
            buffer_capacity = collector.buffer_capacity(),
            "performance monitor created"
        );

        Self {
            config,
            collector,
            alerts: OnceCell::new(),
        }
    }

    /// Create a monitor and, if `alerts.enabled` is set, activate alerting.
    pub async fn create(config: MonitorConfig) -> Self {
        let monitor = Self::new(config);
        if monitor.config.alerts.enabled {
            monitor.enable_alerting().await;
        }
        monitor
    }

    /// Activate the alert manager, seeding it with the configured thresholds.
    ///
    /// Idempotent: later calls return the same manager.
    pub async fn enable_alerting(&self) -> &AlertManager {
        self.alerts
            .get_or_init(|| async {
                let manager = AlertManager::new();
                for threshold in &self.config.alerts.thresholds {
                    if let Err(e) = manager.add_threshold(threshold.clone()) {
                        tracing::warn!(
                            target: "perf_monitor::monitor",
                            "skipping threshold: {}",
                            e
                        );
                    }
                }

                let evaluator = manager.clone();
                let observer =
                    move |collector: &MetricsCollector, metric: &Metric, evicted: Option<&Metric>| {
                        evaluator.check_recorded(collector, metric, evicted);
                    };
                self.collector.add_record_observer(Arc::new(observer));

                tracing::info!(
                    target: "perf_monitor::monitor",
                    thresholds = manager.thresholds().len(),
                    "alerting enabled"
                );
                manager
            })
            .await
    }

    /// The alert manager, if alerting has been activated.
    pub fn alert_manager(&self) -> Option<&AlertManager> {
        self.alerts.get()
    }

    /// Enabled and the sampling draw succeeds.
    ///
    /// A rate of 0 never tracks and a rate of 1 always does.
    pub fn should_track(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let rate = self.config.sample_rate;
        if rate <= 0.0 {
            return false;
        }
        rate >= 1.0 || rand::random::<f64>() < rate
    }

    // -------------------------------------------------------------------------
    // Tracking
    // -------------------------------------------------------------------------

    /// See [`MetricsCollector::track_render`].
    pub fn track_render(&self, component_id: &str, duration: Option<f64>) -> RenderTracker {
        if !self.should_track() {
            return RenderTracker::inert();
        }
        self.collector.track_render(component_id, duration)
    }

    /// Record current memory usage; `None` when the call is not tracked.
    pub fn track_memory(&self) -> Option<MemoryUsage> {
        self.should_track().then(|| self.collector.track_memory())
    }

    pub fn start_memory_tracking(&self, interval: Duration) {
        if self.is_enabled() {
            self.collector.start_memory_tracking(interval);
        }
    }

    pub fn stop_memory_tracking(&self) {
        self.collector.stop_memory_tracking();
    }

    /// See [`MetricsCollector::track_network`]. Inert when network tracking is off.
    pub fn track_network(&self, options: NetworkTrackingOptions) -> NetworkSubscription {
        if !self.config.network_tracking || !self.is_enabled() {
            return NetworkSubscription::inert();
        }
        self.collector.track_network(options)
    }

    pub fn track_network_request(&self, url: &str, duration: f64, status: Option<u16>) {
        if self.config.network_tracking && self.should_track() {
            self.collector.track_network_request(url, duration, status);
        }
    }

    pub fn track_custom_metric(
        &self,
        name: &str,
        value: f64,
        metadata: Option<HashMap<String, Value>>,
    ) {
        if self.config.custom_metrics && self.should_track() {
            self.collector.track_custom_metric(name, value, metadata);
        }
    }

    /// Record a user interaction as the custom metric `interaction_{type}`.
    pub fn track_interaction(
        &self,
        interaction_type: &str,
        duration: f64,
        metadata: Option<HashMap<String, Value>>,
    ) {
        if interaction_type.is_empty() {
            return;
        }
        self.track_custom_metric(&format!("interaction_{}", interaction_type), duration, metadata);
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    pub fn subscribe_to_metric<F>(&self, name: &str, callback: F) -> SubscriptionId
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.collector.subscribe_to_metric(name, callback)
    }

    pub fn unsubscribe_from_metric(&self, name: &str, id: Option<SubscriptionId>) {
        self.collector.unsubscribe_from_metric(name, id);
    }

    // -------------------------------------------------------------------------
    // Alerting
    // -------------------------------------------------------------------------

    /// Watch a custom metric, activating alerting first if necessary.
    pub async fn configure_alert(
        &self,
        metric_name: &str,
        config: AlertConfig,
    ) -> PerfResult<AlertRegistration> {
        self.enable_alerting().await.configure_alert(metric_name, config)
    }

    /// Evaluate thresholds against the current buffer now.
    pub fn evaluate_alerts(&self) {
        if let Some(manager) = self.alerts.get() {
            manager.check_thresholds(&self.collector.snapshot());
        }
    }

    /// Active alerts; empty while alerting is inactive.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts
            .get()
            .map(AlertManager::get_active_alerts)
            .unwrap_or_default()
    }

    /// Receive alert transitions; `None` while alerting is inactive.
    pub fn subscribe_to_alerts<F>(&self, callback: F) -> Option<SubscriptionId>
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.alerts.get().map(|manager| manager.subscribe(callback))
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Resume tracking, restarting configured memory sampling.
    pub fn enable(&self) {
        self.collector.enable();
        if self.config.memory_tracking && !self.collector.is_memory_tracking() {
            self.collector.start_memory_tracking(self.config.memory_interval());
        }
    }

    /// Stop tracking and memory sampling.
    pub fn disable(&self) {
        self.collector.disable();
    }

    pub fn is_enabled(&self) -> bool {
        self.collector.is_enabled()
    }

    pub fn get_metrics(&self) -> PartitionedMetrics {
        self.collector.get_metrics()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.collector.snapshot()
    }

    /// Empty the buffer. Alerts whose context was cleared resolve.
    pub fn clear_metrics(&self) {
        self.collector.clear_metrics();
        self.evaluate_alerts();
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }

    /// Release timers and stop tracking.
    pub fn dispose(&self) {
        self.collector.stop_memory_tracking();
        self.collector.disable();
    }
}
