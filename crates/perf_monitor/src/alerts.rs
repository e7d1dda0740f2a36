//! Threshold alerting.
//!
//! The alert manager evaluates aggregated [`MetricsSnapshot`]s against its
//! thresholds. Each (threshold, context) pair is either absent or active:
//! exceeding the threshold activates it and emits a triggered [`Alert`];
//! the next evaluation of the same context that no longer exceeds it emits
//! the alert again, marked resolved, and removes it from the active set.
//!
//! A snapshot describes the whole buffer, so an active context missing from
//! it (cleared or evicted) resolves as well.

use crate::aggregate::MetricAggregate;
use crate::collector::{lock, panic_message, MetricsCollector, SubscriptionId};
use crate::constants::{
    HIGH_MEMORY_THRESHOLD_PERCENT, SLOW_NETWORK_THRESHOLD_MS, SLOW_RENDER_THRESHOLD_MS,
};
use crate::error::{PerfError, PerfResult};
use crate::metric::{Metric, MetricData, MetricKind, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Callback receiving alert transitions.
pub type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A configured bound on one kind of metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertThreshold {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Which metrics this threshold applies to
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub severity: AlertSeverity,
    /// Trigger bound: milliseconds for render/network, percent for memory
    pub value: f64,
    /// Custom metric this threshold watches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
}

impl AlertThreshold {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: MetricKind,
        severity: AlertSeverity,
        value: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            kind,
            severity,
            value,
            metric_name: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metric_name(mut self, metric_name: impl Into<String>) -> Self {
        self.metric_name = Some(metric_name.into());
        self
    }

    /// Name of the custom metric this threshold is matched against.
    ///
    /// Without an explicit `metric_name` this falls back to the display name,
    /// lower-cased, with a trailing "alert" removed. Two thresholds whose names
    /// differ only in case or that suffix watch the same metric.
    pub fn custom_metric_name(&self) -> String {
        if let Some(name) = &self.metric_name {
            return name.clone();
        }
        let lower = self.name.trim().to_lowercase();
        lower
            .strip_suffix("alert")
            .unwrap_or(&lower)
            .trim_end_matches(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .to_string()
    }

    fn validate(&self) -> PerfResult<()> {
        if self.id.trim().is_empty() {
            return Err(PerfError::InvalidThreshold("threshold id is empty".to_string()));
        }
        if !self.value.is_finite() || self.value < 0.0 {
            return Err(PerfError::InvalidThreshold(format!(
                "threshold '{}' has invalid bound {}",
                self.id, self.value
            )));
        }
        Ok(())
    }

    fn unit(&self) -> &'static str {
        match self.kind {
            MetricKind::Render | MetricKind::Network => "ms",
            MetricKind::Memory => "%",
            MetricKind::Custom => "",
        }
    }
}

/// The starter thresholds every alert manager is seeded with.
pub fn default_thresholds() -> Vec<AlertThreshold> {
    vec![
        AlertThreshold::new(
            "slow-render",
            "Slow Render",
            MetricKind::Render,
            AlertSeverity::Warning,
            SLOW_RENDER_THRESHOLD_MS,
        )
        .with_description("Component render exceeded the 60fps frame budget"),
        AlertThreshold::new(
            "high-memory",
            "High Memory Usage",
            MetricKind::Memory,
            AlertSeverity::Error,
            HIGH_MEMORY_THRESHOLD_PERCENT,
        )
        .with_description("Heap usage is a large share of the available memory"),
        AlertThreshold::new(
            "slow-network",
            "Slow Network Request",
            MetricKind::Network,
            AlertSeverity::Warning,
            SLOW_NETWORK_THRESHOLD_MS,
        )
        .with_description("Network request took longer than expected"),
    ]
}

/// What an alert is about, beyond its threshold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum AlertContext {
    /// The threshold as a whole (memory, aggregate network)
    Global,
    Component(String),
    Url(String),
    Metric(String),
}

/// Identity of an active alert: one per threshold and context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub threshold_id: String,
    pub context: AlertContext,
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.context {
            AlertContext::Global => write!(f, "{}", self.threshold_id),
            AlertContext::Component(id) => write!(f, "{}:component:{}", self.threshold_id, id),
            AlertContext::Url(url) => write!(f, "{}:url:{}", self.threshold_id, url),
            AlertContext::Metric(name) => write!(f, "{}:metric:{}", self.threshold_id, name),
        }
    }
}

/// A threshold exceeded for a specific context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub threshold_id: String,
    pub message: String,
    pub severity: AlertSeverity,
    /// When the alert triggered (epoch milliseconds)
    pub timestamp: i64,
    /// Value that triggered the alert
    pub value: f64,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
    pub context: AlertContext,
}

/// Simple alert definition for [`AlertManager::configure_alert`].
#[derive(Clone)]
pub struct AlertConfig {
    pub threshold: f64,
    pub level: AlertSeverity,
    pub description: Option<String>,
    on_trigger: Option<AlertCallback>,
    on_resolve: Option<AlertCallback>,
}

impl AlertConfig {
    pub fn new(threshold: f64, level: AlertSeverity) -> Self {
        Self {
            threshold,
            level,
            description: None,
            on_trigger: None,
            on_resolve: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Invoke `callback` when the alert triggers.
    pub fn on_trigger<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.on_trigger = Some(Arc::new(callback));
        self
    }

    /// Invoke `callback` when the alert resolves.
    pub fn on_resolve<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.on_resolve = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for AlertConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertConfig")
            .field("threshold", &self.threshold)
            .field("level", &self.level)
            .field("description", &self.description)
            .field("on_trigger", &self.on_trigger.is_some())
            .field("on_resolve", &self.on_resolve.is_some())
            .finish()
    }
}

struct AlertShared {
    thresholds: Mutex<Vec<AlertThreshold>>,
    active: Mutex<HashMap<AlertKey, Alert>>,
    subscribers: Mutex<Vec<(SubscriptionId, AlertCallback)>>,
    next_subscription: AtomicU64,
    next_configured: AtomicU64,
}

/// Evaluates metrics against thresholds and tracks active alerts.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct AlertManager {
    shared: Arc<AlertShared>,
}

impl std::fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertManager")
            .field("thresholds", &lock(&self.shared.thresholds).len())
            .field("active", &lock(&self.shared.active).len())
            .field("subscribers", &lock(&self.shared.subscribers).len())
            .finish()
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending state change found during evaluation.
struct Transition {
    alert: Alert,
    triggered: bool,
}

impl AlertManager {
    /// Create a manager seeded with the default thresholds.
    pub fn new() -> Self {
        let manager = Self {
            shared: Arc::new(AlertShared {
                thresholds: Mutex::new(Vec::new()),
                active: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                next_configured: AtomicU64::new(1),
            }),
        };
        manager.setup_default_thresholds();
        manager
    }

    /// Register (or replace) the starter thresholds.
    pub fn setup_default_thresholds(&self) {
        let mut thresholds = lock(&self.shared.thresholds);
        for threshold in default_thresholds() {
            thresholds.retain(|t| t.id != threshold.id);
            thresholds.push(threshold);
        }
    }

    // -------------------------------------------------------------------------
    // Thresholds
    // -------------------------------------------------------------------------

    /// Register a threshold, replacing any with the same id.
    pub fn add_threshold(&self, threshold: AlertThreshold) -> PerfResult<()> {
        threshold.validate()?;
        tracing::debug!(
            target: "perf_monitor::alerts",
            id = %threshold.id,
            kind = %threshold.kind,
            value = threshold.value,
            "threshold added"
        );
        let mut thresholds = lock(&self.shared.thresholds);
        match thresholds.iter_mut().find(|t| t.id == threshold.id) {
            Some(existing) => *existing = threshold,
            None => thresholds.push(threshold),
        }
        Ok(())
    }

    /// Remove a threshold and every active alert it owns.
    ///
    /// Returns `false` if no threshold had that id.
    pub fn remove_threshold(&self, id: &str) -> bool {
        let removed = {
            let mut thresholds = lock(&self.shared.thresholds);
            let before = thresholds.len();
            thresholds.retain(|t| t.id != id);
            thresholds.len() != before
        };
        lock(&self.shared.active).retain(|key, _| key.threshold_id != id);
        removed
    }

    /// Registered thresholds, in registration order.
    pub fn thresholds(&self) -> Vec<AlertThreshold> {
        lock(&self.shared.thresholds).clone()
    }

    /// Watch the custom metric `metric_name` with a synthesized threshold.
    ///
    /// The returned registration removes both the threshold and its
    /// trigger/resolve callbacks when disposed.
    pub fn configure_alert(
        &self,
        metric_name: &str,
        config: AlertConfig,
    ) -> PerfResult<AlertRegistration> {
        if metric_name.is_empty() {
            return Err(PerfError::InvalidThreshold("metric name is empty".to_string()));
        }

        let n = self.shared.next_configured.fetch_add(1, Ordering::Relaxed);
        let threshold_id = format!("configured:{}:{}", metric_name, n);
        let description = config
            .description
            .clone()
            .unwrap_or_else(|| format!("{} exceeded {}", metric_name, config.threshold));
        let threshold = AlertThreshold::new(
            threshold_id.clone(),
            metric_name,
            MetricKind::Custom,
            config.level,
            config.threshold,
        )
        .with_description(description)
        .with_metric_name(metric_name);
        self.add_threshold(threshold)?;

        let owner = threshold_id.clone();
        let AlertConfig {
            on_trigger,
            on_resolve,
            ..
        } = config;
        let subscription = self.subscribe(move |alert: &Alert| {
            if alert.threshold_id != owner {
                return;
            }
            let callback = if alert.resolved { &on_resolve } else { &on_trigger };
            if let Some(callback) = callback {
                callback(alert);
            }
        });

        Ok(AlertRegistration {
            manager: Arc::downgrade(&self.shared),
            threshold_id,
            subscription,
        })
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Evaluate every threshold against `snapshot`, emitting transitions.
    pub fn check_thresholds(&self, snapshot: &MetricsSnapshot) {
        let thresholds = self.thresholds();
        let transitions = {
            let mut active = lock(&self.shared.active);
            let mut pass = Evaluation::new(&mut active);
            for threshold in &thresholds {
                match threshold.kind {
                    MetricKind::Render => check_render(threshold, snapshot, &mut pass),
                    MetricKind::Memory => check_memory(threshold, snapshot, &mut pass),
                    MetricKind::Network => check_network(threshold, snapshot, &mut pass),
                    MetricKind::Custom => check_custom(threshold, snapshot, &mut pass),
                }
            }
            pass.resolve_unseen(&thresholds);
            pass.transitions
        };

        for transition in &transitions {
            self.emit(transition);
        }
    }

    /// Evaluate only the contexts touched by one recorded metric and the
    /// metric it evicted, reading the collector's running aggregate.
    pub(crate) fn check_recorded(
        &self,
        collector: &MetricsCollector,
        metric: &Metric,
        evicted: Option<&Metric>,
    ) {
        let thresholds = self.thresholds();
        let transitions = collector.with_aggregate(|aggregate| {
            let mut active = lock(&self.shared.active);
            let mut pass = Evaluation::new(&mut active);
            for observed in std::iter::once(metric).chain(evicted) {
                let kind = observed.kind();
                for threshold in thresholds.iter().filter(|t| t.kind == kind) {
                    check_aggregate(threshold, aggregate, observed, &mut pass);
                }
            }
            pass.transitions
        });

        for transition in &transitions {
            self.emit(transition);
        }
    }

    fn emit(&self, transition: &Transition) {
        let alert = &transition.alert;
        if transition.triggered {
            tracing::info!(
                target: "perf_monitor::alerts",
                id = %alert.id,
                severity = ?alert.severity,
                value = alert.value,
                "alert triggered: {}",
                alert.message
            );
        } else {
            tracing::info!(target: "perf_monitor::alerts", id = %alert.id, "alert resolved");
        }

        let subscribers: Vec<(SubscriptionId, AlertCallback)> =
            lock(&self.shared.subscribers).clone();
        for (id, callback) in subscribers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(alert))) {
                tracing::warn!(
                    target: "perf_monitor::alerts",
                    subscription = id.0,
                    error = %panic_message(panic.as_ref()),
                    "alert subscriber panicked"
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions and state
    // -------------------------------------------------------------------------

    /// Receive every alert transition, triggered and resolved.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.subscribers).push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.shared.subscribers).retain(|(existing, _)| *existing != id);
    }

    /// Currently active alerts, oldest first.
    pub fn get_active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = lock(&self.shared.active).values().cloned().collect();
        alerts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    /// Drop all active alerts without emitting resolutions.
    pub fn clear_alerts(&self) {
        lock(&self.shared.active).clear();
    }
}

// =============================================================================
// Evaluators
// =============================================================================

/// One evaluation pass over the active alert set.
struct Evaluation<'a> {
    active: &'a mut HashMap<AlertKey, Alert>,
    seen: HashSet<AlertKey>,
    transitions: Vec<Transition>,
}

impl<'a> Evaluation<'a> {
    fn new(active: &'a mut HashMap<AlertKey, Alert>) -> Self {
        Self {
            active,
            seen: HashSet::new(),
            transitions: Vec::new(),
        }
    }

    /// Apply one observation to the (threshold, context) state machine.
    fn observe(
        &mut self,
        threshold: &AlertThreshold,
        context: AlertContext,
        value: f64,
        exceeded: bool,
        detail: impl FnOnce() -> Option<String>,
    ) {
        let key = AlertKey {
            threshold_id: threshold.id.clone(),
            context,
        };

        if exceeded {
            if !self.active.contains_key(&key) {
                let alert = Alert {
                    id: key.to_string(),
                    threshold_id: threshold.id.clone(),
                    message: format_message(threshold, value, detail()),
                    severity: threshold.severity,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    value,
                    resolved: false,
                    resolved_at: None,
                    context: key.context.clone(),
                };
                self.active.insert(key.clone(), alert.clone());
                self.transitions.push(Transition {
                    alert,
                    triggered: true,
                });
            }
        } else {
            self.resolve(&key);
        }
        self.seen.insert(key);
    }

    fn resolve(&mut self, key: &AlertKey) {
        if let Some(mut alert) = self.active.remove(key) {
            alert.resolved = true;
            alert.resolved_at = Some(chrono::Utc::now().timestamp_millis());
            self.transitions.push(Transition {
                alert,
                triggered: false,
            });
        }
    }

    /// Resolve active alerts of `thresholds` whose context was not observed.
    fn resolve_unseen(&mut self, thresholds: &[AlertThreshold]) {
        let ids: HashSet<&str> = thresholds.iter().map(|t| t.id.as_str()).collect();
        let mut stale: Vec<AlertKey> = self
            .active
            .keys()
            .filter(|key| ids.contains(key.threshold_id.as_str()) && !self.seen.contains(*key))
            .cloned()
            .collect();
        stale.sort_by_key(|key| key.to_string());
        for key in stale {
            self.resolve(&key);
        }
    }
}

/// "{name}: {description} ({value} > {bound})", plus any context detail.
fn format_message(threshold: &AlertThreshold, value: f64, detail: Option<String>) -> String {
    let unit = threshold.unit();
    let mut message = if threshold.description.is_empty() {
        threshold.name.clone()
    } else {
        format!("{}: {}", threshold.name, threshold.description)
    };
    message.push_str(&format!(" ({:.1}{} > {}{})", value, unit, threshold.value, unit));
    if let Some(detail) = detail {
        message.push_str(" [");
        message.push_str(&detail);
        message.push(']');
    }
    message
}

fn check_render(threshold: &AlertThreshold, snapshot: &MetricsSnapshot, pass: &mut Evaluation) {
    let mut components: Vec<_> = snapshot.components.iter().collect();
    components.sort_by(|a, b| a.0.cmp(b.0));

    for (component_id, stats) in components {
        pass.observe(
            threshold,
            AlertContext::Component(component_id.clone()),
            stats.last_render_time,
            stats.last_render_time > threshold.value,
            || Some(format!("component: {}", component_id)),
        );
    }
}

fn check_memory(threshold: &AlertThreshold, snapshot: &MetricsSnapshot, pass: &mut Evaluation) {
    let Some(memory) = snapshot.memory.filter(|m| m.total > 0) else {
        return;
    };
    let percent = memory.usage_percent();
    pass.observe(
        threshold,
        AlertContext::Global,
        percent,
        percent > threshold.value,
        || Some(format!("used: {} of {} bytes", memory.used, memory.total)),
    );
}

fn check_network(threshold: &AlertThreshold, snapshot: &MetricsSnapshot, pass: &mut Evaluation) {
    let slow: Vec<_> = snapshot
        .network
        .requests
        .iter()
        .filter(|r| r.duration > threshold.value)
        .collect();
    let worst = slow
        .iter()
        .copied()
        .max_by(|a, b| a.duration.total_cmp(&b.duration));

    pass.observe(
        threshold,
        AlertContext::Global,
        worst.map_or(0.0, |r| r.duration),
        worst.is_some(),
        || worst.map(|r| format!("url: {}, slow requests: {}", r.url, slow.len())),
    );
}

fn check_custom(threshold: &AlertThreshold, snapshot: &MetricsSnapshot, pass: &mut Evaluation) {
    let name = threshold.custom_metric_name();
    let Some(&value) = snapshot.custom.get(&name) else {
        return;
    };
    pass.observe(
        threshold,
        AlertContext::Metric(name.clone()),
        value,
        value > threshold.value,
        || Some(format!("metric: {}", name)),
    );
}

/// Re-evaluate the context of `metric` against the running aggregate.
///
/// A context no longer present in the aggregate counts as not exceeded.
fn check_aggregate(
    threshold: &AlertThreshold,
    aggregate: &MetricAggregate,
    metric: &Metric,
    pass: &mut Evaluation,
) {
    let bound = threshold.value;
    match &metric.metadata {
        MetricData::Render { component_id } => {
            let last = aggregate.last_render(component_id);
            pass.observe(
                threshold,
                AlertContext::Component(component_id.clone()),
                last.unwrap_or(0.0),
                last.is_some_and(|v| v > bound),
                || Some(format!("component: {}", component_id)),
            );
        }
        MetricData::Memory { .. } => {
            let memory = aggregate.memory().filter(|m| m.total > 0);
            let percent = memory.map_or(0.0, |m| m.usage_percent());
            pass.observe(
                threshold,
                AlertContext::Global,
                percent,
                percent > bound,
                || memory.map(|m| format!("used: {} of {} bytes", m.used, m.total)),
            );
        }
        MetricData::Network { .. } => {
            let slowest = aggregate.slowest_request();
            pass.observe(
                threshold,
                AlertContext::Global,
                slowest.map_or(0.0, |(_, duration)| duration),
                slowest.is_some_and(|(_, duration)| duration > bound),
                || {
                    slowest.map(|(url, _)| {
                        let count = aggregate.slow_request_count(bound);
                        format!("url: {}, slow requests: {}", url, count)
                    })
                },
            );
        }
        MetricData::Custom { name, .. } => {
            if threshold.custom_metric_name() != *name {
                return;
            }
            let value = aggregate.custom_value(name);
            pass.observe(
                threshold,
                AlertContext::Metric(name.clone()),
                value.unwrap_or(0.0),
                value.is_some_and(|v| v > bound),
                || Some(format!("metric: {}", name)),
            );
        }
    }
}

/// Registration created by [`AlertManager::configure_alert`].
#[derive(Debug)]
pub struct AlertRegistration {
    manager: Weak<AlertShared>,
    threshold_id: String,
    subscription: SubscriptionId,
}

impl AlertRegistration {
    /// Id of the synthesized threshold.
    pub fn threshold_id(&self) -> &str {
        &self.threshold_id
    }

    /// Unregister the callbacks and remove the threshold.
    pub fn dispose(self) {
        if let Some(shared) = self.manager.upgrade() {
            let manager = AlertManager { shared };
            manager.unsubscribe(self.subscription);
            manager.remove_threshold(&self.threshold_id);
        }
    }
}
