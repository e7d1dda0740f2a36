//! Metrics collection and channel-based fan-out.
//!
//! The collector turns raw observations into [`Metric`] records, stores them
//! in its [`MetricBuffer`] and synchronously notifies the subscribers of the
//! metric's channel. Invalid input and subscriber panics never reach the
//! caller: telemetry must not destabilize the host application.

use crate::aggregate::MetricAggregate;
use crate::buffer::MetricBuffer;
use crate::constants::{
    MAX_MEMORY_INTERVAL, MEMORY_CHANNEL, MIN_MEMORY_INTERVAL, NETWORK_CHANNEL, RENDER_CHANNEL,
};
use crate::error::PerfResult;
use crate::metric::{MemoryUsage, Metric, MetricData, MetricsSnapshot, PartitionedMetrics};
use crate::probe::{MemoryProbe, ProcessMemoryProbe};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Callback receiving the value of each metric published on a channel.
pub type MetricCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Callback receiving running network statistics.
pub type NetworkStatsCallback = Arc<dyn Fn(&NetworkStats) + Send + Sync>;

type RecordCallback = Arc<dyn Fn(&Metric) + Send + Sync>;

/// Hook run after every recorded metric, whatever its channel, with the
/// metric it evicted from the buffer.
pub(crate) type RecordObserver =
    Arc<dyn Fn(&MetricsCollector, &Metric, Option<&Metric>) + Send + Sync>;

/// Handle identifying one registration on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

#[derive(Clone)]
enum Subscriber {
    Value(MetricCallback),
    Record(RecordCallback),
}

impl Subscriber {
    fn call(&self, metric: &Metric) {
        match self {
            Subscriber::Value(callback) => callback(metric.value),
            Subscriber::Record(callback) => callback(metric),
        }
    }
}

/// Buffer plus the running aggregate of its contents.
struct MetricStore {
    buffer: MetricBuffer,
    aggregate: MetricAggregate,
}

impl MetricStore {
    fn push(&mut self, metric: Metric) -> Option<Metric> {
        self.aggregate.add(&metric);
        let evicted = self.buffer.push(metric);
        if let Some(evicted) = &evicted {
            self.aggregate.remove(evicted);
        }
        evicted
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.aggregate.clear();
    }
}

struct CollectorShared {
    store: Mutex<MetricStore>,
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, Subscriber)>>>,
    observers: Mutex<Vec<RecordObserver>>,
    enabled: AtomicBool,
    next_subscription: AtomicU64,
    memory_task: Mutex<Option<JoinHandle<()>>>,
    probe: Arc<dyn MemoryProbe>,
}

impl Drop for CollectorShared {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.memory_task).take() {
            task.abort();
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// A name must be non-empty; a value, when given, must be finite and non-negative.
pub fn is_valid_input(name: &str, value: Option<f64>) -> bool {
    if name.is_empty() {
        return false;
    }
    match value {
        Some(v) => v.is_finite() && v >= 0.0,
        None => true,
    }
}

/// Produces metrics, stores them and notifies subscribers.
///
/// Cloning yields another handle to the same collector.
#[derive(Clone)]
pub struct MetricsCollector {
    shared: Arc<CollectorShared>,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("enabled", &self.is_enabled())
            .field("buffered", &self.buffer_len())
            .field("capacity", &self.buffer_capacity())
            .field("memory_tracking", &self.is_memory_tracking())
            .field("probe", &self.shared.probe)
            .finish()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_BUFFER_SIZE)
    }
}

impl MetricsCollector {
    /// Create a collector reading memory from the current process.
    pub fn new(buffer_size: usize) -> Self {
        Self::with_probe(buffer_size, Arc::new(ProcessMemoryProbe))
    }

    /// Create a collector with a specific memory probe.
    pub fn with_probe(buffer_size: usize, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            shared: Arc::new(CollectorShared {
                store: Mutex::new(MetricStore {
                    buffer: MetricBuffer::new(buffer_size),
                    aggregate: MetricAggregate::default(),
                }),
                subscribers: Mutex::new(HashMap::new()),
                observers: Mutex::new(Vec::new()),
                enabled: AtomicBool::new(true),
                next_subscription: AtomicU64::new(1),
                memory_task: Mutex::new(None),
                probe,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    fn record(&self, channel: &str, metric: Metric) {
        tracing::trace!(
            target: "perf_monitor::collector",
            channel,
            kind = %metric.kind(),
            value = metric.value,
            "metric recorded"
        );
        let evicted = lock(&self.shared.store).push(metric.clone());
        self.notify(channel, &metric);

        let observers: Vec<RecordObserver> = lock(&self.shared.observers).clone();
        for observer in observers {
            let observed =
                catch_unwind(AssertUnwindSafe(|| observer(self, &metric, evicted.as_ref())));
            if let Err(panic) = observed {
                tracing::warn!(
                    target: "perf_monitor::collector",
                    error = %panic_message(panic.as_ref()),
                    "record observer panicked"
                );
            }
        }
    }

    pub(crate) fn add_record_observer(&self, observer: RecordObserver) {
        lock(&self.shared.observers).push(observer);
    }

    /// Run `f` against the running aggregate while the buffer is locked.
    pub(crate) fn with_aggregate<R>(&self, f: impl FnOnce(&MetricAggregate) -> R) -> R {
        f(&lock(&self.shared.store).aggregate)
    }

    fn notify(&self, channel: &str, metric: &Metric) {
        let snapshot: Vec<(SubscriptionId, Subscriber)> =
            match lock(&self.shared.subscribers).get(channel) {
                Some(subscribers) => subscribers.clone(),
                None => return,
            };

        for (id, subscriber) in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| subscriber.call(metric))) {
                tracing::warn!(
                    target: "perf_monitor::collector",
                    channel,
                    subscription = id.0,
                    error = %panic_message(panic.as_ref()),
                    "metric subscriber panicked"
                );
            }
        }
    }

    fn record_render(&self, component_id: &str, duration: f64) -> bool {
        if !self.is_enabled() || !is_valid_input(component_id, Some(duration)) {
            tracing::debug!(
                target: "perf_monitor::collector",
                component_id,
                duration,
                "ignoring render measurement"
            );
            return false;
        }
        let metric = Metric::new(
            duration,
            MetricData::Render {
                component_id: component_id.to_string(),
            },
        );
        self.record(RENDER_CHANNEL, metric);
        true
    }

    /// Track a component render.
    ///
    /// With a `duration` the measurement is recorded immediately and the
    /// returned tracker is inert. Without one, the tracker captures the start
    /// time and records the elapsed time when [`RenderTracker::complete`] is
    /// called.
    pub fn track_render(&self, component_id: &str, duration: Option<f64>) -> RenderTracker {
        match duration {
            Some(duration) => {
                self.record_render(component_id, duration);
                RenderTracker::inert()
            }
            None if is_valid_input(component_id, None) => RenderTracker {
                pending: Some(PendingRender {
                    collector: self.clone(),
                    component_id: component_id.to_string(),
                    start: Instant::now(),
                }),
            },
            None => RenderTracker::inert(),
        }
    }

    /// Read current memory usage, record it and return a normalized reading.
    ///
    /// Hosts without a memory API yield zeros.
    pub fn track_memory(&self) -> MemoryUsage {
        let sample = self.shared.probe.sample().unwrap_or_default();
        let usage = MemoryUsage {
            used: sample.used,
            total: sample.total,
            limit: sample.limit.unwrap_or(sample.total),
        };

        if self.is_enabled() {
            let metric = Metric::new(
                usage.used as f64,
                MetricData::Memory {
                    heap_used: usage.used,
                    heap_total: usage.total,
                },
            );
            self.record(MEMORY_CHANNEL, metric);
        }
        usage
    }

    /// Start sampling memory every `interval`, replacing any running sampler.
    ///
    /// The interval is clamped to `[MIN_MEMORY_INTERVAL, MAX_MEMORY_INTERVAL]`.
    /// Requires a tokio runtime; without one this logs and does nothing.
    pub fn start_memory_tracking(&self, interval: Duration) {
        self.stop_memory_tracking();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!(
                    target: "perf_monitor::collector",
                    "memory tracking requires a tokio runtime; not started"
                );
                return;
            }
        };

        let interval = interval.clamp(MIN_MEMORY_INTERVAL, MAX_MEMORY_INTERVAL);
        let shared = Arc::downgrade(&self.shared);

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                MetricsCollector { shared }.track_memory();
            }
        });

        tracing::debug!(
            target: "perf_monitor::collector",
            interval_ms = interval.as_millis() as u64,
            "memory tracking started"
        );
        *lock(&self.shared.memory_task) = Some(task);
    }

    /// Stop periodic memory sampling. No-op if none is running.
    pub fn stop_memory_tracking(&self) {
        if let Some(task) = lock(&self.shared.memory_task).take() {
            task.abort();
            tracing::debug!(target: "perf_monitor::collector", "memory tracking stopped");
        }
    }

    /// Check if periodic memory sampling is running.
    pub fn is_memory_tracking(&self) -> bool {
        lock(&self.shared.memory_task).is_some()
    }

    /// Observe network requests recorded via [`track_network_request`],
    /// accumulating running statistics.
    ///
    /// [`track_network_request`]: Self::track_network_request
    pub fn track_network(&self, options: NetworkTrackingOptions) -> NetworkSubscription {
        let stats = Arc::new(Mutex::new(NetworkStats::default()));
        let NetworkTrackingOptions {
            url_pattern,
            on_stats,
        } = options;

        let accumulated = Arc::clone(&stats);
        let callback: RecordCallback = Arc::new(move |metric: &Metric| {
            let MetricData::Network { url, status } = &metric.metadata else {
                return;
            };
            if let Some(pattern) = &url_pattern {
                if !pattern.is_match(url) {
                    return;
                }
            }

            let current = {
                let mut stats = lock(&accumulated);
                stats.record(metric.value, *status);
                stats.clone()
            };
            if let Some(on_stats) = &on_stats {
                on_stats(&current);
            }
        });

        let id = self.subscribe(NETWORK_CHANNEL, Subscriber::Record(callback));
        NetworkSubscription {
            collector: Arc::downgrade(&self.shared),
            id,
            stats,
        }
    }

    /// Record a completed network request.
    pub fn track_network_request(&self, url: &str, duration: f64, status: Option<u16>) {
        if !self.is_enabled() || !is_valid_input(url, Some(duration)) {
            tracing::debug!(
                target: "perf_monitor::collector",
                url,
                duration,
                "ignoring network measurement"
            );
            return;
        }
        let metric = Metric::new(
            duration,
            MetricData::Network {
                url: url.to_string(),
                status,
            },
        );
        self.record(NETWORK_CHANNEL, metric);
    }

    /// Record a named application metric, published on the channel `name`.
    ///
    /// An object under the `tag` key of `metadata` becomes the metric's tags;
    /// the remaining keys are kept alongside.
    pub fn track_custom_metric(
        &self,
        name: &str,
        value: f64,
        metadata: Option<HashMap<String, Value>>,
    ) {
        if !self.is_enabled() || !is_valid_input(name, Some(value)) {
            tracing::debug!(
                target: "perf_monitor::collector",
                name,
                value,
                "ignoring custom metric"
            );
            return;
        }

        let mut extra = metadata.unwrap_or_default();
        let tags = match extra.remove("tag") {
            Some(Value::Object(map)) => map.into_iter().collect(),
            Some(Value::Null) | None => HashMap::new(),
            Some(other) => {
                extra.insert("tag".to_string(), other);
                HashMap::new()
            }
        };

        let metric = Metric::new(
            value,
            MetricData::Custom {
                name: name.to_string(),
                tags,
                extra,
            },
        );
        self.record(name, metric);
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    fn subscribe(&self, channel: &str, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.subscribers)
            .entry(channel.to_string())
            .or_default()
            .push((id, subscriber));
        id
    }

    /// Register a callback for every metric published on `name`.
    pub fn subscribe_to_metric<F>(&self, name: &str, callback: F) -> SubscriptionId
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.subscribe(name, Subscriber::Value(Arc::new(callback)))
    }

    /// Remove one registration, or the whole channel when `id` is `None`.
    pub fn unsubscribe_from_metric(&self, name: &str, id: Option<SubscriptionId>) {
        let mut subscribers = lock(&self.shared.subscribers);
        match id {
            None => {
                subscribers.remove(name);
            }
            Some(id) => {
                if let Some(channel) = subscribers.get_mut(name) {
                    channel.retain(|(existing, _)| *existing != id);
                    if channel.is_empty() {
                        subscribers.remove(name);
                    }
                }
            }
        }
    }

    /// Number of registrations on a channel.
    pub fn subscriber_count(&self, name: &str) -> usize {
        lock(&self.shared.subscribers).get(name).map_or(0, Vec::len)
    }

    // -------------------------------------------------------------------------
    // Gate and buffer access
    // -------------------------------------------------------------------------

    pub fn enable(&self) {
        self.shared.enabled.store(true, Ordering::SeqCst);
    }

    /// Stop recording. Also stops periodic memory sampling.
    pub fn disable(&self) {
        self.shared.enabled.store(false, Ordering::SeqCst);
        self.stop_memory_tracking();
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    /// Buffer contents partitioned by metric kind.
    pub fn get_metrics(&self) -> PartitionedMetrics {
        PartitionedMetrics::from_metrics(lock(&self.shared.store).buffer.get_data())
    }

    /// Aggregated view of the buffer used for alert evaluation.
    pub fn snapshot(&self) -> MetricsSnapshot {
        lock(&self.shared.store).aggregate.snapshot()
    }

    pub fn clear_metrics(&self) {
        lock(&self.shared.store).clear();
    }

    /// Number of metrics currently buffered.
    pub fn buffer_len(&self) -> usize {
        lock(&self.shared.store).buffer.get_size()
    }

    /// Clamped buffer capacity.
    pub fn buffer_capacity(&self) -> usize {
        lock(&self.shared.store).buffer.get_max_size()
    }
}

// =============================================================================
// Render tracking
// =============================================================================

struct PendingRender {
    collector: MetricsCollector,
    component_id: String,
    start: Instant,
}

/// Completion handle returned by [`MetricsCollector::track_render`].
///
/// Dropping the tracker without completing it records nothing.
#[must_use = "a render tracker records nothing until `complete` is called"]
pub struct RenderTracker {
    pending: Option<PendingRender>,
}

impl RenderTracker {
    /// A tracker that records nothing.
    pub fn inert() -> Self {
        Self { pending: None }
    }

    /// Check if completing this tracker would record a measurement.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Record the time elapsed since tracking started.
    ///
    /// Returns the recorded duration in milliseconds, if anything was recorded.
    pub fn complete(self) -> Option<f64> {
        let pending = self.pending?;
        let elapsed_ms = pending.start.elapsed().as_secs_f64() * 1000.0;
        pending
            .collector
            .record_render(&pending.component_id, elapsed_ms)
            .then_some(elapsed_ms)
    }
}

impl std::fmt::Debug for RenderTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTracker")
            .field("component_id", &self.pending.as_ref().map(|p| &p.component_id))
            .finish()
    }
}

// =============================================================================
// Network tracking
// =============================================================================

/// Running statistics over observed network requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub requests: u64,
    /// Requests that completed with a status of 400 or above
    pub errors: u64,
    pub average_time: f64,
}

impl NetworkStats {
    fn record(&mut self, duration: f64, status: Option<u16>) {
        self.requests += 1;
        if status.is_some_and(|s| s >= 400) {
            self.errors += 1;
        }
        self.average_time += (duration - self.average_time) / self.requests as f64;
    }
}

/// Options for [`MetricsCollector::track_network`].
#[derive(Clone, Default)]
pub struct NetworkTrackingOptions {
    url_pattern: Option<Regex>,
    on_stats: Option<NetworkStatsCallback>,
}

impl NetworkTrackingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only count requests whose URL matches `pattern`.
    pub fn with_url_pattern(mut self, pattern: &str) -> PerfResult<Self> {
        self.url_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Invoke `callback` with the updated statistics after each counted request.
    pub fn on_stats<F>(mut self, callback: F) -> Self
    where
        F: Fn(&NetworkStats) + Send + Sync + 'static,
    {
        self.on_stats = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for NetworkTrackingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkTrackingOptions")
            .field("url_pattern", &self.url_pattern.as_ref().map(Regex::as_str))
            .field("on_stats", &self.on_stats.is_some())
            .finish()
    }
}

/// Registration created by [`MetricsCollector::track_network`].
#[derive(Debug)]
pub struct NetworkSubscription {
    collector: Weak<CollectorShared>,
    id: SubscriptionId,
    stats: Arc<Mutex<NetworkStats>>,
}

impl NetworkSubscription {
    /// A subscription that observes nothing.
    pub fn inert() -> Self {
        Self {
            collector: Weak::new(),
            id: SubscriptionId(0),
            stats: Arc::new(Mutex::new(NetworkStats::default())),
        }
    }

    /// Statistics accumulated so far.
    pub fn stats(&self) -> NetworkStats {
        lock(&self.stats).clone()
    }

    /// Stop observing requests.
    pub fn unsubscribe(self) {
        if let Some(shared) = self.collector.upgrade() {
            MetricsCollector { shared }.unsubscribe_from_metric(NETWORK_CHANNEL, Some(self.id));
        }
    }
}
