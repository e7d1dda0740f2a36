//! Running aggregate over the metric buffer.
//!
//! [`MetricAggregate`] mirrors the buffer contents as per-context counters.
//! The collector adds every recorded metric and removes every evicted one,
//! so alert evaluation reads the latest state of a context in constant or
//! logarithmic time instead of rescanning the buffer.

use crate::metric::{
    ComponentMetrics, MemoryUsage, Metric, MetricData, MetricsSnapshot, NetworkMetrics,
    NetworkRequest,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Request duration ordered with `f64::total_cmp`.
#[derive(Debug, Clone, Copy)]
struct OrderedMs(f64);

impl PartialEq for OrderedMs {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedMs {}

impl PartialOrd for OrderedMs {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedMs {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Default)]
struct ComponentEntry {
    count: usize,
    total: f64,
    last: f64,
}

#[derive(Debug, Clone)]
struct UrlEntry {
    /// Buffered requests for this URL
    count: usize,
    /// Order of the latest request among all URLs
    seq: u64,
    latest: NetworkRequest,
}

#[derive(Debug, Clone, Default)]
struct CustomEntry {
    count: usize,
    latest: f64,
}

/// Per-context totals and latest readings for the buffered metrics.
#[derive(Debug, Clone, Default)]
pub(crate) struct MetricAggregate {
    components: HashMap<String, ComponentEntry>,
    memory: Option<MemoryUsage>,
    memory_count: usize,
    urls: HashMap<String, UrlEntry>,
    /// Latest duration of every URL, for slowest-request queries
    by_duration: BTreeMap<(OrderedMs, u64), String>,
    network_requests: usize,
    network_errors: usize,
    network_total: f64,
    next_seq: u64,
    custom: HashMap<String, CustomEntry>,
}

fn is_error(status: Option<u16>) -> bool {
    status.is_some_and(|s| s >= 400)
}

impl MetricAggregate {
    /// Fold a newly buffered metric in.
    pub(crate) fn add(&mut self, metric: &Metric) {
        match &metric.metadata {
            MetricData::Render { component_id } => {
                let entry = self.components.entry(component_id.clone()).or_default();
                entry.count += 1;
                entry.total += metric.value;
                entry.last = metric.value;
            }
            MetricData::Memory {
                heap_used,
                heap_total,
            } => {
                self.memory_count += 1;
                self.memory = Some(MemoryUsage {
                    used: *heap_used,
                    total: *heap_total,
                    limit: *heap_total,
                });
            }
            MetricData::Network { url, status } => {
                self.network_requests += 1;
                self.network_total += metric.value;
                if is_error(*status) {
                    self.network_errors += 1;
                }

                let seq = self.next_seq;
                self.next_seq += 1;
                let latest = NetworkRequest {
                    url: url.clone(),
                    duration: metric.value,
                    status: *status,
                    timestamp: metric.timestamp,
                };
                let count = match self.urls.remove(url) {
                    Some(previous) => {
                        self.by_duration
                            .remove(&(OrderedMs(previous.latest.duration), previous.seq));
                        previous.count + 1
                    }
                    None => 1,
                };
                self.by_duration.insert((OrderedMs(metric.value), seq), url.clone());
                self.urls.insert(url.clone(), UrlEntry { count, seq, latest });
            }
            MetricData::Custom { name, .. } => {
                let entry = self.custom.entry(name.clone()).or_default();
                entry.count += 1;
                entry.latest = metric.value;
            }
        }
    }

    /// Take an evicted metric out.
    ///
    /// Eviction is oldest-first, so the latest reading of a context only
    /// changes when its last buffered metric leaves.
    pub(crate) fn remove(&mut self, metric: &Metric) {
        match &metric.metadata {
            MetricData::Render { component_id } => {
                if let Some(entry) = self.components.get_mut(component_id) {
                    entry.count -= 1;
                    entry.total -= metric.value;
                    if entry.count == 0 {
                        self.components.remove(component_id);
                    }
                }
            }
            MetricData::Memory { .. } => {
                self.memory_count = self.memory_count.saturating_sub(1);
                if self.memory_count == 0 {
                    self.memory = None;
                }
            }
            MetricData::Network { url, status } => {
                self.network_requests = self.network_requests.saturating_sub(1);
                self.network_total -= metric.value;
                if is_error(*status) {
                    self.network_errors = self.network_errors.saturating_sub(1);
                }
                if self.network_requests == 0 {
                    self.network_total = 0.0;
                }

                if let Some(entry) = self.urls.get_mut(url) {
                    entry.count -= 1;
                    if entry.count == 0 {
                        let key = (OrderedMs(entry.latest.duration), entry.seq);
                        self.by_duration.remove(&key);
                        self.urls.remove(url);
                    }
                }
            }
            MetricData::Custom { name, .. } => {
                if let Some(entry) = self.custom.get_mut(name) {
                    entry.count -= 1;
                    if entry.count == 0 {
                        self.custom.remove(name);
                    }
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    /// Duration of the component's most recent render.
    pub(crate) fn last_render(&self, component_id: &str) -> Option<f64> {
        self.components.get(component_id).map(|c| c.last)
    }

    pub(crate) fn memory(&self) -> Option<MemoryUsage> {
        self.memory
    }

    /// The URL whose latest request took longest, with that duration.
    pub(crate) fn slowest_request(&self) -> Option<(&str, f64)> {
        self.by_duration
            .last_key_value()
            .map(|((duration, _), url)| (url.as_str(), duration.0))
    }

    /// Number of URLs whose latest request took longer than `bound`.
    pub(crate) fn slow_request_count(&self, bound: f64) -> usize {
        self.by_duration
            .range((OrderedMs(bound), u64::MAX)..)
            .filter(|((duration, _), _)| duration.0 > bound)
            .count()
    }

    /// Latest value of a custom metric.
    pub(crate) fn custom_value(&self, name: &str) -> Option<f64> {
        self.custom.get(name).map(|c| c.latest)
    }

    /// Materialize the aggregate as a snapshot.
    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        let components = self
            .components
            .iter()
            .map(|(id, entry)| {
                let stats = ComponentMetrics {
                    render_count: entry.count,
                    last_render_time: entry.last,
                    average_render_time: entry.total / entry.count as f64,
                };
                (id.clone(), stats)
            })
            .collect();

        let mut latest: Vec<&UrlEntry> = self.urls.values().collect();
        latest.sort_by_key(|entry| entry.seq);
        let network = NetworkMetrics {
            requests: latest.into_iter().map(|entry| entry.latest.clone()).collect(),
            total_requests: self.network_requests,
            errors: self.network_errors,
            average_time: if self.network_requests > 0 {
                self.network_total / self.network_requests as f64
            } else {
                0.0
            },
        };

        MetricsSnapshot {
            components,
            network,
            memory: self.memory,
            custom: self
                .custom
                .iter()
                .map(|(name, entry)| (name.clone(), entry.latest))
                .collect(),
        }
    }
}
