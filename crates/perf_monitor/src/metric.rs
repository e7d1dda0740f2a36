//! Metric records and the views derived from them.

use crate::aggregate::MetricAggregate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Kind of observation a metric represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Component render duration
    Render,
    /// Heap usage reading
    Memory,
    /// Network request duration
    Network,
    /// Application-defined measurement
    Custom,
}

impl MetricKind {
    /// Lower-case name used in logs and serialized output.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Render => "render",
            MetricKind::Memory => "memory",
            MetricKind::Network => "network",
            MetricKind::Custom => "custom",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific metadata attached to a metric.
///
/// Serialized inside a [`Metric`] as a top-level `type` next to a
/// `metadata` object holding the variant's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "metadata", rename_all = "lowercase")]
pub enum MetricData {
    /// A component finished rendering
    #[serde(rename_all = "camelCase")]
    Render { component_id: String },
    /// Heap usage at the time of sampling, in bytes
    #[serde(rename_all = "camelCase")]
    Memory { heap_used: u64, heap_total: u64 },
    /// A network request completed
    Network {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },
    /// A named application measurement
    Custom {
        name: String,
        #[serde(default)]
        tags: HashMap<String, Value>,
        #[serde(default)]
        extra: HashMap<String, Value>,
    },
}

impl MetricData {
    /// The metric kind this metadata belongs to.
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricData::Render { .. } => MetricKind::Render,
            MetricData::Memory { .. } => MetricKind::Memory,
            MetricData::Network { .. } => MetricKind::Network,
            MetricData::Custom { .. } => MetricKind::Custom,
        }
    }
}

/// A single timestamped observation.
///
/// Metrics are created by the collector and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Unique identifier
    pub id: String,
    /// When the observation was made (epoch milliseconds)
    pub timestamp: i64,
    /// Observed value (milliseconds for timings, bytes for memory)
    pub value: f64,
    /// Kind and type-specific metadata
    #[serde(flatten)]
    pub metadata: MetricData,
}

impl Metric {
    /// Create a metric stamped with a fresh id and the current time.
    pub fn new(value: f64, metadata: MetricData) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            value,
            metadata,
        }
    }

    /// The metric kind, derived from its metadata.
    pub fn kind(&self) -> MetricKind {
        self.metadata.kind()
    }
}

/// Normalized memory reading returned by `track_memory`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Bytes in use
    pub used: u64,
    /// Bytes available to the process
    pub total: u64,
    /// Hard ceiling; equals `total` when no ceiling is known
    pub limit: u64,
}

impl MemoryUsage {
    /// Usage as a percentage of total; zero when total is unknown.
    pub fn usage_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 / self.total as f64 * 100.0
    }
}

/// Buffer contents split by metric kind, each in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionedMetrics {
    pub render: Vec<Metric>,
    pub memory: Vec<Metric>,
    pub network: Vec<Metric>,
    pub custom: Vec<Metric>,
}

impl PartitionedMetrics {
    /// Split a sequence of metrics by kind.
    pub fn from_metrics(metrics: impl IntoIterator<Item = Metric>) -> Self {
        let mut partitioned = Self::default();
        for metric in metrics {
            match metric.kind() {
                MetricKind::Render => partitioned.render.push(metric),
                MetricKind::Memory => partitioned.memory.push(metric),
                MetricKind::Network => partitioned.network.push(metric),
                MetricKind::Custom => partitioned.custom.push(metric),
            }
        }
        partitioned
    }

    /// Total number of metrics across all kinds.
    pub fn len(&self) -> usize {
        self.render.len() + self.memory.len() + self.network.len() + self.custom.len()
    }

    /// Check if there are no metrics of any kind.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Render statistics for a single component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMetrics {
    pub render_count: usize,
    pub last_render_time: f64,
    pub average_render_time: f64,
}

/// The latest observation for one request URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub url: String,
    pub duration: f64,
    pub status: Option<u16>,
    pub timestamp: i64,
}

/// Aggregated network activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    /// Most recent request per URL, oldest first
    pub requests: Vec<NetworkRequest>,
    pub total_requests: usize,
    pub errors: usize,
    pub average_time: f64,
}

/// Aggregated view of the buffer that alert thresholds are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub components: HashMap<String, ComponentMetrics>,
    pub network: NetworkMetrics,
    pub memory: Option<MemoryUsage>,
    pub custom: HashMap<String, f64>,
}

impl MetricsSnapshot {
    /// Aggregate metrics given in insertion order.
    pub fn from_metrics<'a>(metrics: impl IntoIterator<Item = &'a Metric>) -> Self {
        let mut aggregate = MetricAggregate::default();
        for metric in metrics {
            aggregate.add(metric);
        }
        aggregate.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(component: &str, value: f64) -> Metric {
        Metric::new(
            value,
            MetricData::Render {
                component_id: component.to_string(),
            },
        )
    }

    fn network(url: &str, value: f64, status: Option<u16>) -> Metric {
        Metric::new(
            value,
            MetricData::Network {
                url: url.to_string(),
                status,
            },
        )
    }

    #[test]
    fn test_metric_new_assigns_unique_ids() {
        let a = render("A", 1.0);
        let b = render("A", 1.0);
        assert_ne!(a.id, b.id);
        assert!(a.timestamp > 0);
        assert_eq!(a.kind(), MetricKind::Render);
    }

    #[test]
    fn test_metric_serializes_camel_case_metadata() {
        let metric = Metric::new(
            1024.0,
            MetricData::Memory {
                heap_used: 1024,
                heap_total: 4096,
            },
        );
        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["type"], "memory");
        assert!(json["metadata"].get("type").is_none());
        assert_eq!(json["metadata"]["heapUsed"], 1024);
        assert_eq!(json["metadata"]["heapTotal"], 4096);

        let json = serde_json::to_value(render("Toolbar", 3.0)).unwrap();
        assert_eq!(json["type"], "render");
        assert_eq!(json["metadata"]["componentId"], "Toolbar");
    }

    #[test]
    fn test_metric_deserializes_top_level_type() {
        let json = r#"{
            "id": "m1",
            "timestamp": 1700000000000,
            "type": "network",
            "value": 120.0,
            "metadata": {"url": "/api/items", "status": 404}
        }"#;
        let metric: Metric = serde_json::from_str(json).unwrap();
        assert_eq!(metric.kind(), MetricKind::Network);
        assert_eq!(
            metric.metadata,
            MetricData::Network {
                url: "/api/items".to_string(),
                status: Some(404),
            }
        );
    }

    #[test]
    fn test_memory_usage_percent() {
        let usage = MemoryUsage {
            used: 90,
            total: 100,
            limit: 100,
        };
        assert_eq!(usage.usage_percent(), 90.0);
        assert_eq!(MemoryUsage::default().usage_percent(), 0.0);
    }

    #[test]
    fn test_partitioned_metrics() {
        let metrics = vec![
            render("A", 1.0),
            network("/api", 20.0, Some(200)),
            render("B", 2.0),
        ];
        let partitioned = PartitionedMetrics::from_metrics(metrics);
        assert_eq!(partitioned.render.len(), 2);
        assert_eq!(partitioned.network.len(), 1);
        assert!(partitioned.memory.is_empty());
        assert_eq!(partitioned.len(), 3);
        assert_eq!(partitioned.render[1].value, 2.0);
    }

    #[test]
    fn test_snapshot_component_stats() {
        let metrics = vec![render("A", 10.0), render("A", 20.0), render("B", 5.0)];
        let snapshot = MetricsSnapshot::from_metrics(&metrics);

        let a = &snapshot.components["A"];
        assert_eq!(a.render_count, 2);
        assert_eq!(a.last_render_time, 20.0);
        assert_eq!(a.average_render_time, 15.0);
        assert_eq!(snapshot.components["B"].render_count, 1);
    }

    #[test]
    fn test_snapshot_keeps_latest_request_per_url() {
        let metrics = vec![
            network("/a", 100.0, Some(200)),
            network("/b", 300.0, Some(500)),
            network("/a", 50.0, Some(200)),
        ];
        let snapshot = MetricsSnapshot::from_metrics(&metrics);

        assert_eq!(snapshot.network.total_requests, 3);
        assert_eq!(snapshot.network.errors, 1);
        assert_eq!(snapshot.network.average_time, 150.0);
        assert_eq!(snapshot.network.requests.len(), 2);
        assert_eq!(snapshot.network.requests[0].url, "/b");
        assert_eq!(snapshot.network.requests[1].duration, 50.0);
    }

    #[test]
    fn test_snapshot_memory_and_custom() {
        let metrics = vec![
            Metric::new(
                50.0,
                MetricData::Memory {
                    heap_used: 50,
                    heap_total: 100,
                },
            ),
            Metric::new(
                7.0,
                MetricData::Custom {
                    name: "latency".to_string(),
                    tags: HashMap::new(),
                    extra: HashMap::new(),
                },
            ),
        ];
        let snapshot = MetricsSnapshot::from_metrics(&metrics);
        assert_eq!(snapshot.memory.unwrap().used, 50);
        assert_eq!(snapshot.custom["latency"], 7.0);
    }
}
