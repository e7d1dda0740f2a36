//! Integration tests for performance monitoring
//!
//! These tests drive the buffer, collector, alert manager and monitor facade
//! through the public API only, the way a host application would.

use perf_monitor::{
    AlertConfig, AlertContext, AlertManager, AlertSeverity, AlertThreshold, MemoryUsage, Metric,
    MetricBuffer, MetricData, MetricKind, MetricsCollector, MetricsSnapshot, MonitorConfig,
    PerformanceMonitor, StaticMemoryProbe,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn custom_metric(id: &str, value: f64) -> Metric {
    let mut metric = Metric::new(
        value,
        MetricData::Custom {
            name: "test".to_string(),
            tags: Default::default(),
            extra: Default::default(),
        },
    );
    metric.id = id.to_string();
    metric
}

fn monitor(config: MonitorConfig) -> PerformanceMonitor {
    PerformanceMonitor::with_probe(config, Arc::new(StaticMemoryProbe::new(256, 1024)))
}

/// Records every alert transition delivered to it
#[derive(Clone, Default)]
struct AlertLog {
    entries: Arc<Mutex<Vec<(String, bool)>>>,
}

impl AlertLog {
    fn attach(&self, manager: &AlertManager) {
        let entries = Arc::clone(&self.entries);
        manager.subscribe(move |alert| {
            entries
                .lock()
                .unwrap()
                .push((alert.threshold_id.clone(), alert.resolved));
        });
    }

    fn triggered(&self) -> usize {
        self.entries.lock().unwrap().iter().filter(|(_, r)| !r).count()
    }

    fn resolved(&self) -> usize {
        self.entries.lock().unwrap().iter().filter(|(_, r)| *r).count()
    }
}

// =============================================================================
// Buffer
// =============================================================================

#[test]
fn test_buffer_keeps_latest_entries() {
    let mut buffer = MetricBuffer::new(3);
    for id in ["m1", "m2", "m3", "m4", "m5"] {
        buffer.push(custom_metric(id, 1.0));
    }

    let ids: Vec<String> = buffer.get_data().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["m3", "m4", "m5"]);
    assert_eq!(buffer.get_size(), 3);
}

#[test]
fn test_buffer_capacity_is_clamped() {
    assert_eq!(MetricBuffer::new(0).get_max_size(), perf_monitor::constants::MIN_BUFFER_SIZE);
    assert_eq!(
        MetricBuffer::new(usize::MAX).get_max_size(),
        perf_monitor::constants::MAX_BUFFER_SIZE
    );
}

// =============================================================================
// Collector
// =============================================================================

#[test]
fn test_invalid_custom_metrics_are_ignored() {
    let collector = MetricsCollector::new(10);
    collector.track_custom_metric("", 5.0, None);
    collector.track_custom_metric("x", -1.0, None);
    assert_eq!(collector.buffer_len(), 0);
}

#[test]
fn test_render_modes_produce_equivalent_metrics() {
    let immediate = MetricsCollector::new(10);
    let _ = immediate.track_render("A", Some(12.0));

    let bracketed = MetricsCollector::new(10);
    let tracker = bracketed.track_render("A", None);
    std::thread::sleep(Duration::from_millis(12));
    tracker.complete();

    for collector in [&immediate, &bracketed] {
        let render = collector.get_metrics().render;
        assert_eq!(render.len(), 1);
        assert_eq!(render[0].kind(), MetricKind::Render);
        assert_eq!(
            render[0].metadata,
            MetricData::Render {
                component_id: "A".to_string()
            }
        );
        assert!(render[0].value >= 12.0);
    }
}

#[test]
fn test_metrics_serialize_with_type_tag() {
    let collector = MetricsCollector::new(10);
    let _ = collector.track_render("Sidebar", Some(3.0));

    let json = serde_json::to_value(collector.get_metrics()).unwrap();
    assert_eq!(json["render"][0]["type"], "render");
    assert_eq!(json["render"][0]["metadata"]["componentId"], "Sidebar");
}

// =============================================================================
// Sampling
// =============================================================================

#[test]
fn test_sampling_bounds() {
    let never = monitor(MonitorConfig::new().with_sample_rate(0.0).with_buffer_size(2000));
    let always = monitor(MonitorConfig::new().with_sample_rate(1.0).with_buffer_size(2000));

    for i in 0..1000 {
        let _ = never.track_render("A", Some(i as f64));
        let _ = always.track_render("A", Some(i as f64));
    }

    assert_eq!(never.get_metrics().len(), 0);
    assert_eq!(always.get_metrics().render.len(), 1000);
}

// =============================================================================
// Alerting
// =============================================================================

#[test]
fn test_render_alert_trigger_and_resolve() {
    let manager = AlertManager::new();
    let log = AlertLog::default();
    log.attach(&manager);

    let collector = MetricsCollector::new(100);
    let _ = collector.track_render("A", Some(20.0));
    manager.check_thresholds(&collector.snapshot());

    let active = manager.get_active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].threshold_id, "slow-render");
    assert_eq!(active[0].context, AlertContext::Component("A".to_string()));
    assert_eq!(log.triggered(), 1);

    // Re-evaluating an unchanged snapshot emits nothing new
    manager.check_thresholds(&collector.snapshot());
    assert_eq!(log.triggered(), 1);

    let _ = collector.track_render("A", Some(5.0));
    manager.check_thresholds(&collector.snapshot());
    assert!(manager.get_active_alerts().is_empty());
    assert_eq!(log.resolved(), 1);
}

#[test]
fn test_memory_alert_scenario() {
    let manager = AlertManager::new();
    let log = AlertLog::default();
    log.attach(&manager);

    let high = MetricsSnapshot {
        memory: Some(MemoryUsage {
            used: 90,
            total: 100,
            limit: 100,
        }),
        ..Default::default()
    };
    manager.check_thresholds(&high);

    let active = manager.get_active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].threshold_id, "high-memory");
    assert_eq!(active[0].severity, AlertSeverity::Error);

    let low = MetricsSnapshot {
        memory: Some(MemoryUsage {
            used: 50,
            total: 100,
            limit: 100,
        }),
        ..Default::default()
    };
    manager.check_thresholds(&low);
    assert!(manager.get_active_alerts().is_empty());
    assert_eq!((log.triggered(), log.resolved()), (1, 1));
}

#[test]
fn test_removing_threshold_drops_its_alerts() {
    let manager = AlertManager::new();
    let collector = MetricsCollector::new(100);
    let _ = collector.track_render("A", Some(40.0));
    let _ = collector.track_render("B", Some(40.0));
    manager.check_thresholds(&collector.snapshot());
    assert_eq!(manager.get_active_alerts().len(), 2);

    assert!(manager.remove_threshold("slow-render"));
    assert!(manager.get_active_alerts().is_empty());
}

#[test]
fn test_custom_threshold_from_json_config() {
    let json = r#"{
        "alerts": {
            "enabled": true,
            "thresholds": [{
                "id": "slow-search",
                "name": "Slow search",
                "type": "custom",
                "severity": "critical",
                "value": 250,
                "metricName": "search_ms"
            }]
        }
    }"#;
    let config = MonitorConfig::from_json(json).unwrap();
    let threshold: &AlertThreshold = &config.alerts.thresholds[0];
    assert_eq!(threshold.custom_metric_name(), "search_ms");

    let manager = AlertManager::new();
    manager.add_threshold(threshold.clone()).unwrap();

    let collector = MetricsCollector::new(100);
    collector.track_custom_metric("search_ms", 400.0, None);
    manager.check_thresholds(&collector.snapshot());

    let active = manager.get_active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].severity, AlertSeverity::Critical);
    assert_eq!(active[0].context, AlertContext::Metric("search_ms".to_string()));
}

#[tokio::test]
async fn test_configure_alert_callbacks_fire_once() {
    let monitor = monitor(MonitorConfig::default());
    let triggered = Arc::new(AtomicUsize::new(0));
    let resolved = Arc::new(AtomicUsize::new(0));
    let (t, r) = (Arc::clone(&triggered), Arc::clone(&resolved));

    let registration = monitor
        .configure_alert(
            "latency",
            AlertConfig::new(100.0, AlertSeverity::Error)
                .on_trigger(move |_| {
                    t.fetch_add(1, Ordering::SeqCst);
                })
                .on_resolve(move |_| {
                    r.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .await
        .unwrap();

    monitor.track_custom_metric("latency", 150.0, None);
    monitor.track_custom_metric("latency", 150.0, None);
    assert_eq!(triggered.load(Ordering::SeqCst), 1);

    monitor.track_custom_metric("latency", 50.0, None);
    assert_eq!(resolved.load(Ordering::SeqCst), 1);
    assert_eq!(triggered.load(Ordering::SeqCst), 1);

    registration.dispose();
    monitor.track_custom_metric("latency", 500.0, None);
    assert_eq!(triggered.load(Ordering::SeqCst), 1);
    assert!(monitor.active_alerts().is_empty());
}

#[tokio::test]
async fn test_monitor_alerts_follow_tracked_metrics() {
    let monitor = monitor(MonitorConfig::new().with_alerts(Vec::new()));
    monitor.enable_alerting().await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    monitor
        .subscribe_to_alerts(move |alert| sink.lock().unwrap().push(alert.clone()))
        .unwrap();

    monitor.track_network_request("/api/slow", 1500.0, Some(200));
    assert_eq!(monitor.active_alerts().len(), 1);
    assert_eq!(monitor.active_alerts()[0].threshold_id, "slow-network");

    monitor.track_network_request("/api/slow", 200.0, Some(200));
    assert!(monitor.active_alerts().is_empty());

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 2);
    assert!(!received[0].resolved);
    assert!(received[1].resolved);
    assert!(received[1].resolved_at.is_some());
}

#[tokio::test]
async fn test_alert_evaluation_cost_stays_flat_with_many_urls() {
    let monitor = monitor(MonitorConfig::new().with_buffer_size(10_000));
    monitor.enable_alerting().await;

    let track_batch = |range: std::ops::Range<usize>| {
        let start = Instant::now();
        for i in range {
            monitor.track_network_request(&format!("/api/item/{}", i), 10.0, Some(200));
        }
        start.elapsed()
    };

    let early = track_batch(0..1_000);
    let _ = track_batch(1_000..8_000);
    let late = track_batch(8_000..9_000);

    assert_eq!(monitor.snapshot().network.requests.len(), 9_000);
    assert!(
        late <= early * 5 + Duration::from_millis(100),
        "early batch {:?}, late batch {:?}",
        early,
        late
    );

    monitor.track_network_request("/api/item/42", 1500.0, Some(200));
    let active = monitor.active_alerts();
    assert_eq!(active.len(), 1);
    assert!(active[0].message.contains("url: /api/item/42, slow requests: 1"));
}

#[tokio::test]
async fn test_alerts_resolve_when_metrics_leave_the_buffer() {
    let monitor = monitor(MonitorConfig::new().with_buffer_size(3));
    monitor.enable_alerting().await;

    let _ = monitor.track_render("Editor", Some(30.0));
    monitor.track_custom_metric("latency", 1.0, None);
    assert_eq!(monitor.active_alerts().len(), 1);

    for _ in 0..3 {
        monitor.track_custom_metric("latency", 1.0, None);
    }
    assert!(monitor.active_alerts().is_empty());

    let _ = monitor.track_render("Editor", Some(30.0));
    assert_eq!(monitor.active_alerts().len(), 1);
    monitor.clear_metrics();
    assert!(monitor.active_alerts().is_empty());
}
