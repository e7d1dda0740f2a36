//! Performance monitor demo
//!
//! Feeds synthetic render, network, interaction and memory observations into
//! a [`PerformanceMonitor`] and prints the collected metrics and alerts.
//!
//! Usage: `monitor_demo [config.json]`. Set `RUST_LOG=perf_monitor=debug` to
//! see the monitor's own logging.

use anyhow::Context;
use perf_monitor::{
    AlertConfig, AlertSeverity, MonitorConfig, NetworkTrackingOptions, PerformanceMonitor,
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn load_config() -> anyhow::Result<MonitorConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path))?;
            let config = MonitorConfig::from_json(&json)
                .with_context(|| format!("invalid config file {}", path))?;
            tracing::info!("Loaded monitor config from {}", path);
            Ok(config)
        }
        None => Ok(MonitorConfig::new()
            .with_memory_tracking(Duration::from_secs(1))
            .with_alerts(Vec::new())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;
    let monitor = PerformanceMonitor::create(config).await;
    tracing::info!("Starting monitor demo");

    monitor.subscribe_to_alerts(|alert| {
        let state = if alert.resolved { "resolved" } else { "triggered" };
        println!("[alert {}] {}", state, alert.message);
    });

    let search_alert = monitor
        .configure_alert(
            "interaction_search",
            AlertConfig::new(150.0, AlertSeverity::Warning)
                .with_description("search interaction is slow"),
        )
        .await?;

    let network = monitor.track_network(
        NetworkTrackingOptions::new()
            .with_url_pattern(r"^/api/")?
            .on_stats(|stats| {
                tracing::debug!(
                    requests = stats.requests,
                    errors = stats.errors,
                    average_ms = stats.average_time,
                    "network stats updated"
                );
            }),
    );

    // Renders: one over the default frame budget, then back under it
    for (component, duration) in [("Toolbar", 4.0), ("Editor", 22.5), ("Editor", 9.0)] {
        let _ = monitor.track_render(component, Some(duration));
    }

    let tracker = monitor.track_render("Sidebar", None);
    tokio::time::sleep(Duration::from_millis(5)).await;
    if let Some(elapsed) = tracker.complete() {
        tracing::info!("Sidebar rendered in {:.1}ms", elapsed);
    }

    monitor.track_network_request("/api/documents", 120.0, Some(200));
    monitor.track_network_request("/api/search", 1350.0, Some(200));
    monitor.track_network_request("/api/search", 310.0, Some(503));
    monitor.track_network_request("/static/app.js", 2000.0, Some(200));

    monitor.track_interaction("search", 180.0, None);
    monitor.track_interaction("search", 90.0, None);

    if let Some(usage) = monitor.track_memory() {
        tracing::info!(used = usage.used, total = usage.total, "memory sampled");
    }
    if monitor.config().memory_tracking {
        tokio::time::sleep(monitor.config().memory_interval() * 2).await;
    }

    let stats = network.stats();
    println!(
        "API requests: {} ({} errors, {:.1}ms average)",
        stats.requests, stats.errors, stats.average_time
    );

    println!("Snapshot:");
    println!("{}", serde_json::to_string_pretty(&monitor.snapshot())?);
    println!("Active alerts:");
    println!("{}", serde_json::to_string_pretty(&monitor.active_alerts())?);

    search_alert.dispose();
    network.unsubscribe();
    monitor.dispose();
    Ok(())
}
