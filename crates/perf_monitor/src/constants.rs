//! Bounds and defaults shared by the buffer, collector and monitor.

use std::time::Duration;

/// Smallest capacity a metric buffer may be constructed with.
pub const MIN_BUFFER_SIZE: usize = 1;

/// Largest capacity a metric buffer may be constructed with.
pub const MAX_BUFFER_SIZE: usize = 10_000;

/// Capacity used when no buffer size is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 1_000;

/// Shortest period between automatic memory samples.
pub const MIN_MEMORY_INTERVAL: Duration = Duration::from_secs(1);

/// Longest period between automatic memory samples.
pub const MAX_MEMORY_INTERVAL: Duration = Duration::from_secs(60);

/// Memory sampling period used when none is configured.
pub const DEFAULT_MEMORY_INTERVAL: Duration = Duration::from_secs(10);

/// Frame budget for 60fps rendering, in milliseconds.
pub const SLOW_RENDER_THRESHOLD_MS: f64 = 16.0;

/// Heap usage, as a percentage of total, above which memory is considered high.
pub const HIGH_MEMORY_THRESHOLD_PERCENT: f64 = 80.0;

/// Request duration above which a network call is considered slow, in milliseconds.
pub const SLOW_NETWORK_THRESHOLD_MS: f64 = 1_000.0;

/// Channel render metrics are published on.
pub const RENDER_CHANNEL: &str = "render";

/// Channel memory metrics are published on.
pub const MEMORY_CHANNEL: &str = "memory";

/// Channel network metrics are published on.
pub const NETWORK_CHANNEL: &str = "network";
