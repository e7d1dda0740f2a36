//! Memory probes: where heap readings come from.
//!
//! The collector never talks to the platform directly; it asks a
//! [`MemoryProbe`]. A probe that cannot read anything returns `None` and the
//! collector records zeros.

use serde::{Deserialize, Serialize};

/// Raw heap reading from the host, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeapSample {
    pub used: u64,
    pub total: u64,
    /// Hard ceiling, if the host exposes one
    pub limit: Option<u64>,
}

/// Source of heap usage readings.
pub trait MemoryProbe: Send + Sync + std::fmt::Debug {
    /// Read current heap usage, or `None` if unavailable.
    fn sample(&self) -> Option<HeapSample>;
}

/// Reads the current process's resident memory from the OS.
///
/// On Linux, `used` is `VmRSS` from `/proc/self/status` and `total` is
/// `MemTotal` from `/proc/meminfo`. Elsewhere no reading is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> Option<HeapSample> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let used = find_kb_field(&status, "VmRSS:")? * 1024;

        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let total = find_kb_field(&meminfo, "MemTotal:")? * 1024;

        Some(HeapSample {
            used,
            total,
            limit: None,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> Option<HeapSample> {
        None
    }
}

/// Probe for hosts without a memory API; always yields nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMemoryProbe;

impl MemoryProbe for NullMemoryProbe {
    fn sample(&self) -> Option<HeapSample> {
        None
    }
}

/// Probe returning a fixed reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticMemoryProbe {
    sample: HeapSample,
}

impl StaticMemoryProbe {
    pub fn new(used: u64, total: u64) -> Self {
        Self {
            sample: HeapSample {
                used,
                total,
                limit: None,
            },
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.sample.limit = Some(limit);
        self
    }
}

impl MemoryProbe for StaticMemoryProbe {
    fn sample(&self) -> Option<HeapSample> {
        Some(self.sample)
    }
}

/// Parse a `Key:   1234 kB` line out of a `/proc` file.
fn find_kb_field(contents: &str, key: &str) -> Option<u64> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}
