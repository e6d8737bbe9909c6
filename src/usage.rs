//! CPU and memory percentages from raw stat samples
//!
//! The sample types mirror the JSON documents of the container runtime's stats
//! stream. Every field is lenient: missing or `null` values decode as zero, so
//! a partial sample yields `0` percentages instead of an error.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// cgroup v2 page cache counter
const INACTIVE_FILE: &str = "inactive_file";

/// cgroup v1 page cache counter
const TOTAL_INACTIVE_FILE: &str = "total_inactive_file";

/// One raw sample from the stats stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSample {
    #[serde(deserialize_with = "null_as_default")]
    pub cpu_stats: CpuStats,
    #[serde(deserialize_with = "null_as_default")]
    pub precpu_stats: CpuStats,
    #[serde(deserialize_with = "null_as_default")]
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuStats {
    #[serde(deserialize_with = "null_as_default")]
    pub cpu_usage: CpuUsage,
    #[serde(deserialize_with = "null_as_default")]
    pub system_cpu_usage: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub online_cpus: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuUsage {
    #[serde(deserialize_with = "null_as_default")]
    pub total_usage: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub percpu_usage: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStats {
    #[serde(deserialize_with = "null_as_default")]
    pub usage: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub limit: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub stats: HashMap<String, u64>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl CpuStats {
    /// A reading without system usage carries no information (first sample of a stream)
    pub fn is_empty(&self) -> bool {
        self.system_cpu_usage == 0
    }
}

/// CPU utilization between two readings.
///
/// Returns `0` unless both the container and the system usage grew. The result
/// is scaled by the number of online CPUs and therefore not clamped to 100.
pub fn cpu_percent(current: &CpuStats, previous: &CpuStats) -> f64 {
    let cpu_delta = current.cpu_usage.total_usage as f64 - previous.cpu_usage.total_usage as f64;
    let system_delta = current.system_cpu_usage as f64 - previous.system_cpu_usage as f64;

    let online_cpus = match current.online_cpus {
        0 => current.cpu_usage.percpu_usage.len() as f64,
        cpus => cpus as f64,
    };

    if system_delta > 0.0 && cpu_delta > 0.0 {
        (cpu_delta / system_delta) * online_cpus * 100.0
    } else {
        0.0
    }
}

/// Memory usage without the inactive page cache.
///
/// Prefers the cgroup v2 counter and falls back to the cgroup v1 one, a counter
/// is only subtracted when it is smaller than the total usage.
pub fn used_memory_no_cache(memory: &MemoryStats) -> f64 {
    [INACTIVE_FILE, TOTAL_INACTIVE_FILE]
        .iter()
        .filter_map(|key| memory.stats.get(*key))
        .find(|cache| **cache < memory.usage)
        .map_or(memory.usage, |cache| memory.usage - cache) as f64
}

/// Memory utilization relative to `limit`, `0` when no limit is set
pub fn memory_percent(limit: f64, memory: &MemoryStats) -> f64 {
    if limit > 0.0 {
        used_memory_no_cache(memory) / limit * 100.0
    } else {
        0.0
    }
}
