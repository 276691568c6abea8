//! Core types representing per-container resource usage samples.
//!
//! A [`ContainerStats`] value is one sample taken by the housekeeper at a
//! wall-clock timestamp. It aggregates CPU, memory, network, filesystem and
//! disk I/O counters together with the most recent task-stat counts and any
//! user-defined custom metrics.
//!
//! Cumulative counters are monotonically non-decreasing within a container's
//! lifetime and sample timestamps are strictly increasing; both invariants
//! are upheld by the single-threaded housekeeper that produces samples.
//!
//! Two samples are considered equal ([`ContainerStats::stats_eq`]) iff every
//! scalar field except the timestamp matches. The housekeeper uses this to
//! detect that nothing changed between two cycles and back its interval off.

mod metrics;
mod spec;

pub use metrics::{CustomMetricSpec, MetricKind, MetricSample, MetricValue};
pub use spec::{ContainerInfo, ContainerReference, ContainerSpec, CpuSpec, MemorySpec};

use std::collections::HashMap;
use std::time::SystemTime;

/// Cumulative CPU usage counters, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuUsage {
    /// Total time consumed on all CPUs (user + system).
    pub total: u64,
    /// Time spent in user space.
    pub user: u64,
    /// Time spent in kernel space.
    pub system: u64,
    /// Time the container spent throttled by the CPU controller.
    pub throttled: u64,
}

/// CPU usage of one sample, including the smoothed load average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuStats {
    pub usage: CpuUsage,
    /// Smoothed number of runnable tasks multiplied by 1000 ("milli-load"),
    /// to avoid floats on the wire. Zero until the load probe has run.
    pub load_average: i32,
}

/// Memory usage of one sample, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    /// Total memory in use, including all memory regardless of when it was
    /// accessed.
    pub usage: u64,
    /// Anonymous and swap-cache memory.
    pub rss: u64,
    /// Amount of working set memory; usage minus cold inactive file pages.
    pub working_set: u64,
}

/// Interface-aggregated network counters of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkStats {
    /// Cumulative count of bytes received.
    pub rx_bytes: u64,
    /// Cumulative count of receive errors encountered.
    pub rx_errors: u64,
    /// Cumulative count of bytes transmitted.
    pub tx_bytes: u64,
    /// Cumulative count of transmit errors encountered.
    pub tx_errors: u64,
}

/// Usage of one filesystem backing the container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FsStats {
    /// Device the filesystem lives on, e.g. `/dev/sda1`.
    pub device: String,
    /// Bytes in use on the device.
    pub usage: u64,
    /// Total capacity of the device, in bytes.
    pub limit: u64,
}

/// Cumulative I/O counters for one block device, partitioned by direction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PerDiskIo {
    /// Device identifier, e.g. `8:0`.
    pub device: String,
    pub read: u64,
    pub write: u64,
}

/// Disk I/O counters of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiskIoStats {
    /// Bytes transferred per device.
    pub service_bytes: Vec<PerDiskIo>,
    /// Operations serviced per device.
    pub serviced: Vec<PerDiskIo>,
}

/// A raw reading of task-state counts from the scheduler.
///
/// The sum of all three fields feeds the load average smoother. The probe
/// time is captured separately by the load probe, so that two readings with
/// identical counts compare equal and trigger probe back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSample {
    /// Number of runnable tasks.
    pub nr_running: u64,
    /// Number of tasks in uninterruptible sleep.
    pub nr_uninterruptible: u64,
    /// Number of tasks waiting on I/O.
    pub nr_iowait: u64,
}

impl LoadSample {
    /// Instantaneous load value: every task that is either runnable or
    /// blocked counts towards the load.
    pub fn total(&self) -> u64 {
        self.nr_running + self.nr_uninterruptible + self.nr_iowait
    }
}

/// One resource usage sample for a container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerStats {
    /// Wall-clock time the sample was taken at.
    pub timestamp: SystemTime,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub network: NetworkStats,
    pub filesystem: Vec<FsStats>,
    pub diskio: DiskIoStats,
    /// Task-stat counts cached from the most recent load probe.
    pub task_stats: LoadSample,
    /// User-defined metrics, keyed by metric name.
    pub custom_metrics: HashMap<String, Vec<MetricValue>>,
}

impl ContainerStats {
    /// Returns an empty sample taken at `timestamp`.
    pub fn new(timestamp: SystemTime) -> Self {
        Self {
            timestamp,
            cpu: CpuStats::default(),
            memory: MemoryStats::default(),
            network: NetworkStats::default(),
            filesystem: Vec::new(),
            diskio: DiskIoStats::default(),
            task_stats: LoadSample::default(),
            custom_metrics: HashMap::new(),
        }
    }

    /// Compares every scalar field of two samples except their timestamps.
    ///
    /// Cumulative counters participate in the comparison, so two samples of
    /// a live container almost never compare equal; the housekeeper only
    /// backs off when the container is genuinely idle.
    pub fn stats_eq(&self, other: &Self) -> bool {
        self.cpu == other.cpu
            && self.memory == other.memory
            && self.network == other.network
            && self.filesystem == other.filesystem
            && self.diskio == other.diskio
            && self.task_stats == other.task_stats
            && self.custom_metrics == other.custom_metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(timestamp: SystemTime, cpu_total: u64) -> ContainerStats {
        let mut stats = ContainerStats::new(timestamp);
        stats.cpu.usage.total = cpu_total;
        stats.cpu.usage.user = cpu_total / 2;
        stats.memory.usage = 4096;
        stats
    }

    #[test]
    fn test_stats_eq_ignores_timestamp() {
        let t0 = SystemTime::UNIX_EPOCH;
        let a = sample(t0, 1_000);
        let b = sample(t0 + Duration::from_secs(1), 1_000);
        assert!(a.stats_eq(&b));
    }

    #[test]
    fn test_stats_eq_detects_counter_change() {
        let t0 = SystemTime::UNIX_EPOCH;
        let a = sample(t0, 1_000);
        let b = sample(t0 + Duration::from_secs(1), 1_001);
        assert!(!a.stats_eq(&b));
    }

    #[test]
    fn test_stats_eq_detects_device_change() {
        let t0 = SystemTime::UNIX_EPOCH;
        let a = sample(t0, 1_000);
        let mut b = sample(t0, 1_000);
        b.filesystem.push(FsStats {
            device: "/dev/sda1".to_owned(),
            usage: 10,
            limit: 100,
        });
        assert!(!a.stats_eq(&b));
    }

    #[test]
    fn test_load_sample_total() {
        let load = LoadSample {
            nr_running: 3,
            nr_uninterruptible: 2,
            nr_iowait: 1,
        };
        assert_eq!(load.total(), 6);
    }
}
