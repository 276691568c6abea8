use std::time::SystemTime;

use crate::stats::{ContainerReference, ContainerStats};

// Series names understood by the downstream store.
const SER_CPU_USAGE_TOTAL: &str = "cpu_usage_total";
const SER_CPU_USAGE_SYSTEM: &str = "cpu_usage_system";
const SER_CPU_USAGE_USER: &str = "cpu_usage_user";
const SER_CPU_THROTTLED: &str = "cpu_throttled";
/// Smoothed average of the number of runnable tasks x 1000.
const SER_LOAD_AVERAGE: &str = "load_average";
const SER_MEMORY_USAGE: &str = "memory_usage";
const SER_MEMORY_RSS: &str = "memory_rss";
const SER_MEMORY_WORKING_SET: &str = "memory_working_set";
/// Cumulative count of bytes received.
const SER_RX_BYTES: &str = "rx_bytes";
/// Cumulative count of receive errors encountered.
const SER_RX_ERRORS: &str = "rx_errors";
/// Cumulative count of bytes transmitted.
const SER_TX_BYTES: &str = "tx_bytes";
/// Cumulative count of transmit errors encountered.
const SER_TX_ERRORS: &str = "tx_errors";
const SER_FS_USAGE: &str = "fs_usage";
const SER_FS_LIMIT: &str = "fs_limit";
/// Serviced I/O bytes, read + write summed across devices.
const SER_IO_BYTES: &str = "io_bytes";
/// Serviced I/O operations, read + write summed across devices.
const SER_IO_OPS: &str = "io_ops";

/// One measurement point destined for the time-series store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePoint {
    pub series: &'static str,
    /// Canonical name of the container the point belongs to.
    pub container: String,
    /// Block device the point is scoped to, for filesystem series.
    pub device: Option<String>,
    pub timestamp: SystemTime,
    pub value: i64,
}

/// Converts one sample into the flat list of points the store accepts.
pub(super) fn points_from_stats(
    reference: &ContainerReference,
    stats: &ContainerStats,
) -> Vec<SamplePoint> {
    let mut points = Vec::with_capacity(14 + 2 * stats.filesystem.len());
    let mut push = |series: &'static str, value: i64| {
        points.push(SamplePoint {
            series,
            container: reference.name.clone(),
            device: None,
            timestamp: stats.timestamp,
            value,
        });
    };

    push(SER_CPU_USAGE_TOTAL, stats.cpu.usage.total as i64);
    push(SER_CPU_USAGE_SYSTEM, stats.cpu.usage.system as i64);
    push(SER_CPU_USAGE_USER, stats.cpu.usage.user as i64);
    push(SER_CPU_THROTTLED, stats.cpu.usage.throttled as i64);
    push(SER_LOAD_AVERAGE, i64::from(stats.cpu.load_average));

    push(SER_MEMORY_USAGE, stats.memory.usage as i64);
    push(SER_MEMORY_RSS, stats.memory.rss as i64);
    push(SER_MEMORY_WORKING_SET, stats.memory.working_set as i64);

    let (mut io_bytes, mut io_ops) = (0u64, 0u64);
    for disk in &stats.diskio.service_bytes {
        io_bytes += disk.read + disk.write;
    }
    for disk in &stats.diskio.serviced {
        io_ops += disk.read + disk.write;
    }
    push(SER_IO_BYTES, io_bytes as i64);
    push(SER_IO_OPS, io_ops as i64);

    push(SER_RX_BYTES, stats.network.rx_bytes as i64);
    push(SER_RX_ERRORS, stats.network.rx_errors as i64);
    push(SER_TX_BYTES, stats.network.tx_bytes as i64);
    push(SER_TX_ERRORS, stats.network.tx_errors as i64);

    for fs in &stats.filesystem {
        for (series, value) in [(SER_FS_USAGE, fs.usage), (SER_FS_LIMIT, fs.limit)] {
            points.push(SamplePoint {
                series,
                container: reference.name.clone(),
                device: Some(fs.device.clone()),
                timestamp: stats.timestamp,
                value: value as i64,
            });
        }
    }

    points
}
