//! Derived usage summaries over recent samples.
//!
//! The housekeeper feeds every sample into a per-container [`StatsSummary`].
//! Per-second observations (CPU rate in millicores, memory working set) are
//! kept for the last minute and rolled up into minute aggregates, which in
//! turn roll up into hour aggregates. Hour-over-hour and day-level values
//! are percentiles of percentiles and therefore approximations.

use std::collections::VecDeque;
use std::time::SystemTime;

use crate::stats::{ContainerSpec, ContainerStats};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("none of the resources are being tracked for this container")]
    NoResourcesTracked,
    #[error("expected increasing timestamps, got {current:?} after {previous:?}")]
    OutOfOrderSample {
        previous: SystemTime,
        current: SystemTime,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

const SECONDS_PER_MINUTE: usize = 60;
const MINUTES_PER_HOUR: usize = 60;
const HOURS_PER_DAY: usize = 24;

/// Mean, max and 90th percentile over a window of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Percentiles {
    pub mean: u64,
    pub max: u64,
    pub ninety: u64,
}

/// Aggregated usage over one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    /// How much of the window is backed by samples, 0-100.
    pub percent_complete: u32,
    /// CPU usage in millicores; absent while CPU is not tracked or not
    /// enough samples exist to derive a rate.
    pub cpu: Option<Percentiles>,
    /// Memory working set in bytes; absent while memory is not tracked.
    pub memory: Option<Percentiles>,
}

/// Snapshot of the derived usage windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DerivedStats {
    /// Timestamp of the newest contributing sample.
    pub reference_time: Option<SystemTime>,
    /// Usage derived from the two newest samples.
    pub latest_usage: Usage,
    pub minute_usage: Usage,
    pub hour_usage: Usage,
    pub day_usage: Usage,
}

#[derive(Debug, Clone, Copy)]
struct SecondSample {
    timestamp: SystemTime,
    cpu_millicores: Option<u64>,
    memory: Option<u64>,
}

/// Maintains the rolling windows behind [`DerivedStats`].
#[derive(Debug)]
pub struct StatsSummary {
    has_cpu: bool,
    has_memory: bool,
    /// Timestamp and cumulative CPU nanoseconds of the previous sample.
    prev: Option<(SystemTime, u64)>,
    seconds: VecDeque<SecondSample>,
    minutes: VecDeque<Usage>,
    hours: VecDeque<Usage>,
    current_minute: Option<u64>,
    current_hour: Option<u64>,
}

impl StatsSummary {
    /// # Errors
    ///
    /// Fails when the spec declares neither CPU nor memory; there is
    /// nothing to summarize then and the tracker carries no summary reader.
    pub fn new(spec: &ContainerSpec) -> Result<Self> {
        if !spec.has_cpu && !spec.has_memory {
            return Err(Error::NoResourcesTracked);
        }
        Ok(Self {
            has_cpu: spec.has_cpu,
            has_memory: spec.has_memory,
            prev: None,
            seconds: VecDeque::with_capacity(SECONDS_PER_MINUTE),
            minutes: VecDeque::with_capacity(MINUTES_PER_HOUR),
            hours: VecDeque::with_capacity(HOURS_PER_DAY),
            current_minute: None,
            current_hour: None,
        })
    }

    /// Folds one housekeeping sample into the windows.
    pub fn add_sample(&mut self, stats: &ContainerStats) -> Result<()> {
        let timestamp = stats.timestamp;
        if let Some((previous, _)) = self.prev {
            if timestamp <= previous {
                return Err(Error::OutOfOrderSample {
                    previous,
                    current: timestamp,
                });
            }
        }

        let cpu_millicores = match (self.has_cpu, self.prev) {
            (true, Some((prev_time, prev_total))) => {
                let elapsed_ns = timestamp
                    .duration_since(prev_time)
                    .unwrap_or_default()
                    .as_nanos()
                    .max(1) as u64;
                let delta = stats.cpu.usage.total.saturating_sub(prev_total);
                Some(delta.saturating_mul(1000) / elapsed_ns)
            }
            _ => None,
        };
        let memory = self.has_memory.then_some(stats.memory.working_set);
        self.prev = Some((timestamp, stats.cpu.usage.total));

        self.roll_over(timestamp);

        if cpu_millicores.is_none() && memory.is_none() {
            return Ok(());
        }
        if self.seconds.len() >= SECONDS_PER_MINUTE {
            self.seconds.pop_front();
        }
        self.seconds.push_back(SecondSample {
            timestamp,
            cpu_millicores,
            memory,
        });
        Ok(())
    }

    /// Rolls completed windows up when a minute or hour boundary passed.
    fn roll_over(&mut self, timestamp: SystemTime) {
        let unix_seconds = timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let minute = unix_seconds / 60;
        let hour = unix_seconds / 3600;

        if let Some(current) = self.current_minute {
            if minute != current && !self.seconds.is_empty() {
                let usage = aggregate_seconds(&self.seconds);
                if self.minutes.len() >= MINUTES_PER_HOUR {
                    self.minutes.pop_front();
                }
                self.minutes.push_back(usage);
            }
        }
        self.current_minute = Some(minute);

        if let Some(current) = self.current_hour {
            if hour != current && !self.minutes.is_empty() {
                let usage = aggregate_usages(self.minutes.iter(), MINUTES_PER_HOUR);
                if self.hours.len() >= HOURS_PER_DAY {
                    self.hours.pop_front();
                }
                self.hours.push_back(usage);
            }
        }
        self.current_hour = Some(hour);
    }

    /// Snapshot of the derived windows.
    pub fn derived_stats(&self) -> DerivedStats {
        let latest = self.seconds.back();
        DerivedStats {
            reference_time: latest.map(|sample| sample.timestamp),
            latest_usage: latest.map(latest_usage).unwrap_or_default(),
            minute_usage: aggregate_seconds(&self.seconds),
            hour_usage: aggregate_usages(self.minutes.iter(), MINUTES_PER_HOUR),
            day_usage: aggregate_usages(self.hours.iter(), HOURS_PER_DAY),
        }
    }
}

fn latest_usage(sample: &SecondSample) -> Usage {
    let single = |value: u64| Percentiles {
        mean: value,
        max: value,
        ninety: value,
    };
    Usage {
        percent_complete: 100,
        cpu: sample.cpu_millicores.map(single),
        memory: sample.memory.map(single),
    }
}

fn aggregate_seconds(seconds: &VecDeque<SecondSample>) -> Usage {
    let cpu: Vec<u64> = seconds.iter().filter_map(|s| s.cpu_millicores).collect();
    let memory: Vec<u64> = seconds.iter().filter_map(|s| s.memory).collect();
    Usage {
        percent_complete: percent_complete(seconds.len(), SECONDS_PER_MINUTE),
        cpu: percentiles(&cpu),
        memory: percentiles(&memory),
    }
}

/// Combines already-aggregated windows: mean of means, max of maxes and the
/// 90th percentile of the per-window 90th percentiles.
fn aggregate_usages<'a>(usages: impl Iterator<Item = &'a Usage>, expected: usize) -> Usage {
    let mut count = 0;
    let (mut cpu_means, mut cpu_maxes, mut cpu_nineties) = (Vec::new(), Vec::new(), Vec::new());
    let (mut mem_means, mut mem_maxes, mut mem_nineties) = (Vec::new(), Vec::new(), Vec::new());
    for usage in usages {
        count += 1;
        if let Some(cpu) = usage.cpu {
            cpu_means.push(cpu.mean);
            cpu_maxes.push(cpu.max);
            cpu_nineties.push(cpu.ninety);
        }
        if let Some(memory) = usage.memory {
            mem_means.push(memory.mean);
            mem_maxes.push(memory.max);
            mem_nineties.push(memory.ninety);
        }
    }

    let combine = |means: &[u64], maxes: &[u64], nineties: &[u64]| {
        Some(Percentiles {
            mean: percentiles(means)?.mean,
            max: maxes.iter().copied().max()?,
            ninety: percentiles(nineties)?.ninety,
        })
    };
    Usage {
        percent_complete: percent_complete(count, expected),
        cpu: combine(&cpu_means, &cpu_maxes, &cpu_nineties),
        memory: combine(&mem_means, &mem_maxes, &mem_nineties),
    }
}

fn percent_complete(actual: usize, expected: usize) -> u32 {
    (100 * actual / expected).min(100) as u32
}

fn percentiles(values: &[u64]) -> Option<Percentiles> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mean = sorted.iter().sum::<u64>() / sorted.len() as u64;
    let ninety_index = (sorted.len() * 9).div_ceil(10) - 1;
    Some(Percentiles {
        mean,
        max: *sorted.last().unwrap(),
        ninety: sorted[ninety_index],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spec(cpu: bool, memory: bool) -> ContainerSpec {
        ContainerSpec {
            has_cpu: cpu,
            has_memory: memory,
            ..ContainerSpec::default()
        }
    }

    fn sample(seconds: u64, cpu_total_ns: u64, working_set: u64) -> ContainerStats {
        let mut stats =
            ContainerStats::new(SystemTime::UNIX_EPOCH + Duration::from_secs(seconds));
        stats.cpu.usage.total = cpu_total_ns;
        stats.memory.working_set = working_set;
        stats
    }

    #[test]
    fn test_requires_cpu_or_memory() {
        assert!(matches!(
            StatsSummary::new(&spec(false, false)),
            Err(Error::NoResourcesTracked)
        ));
        assert!(StatsSummary::new(&spec(true, false)).is_ok());
        assert!(StatsSummary::new(&spec(false, true)).is_ok());
    }

    #[test]
    fn test_rejects_out_of_order_samples() {
        let mut summary = StatsSummary::new(&spec(true, true)).unwrap();
        summary.add_sample(&sample(10, 0, 0)).unwrap();
        let err = summary.add_sample(&sample(10, 100, 0)).unwrap_err();
        assert!(matches!(err, Error::OutOfOrderSample { .. }));
    }

    #[test]
    fn test_cpu_rate_in_millicores() {
        let mut summary = StatsSummary::new(&spec(true, true)).unwrap();
        // Half a core: 500ms of CPU per second of wall time.
        summary.add_sample(&sample(0, 0, 1024)).unwrap();
        summary
            .add_sample(&sample(1, 500_000_000, 1024))
            .unwrap();

        let derived = summary.derived_stats();
        let cpu = derived.latest_usage.cpu.unwrap();
        assert_eq!(cpu.mean, 500);
        assert_eq!(derived.latest_usage.memory.unwrap().max, 1024);
        assert_eq!(
            derived.reference_time,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1))
        );
    }

    #[test]
    fn test_minute_window_aggregates() {
        let mut summary = StatsSummary::new(&spec(true, true)).unwrap();
        for i in 0..=60u64 {
            // Constant 250 millicores, memory growing by 10 bytes a second.
            summary
                .add_sample(&sample(i, i * 250_000_000, 1000 + i * 10))
                .unwrap();
        }

        let derived = summary.derived_stats();
        let minute = derived.minute_usage;
        assert_eq!(minute.percent_complete, 100);
        let cpu = minute.cpu.unwrap();
        assert_eq!(cpu.mean, 250);
        assert_eq!(cpu.max, 250);
        assert_eq!(cpu.ninety, 250);
        let memory = minute.memory.unwrap();
        assert!(memory.max > memory.mean);
    }

    #[test]
    fn test_hour_window_fills_from_minute_rollups() {
        let mut summary = StatsSummary::new(&spec(true, false)).unwrap();
        // Samples every 30 seconds across 10 minutes cross 10 minute
        // boundaries.
        for i in 0..20u64 {
            summary
                .add_sample(&sample(i * 30, i * 30_000_000_000, 0))
                .unwrap();
        }

        let derived = summary.derived_stats();
        assert!(derived.hour_usage.cpu.is_some());
        assert!(derived.hour_usage.percent_complete > 0);
        assert_eq!(derived.hour_usage.cpu.unwrap().mean, 1000);
    }

    #[test]
    fn test_empty_summary_has_no_usage() {
        let summary = StatsSummary::new(&spec(true, true)).unwrap();
        let derived = summary.derived_stats();
        assert_eq!(derived.reference_time, None);
        assert!(derived.latest_usage.cpu.is_none());
        assert!(derived.minute_usage.memory.is_none());
        assert_eq!(derived.minute_usage.percent_complete, 0);
    }
}
