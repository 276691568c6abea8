//! Shared in-memory time-series cache of recent container samples.
//!
//! All trackers on a host share one [`TimeSeriesCache`]. Each container
//! gets a bounded ring of its most recent samples, evicted by age and by
//! count. Every added sample is also fanned out to the configured sinks.
//!
//! Samples for one container arrive in strictly increasing timestamp order
//! because the housekeeper is single-threaded per tracker; no ordering is
//! guaranteed across containers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;

use crate::sink::{self, SinkAdapter};
use crate::stats::{ContainerReference, ContainerStats};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no data for container {0:?}")]
    UnknownContainer(String),
}

pub type Result<T> = std::result::Result<T, Error>;

struct ContainerBuffer {
    samples: VecDeque<ContainerStats>,
}

impl ContainerBuffer {
    fn push(&mut self, stats: ContainerStats, max_age: Duration, max_samples: usize) {
        while self.samples.len() >= max_samples {
            self.samples.pop_front();
        }
        while let Some(front) = self.samples.front() {
            let expired = stats
                .timestamp
                .duration_since(front.timestamp)
                .map(|age| age > max_age)
                .unwrap_or(false);
            if !expired {
                break;
            }
            self.samples.pop_front();
        }
        self.samples.push_back(stats);
    }

    fn recent(
        &self,
        start: Option<SystemTime>,
        end: Option<SystemTime>,
        max_count: usize,
    ) -> Vec<ContainerStats> {
        self.samples
            .iter()
            .rev()
            .filter(|stats| start.is_none_or(|start| stats.timestamp >= start))
            .filter(|stats| end.is_none_or(|end| stats.timestamp <= end))
            .take(max_count)
            .cloned()
            .collect()
    }
}

/// Bounded per-container rings of recent samples, shared by all trackers.
pub struct TimeSeriesCache {
    containers: DashMap<String, ContainerBuffer>,
    sinks: Vec<Arc<dyn SinkAdapter>>,
    max_age: Duration,
    max_samples: usize,
}

impl TimeSeriesCache {
    /// Creates a cache retaining per container at most `max_samples`
    /// samples no older than `max_age` relative to the newest one. Added
    /// samples are forwarded to every sink in `sinks`.
    pub fn new(max_age: Duration, max_samples: usize, sinks: Vec<Arc<dyn SinkAdapter>>) -> Self {
        Self {
            containers: DashMap::new(),
            sinks,
            max_age,
            max_samples,
        }
    }

    /// Appends one sample to the container's ring and forwards it to the
    /// sinks.
    ///
    /// # Errors
    ///
    /// Returns the first sink error encountered; the sample is cached and
    /// offered to every sink regardless.
    pub fn add(&self, reference: &ContainerReference, stats: ContainerStats) -> sink::Result<()> {
        {
            let mut buffer = self
                .containers
                .entry(reference.name.clone())
                .or_insert_with(|| ContainerBuffer {
                    samples: VecDeque::new(),
                });
            buffer.push(stats.clone(), self.max_age, self.max_samples);
        }

        let mut result = Ok(());
        for sink in &self.sinks {
            if let Err(err) = sink.add_stats(reference, &stats) {
                if result.is_ok() {
                    result = Err(err);
                } else {
                    log::error!(
                        "failed to forward stats for {:?} to sink: {err}",
                        reference.name
                    );
                }
            }
        }
        result
    }

    /// Returns up to `max_count` samples of the container, newest first,
    /// optionally restricted to the `[start, end]` timestamp range.
    pub fn recent(
        &self,
        name: &str,
        start: Option<SystemTime>,
        end: Option<SystemTime>,
        max_count: usize,
    ) -> Result<Vec<ContainerStats>> {
        let buffer = self
            .containers
            .get(name)
            .ok_or_else(|| Error::UnknownContainer(name.to_owned()))?;
        Ok(buffer.recent(start, end, max_count))
    }

    /// Drops all cached samples of the container.
    pub fn remove(&self, name: &str) {
        self.containers.remove(name);
    }

    /// Number of containers currently cached.
    pub fn size(&self) -> usize {
        self.containers.len()
    }
}
