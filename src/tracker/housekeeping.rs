//! The two periodic probe loops of a tracker.
//!
//! Both loops follow the same shape: check for the stop signal, run one
//! iteration on the blocking pool under the timeout guard, then sleep until
//! the next jittered wake-up derived from the adaptive scheduler. The
//! housekeeper signals no-change when the two newest cached samples are
//! field-equal; the load probe when the raw task counts did not move.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;

use super::{Error, Result, TrackerInner};
use crate::guard::TimeoutGuard;
use crate::handler::CpuLoadReader;
use crate::sched::{jitter, AdaptiveScheduler};
use crate::stats::ContainerStats;

/// Number of cached samples the usage log line summarizes.
const USAGE_LOG_SAMPLES: usize = 60;

/// Outcome of one load probe iteration, fed into the scheduler.
pub(super) enum LoadProbeOutcome {
    Changed,
    Unchanged,
    /// The cpu cgroup path could not be resolved; nothing was probed.
    Skipped,
}

impl TrackerInner {
    pub(super) async fn housekeeping_loop(self: Arc<Self>, mut stop: mpsc::Receiver<()>) {
        // Background state of the handler must be released in cleanup().
        self.handler.start();

        let baseline = self.config.housekeeping_interval;
        let long_housekeeping = std::cmp::max(Duration::from_millis(100), baseline / 2);
        let mut scheduler = AdaptiveScheduler::new(
            baseline,
            self.config.max_housekeeping_interval,
            self.config.allow_dynamic_housekeeping,
        );
        let guard = TimeoutGuard::new(self.config.panic_timeout);
        let task_name = format!("housekeeping:{}", self.reference.name);

        log::debug!("start housekeeping for container {:?}", self.reference.name);
        let mut last_housekeeping = Instant::now();
        loop {
            if stop.try_recv().is_ok() {
                break;
            }

            let start = Instant::now();
            let worker = Arc::clone(&self);
            if let Some(Err(err)) = guard.run(&task_name, move || worker.update_stats()).await {
                if self.allow_error_logging() {
                    log::warn!(
                        "failed to update stats for container {:?}: {err}",
                        self.reference.name
                    );
                }
            }

            let duration = start.elapsed();
            if duration >= long_housekeeping {
                log::debug!(
                    "[{}] housekeeping took {:?}",
                    self.reference.name,
                    duration
                );
            }

            if self.config.log_usage {
                self.log_usage();
            }

            match self
                .cache
                .recent(&self.reference.name, None, None, 2)
            {
                Ok(samples) => {
                    if let Some(changed) = housekeeping_signal(&samples) {
                        scheduler.observe(changed);
                    }
                }
                Err(err) => {
                    if self.allow_error_logging() {
                        log::warn!(
                            "failed to get recent stats for {:?} while determining the next housekeeping: {err}",
                            self.reference.name
                        );
                    }
                }
            }

            match self
                .sleep_until_next(last_housekeeping, scheduler.interval(), &mut stop)
                .await
            {
                Some(next) => last_housekeeping = next,
                None => break,
            }
        }

        self.handler.cleanup();
    }

    pub(super) async fn load_loop(self: Arc<Self>, mut stop: mpsc::Receiver<()>) {
        let Some(reader) = self.load_reader.clone() else {
            return;
        };
        if let Err(err) = reader.start() {
            log::warn!(
                "could not start cpu load reader for {:?}: {err}",
                self.reference.name
            );
        }

        let mut scheduler = AdaptiveScheduler::new(
            self.config.load_reader_interval,
            self.config.max_load_reader_interval,
            self.config.allow_dynamic_housekeeping,
        );
        let guard = TimeoutGuard::new(self.config.panic_timeout);
        let task_name = format!("load-probe:{}", self.reference.name);

        let mut last_iteration = Instant::now();
        loop {
            if stop.try_recv().is_ok() {
                break;
            }

            let worker = Arc::clone(&self);
            let probe_reader = Arc::clone(&reader);
            match guard
                .run(&task_name, move || worker.load_iteration(&probe_reader))
                .await
            {
                Some(Ok(LoadProbeOutcome::Changed)) => scheduler.observe(true),
                Some(Ok(LoadProbeOutcome::Unchanged)) => scheduler.observe(false),
                Some(Ok(LoadProbeOutcome::Skipped)) | None => {}
                Some(Err(err)) => {
                    if self.allow_error_logging() {
                        log::warn!("{err}");
                    }
                }
            }

            match self
                .sleep_until_next(last_iteration, scheduler.interval(), &mut stop)
                .await
            {
                Some(next) => last_iteration = next,
                None => break,
            }
        }

        reader.stop();
    }

    /// Sleeps until `last_wake + jitter(interval)`; when real time already
    /// overshot, returns immediately without a catch-up burst. Returns
    /// `None` when the stop signal arrived (or its sender went away)
    /// during the sleep.
    async fn sleep_until_next(
        &self,
        last_wake: Instant,
        interval: Duration,
        stop: &mut mpsc::Receiver<()>,
    ) -> Option<Instant> {
        let next = last_wake + jitter(interval, 1.0);
        let now = Instant::now();
        if now >= next {
            return Some(now);
        }
        tokio::select! {
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(next)) => Some(next),
            _ = stop.recv() => None,
        }
    }

    /// One housekeeping cycle: fetch stats, attach load and custom metrics,
    /// push into the cache and forward to the sinks.
    pub(super) fn update_stats(&self) -> Result<()> {
        let (mut stats, stats_err) = match self.handler.get_stats() {
            Ok(stats) => (stats, None),
            Err(err) => {
                // Ignore errors if the container is dead.
                if !self.handler.exists() {
                    return Ok(());
                }
                match err.partial {
                    Some(stats) => (*stats, Some(Error::PartialStats { source: err.source })),
                    None => return Err(err.source.into()),
                }
            }
        };

        let load = self.load_average();
        if load >= 0.0 {
            // Milli-load preserves precision without floats on the wire.
            stats.cpu.load_average = (load * 1000.0).round() as i32;
        }
        stats.task_stats = self.task_stats();

        if let Some(summary) = self.summary.lock().unwrap().as_mut() {
            if let Err(err) = summary.add_sample(&stats) {
                log::debug!(
                    "failed to add summary stats for {:?}: {err}",
                    self.reference.name
                );
            }
        }

        let mut custom_err = None;
        if self.collectors.has_collectors()
            && self.collectors.next_collection_time() <= SystemTime::now()
        {
            let (custom_stats, err) = self.update_custom_stats();
            if let Some(custom_stats) = custom_stats {
                stats.custom_metrics = custom_stats;
            }
            custom_err = err;
        }

        let reference = match self.handler.container_reference() {
            Ok(reference) => reference,
            Err(err) => {
                if !self.handler.exists() {
                    return Ok(());
                }
                return Err(err.into());
            }
        };

        self.cache.add(&reference, stats)?;

        if let Some(err) = stats_err {
            return Err(err);
        }
        if let Some(err) = custom_err {
            return Err(err);
        }
        Ok(())
    }

    fn update_custom_stats(
        &self,
    ) -> (
        Option<std::collections::HashMap<String, Vec<crate::stats::MetricValue>>>,
        Option<Error>,
    ) {
        match self.collectors.collect() {
            Ok(collection) => (Some(collection.metrics), None),
            Err(err) => {
                // Collector errors against a dead container are expected.
                if !self.handler.exists() {
                    return (err.partial, None);
                }
                (
                    err.partial,
                    Some(Error::CustomMetrics {
                        message: err.message,
                    }),
                )
            }
        }
    }

    /// One load probe cycle, spanning the task-stat comparison and the
    /// smoother update under a single acquisition of the load mutex.
    pub(super) fn load_iteration(
        &self,
        reader: &Arc<dyn CpuLoadReader>,
    ) -> Result<LoadProbeOutcome> {
        let path = match self.handler.cgroup_path("cpu") {
            Ok(path) => path,
            Err(_) => return Ok(LoadProbeOutcome::Skipped),
        };

        let sample =
            reader
                .read(&self.reference.name, &path)
                .map_err(|source| Error::LoadStat {
                    name: self.reference.name.clone(),
                    path: path.clone(),
                    source,
                })?;
        let probe_time = Instant::now();

        let mut state = self.load.lock().unwrap();
        let outcome = if self.config.allow_dynamic_housekeeping && sample == state.task_stats {
            LoadProbeOutcome::Unchanged
        } else {
            LoadProbeOutcome::Changed
        };
        state.task_stats = sample;
        state.smoother.observe(probe_time, &sample);
        Ok(outcome)
    }

    /// Emits one usage summary line over the newest 60 cached samples.
    /// Skips silently while fewer samples exist.
    fn log_usage(&self) {
        let samples = match self
            .cache
            .recent(&self.reference.name, None, None, USAGE_LOG_SAMPLES)
        {
            Ok(samples) => samples,
            Err(err) => {
                if self.allow_error_logging() {
                    log::info!(
                        "[{}] failed to get recent stats for logging usage: {err}",
                        self.reference.name
                    );
                }
                return;
            }
        };
        if samples.len() < USAGE_LOG_SAMPLES {
            return;
        }

        // recent() returns newest first; walk oldest to newest.
        let ordered: Vec<&ContainerStats> = samples.iter().rev().collect();
        let mut usage_cpu_ns = 0u64;
        for pair in ordered.windows(2) {
            usage_cpu_ns += pair[1]
                .cpu
                .usage
                .total
                .saturating_sub(pair[0].cpu.usage.total);
        }

        let newest = ordered[ordered.len() - 1];
        let second = ordered[ordered.len() - 2];
        let oldest = ordered[0];

        let instant_cores = cores_between(second, newest);
        let average_cores = {
            let window_ns = newest
                .timestamp
                .duration_since(oldest.timestamp)
                .unwrap_or_default()
                .as_nanos();
            if window_ns == 0 {
                0.0
            } else {
                usage_cpu_ns as f64 / window_ns as f64
            }
        };

        log::info!(
            "[{}] {:.3} cores (average: {:.3} cores), {} of memory",
            self.reference.name,
            instant_cores,
            average_cores,
            human_size(newest.memory.usage)
        );
    }
}

/// No-change signal for the scheduler: `Some(changed)` when two samples are
/// available, `None` while the cache holds fewer.
fn housekeeping_signal(samples: &[ContainerStats]) -> Option<bool> {
    match samples {
        [newest, previous] => Some(!newest.stats_eq(previous)),
        _ => None,
    }
}

/// Instantaneous cores used between two adjacent samples.
fn cores_between(previous: &ContainerStats, current: &ContainerStats) -> f64 {
    let elapsed_ns = current
        .timestamp
        .duration_since(previous.timestamp)
        .unwrap_or_default()
        .as_nanos();
    if elapsed_ns == 0 {
        return 0.0;
    }
    current
        .cpu
        .usage
        .total
        .saturating_sub(previous.cpu.usage.total) as f64
        / elapsed_ns as f64
}

/// Formats a byte count the way humans read it, decimal units.
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "kB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.3}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::super::ContainerTracker;
    use super::*;
    use crate::collector::{CollectError, Collection, CollectorManager, NullCollectorManager};
    use crate::handler::{ContainerHandler, HandlerError, StatsError};
    use crate::stats::{CustomMetricSpec, LoadSample, MetricSample, MetricValue};
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn tracker_for(handler: Arc<FakeHandler>) -> (ContainerTracker, Arc<crate::cache::TimeSeriesCache>) {
        let cache = test_cache();
        let tracker = ContainerTracker::new(
            handler,
            Arc::clone(&cache),
            Arc::new(NullCollectorManager),
            None,
            fast_config(),
        )
        .unwrap();
        (tracker, cache)
    }

    #[test]
    fn test_update_stats_pushes_into_cache() {
        let handler = FakeHandler::new("/docker/abc");
        let (tracker, cache) = tracker_for(Arc::clone(&handler));

        tracker.inner.update_stats().unwrap();
        tracker.inner.update_stats().unwrap();

        let samples = cache.recent("/docker/abc", None, None, 10).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].timestamp > samples[1].timestamp);
        assert!(samples[0].cpu.usage.total > samples[1].cpu.usage.total);
    }

    #[test]
    fn test_dead_container_is_tolerated_silently() {
        let handler = FakeHandler::new("/docker/abc");
        let (tracker, cache) = tracker_for(Arc::clone(&handler));

        handler.exists.store(false, Ordering::SeqCst);
        *handler.stats_error.lock().unwrap() = Some(StatsError {
            partial: None,
            source: HandlerError::Other("cgroup vanished".to_owned()),
        });

        assert!(tracker.inner.update_stats().is_ok());
        assert!(cache.recent("/docker/abc", None, None, 1).is_err());
    }

    #[test]
    fn test_partial_stats_are_pushed_before_error() {
        let handler = FakeHandler::new("/docker/abc");
        let (tracker, cache) = tracker_for(Arc::clone(&handler));

        let partial = handler.next_stats();
        *handler.stats_error.lock().unwrap() = Some(StatsError {
            partial: Some(Box::new(partial)),
            source: HandlerError::Other("io.stat unreadable".to_owned()),
        });

        let err = tracker.inner.update_stats().unwrap_err();
        assert!(matches!(err, Error::PartialStats { .. }));
        assert!(err.to_string().contains("continuing to push stats"));

        let samples = cache.recent("/docker/abc", None, None, 10).unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_stats_error_without_partial_is_surfaced() {
        let handler = FakeHandler::new("/docker/abc");
        let (tracker, cache) = tracker_for(Arc::clone(&handler));

        *handler.stats_error.lock().unwrap() = Some(StatsError {
            partial: None,
            source: HandlerError::Other("cpu.stat unreadable".to_owned()),
        });

        assert!(tracker.inner.update_stats().is_err());
        assert!(cache.recent("/docker/abc", None, None, 1).is_err());
    }

    #[test]
    fn test_milli_load_attached_once_probe_ran() {
        let handler = FakeHandler::new("/docker/abc");
        let (tracker, cache) = tracker_for(Arc::clone(&handler));

        {
            let mut state = tracker.inner.load.lock().unwrap();
            let sample = LoadSample {
                nr_running: 3,
                nr_uninterruptible: 0,
                nr_iowait: 0,
            };
            state.smoother.observe(Instant::now(), &sample);
            state.task_stats = sample;
        }

        tracker.inner.update_stats().unwrap();
        let samples = cache.recent("/docker/abc", None, None, 1).unwrap();
        assert_eq!(samples[0].cpu.load_average, 3000);
        assert_eq!(samples[0].task_stats.nr_running, 3);
    }

    struct FixedCollector {
        specs: Vec<CustomMetricSpec>,
        result: Mutex<Option<std::result::Result<Collection, CollectError>>>,
    }

    impl CollectorManager for FixedCollector {
        fn get_spec(&self) -> std::result::Result<Vec<CustomMetricSpec>, CollectError> {
            Ok(self.specs.clone())
        }

        fn collect(&self) -> std::result::Result<Collection, CollectError> {
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(CollectError::new("collector exhausted")))
        }

        fn has_collectors(&self) -> bool {
            true
        }

        fn next_collection_time(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH
        }
    }

    fn metric(value: i64) -> HashMap<String, Vec<MetricValue>> {
        HashMap::from([(
            "requests".to_owned(),
            vec![MetricValue {
                timestamp: SystemTime::UNIX_EPOCH,
                value: MetricSample::Int(value),
            }],
        )])
    }

    #[test]
    fn test_custom_metrics_attached_to_sample() {
        let handler = FakeHandler::new("/docker/abc");
        let cache = test_cache();
        let collector = FixedCollector {
            specs: vec![CustomMetricSpec {
                name: "requests".to_owned(),
                kind: crate::stats::MetricKind::Cumulative,
                units: "count".to_owned(),
            }],
            result: Mutex::new(Some(Ok(Collection {
                next_collection: SystemTime::now(),
                metrics: metric(17),
            }))),
        };
        let tracker = ContainerTracker::new(
            Arc::clone(&handler) as Arc<dyn ContainerHandler>,
            Arc::clone(&cache),
            Arc::new(collector),
            None,
            fast_config(),
        )
        .unwrap();

        let info = tracker.info().unwrap();
        assert!(info.spec.has_custom_metrics);

        tracker.inner.update_stats().unwrap();
        let samples = cache.recent("/docker/abc", None, None, 1).unwrap();
        assert_eq!(samples[0].custom_metrics.len(), 1);
    }

    #[test]
    fn test_collector_failure_pushes_partial_and_reports() {
        let handler = FakeHandler::new("/docker/abc");
        let cache = test_cache();
        let collector = FixedCollector {
            specs: Vec::new(),
            result: Mutex::new(Some(Err(CollectError {
                partial: Some(metric(3)),
                message: "endpoint unreachable".to_owned(),
            }))),
        };
        let tracker = ContainerTracker::new(
            Arc::clone(&handler) as Arc<dyn ContainerHandler>,
            Arc::clone(&cache),
            Arc::new(collector),
            None,
            fast_config(),
        )
        .unwrap();

        let err = tracker.inner.update_stats().unwrap_err();
        assert!(matches!(err, Error::CustomMetrics { .. }));

        let samples = cache.recent("/docker/abc", None, None, 1).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].custom_metrics.len(), 1);
    }

    #[test]
    fn test_load_iteration_backoff_signal() {
        let handler = FakeHandler::new("/docker/abc");
        let (tracker, _cache) = tracker_for(handler);

        let sample = LoadSample {
            nr_running: 2,
            nr_uninterruptible: 1,
            nr_iowait: 0,
        };
        let reader = FakeLoadReader::new(vec![sample, sample]);
        let reader: Arc<dyn CpuLoadReader> = reader;

        // First probe differs from the zero-initialized cache.
        assert!(matches!(
            tracker.inner.load_iteration(&reader).unwrap(),
            LoadProbeOutcome::Changed
        ));
        // Identical probe backs off.
        assert!(matches!(
            tracker.inner.load_iteration(&reader).unwrap(),
            LoadProbeOutcome::Unchanged
        ));
        assert!(tracker.load_average() > 0.0);
    }

    #[test]
    fn test_housekeeping_signal() {
        let handler = FakeHandler::new("/docker/abc");
        let changed = handler.next_stats();
        let mut identical = handler.next_stats();
        identical.cpu = changed.cpu;

        assert_eq!(housekeeping_signal(&[]), None);
        assert_eq!(housekeeping_signal(std::slice::from_ref(&changed)), None);
        assert_eq!(
            housekeeping_signal(&[identical.clone(), changed.clone()]),
            Some(false)
        );

        let differing = handler.next_stats();
        assert_eq!(housekeeping_signal(&[differing, changed]), Some(true));
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(2_048), "2.048kB");
        assert_eq!(human_size(1_500_000), "1.500MB");
    }
}
