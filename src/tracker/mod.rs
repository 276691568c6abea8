//! Per-container composition of handler, probe loops, cache reference and
//! snapshot state.
//!
//! A [`ContainerTracker`] is created by the discovery manager when a new
//! container appears on the host and stopped when it goes away. Starting a
//! tracker spawns its two loops: the stats housekeeper and the load probe.
//! Public accessors return copies taken under short-lived mutexes; the two
//! loops share no state beyond those snapshot accessors.
//!
//! Lifecycle of each loop:
//!
//! ```text
//! Idle -> (start) -> Running <-> Sleeping -> (stop signal) -> Cleanup -> Terminated
//!                      |
//!                      +-(timeout) -> Aborted (process-wide)
//! ```

mod error;
mod housekeeping;
mod procs;

pub use error::{Error, Result};
pub use procs::ProcessInfo;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::cache::TimeSeriesCache;
use crate::collector::CollectorManager;
use crate::config::TrackerConfig;
use crate::handler::{ContainerHandler, CpuLoadReader, ListType};
use crate::load::LoadSmoother;
use crate::stats::{ContainerInfo, ContainerReference, ContainerSpec, LoadSample};
use crate::summary::{DerivedStats, StatsSummary};

/// How long a cached spec and sub-container list stay fresh.
const SPEC_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Minimum spacing between error log lines of one tracker.
const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Guarded by the spec mutex.
#[derive(Default)]
struct InfoState {
    spec: ContainerSpec,
    subcontainers: Vec<ContainerReference>,
    last_refresh: Option<Instant>,
    last_error_log: Option<Instant>,
}

/// Guarded by the load mutex. Kept in one struct so the probe's
/// compare-and-update of the task stats and the smoother update happen
/// under a single acquisition.
#[derive(Default)]
struct LoadState {
    smoother: LoadSmoother,
    task_stats: LoadSample,
}

struct StopSignals {
    housekeeping: mpsc::Sender<()>,
    load: mpsc::Sender<()>,
}

pub(crate) struct TrackerInner {
    reference: ContainerReference,
    handler: Arc<dyn ContainerHandler>,
    cache: Arc<TimeSeriesCache>,
    collectors: Arc<dyn CollectorManager>,
    load_reader: Option<Arc<dyn CpuLoadReader>>,
    summary: Mutex<Option<StatsSummary>>,
    config: TrackerConfig,
    info: Mutex<InfoState>,
    load: Mutex<LoadState>,
}

/// Drives telemetry collection for one container.
pub struct ContainerTracker {
    inner: Arc<TrackerInner>,
    signals: Mutex<Option<StopSignals>>,
}

impl ContainerTracker {
    /// Builds a tracker for the container behind `handler`.
    ///
    /// The configuration is pinned into the tracker; the load reader is
    /// dropped when `config.enable_load_reader` is false. The initial spec
    /// is fetched eagerly; a summary reader is attached when the spec
    /// tracks CPU or memory.
    ///
    /// # Errors
    ///
    /// Fails when the handler cannot resolve the container reference or
    /// the initial spec fetch fails while the container still exists.
    pub fn new(
        handler: Arc<dyn ContainerHandler>,
        cache: Arc<TimeSeriesCache>,
        collectors: Arc<dyn CollectorManager>,
        load_reader: Option<Arc<dyn CpuLoadReader>>,
        config: TrackerConfig,
    ) -> Result<Self> {
        let reference = handler.container_reference()?;
        let load_reader = if config.enable_load_reader {
            load_reader
        } else {
            None
        };

        let inner = Arc::new(TrackerInner {
            reference: reference.clone(),
            handler,
            cache,
            collectors,
            load_reader,
            summary: Mutex::new(None),
            config,
            info: Mutex::new(InfoState::default()),
            load: Mutex::new(LoadState::default()),
        });

        inner.refresh_spec()?;
        let spec = inner.info.lock().unwrap().spec.clone();
        match StatsSummary::new(&spec) {
            Ok(summary) => *inner.summary.lock().unwrap() = Some(summary),
            Err(err) => log::warn!(
                "failed to create summary reader for {:?}: {err}",
                reference.name
            ),
        }

        Ok(Self {
            inner,
            signals: Mutex::new(None),
        })
    }

    /// Spawns the housekeeping and load-probe loops.
    ///
    /// Must run inside a tokio runtime. Returns once both loops are
    /// scheduled; starting an already started tracker is a no-op.
    pub fn start(&self) {
        let mut signals = self.signals.lock().unwrap();
        if signals.is_some() {
            return;
        }
        let (housekeeping_tx, housekeeping_rx) = mpsc::channel(1);
        let (load_tx, load_rx) = mpsc::channel(1);
        tokio::spawn(Arc::clone(&self.inner).housekeeping_loop(housekeeping_rx));
        tokio::spawn(Arc::clone(&self.inner).load_loop(load_rx));
        *signals = Some(StopSignals {
            housekeeping: housekeeping_tx,
            load: load_tx,
        });
    }

    /// Removes the container from the shared cache and signals both loops.
    ///
    /// Each loop drains its cleanup on exit: the housekeeper invokes the
    /// handler's cleanup hook, the load loop stops the reader. A loop
    /// blocked inside handler I/O keeps running until its panic timeout
    /// fires.
    pub fn stop(&self) {
        self.inner.cache.remove(&self.inner.reference.name);
        if let Some(signals) = self.signals.lock().unwrap().take() {
            let _ = signals.housekeeping.try_send(());
            let _ = signals.load.try_send(());
        }
    }

    /// The canonical reference of the tracked container.
    pub fn reference(&self) -> &ContainerReference {
        &self.inner.reference
    }

    /// Snapshot bundle of reference, spec and sub-containers.
    ///
    /// Spec and sub-container list are refreshed from the handler at most
    /// every five seconds. The returned value is a copy; mutating it never
    /// affects tracker state.
    pub fn info(&self) -> Result<ContainerInfo> {
        let stale = {
            let state = self.inner.info.lock().unwrap();
            state
                .last_refresh
                .is_none_or(|at| at.elapsed() > SPEC_REFRESH_INTERVAL)
        };
        if stale {
            self.inner.refresh_spec()?;
            self.inner.refresh_subcontainers()?;
            self.inner.info.lock().unwrap().last_refresh = Some(Instant::now());
        }

        let state = self.inner.info.lock().unwrap();
        Ok(ContainerInfo {
            reference: self.inner.reference.clone(),
            spec: state.spec.clone(),
            subcontainers: state.subcontainers.clone(),
        })
    }

    /// Derived usage windows from the summary reader.
    pub fn derived_stats(&self) -> Result<DerivedStats> {
        let summary = self.inner.summary.lock().unwrap();
        match summary.as_ref() {
            Some(summary) => Ok(summary.derived_stats()),
            None => Err(Error::SummaryNotEnabled {
                name: self.inner.reference.name.clone(),
            }),
        }
    }

    /// Snapshot of the smoothed load average; -1 until the load probe has
    /// completed an iteration.
    pub fn load_average(&self) -> f64 {
        self.inner.load_average()
    }

    /// Snapshot of the most recent task-stat counts.
    pub fn task_stats(&self) -> LoadSample {
        self.inner.task_stats()
    }
}

impl TrackerInner {
    /// Rate limiter for error logging: at most one line per minute per
    /// tracker.
    fn allow_error_logging(&self) -> bool {
        let mut state = self.info.lock().unwrap();
        match state.last_error_log {
            Some(at) if at.elapsed() <= ERROR_LOG_INTERVAL => false,
            _ => {
                state.last_error_log = Some(Instant::now());
                true
            }
        }
    }

    fn load_average(&self) -> f64 {
        self.load.lock().unwrap().smoother.read()
    }

    fn task_stats(&self) -> LoadSample {
        self.load.lock().unwrap().task_stats
    }

    /// Re-reads the container spec and merges declared custom metrics in.
    ///
    /// Errors while the container no longer exists are treated as a no-op;
    /// the container just died.
    fn refresh_spec(&self) -> Result<()> {
        let mut spec = match self.handler.get_spec() {
            Ok(spec) => spec,
            Err(err) => {
                if !self.handler.exists() {
                    return Ok(());
                }
                return Err(err.into());
            }
        };

        let custom_metrics = self
            .collectors
            .get_spec()
            .map_err(|err| Error::CollectorSpec {
                message: err.message,
            })?;
        if !custom_metrics.is_empty() {
            spec.has_custom_metrics = true;
            spec.custom_metrics = custom_metrics;
        }

        self.info.lock().unwrap().spec = spec;
        Ok(())
    }

    /// Re-lists the direct sub-containers, sorted by name.
    fn refresh_subcontainers(&self) -> Result<()> {
        let mut subcontainers = match self.handler.list_containers(ListType::SelfOnly) {
            Ok(subcontainers) => subcontainers,
            Err(err) => {
                if !self.handler.exists() {
                    return Ok(());
                }
                return Err(err.into());
            }
        };
        subcontainers.sort_by(|a, b| a.name.cmp(&b.name));

        self.info.lock().unwrap().subcontainers = subcontainers;
        Ok(())
    }
}
