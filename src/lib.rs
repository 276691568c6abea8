//! Per-container telemetry collection core for a host-level container
//! monitoring agent.
//!
//! For every container tracked on a host this crate drives two independent
//! periodic probes: a stats housekeeper that samples resource usage (CPU,
//! memory, network, filesystem, disk I/O and custom metrics) and a load
//! probe that samples runnable/blocked task counts and maintains an
//! exponentially smoothed load average. Samples are buffered in an
//! in-memory time-series cache and forwarded in batches to a pluggable
//! remote time-series sink.
//!
//! # Key Components
//!
//! - [`tracker::ContainerTracker`] — composes the probes, cache reference
//!   and snapshot state for one container and owns their lifecycle.
//! - [`cache::TimeSeriesCache`] — bounded per-container ring of recent
//!   samples shared by all trackers, fanning new samples out to sinks.
//! - [`load::LoadSmoother`] — exponentially decayed load average over
//!   variable-interval task-stat samples.
//! - [`sched::AdaptiveScheduler`] — jittered periodic scheduling that backs
//!   off while consecutive samples are identical.
//! - [`guard::TimeoutGuard`] — runs one probe iteration in the background
//!   and aborts the whole process if it wedges past its deadline.
//! - [`sink::BufferedSink`] — mutex-serialised point buffer in front of a
//!   remote time-series store.
//!
//! # Integration
//!
//! The crate consumes the OS-specific pieces through traits: a
//! [`handler::ContainerHandler`] that reads cgroup/procfs state, an
//! optional [`handler::CpuLoadReader`] and a [`collector::CollectorManager`]
//! for user-defined metric endpoints. Container discovery, the HTTP API and
//! CLI wiring live in the embedding agent.

pub mod cache;
pub mod collector;
pub mod config;
pub mod error;
pub mod guard;
pub mod handler;
pub mod load;
pub mod sched;
pub mod sink;
pub mod stats;
pub mod summary;
pub mod tracker;
