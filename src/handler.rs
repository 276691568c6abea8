//! Contracts for the OS-specific pieces the telemetry core consumes.
//!
//! A [`ContainerHandler`] knows how to read one container's cgroup and
//! procfs state; a [`CpuLoadReader`] reads scheduler task-state counts for
//! a cgroup. Both are implemented by the embedding agent; everything in
//! this crate only consumes them behind `Arc<dyn ...>`.
//!
//! Handlers perform blocking file and netlink I/O. The tracker therefore
//! always invokes them from the blocking thread pool, raced against the
//! panic timeout by [`crate::guard::TimeoutGuard`].

use std::path::{Path, PathBuf};

use crate::stats::{ContainerReference, ContainerSpec, ContainerStats, LoadSample};

/// Which containers [`ContainerHandler::list_containers`] should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListType {
    /// Only the direct children of the handled container.
    SelfOnly,
    /// The whole subtree below the handled container.
    Recursive,
}

/// Error surfaced by a handler or load reader implementation.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("subsystem {0:?} is not available")]
    UnsupportedSubsystem(String),
    #[error("{0}")]
    Other(String),
}

/// Error returned by [`ContainerHandler::get_stats`].
///
/// A handler that could read only some subsystems returns the partially
/// populated sample alongside the error; the housekeeper pushes the partial
/// sample before reporting the error.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct StatsError {
    /// Whatever could still be sampled, if anything.
    pub partial: Option<Box<ContainerStats>>,
    #[source]
    pub source: HandlerError,
}

impl From<HandlerError> for StatsError {
    fn from(source: HandlerError) -> Self {
        Self {
            partial: None,
            source,
        }
    }
}

/// Read access to one container's cgroup and procfs state.
pub trait ContainerHandler: Send + Sync {
    /// Returns the canonical reference of the handled container.
    fn container_reference(&self) -> Result<ContainerReference, HandlerError>;

    /// Reads the declared capabilities and limits of the container.
    fn get_spec(&self) -> Result<ContainerSpec, HandlerError>;

    /// Takes one resource usage sample.
    fn get_stats(&self) -> Result<ContainerStats, StatsError>;

    /// Lists sub-containers of the handled container.
    fn list_containers(&self, list_type: ListType) -> Result<Vec<ContainerReference>, HandlerError>;

    /// Resolves the absolute cgroup path of the given subsystem.
    fn cgroup_path(&self, subsystem: &str) -> Result<PathBuf, HandlerError>;

    /// Whether the container still exists.
    ///
    /// Used to distinguish "container was destroyed mid-probe" from real
    /// errors: any error observed while `exists()` is false is swallowed.
    fn exists(&self) -> bool;

    /// Lifecycle hook invoked once when the housekeeping loop starts.
    fn start(&self) {}

    /// Lifecycle hook invoked when the housekeeping loop exits. Must release
    /// anything `start` acquired.
    fn cleanup(&self) {}
}

/// Reads scheduler task-state counts for a cgroup.
pub trait CpuLoadReader: Send + Sync {
    /// Prepares the reader, e.g. binds its netlink socket.
    fn start(&self) -> Result<(), HandlerError>;

    /// Releases resources held by the reader.
    fn stop(&self);

    /// Reads the current task-state counts of the given cpu cgroup.
    fn read(&self, name: &str, cpu_cgroup_path: &Path) -> Result<LoadSample, HandlerError>;
}
