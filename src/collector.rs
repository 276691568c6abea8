//! Contract for the manager of user-defined metric collectors.
//!
//! An embedding agent may register metric endpoints (e.g. an HTTP endpoint
//! exposing application counters) per container. The housekeeper asks the
//! manager for declared metric specs when refreshing the container spec and
//! collects values once the manager's next collection time has passed.
//! Implementations must tolerate concurrent `collect` invocations from
//! multiple trackers sharing registries.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::stats::{CustomMetricSpec, MetricValue};

/// Result of one collection round.
#[derive(Debug, Clone)]
pub struct Collection {
    /// Earliest time the next collection is due.
    pub next_collection: SystemTime,
    /// Collected values, keyed by metric name.
    pub metrics: HashMap<String, Vec<MetricValue>>,
}

/// Error surfaced by a collector manager.
///
/// Collectors that partially succeeded return whatever they gathered
/// alongside the error; the housekeeper attaches the partial values before
/// reporting the error.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CollectError {
    /// Values gathered before the failure, if any.
    pub partial: Option<HashMap<String, Vec<MetricValue>>>,
    pub message: String,
}

impl CollectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            partial: None,
            message: message.into(),
        }
    }
}

/// Evaluates the user-defined metric endpoints of one container.
pub trait CollectorManager: Send + Sync {
    /// Declared specs of all registered metrics.
    fn get_spec(&self) -> Result<Vec<CustomMetricSpec>, CollectError>;

    /// Collects values from all registered endpoints that are due.
    fn collect(&self) -> Result<Collection, CollectError>;

    /// Whether any collectors are registered at all.
    fn has_collectors(&self) -> bool;

    /// Earliest time any registered collector wants to run next.
    fn next_collection_time(&self) -> SystemTime;
}

/// Manager for containers without any user-defined metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCollectorManager;

impl CollectorManager for NullCollectorManager {
    fn get_spec(&self) -> Result<Vec<CustomMetricSpec>, CollectError> {
        Ok(Vec::new())
    }

    fn collect(&self) -> Result<Collection, CollectError> {
        Ok(Collection {
            next_collection: SystemTime::now(),
            metrics: HashMap::new(),
        })
    }

    fn has_collectors(&self) -> bool {
        false
    }

    fn next_collection_time(&self) -> SystemTime {
        SystemTime::now()
    }
}
