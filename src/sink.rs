//! Downstream time-series sink: buffering, batching and the remote writer.
//!
//! Every sample added to the cache is fanned out to the configured sinks.
//! The [`BufferedSink`] converts samples into per-series points, buffers
//! them under its own mutex and hands complete batches to a writer task
//! over a channel once its flush policy fires. The default policy is
//! time-based; tests inject a deterministic one.

mod buffered;
mod error;
mod models;
mod mysql;

pub use buffered::{BufferedSink, FlushPolicy};
pub use error::{Error, Result};
pub use models::SamplePoint;
pub use mysql::{spawn_writer, MySqlPointWriter};

use crate::stats::{ContainerReference, ContainerStats};

/// Contract consumed by the cache for forwarding samples downstream.
pub trait SinkAdapter: Send + Sync {
    /// Accepts one sample for the given container.
    ///
    /// Implementations buffer internally; a call that triggers a flush may
    /// block until the batch has been handed off.
    fn add_stats(&self, reference: &ContainerReference, stats: &ContainerStats) -> Result<()>;

    /// Flushes anything still buffered and releases the sink.
    fn close(&self) -> Result<()>;
}
