use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::models::points_from_stats;
use super::{Error, Result, SamplePoint, SinkAdapter};
use crate::stats::{ContainerReference, ContainerStats};

/// Decides whether the buffered points should be flushed now, given the
/// time of the last flush.
pub type FlushPolicy = Box<dyn Fn(Instant) -> bool + Send + Sync>;

struct BufferState {
    points: Vec<SamplePoint>,
    last_flush: Instant,
}

/// Buffers sample points and emits them in batches to a writer task.
///
/// `add_stats` is invoked simultaneously from the housekeepers of many
/// containers; the buffer is serialised under a single mutex and only one
/// caller performs the hand-off of a full batch. Batches travel over a
/// bounded channel to the writer, so a slow remote store back-pressures
/// the flushing housekeeper rather than growing the buffer without bound.
pub struct BufferedSink {
    state: Mutex<BufferState>,
    buffer_duration: Duration,
    ready_to_flush: Option<FlushPolicy>,
    tx: mpsc::Sender<Vec<SamplePoint>>,
}

impl BufferedSink {
    pub fn new(buffer_duration: Duration, tx: mpsc::Sender<Vec<SamplePoint>>) -> Self {
        Self {
            state: Mutex::new(BufferState {
                points: Vec::new(),
                last_flush: Instant::now(),
            }),
            buffer_duration,
            ready_to_flush: None,
            tx,
        }
    }

    /// Replaces the time-based flush predicate, so tests can flush
    /// deterministically.
    pub fn with_flush_policy(
        mut self,
        policy: impl Fn(Instant) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.ready_to_flush = Some(Box::new(policy));
        self
    }

    fn ready(&self, last_flush: Instant) -> bool {
        match &self.ready_to_flush {
            Some(policy) => policy(last_flush),
            None => last_flush.elapsed() >= self.buffer_duration,
        }
    }

    fn send(&self, batch: Vec<SamplePoint>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.tx.blocking_send(batch).map_err(|_| Error::WriterGone)
    }
}

impl SinkAdapter for BufferedSink {
    fn add_stats(&self, reference: &ContainerReference, stats: &ContainerStats) -> Result<()> {
        let batch = {
            let mut state = self.state.lock().unwrap();
            state.points.extend(points_from_stats(reference, stats));
            if self.ready(state.last_flush) {
                state.last_flush = Instant::now();
                Some(std::mem::take(&mut state.points))
            } else {
                None
            }
        };

        match batch {
            Some(batch) => self.send(batch),
            None => Ok(()),
        }
    }

    fn close(&self) -> Result<()> {
        let batch = {
            let mut state = self.state.lock().unwrap();
            state.last_flush = Instant::now();
            std::mem::take(&mut state.points)
        };
        self.send(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn sample(cpu_total: u64) -> (ContainerReference, ContainerStats) {
        let reference = ContainerReference::new("/docker/abc");
        let mut stats = ContainerStats::new(SystemTime::now());
        stats.cpu.usage.total = cpu_total;
        (reference, stats)
    }

    #[test]
    fn test_buffers_until_policy_fires() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = BufferedSink::new(Duration::from_secs(60), tx).with_flush_policy(|_| false);

        let (reference, stats) = sample(1);
        sink.add_stats(&reference, &stats).unwrap();
        sink.add_stats(&reference, &stats).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_flushes_accumulated_batch_atomically() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = BufferedSink::new(Duration::from_secs(60), tx).with_flush_policy(|_| true);

        let (reference, stats) = sample(1);
        sink.add_stats(&reference, &stats).unwrap();

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 14);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_default_policy_is_time_based() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = BufferedSink::new(Duration::from_secs(3600), tx);

        let (reference, stats) = sample(1);
        sink.add_stats(&reference, &stats).unwrap();
        // Within the buffer duration nothing is handed off.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_flushes_remainder() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = BufferedSink::new(Duration::from_secs(3600), tx);

        let (reference, stats) = sample(1);
        sink.add_stats(&reference, &stats).unwrap();
        sink.close().unwrap();

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 14);
    }

    #[test]
    fn test_writer_gone_surfaces_as_error() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sink = BufferedSink::new(Duration::from_secs(60), tx).with_flush_policy(|_| true);

        let (reference, stats) = sample(1);
        let err = sink.add_stats(&reference, &stats).unwrap_err();
        assert!(matches!(err, Error::WriterGone));
    }
}
