//! Exponentially smoothed load average over variable-interval samples.

use std::time::Instant;

use crate::stats::LoadSample;

/// Time constant of the smoothing filter, in seconds.
///
/// The decay derived from it makes the average stabilize on a new constant
/// value within roughly ten seconds regardless of sample spacing, so probe
/// back-off does not distort the average.
const DECAY_SECONDS: f64 = 10.0;

/// Maintains an exponentially decayed load average from task-stat samples.
///
/// The smoother is plain state; the tracker keeps it behind its load mutex
/// together with the cached task stats so one acquisition spans both
/// updates.
#[derive(Debug)]
pub struct LoadSmoother {
    /// Smoothed load seen so far. Negative until the first observation.
    avg: f64,
    last_probe: Option<Instant>,
}

impl Default for LoadSmoother {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSmoother {
    pub fn new() -> Self {
        Self {
            avg: -1.0,
            last_probe: None,
        }
    }

    /// Folds a new sample of task counts into the average.
    ///
    /// The first observation is recorded as the authoritative value. Later
    /// observations decay the previous average by `exp(-dt / 10)` where `dt`
    /// is the monotonic time since the previous probe, in seconds.
    pub fn observe(&mut self, probe_time: Instant, sample: &LoadSample) {
        let raw = sample.total() as f64;
        match self.last_probe {
            None => self.avg = raw,
            Some(last) => {
                let dt = probe_time.duration_since(last).as_secs_f64();
                let decay = (-dt / DECAY_SECONDS).exp();
                self.avg = raw * (1.0 - decay) + self.avg * decay;
            }
        }
        self.last_probe = Some(probe_time);
    }

    /// Snapshot of the smoothed average; `-1.0` if never observed.
    pub fn read(&self) -> f64 {
        self.avg
    }
}
