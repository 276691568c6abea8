//! Adaptive interval scheduling for the periodic probe loops.

use std::time::Duration;

use rand::Rng;

/// Drives the interval of a periodic task.
///
/// While the task keeps observing identical results the interval doubles up
/// to a ceiling; as soon as a change is observed it snaps back to the
/// baseline. When dynamic adaptation is disabled the interval is pinned to
/// the baseline.
#[derive(Debug)]
pub struct AdaptiveScheduler {
    baseline: Duration,
    ceiling: Duration,
    current: Duration,
    dynamic: bool,
}

impl AdaptiveScheduler {
    pub fn new(baseline: Duration, ceiling: Duration, dynamic: bool) -> Self {
        Self {
            baseline,
            ceiling,
            current: baseline,
            dynamic,
        }
    }

    /// Feeds the outcome of one iteration into the scheduler.
    ///
    /// `changed` means the caller observed progress since the previous
    /// iteration.
    pub fn observe(&mut self, changed: bool) {
        if !self.dynamic || changed {
            self.current = self.baseline;
        } else {
            self.current = std::cmp::min(self.current * 2, self.ceiling);
        }
    }

    /// The current un-jittered interval.
    pub fn interval(&self) -> Duration {
        self.current
    }
}

/// Adds up to `max_factor * duration` of random delay to `duration`.
///
/// Spreads periodic work from many trackers so their probes do not align.
/// A non-positive factor is treated as 1.0.
pub fn jitter(duration: Duration, max_factor: f64) -> Duration {
    let max_factor = if max_factor <= 0.0 { 1.0 } else { max_factor };
    duration + duration.mul_f64(rand::thread_rng().gen_range(0.0..1.0) * max_factor)
}
