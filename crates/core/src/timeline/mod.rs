//! Frame pacing for background activities.
//!
//! The pacer only computes how long to wait; the caller performs the actual
//! (stop-aware) sleep.

use std::time::{Duration, Instant};

/// Number of frames a pacer may fall behind before it stops trying to catch
/// up and re-anchors on the current time.
pub const MAX_DRIFT_FRAMES: u32 = 2;

/// Deadline-based frame pacer.
///
/// Deadlines advance by exactly one period per frame, so jitter in a single
/// frame does not accumulate. After a long stall the backlog is dropped
/// instead of rendering a burst of catch-up frames.
#[derive(Debug, Clone)]
pub struct FramePacer {
    period: Duration,
    deadline: Option<Instant>,
}

impl FramePacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Forgets the previous deadline; the next frame re-anchors on `now`.
    pub fn reset(&mut self) {
        self.deadline = None;
    }

    /// Records that a frame finished at `now` and returns how long to wait
    /// before starting the next one. Always zero for a zero period.
    pub fn tick(&mut self, now: Instant) -> Duration {
        if self.period.is_zero() {
            return Duration::ZERO;
        }

        let max_drift = self.period * MAX_DRIFT_FRAMES;
        let deadline = match self.deadline {
            Some(previous) if now <= previous + max_drift => previous + self.period,
            _ => now + self.period,
        };
        self.deadline = Some(deadline);
        deadline.saturating_duration_since(now)
    }
}

/// Number of whole frames of `frame_period` that fit in `span`.
pub fn frames_in(span: Duration, frame_period: Duration) -> usize {
    if frame_period.is_zero() {
        return 0;
    }
    (span.as_nanos() / frame_period.as_nanos()) as usize
}
