// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Readiness flags and the minimum-flip-duration timer.
//!
//! Capture, alignment and guiding report readiness asynchronously and at
//! their own pace. Each report is kept as its own flag instead of being
//! folded into the stage enum; the state machine only looks at the flag
//! that gates its current stage.

use std::time::Duration;

use serde::Serialize;

/// Identifies one arming of the flip timer. An expiry carrying an older
/// token than the one currently armed is stale and must be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimerToken(u64);

impl TimerToken {
    pub fn generation(self) -> u64 {
        self.0
    }
}

/// A timer armed by the state machine, to be scheduled by whoever drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArmedTimer {
    pub token: TimerToken,
    pub duration: Duration,
}

/// One-shot deadline with cancellation.
///
/// The timer itself never sleeps; it hands out a token and a duration, and
/// expects the expiry back as an event.
#[derive(Debug, Clone, Default)]
pub struct FlipTimer {
    generation: u64,
    armed: Option<ArmedTimer>,
    elapsed: bool,
}

impl FlipTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, cancelling any previous arming.
    pub fn arm(&mut self, duration: Duration) -> ArmedTimer {
        self.generation += 1;
        let armed = ArmedTimer {
            token: TimerToken(self.generation),
            duration,
        };
        self.armed = Some(armed);
        self.elapsed = false;
        armed
    }

    /// Cancel the pending deadline, if any. Later expiries are stale.
    pub fn cancel(&mut self) {
        if self.armed.take().is_some() {
            self.generation += 1;
        }
        self.elapsed = false;
    }

    /// Record an expiry. Returns false for stale or unknown tokens.
    pub fn expire(&mut self, token: TimerToken) -> bool {
        match self.armed {
            Some(armed) if armed.token == token => {
                self.armed = None;
                self.elapsed = true;
                true
            }
            _ => false,
        }
    }

    pub fn armed(&self) -> Option<ArmedTimer> {
        self.armed
    }

    pub fn is_pending(&self) -> bool {
        self.armed.is_some()
    }

    pub fn has_elapsed(&self) -> bool {
        self.elapsed
    }
}

/// Post-flip collaborator that can fail and be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostFlipTask {
    Alignment,
    Guiding,
}

impl std::fmt::Display for PostFlipTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alignment => write!(f, "alignment"),
            Self::Guiding => write!(f, "guiding"),
        }
    }
}

/// Readiness bookkeeping for one flip cycle.
#[derive(Debug, Clone, Default)]
pub struct SubsystemGate {
    capture_ready: bool,
    alignment_resumed: bool,
    guiding_resumed: bool,
    slew_observed: bool,
    post_flip_failures: u32,
    timer: FlipTimer,
}

impl SubsystemGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_ready(&self) -> bool {
        self.capture_ready
    }

    pub fn set_capture_ready(&mut self, ready: bool) {
        self.capture_ready = ready;
    }

    pub fn alignment_resumed(&self) -> bool {
        self.alignment_resumed
    }

    pub fn set_alignment_resumed(&mut self) {
        self.alignment_resumed = true;
    }

    pub fn guiding_resumed(&self) -> bool {
        self.guiding_resumed
    }

    pub fn set_guiding_resumed(&mut self) {
        self.guiding_resumed = true;
    }

    /// The mount has been seen slewing since the flip started.
    pub fn slew_observed(&self) -> bool {
        self.slew_observed
    }

    pub fn observe_slew(&mut self) {
        self.slew_observed = true;
    }

    /// Forget any capture readiness reported before a new request.
    pub fn begin_request(&mut self) {
        self.capture_ready = false;
    }

    /// Start of the flip slew: arm the minimum-duration timer.
    pub fn begin_flip(&mut self, min_duration: Duration) -> ArmedTimer {
        self.slew_observed = false;
        self.timer.arm(min_duration)
    }

    pub fn begin_alignment(&mut self) {
        self.alignment_resumed = false;
        self.post_flip_failures = 0;
    }

    pub fn begin_guiding(&mut self) {
        self.guiding_resumed = false;
        self.post_flip_failures = 0;
    }

    /// Count a post-flip failure; returns the total so far this stage.
    pub fn record_post_flip_failure(&mut self) -> u32 {
        self.post_flip_failures += 1;
        self.post_flip_failures
    }

    pub fn timer(&self) -> &FlipTimer {
        &self.timer
    }

    pub fn expire_timer(&mut self, token: TimerToken) -> bool {
        self.timer.expire(token)
    }

    pub fn min_duration_elapsed(&self) -> bool {
        self.timer.has_elapsed()
    }

    /// Drop every flag and cancel the timer.
    pub fn clear(&mut self) {
        self.capture_ready = false;
        self.alignment_resumed = false;
        self.guiding_resumed = false;
        self.slew_observed = false;
        self.post_flip_failures = 0;
        self.timer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_expiry_with_current_token() {
        let mut timer = FlipTimer::new();
        let armed = timer.arm(Duration::from_millis(2000));
        assert!(timer.is_pending());
        assert!(!timer.has_elapsed());
        assert!(timer.expire(armed.token));
        assert!(timer.has_elapsed());
        assert!(!timer.is_pending());
    }

    #[test]
    fn test_cancelled_timer_ignores_old_token() {
        let mut timer = FlipTimer::new();
        let armed = timer.arm(Duration::from_millis(2000));
        timer.cancel();
        assert!(!timer.expire(armed.token));
        assert!(!timer.has_elapsed());
    }

    #[test]
    fn test_rearming_invalidates_previous_token() {
        let mut timer = FlipTimer::new();
        let first = timer.arm(Duration::from_millis(100));
        let second = timer.arm(Duration::from_millis(100));
        assert_ne!(first.token, second.token);
        assert!(!timer.expire(first.token));
        assert!(timer.expire(second.token));
    }

    #[test]
    fn test_gate_clear_resets_flags_and_timer() {
        let mut gate = SubsystemGate::new();
        gate.set_capture_ready(true);
        gate.set_alignment_resumed();
        gate.set_guiding_resumed();
        let armed = gate.begin_flip(Duration::from_secs(1));
        gate.clear();
        assert!(!gate.capture_ready());
        assert!(!gate.alignment_resumed());
        assert!(!gate.guiding_resumed());
        assert!(!gate.expire_timer(armed.token));
    }

    #[test]
    fn test_stage_entry_clears_stale_flags() {
        let mut gate = SubsystemGate::new();
        gate.set_capture_ready(true);
        gate.begin_request();
        assert!(!gate.capture_ready());

        gate.set_alignment_resumed();
        assert_eq!(gate.record_post_flip_failure(), 1);
        gate.begin_alignment();
        assert!(!gate.alignment_resumed());
        assert_eq!(gate.record_post_flip_failure(), 1);
    }
}
