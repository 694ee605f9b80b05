// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Meridian flip state machine.
//!
//! Owns the orchestration stage and the mount-side flip state, consumes
//! position and status reports, applies the flip policy and sequences the
//! flip against capture, alignment and guiding.
//!
//! Every operation returns immediately. Misordered calls are logged and
//! ignored; they never panic and never leave the machine half-transitioned.
//! Operations return `true` when at least one transition happened.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::sky::{PierSide, PointingSnapshot};

use super::command::FlipCommand;
use super::config::FlipConfig;
use super::events::{FlipEventEmitter, FlipListener, ListenerId};
use super::gate::{ArmedTimer, PostFlipTask, SubsystemGate, TimerToken};
use super::policies::{
    compute_retry_delay, format_countdown, hours_to_flip, infer_pier_side, is_flip_due,
    offset_hours,
};
use super::state::{MfStage, MountFlipState, MountStatus};

/// Read-only summary handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlipStatus {
    pub stage: MfStage,
    pub mount_state: MountFlipState,
    pub device_status: MountStatus,
    pub flip_delay_hours: f64,
    pub hours_to_flip: Option<f64>,
    pub retries_exhausted: bool,
    pub timer_pending: bool,
    pub current: PointingSnapshot,
    pub target: PointingSnapshot,
}

/// Why no flip can be planned right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inactive {
    Disabled,
    Parked,
    NoTarget,
    RetriesExhausted,
    SlewAfterMeridian,
    NotTracking,
}

impl Inactive {
    fn describe(self) -> &'static str {
        match self {
            Self::Disabled => "flip not requested",
            Self::Parked => "parked",
            Self::NoTarget => "no target set",
            Self::RetriesExhausted => "retries exhausted",
            Self::SlewAfterMeridian => "slew after meridian",
            Self::NotTracking => "mount not tracking",
        }
    }
}

/// The meridian flip coordinator for one mount connection.
#[derive(Debug)]
pub struct MeridianFlipStateMachine {
    config: FlipConfig,
    stage: MfStage,
    mount_state: MountFlipState,
    device_status: MountStatus,
    current: PointingSnapshot,
    target: PointingSnapshot,
    flip_delay: f64,
    retries_exhausted: bool,
    flip_start_pier_side: PierSide,
    inactive: Option<Inactive>,
    gate: SubsystemGate,
    emitter: FlipEventEmitter,
    transition_count: u64,
    last_transition: Option<Instant>,
}

impl Default for MeridianFlipStateMachine {
    fn default() -> Self {
        Self::new(FlipConfig::default())
    }
}

impl MeridianFlipStateMachine {
    pub fn new(config: FlipConfig) -> Self {
        Self {
            config,
            stage: MfStage::None,
            mount_state: MountFlipState::None,
            device_status: MountStatus::Idle,
            current: PointingSnapshot::invalid(),
            target: PointingSnapshot::invalid(),
            flip_delay: 0.0,
            retries_exhausted: false,
            flip_start_pier_side: PierSide::Unknown,
            inactive: None,
            gate: SubsystemGate::new(),
            emitter: FlipEventEmitter::new(),
            transition_count: 0,
            last_transition: None,
        }
    }

    pub fn register_listener(&mut self, listener: Arc<dyn FlipListener>) -> ListenerId {
        self.emitter.register(listener)
    }

    pub fn unregister_listener(&mut self, id: ListenerId) {
        self.emitter.unregister(id);
    }

    pub fn stage(&self) -> MfStage {
        self.stage
    }

    pub fn mount_state(&self) -> MountFlipState {
        self.mount_state
    }

    pub fn device_status(&self) -> MountStatus {
        self.device_status
    }

    pub fn config(&self) -> &FlipConfig {
        &self.config
    }

    pub fn flip_delay(&self) -> f64 {
        self.flip_delay
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retries_exhausted
    }

    pub fn current_position(&self) -> &PointingSnapshot {
        &self.current
    }

    pub fn target_position(&self) -> &PointingSnapshot {
        &self.target
    }

    pub fn gate(&self) -> &SubsystemGate {
        &self.gate
    }

    /// Minimum-duration timer the driver must schedule, if any.
    pub fn armed_timer(&self) -> Option<ArmedTimer> {
        self.gate.timer().armed()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    pub fn snapshot(&self) -> FlipStatus {
        FlipStatus {
            stage: self.stage,
            mount_state: self.mount_state,
            device_status: self.device_status,
            flip_delay_hours: self.flip_delay,
            hours_to_flip: if self.target.valid {
                hours_to_flip(&self.policy_position(), &self.config, self.flip_delay)
            } else {
                None
            },
            retries_exhausted: self.retries_exhausted,
            timer_pending: self.gate.timer().is_pending(),
            current: self.current,
            target: self.target,
        }
    }

    /// Route a queued command to its operation.
    pub fn apply(&mut self, cmd: FlipCommand) -> bool {
        match cmd {
            FlipCommand::UpdatePosition(snapshot) => self.update_position(snapshot),
            FlipCommand::MountStatus(status) => self.on_mount_status_changed(status),
            FlipCommand::CaptureReady(ready) => self.set_capture_ready(ready),
            FlipCommand::StartFlip => self.start_flip(),
            FlipCommand::SetTarget(snapshot) => self.set_target(snapshot),
            FlipCommand::ClearTarget => self.clear_target(),
            FlipCommand::Configure(config) => self.configure(config),
            FlipCommand::TimerElapsed(token) => self.on_timer_elapsed(token),
            FlipCommand::AlignmentReady => self.set_alignment_ready(),
            FlipCommand::AlignmentFailed => self.report_alignment_failed(),
            FlipCommand::GuidingReady => self.set_guiding_ready(),
            FlipCommand::GuidingFailed => self.report_guiding_failed(),
            FlipCommand::Reset => self.reset(),
            FlipCommand::Disconnect => self.disconnect(),
        }
    }

    // ------------------------------------------------------------------
    // Inbound operations
    // ------------------------------------------------------------------

    /// New mount position report. May raise a flip request.
    pub fn update_position(&mut self, snapshot: PointingSnapshot) -> bool {
        let before = self.transition_count;
        self.current = snapshot;

        if !snapshot.valid {
            debug!("Ignoring invalid position report");
            return false;
        }
        if self.stage != MfStage::None || self.mount_state != MountFlipState::None {
            return false;
        }
        if let Some(reason) = self.planning_blocker() {
            self.note_inactive(Some(reason));
            return false;
        }
        self.note_inactive(None);

        let position = self.policy_position();
        if let Some(hours) = hours_to_flip(&position, &self.config, self.flip_delay) {
            debug!("Meridian flip in {}", format_countdown(hours));
            self.emitter.notify_flip_countdown(hours);
        }
        if is_flip_due(&position, &self.config, self.flip_delay) {
            self.request_flip(&position);
        }
        self.transition_count != before
    }

    /// Capture reports whether an exposure is in flight.
    pub fn set_capture_ready(&mut self, ready: bool) -> bool {
        let before = self.transition_count;
        self.gate.set_capture_ready(ready);

        if self.stage != MfStage::Requested {
            debug!("Capture ready={} in stage {} (no transition)", ready, self.stage);
            return false;
        }
        if ready {
            self.try_accept();
        } else if self.mount_state == MountFlipState::Planned {
            self.set_mount_state(MountFlipState::Waiting);
            self.log_info("Meridian flip waiting for capture.");
        }
        self.transition_count != before
    }

    /// Issue the flip slew. Only valid once capture has accepted.
    pub fn start_flip(&mut self) -> bool {
        if self.stage != MfStage::Ready {
            self.log_warn(&format!(
                "start_flip ignored: stage is {}, expected Ready",
                self.stage
            ));
            return false;
        }
        if !self.target.valid {
            self.log_warn("Meridian flip abandoned: no target to re-slew to");
            return self.reset();
        }

        let before = self.transition_count;
        let target = self.target;
        self.flip_start_pier_side = self.current.pier_side;

        self.set_stage(MfStage::Initiated);
        self.emitter.notify_slew_command(&target);
        self.set_mount_state(MountFlipState::Running);
        self.set_stage(MfStage::Flipping);
        let armed = self.gate.begin_flip(self.config.min_flip_duration());
        self.log_info(&format!(
            "Meridian flip slew started to {} (pier side {}, minimum duration {:?})",
            target.direction, self.flip_start_pier_side, armed.duration
        ));
        self.transition_count != before
    }

    /// Mount motion status report from the device layer.
    pub fn on_mount_status_changed(&mut self, status: MountStatus) -> bool {
        let before = self.transition_count;
        let previous = self.device_status;
        self.device_status = status;
        if previous != status {
            debug!("Mount status changed from {} to {}", previous, status);
        }

        match status {
            MountStatus::Error => {
                if self.mount_state.is_faultable() {
                    self.fail_flip("mount reported an error");
                } else if previous != status {
                    warn!("Mount error outside of a meridian flip");
                }
            }
            MountStatus::Parked => {
                if self.stage.is_active() && self.stage < MfStage::Completed {
                    self.log_warn("Mount parked during meridian flip, cancelling flip");
                    self.reset();
                }
            }
            MountStatus::Slewing => {
                if self.stage == MfStage::Flipping {
                    self.gate.observe_slew();
                }
            }
            MountStatus::Tracking => match self.stage {
                MfStage::Requested => self.try_accept(),
                MfStage::Flipping => self.try_complete(),
                _ => {}
            },
            MountStatus::Idle => {}
        }
        self.transition_count != before
    }

    /// Minimum flip duration expired.
    pub fn on_timer_elapsed(&mut self, token: TimerToken) -> bool {
        let before = self.transition_count;
        if !self.gate.expire_timer(token) {
            debug!("Ignoring stale flip timer (generation {})", token.generation());
            return false;
        }
        debug!("Minimum flip duration elapsed");
        self.try_complete();
        self.transition_count != before
    }

    /// A new slew target was commanded outside of the flip itself.
    pub fn set_target(&mut self, snapshot: PointingSnapshot) -> bool {
        if !snapshot.valid {
            return self.clear_target();
        }
        if self.stage.is_slewing_or_later() && self.stage < MfStage::Completed {
            debug!("Target update ignored while the flip slew is running");
            return false;
        }

        let before = self.transition_count;
        self.target = snapshot;
        if self.stage >= MfStage::Completed {
            // post-flip centering; the cycle carries on
            debug!("Target refined during post-flip stage {}", self.stage);
            return false;
        }

        self.flip_delay = 0.0;
        self.retries_exhausted = false;
        if self.stage.is_active() {
            self.log_info("New target supersedes the pending meridian flip");
            self.reset();
        }
        debug!("Target set to {}", snapshot);
        self.transition_count != before
    }

    /// No target is active any more.
    pub fn clear_target(&mut self) -> bool {
        self.target = PointingSnapshot::invalid();
        if matches!(self.stage, MfStage::Requested | MfStage::Ready) {
            self.log_info("Target cleared, pending meridian flip abandoned");
            return self.reset();
        }
        false
    }

    /// Replace the session configuration.
    pub fn configure(&mut self, config: FlipConfig) -> bool {
        if let Err(e) = config.validate() {
            self.log_warn(&format!("Rejecting flip configuration: {e}"));
            return false;
        }
        info!(
            "Meridian flip configuration: enabled={} offset={:.2}° align={} guide={}",
            config.enabled,
            config.offset_degrees,
            config.resume_alignment_after_flip,
            config.resume_guiding_after_flip
        );
        self.config = config;
        self.retries_exhausted = false;

        if !self.config.enabled && self.stage.is_active() && !self.stage.is_slewing_or_later() {
            self.log_info("Meridian flip disabled, pending request cancelled");
            return self.reset();
        }
        false
    }

    /// Post-flip re-alignment finished.
    pub fn set_alignment_ready(&mut self) -> bool {
        if self.stage != MfStage::Aligning {
            debug!("Alignment ready ignored in stage {}", self.stage);
            return false;
        }
        let before = self.transition_count;
        self.gate.set_alignment_resumed();
        self.log_info("Post flip re-alignment completed successfully.");
        self.try_advance_post_flip();
        self.transition_count != before
    }

    /// Guiding is running again after the flip.
    pub fn set_guiding_ready(&mut self) -> bool {
        if self.stage != MfStage::Guiding {
            debug!("Guiding ready ignored in stage {}", self.stage);
            return false;
        }
        let before = self.transition_count;
        self.gate.set_guiding_resumed();
        self.log_info("Guiding resumed after meridian flip.");
        self.try_advance_post_flip();
        self.transition_count != before
    }

    pub fn report_alignment_failed(&mut self) -> bool {
        self.report_post_flip_failure(PostFlipTask::Alignment)
    }

    pub fn report_guiding_failed(&mut self) -> bool {
        self.report_post_flip_failure(PostFlipTask::Guiding)
    }

    /// Alignment or guiding failed after the flip.
    pub fn report_post_flip_failure(&mut self, task: PostFlipTask) -> bool {
        let expected = match task {
            PostFlipTask::Alignment => MfStage::Aligning,
            PostFlipTask::Guiding => MfStage::Guiding,
        };
        if self.stage != expected {
            debug!("Post-flip {} failure ignored in stage {}", task, self.stage);
            return false;
        }

        let before = self.transition_count;
        let failures = self.gate.record_post_flip_failure();
        if failures >= self.config.post_flip_max_retries {
            self.abort_cycle(&format!("post-flip {task} failed {failures} times"));
        } else {
            self.log_warn(&format!(
                "Post-flip {task} failed ({failures}/{}), retrying",
                self.config.post_flip_max_retries
            ));
        }
        self.transition_count != before
    }

    /// Force the initial stage and mount state. Safe from any state; cancels
    /// the pending timer and every awaited readiness flag. The flip delay is
    /// kept.
    pub fn reset(&mut self) -> bool {
        let before = self.transition_count;
        self.gate.clear();
        self.flip_start_pier_side = PierSide::Unknown;
        self.inactive = None;
        self.set_stage(MfStage::None);
        self.set_mount_state(MountFlipState::None);
        if self.transition_count != before {
            self.log_info("Meridian flip state reset.");
        }
        self.transition_count != before
    }

    /// Mount connection lost: reset and forget both positions.
    pub fn disconnect(&mut self) -> bool {
        let changed = self.reset();
        self.current = PointingSnapshot::invalid();
        self.target = PointingSnapshot::invalid();
        self.device_status = MountStatus::Idle;
        info!("Mount disconnected, meridian flip inactive");
        changed
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn request_flip(&mut self, position: &PointingSnapshot) {
        self.log_info(&format!(
            "Meridian flip planned at {} (offset {:.3}h, delay {:.3}h)",
            position,
            offset_hours(&self.config),
            self.flip_delay
        ));
        self.gate.begin_request();
        self.set_mount_state(MountFlipState::Planned);
        self.set_stage(MfStage::Requested);
        self.emitter.notify_flip_requested();
    }

    fn try_accept(&mut self) {
        if self.stage != MfStage::Requested || !self.gate.capture_ready() {
            return;
        }
        if self.device_status != MountStatus::Tracking {
            // original behavior: an accepted flip falls back to planned
            // while the mount is not tracking
            self.set_mount_state(MountFlipState::Planned);
            debug!("Capture ready but mount is {}, flip deferred", self.device_status);
            return;
        }
        self.set_mount_state(MountFlipState::Accepted);
        self.set_stage(MfStage::Ready);
        self.log_info("Meridian flip accepted by capture.");
    }

    fn try_complete(&mut self) {
        if self.stage != MfStage::Flipping || self.mount_state != MountFlipState::Running {
            return;
        }
        if !self.gate.min_duration_elapsed() {
            debug!("Tracking report ignored: minimum flip duration not elapsed");
            return;
        }
        if self.device_status != MountStatus::Tracking {
            return;
        }
        if !self.gate.slew_observed() {
            debug!("Flip slew finished without a slewing report");
        }

        let start = self.flip_start_pier_side;
        let now = self.current.pier_side;
        if start.is_known() && now.is_known() {
            if now != start.opposite() {
                self.fail_flip(&format!("pier side not changed ({now})"));
                return;
            }
        } else {
            self.log_info("Pier side unknown, assuming meridian flip succeeded");
        }
        self.complete_flip();
    }

    fn complete_flip(&mut self) {
        // the flip slew re-acquired the target at the current hour angle
        let mut target = self.target.with_pier_side(self.current.pier_side);
        if self.current.valid {
            target = target.with_hour_angle(self.current.hour_angle);
        }
        self.target = target;
        self.set_mount_state(MountFlipState::Completed);
        self.set_stage(MfStage::Completed);
        self.log_info("Meridian flip completed OK.");

        if self.config.resume_alignment_after_flip {
            self.gate.begin_alignment();
            self.set_stage(MfStage::Aligning);
            self.log_info("Performing post flip re-alignment...");
        } else {
            self.advance_to_guiding_or_finish();
        }
    }

    /// Leave the post-flip stage once its own readiness flag is set.
    fn try_advance_post_flip(&mut self) {
        match self.stage {
            MfStage::Aligning if self.gate.alignment_resumed() => {
                self.advance_to_guiding_or_finish()
            }
            MfStage::Guiding if self.gate.guiding_resumed() => self.finish_cycle(),
            _ => {}
        }
    }

    fn advance_to_guiding_or_finish(&mut self) {
        if self.config.resume_guiding_after_flip {
            self.gate.begin_guiding();
            self.set_stage(MfStage::Guiding);
            self.log_info("Performing post flip re-calibration and guiding...");
        } else {
            self.finish_cycle();
        }
    }

    fn finish_cycle(&mut self) {
        self.flip_delay = 0.0;
        self.retries_exhausted = false;
        self.gate.clear();
        self.set_stage(MfStage::None);
        self.set_mount_state(MountFlipState::None);
        self.log_info("Meridian flip cycle finished, capture may resume.");
    }

    fn fail_flip(&mut self, reason: &str) {
        self.log_warn(&format!("Meridian flip failed: {reason}"));
        self.gate.clear();
        self.set_mount_state(MountFlipState::Error);

        let backoff = self.config.backoff();
        if backoff.is_exhausted(self.flip_delay) {
            self.retries_exhausted = true;
            self.log_warn("No successful meridian flip done, delay too long");
        } else {
            let past_threshold = hours_to_flip(&self.policy_position(), &self.config, 0.0)
                .map_or(0.0, |hours| -hours);
            self.flip_delay = compute_retry_delay(self.flip_delay, past_threshold, &backoff);
            self.log_warn(&format!(
                "Meridian flip will be retried with a delay of {:.1} minutes",
                self.flip_delay * 60.0
            ));
        }

        self.flip_start_pier_side = PierSide::Unknown;
        self.set_stage(MfStage::None);
        self.set_mount_state(MountFlipState::None);
    }

    fn abort_cycle(&mut self, reason: &str) {
        self.log_warn(&format!("Meridian flip aborted: {reason}"));
        self.emitter.notify_flip_aborted(reason);
        self.gate.clear();
        self.set_stage(MfStage::None);
        self.set_mount_state(MountFlipState::None);
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn planning_blocker(&self) -> Option<Inactive> {
        if !self.config.enabled {
            return Some(Inactive::Disabled);
        }
        if self.device_status == MountStatus::Parked {
            return Some(Inactive::Parked);
        }
        if !self.target.valid {
            return Some(Inactive::NoTarget);
        }
        if self.retries_exhausted {
            return Some(Inactive::RetriesExhausted);
        }
        if !self.current.pier_side.is_known()
            && !self.target.pier_side.is_known()
            && infer_pier_side(self.target.hour_angle) == PierSide::East
        {
            return Some(Inactive::SlewAfterMeridian);
        }
        if self.device_status != MountStatus::Tracking {
            return Some(Inactive::NotTracking);
        }
        None
    }

    /// Current position with the pier side the policy should assume.
    fn policy_position(&self) -> PointingSnapshot {
        if self.current.pier_side.is_known() {
            self.current
        } else if self.target.pier_side.is_known() {
            self.current.with_pier_side(self.target.pier_side)
        } else {
            self.current
                .with_pier_side(infer_pier_side(self.target.hour_angle))
        }
    }

    fn note_inactive(&mut self, reason: Option<Inactive>) {
        if self.inactive == reason {
            return;
        }
        self.inactive = reason;
        if let Some(reason) = reason {
            self.log_info(&format!("Meridian flip inactive ({})", reason.describe()));
        }
    }

    fn set_stage(&mut self, new: MfStage) {
        if self.stage == new {
            return;
        }
        let old = self.stage;
        self.stage = new;
        self.record_transition();
        info!("Meridian flip stage {} -> {}", old, new);
        self.emitter.notify_stage_change(old, new);
    }

    fn set_mount_state(&mut self, new: MountFlipState) {
        if self.mount_state == new {
            return;
        }
        let old = self.mount_state;
        self.mount_state = new;
        self.record_transition();
        debug!("Meridian flip mount state {} -> {}", old, new);
        self.emitter.notify_mount_state_change(old, new);
    }

    fn record_transition(&mut self) {
        self.transition_count += 1;
        self.last_transition = Some(Instant::now());
    }

    fn log_info(&self, text: &str) {
        info!("{}", text);
        self.emitter.notify_log_message(text);
    }

    fn log_warn(&self, text: &str) {
        warn!("{}", text);
        self.emitter.notify_log_message(text);
    }
}
