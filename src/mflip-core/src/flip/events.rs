// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Flip event notification system.
//!
//! Capture, alignment, guiding and the mount device layer observe the flip
//! state machine through typed notifications. Dispatch is synchronous and
//! follows registration order, so every listener sees transitions in the
//! order they happened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::sky::PointingSnapshot;

use super::state::{MfStage, MountFlipState};

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Trait for components that want to receive flip events.
///
/// All methods have default no-op implementations, so listeners can
/// selectively override only the events they care about.
pub trait FlipListener: Send + Sync {
    /// A flip is due; capture must stop starting exposures and report back.
    fn on_flip_requested(&self) {}

    /// The orchestration stage changed.
    fn on_stage_change(&self, _old: MfStage, _new: MfStage) {}

    /// The mount-side flip state changed.
    fn on_mount_state_change(&self, _old: MountFlipState, _new: MountFlipState) {}

    /// The mount must slew to `target` to execute the flip.
    fn on_slew_command(&self, _target: &PointingSnapshot) {}

    /// Human-readable trace line.
    fn on_log_message(&self, _text: &str) {}

    /// Hours remaining until the next flip is due.
    fn on_flip_countdown(&self, _hours: f64) {}

    /// A flip cycle was given up after it had started.
    fn on_flip_aborted(&self, _reason: &str) {}
}

/// Serializable mirror of the listener calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlipNotification {
    FlipRequested,
    StageChanged { old: MfStage, new: MfStage },
    MountStateChanged { old: MountFlipState, new: MountFlipState },
    SlewCommand { target: PointingSnapshot },
    LogMessage { text: String },
    FlipCountdown { hours: f64 },
    FlipAborted { reason: String },
}

impl FlipNotification {
    /// Render as a single JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

/// Manages registered listeners and dispatches events.
pub struct FlipEventEmitter {
    listeners: Vec<(ListenerId, Arc<dyn FlipListener>)>,
}

impl Default for FlipEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FlipEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlipEventEmitter")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl FlipEventEmitter {
    /// Create a new event emitter with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Register a listener to receive events.
    /// Returns an ID that can be used to unregister the listener.
    pub fn register(&mut self, listener: Arc<dyn FlipListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.push((id, listener));
        id
    }

    /// Unregister a listener by its ID.
    pub fn unregister(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    /// Get the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver one notification to every listener.
    pub fn dispatch(&self, notification: &FlipNotification) {
        for (_, listener) in &self.listeners {
            match notification {
                FlipNotification::FlipRequested => listener.on_flip_requested(),
                FlipNotification::StageChanged { old, new } => listener.on_stage_change(*old, *new),
                FlipNotification::MountStateChanged { old, new } => {
                    listener.on_mount_state_change(*old, *new)
                }
                FlipNotification::SlewCommand { target } => listener.on_slew_command(target),
                FlipNotification::LogMessage { text } => listener.on_log_message(text),
                FlipNotification::FlipCountdown { hours } => listener.on_flip_countdown(*hours),
                FlipNotification::FlipAborted { reason } => listener.on_flip_aborted(reason),
            }
        }
    }

    pub fn notify_flip_requested(&self) {
        self.dispatch(&FlipNotification::FlipRequested);
    }

    pub fn notify_stage_change(&self, old: MfStage, new: MfStage) {
        self.dispatch(&FlipNotification::StageChanged { old, new });
    }

    pub fn notify_mount_state_change(&self, old: MountFlipState, new: MountFlipState) {
        self.dispatch(&FlipNotification::MountStateChanged { old, new });
    }

    pub fn notify_slew_command(&self, target: &PointingSnapshot) {
        self.dispatch(&FlipNotification::SlewCommand { target: *target });
    }

    pub fn notify_log_message(&self, text: &str) {
        self.dispatch(&FlipNotification::LogMessage {
            text: text.to_string(),
        });
    }

    pub fn notify_flip_countdown(&self, hours: f64) {
        self.dispatch(&FlipNotification::FlipCountdown { hours });
    }

    pub fn notify_flip_aborted(&self, reason: &str) {
        self.dispatch(&FlipNotification::FlipAborted {
            reason: reason.to_string(),
        });
    }
}

/// Listener that records every notification it receives, in order.
///
/// Used by tests and by diagnostics that want a replayable trace.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: std::sync::Mutex<Vec<FlipNotification>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, notification: FlipNotification) {
        if let Ok(mut events) = self.events.lock() {
            events.push(notification);
        }
    }

    /// All notifications received so far.
    pub fn events(&self) -> Vec<FlipNotification> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Only the stage transitions, as their target stage.
    pub fn stages(&self) -> Vec<MfStage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                FlipNotification::StageChanged { new, .. } => Some(new),
                _ => None,
            })
            .collect()
    }

    /// Only the mount-state transitions, as their target state.
    pub fn mount_states(&self) -> Vec<MountFlipState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                FlipNotification::MountStateChanged { new, .. } => Some(new),
                _ => None,
            })
            .collect()
    }

    /// Notifications minus log lines and countdowns.
    pub fn transitions(&self) -> Vec<FlipNotification> {
        self.events()
            .into_iter()
            .filter(|e| {
                !matches!(
                    e,
                    FlipNotification::LogMessage { .. } | FlipNotification::FlipCountdown { .. }
                )
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl FlipListener for RecordingListener {
    fn on_flip_requested(&self) {
        self.push(FlipNotification::FlipRequested);
    }

    fn on_stage_change(&self, old: MfStage, new: MfStage) {
        self.push(FlipNotification::StageChanged { old, new });
    }

    fn on_mount_state_change(&self, old: MountFlipState, new: MountFlipState) {
        self.push(FlipNotification::MountStateChanged { old, new });
    }

    fn on_slew_command(&self, target: &PointingSnapshot) {
        self.push(FlipNotification::SlewCommand { target: *target });
    }

    fn on_log_message(&self, text: &str) {
        self.push(FlipNotification::LogMessage {
            text: text.to_string(),
        });
    }

    fn on_flip_countdown(&self, hours: f64) {
        self.push(FlipNotification::FlipCountdown { hours });
    }

    fn on_flip_aborted(&self, reason: &str) {
        self.push(FlipNotification::FlipAborted {
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct TestListener {
        requested: AtomicBool,
        slewed: AtomicBool,
    }

    impl TestListener {
        fn new() -> Self {
            Self {
                requested: AtomicBool::new(false),
                slewed: AtomicBool::new(false),
            }
        }
    }

    impl FlipListener for TestListener {
        fn on_flip_requested(&self) {
            self.requested.store(true, Ordering::Relaxed);
        }

        fn on_slew_command(&self, _target: &PointingSnapshot) {
            self.slewed.store(true, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_register_and_notify() {
        let mut emitter = FlipEventEmitter::new();
        let listener = Arc::new(TestListener::new());
        let id = emitter.register(listener.clone());

        assert_eq!(emitter.listener_count(), 1);

        emitter.notify_flip_requested();
        assert!(listener.requested.load(Ordering::Relaxed));
        assert!(!listener.slewed.load(Ordering::Relaxed));

        emitter.notify_slew_command(&PointingSnapshot::invalid());
        assert!(listener.slewed.load(Ordering::Relaxed));

        emitter.unregister(id);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_recording_listener_keeps_order() {
        let mut emitter = FlipEventEmitter::new();
        let recorder = Arc::new(RecordingListener::new());
        emitter.register(recorder.clone());

        emitter.notify_stage_change(MfStage::None, MfStage::Requested);
        emitter.notify_log_message("hello");
        emitter.notify_stage_change(MfStage::Requested, MfStage::Ready);

        assert_eq!(recorder.stages(), vec![MfStage::Requested, MfStage::Ready]);
        assert_eq!(recorder.transitions().len(), 2);
        assert_eq!(recorder.events().len(), 3);
    }

    #[test]
    fn test_notification_json() {
        let json = FlipNotification::StageChanged {
            old: MfStage::Ready,
            new: MfStage::Initiated,
        }
        .to_json();
        assert_eq!(
            json,
            r#"{"event":"stage_changed","old":"ready","new":"initiated"}"#
        );
    }
}
