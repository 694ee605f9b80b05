// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Listeners that carry flip notifications out of the coordination task.

use tokio::sync::broadcast;
use tracing::{debug, info};

use mflip_core::flip::{FlipListener, FlipNotification};
use mflip_core::{MfStage, MountFlipState, PointingSnapshot};

/// Republishes every notification on a broadcast channel, in dispatch order.
///
/// The mount simulator and the collaborators subscribe to it; sending never
/// blocks the state machine.
pub struct NotificationBridge {
    tx: broadcast::Sender<FlipNotification>,
}

impl NotificationBridge {
    pub fn new(tx: broadcast::Sender<FlipNotification>) -> Self {
        Self { tx }
    }

    fn forward(&self, notification: FlipNotification) {
        if self.tx.send(notification).is_err() {
            debug!("No subscribers for flip notification");
        }
    }
}

impl FlipListener for NotificationBridge {
    fn on_flip_requested(&self) {
        self.forward(FlipNotification::FlipRequested);
    }

    fn on_stage_change(&self, old: MfStage, new: MfStage) {
        self.forward(FlipNotification::StageChanged { old, new });
    }

    fn on_mount_state_change(&self, old: MountFlipState, new: MountFlipState) {
        self.forward(FlipNotification::MountStateChanged { old, new });
    }

    fn on_slew_command(&self, target: &PointingSnapshot) {
        self.forward(FlipNotification::SlewCommand { target: *target });
    }

    fn on_flip_aborted(&self, reason: &str) {
        self.forward(FlipNotification::FlipAborted {
            reason: reason.to_string(),
        });
    }
}

/// Logs each notification as one JSON line.
#[derive(Debug, Default)]
pub struct JsonTraceListener;

impl JsonTraceListener {
    fn emit(&self, notification: FlipNotification) {
        info!("trace {}", notification.to_json());
    }
}

impl FlipListener for JsonTraceListener {
    fn on_flip_requested(&self) {
        self.emit(FlipNotification::FlipRequested);
    }

    fn on_stage_change(&self, old: MfStage, new: MfStage) {
        self.emit(FlipNotification::StageChanged { old, new });
    }

    fn on_mount_state_change(&self, old: MountFlipState, new: MountFlipState) {
        self.emit(FlipNotification::MountStateChanged { old, new });
    }

    fn on_slew_command(&self, target: &PointingSnapshot) {
        self.emit(FlipNotification::SlewCommand { target: *target });
    }

    fn on_flip_countdown(&self, hours: f64) {
        self.emit(FlipNotification::FlipCountdown { hours });
    }

    fn on_flip_aborted(&self, reason: &str) {
        self.emit(FlipNotification::FlipAborted {
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_preserves_order() {
        let (tx, mut rx) = broadcast::channel(16);
        let bridge = NotificationBridge::new(tx);
        bridge.on_flip_requested();
        bridge.on_stage_change(MfStage::None, MfStage::Requested);
        bridge.on_log_message("not forwarded");
        bridge.on_slew_command(&PointingSnapshot::invalid());

        assert_eq!(rx.try_recv().unwrap(), FlipNotification::FlipRequested);
        assert_eq!(
            rx.try_recv().unwrap(),
            FlipNotification::StageChanged {
                old: MfStage::None,
                new: MfStage::Requested
            }
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            FlipNotification::SlewCommand { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bridge_without_subscribers_does_not_fail() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let bridge = NotificationBridge::new(tx);
        bridge.on_flip_requested();
    }
}
