// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use crate::sky::PointingSnapshot;

use super::config::FlipConfig;
use super::gate::TimerToken;
use super::state::MountStatus;

/// Inbound event for the flip state machine.
///
/// Every input the machine reacts to is one of these, so a driver can
/// serialize device reports, collaborator answers and timer expiries into a
/// single queue.
#[derive(Debug, Clone)]
pub enum FlipCommand {
    UpdatePosition(PointingSnapshot),
    MountStatus(MountStatus),
    CaptureReady(bool),
    StartFlip,
    SetTarget(PointingSnapshot),
    ClearTarget,
    Configure(FlipConfig),
    TimerElapsed(TimerToken),
    AlignmentReady,
    AlignmentFailed,
    GuidingReady,
    GuidingFailed,
    Reset,
    Disconnect,
}

impl FlipCommand {
    /// Commands that pre-empt pending timers and readiness waits.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Reset | Self::Disconnect)
    }
}
