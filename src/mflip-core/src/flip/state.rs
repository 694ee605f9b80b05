// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Stage and status enums shared by the flip state machine and its observers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse, externally visible stage of a flip cycle.
///
/// Variants are declared in cycle order so observers can compare stages
/// (`stage >= MfStage::Aligning`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfStage {
    #[default]
    None,
    /// Flip is due; capture has been asked to stop.
    Requested,
    /// Capture reported no exposure in flight.
    Ready,
    /// Flip slew command issued.
    Initiated,
    /// Mount is physically flipping.
    Flipping,
    /// Slew finished and verified.
    Completed,
    /// Waiting for post-flip re-alignment.
    Aligning,
    /// Waiting for guiding to resume.
    Guiding,
}

impl MfStage {
    /// True while a flip cycle is underway.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::None)
    }

    /// True once the flip slew has been commanded and can no longer be
    /// abandoned without touching the mount.
    pub fn is_slewing_or_later(self) -> bool {
        self >= Self::Initiated
    }
}

impl fmt::Display for MfStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Requested => "Requested",
            Self::Ready => "Ready",
            Self::Initiated => "Initiated",
            Self::Flipping => "Flipping",
            Self::Completed => "Completed",
            Self::Aligning => "Aligning",
            Self::Guiding => "Guiding",
        };
        write!(f, "{name}")
    }
}

/// Fine-grained automaton for the mount side of a flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountFlipState {
    #[default]
    None,
    Planned,
    Waiting,
    Accepted,
    Running,
    Completed,
    Error,
}

impl MountFlipState {
    /// States from which a device fault aborts the flip.
    pub fn is_faultable(self) -> bool {
        matches!(
            self,
            Self::Planned | Self::Waiting | Self::Accepted | Self::Running
        )
    }
}

impl fmt::Display for MountFlipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Planned => "Planned",
            Self::Waiting => "Waiting",
            Self::Accepted => "Accepted",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Error => "Error",
        };
        write!(f, "{name}")
    }
}

/// Motion status reported by the mount device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountStatus {
    #[default]
    Idle,
    Slewing,
    Tracking,
    Parked,
    Error,
}

impl fmt::Display for MountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Slewing => "Slewing",
            Self::Tracking => "Tracking",
            Self::Parked => "Parked",
            Self::Error => "Error",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering_follows_cycle() {
        assert!(MfStage::None < MfStage::Requested);
        assert!(MfStage::Flipping < MfStage::Completed);
        assert!(MfStage::Aligning < MfStage::Guiding);
        assert!(MfStage::Initiated.is_slewing_or_later());
        assert!(!MfStage::Ready.is_slewing_or_later());
    }

    #[test]
    fn test_faultable_mount_states() {
        assert!(MountFlipState::Planned.is_faultable());
        assert!(MountFlipState::Running.is_faultable());
        assert!(!MountFlipState::None.is_faultable());
        assert!(!MountFlipState::Completed.is_faultable());
        assert!(!MountFlipState::Error.is_faultable());
    }
}
