// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Meridian flip coordination.
//!
//! The state machine in [`machine`] is synchronous and clock-free: it is
//! driven by [`FlipCommand`]s and reports through [`FlipListener`]s. Timing
//! lives with whoever drives it.

pub mod command;
pub mod config;
pub mod events;
pub mod gate;
pub mod machine;
pub mod policies;
pub mod state;

pub use command::FlipCommand;
pub use config::FlipConfig;
pub use events::{FlipEventEmitter, FlipListener, FlipNotification, ListenerId, RecordingListener};
pub use gate::{ArmedTimer, FlipTimer, PostFlipTask, SubsystemGate, TimerToken};
pub use machine::{FlipStatus, MeridianFlipStateMachine};
pub use policies::{
    compute_retry_delay, format_countdown, hours_to_flip, infer_pier_side, is_flip_due,
    offset_hours, RetryBackoff,
};
pub use state::{MfStage, MountFlipState, MountStatus};
