// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod flip;
pub mod sky;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use flip::command::FlipCommand;
pub use flip::config::FlipConfig;
pub use flip::events::{FlipListener, FlipNotification};
pub use flip::machine::{FlipStatus, MeridianFlipStateMachine};
pub use flip::state::{MfStage, MountFlipState, MountStatus};
pub use sky::{EquatorialCoord, PierSide, PointingSnapshot};
