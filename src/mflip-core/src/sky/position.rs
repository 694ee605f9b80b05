// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{range_ha, EquatorialCoord, PierSide};

/// A mount pointing report: where the tube points, on which pier side, and
/// the hour angle at the moment it was recorded.
///
/// Snapshots are replaced wholesale on every report and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointingSnapshot {
    pub direction: EquatorialCoord,
    pub pier_side: PierSide,
    /// Hours, normalized into `[-12, +12)`.
    pub hour_angle: f64,
    pub valid: bool,
}

impl PointingSnapshot {
    #[must_use]
    pub fn new(direction: EquatorialCoord, pier_side: PierSide, hour_angle: f64) -> Self {
        let valid = hour_angle.is_finite()
            && direction.ra_hours.is_finite()
            && direction.dec_deg.is_finite();
        Self {
            direction,
            pier_side,
            hour_angle: if valid { range_ha(hour_angle) } else { 0.0 },
            valid,
        }
    }

    /// Placeholder for "no position known" / "no target active".
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            direction: EquatorialCoord::default(),
            pier_side: PierSide::Unknown,
            hour_angle: 0.0,
            valid: false,
        }
    }

    /// Same snapshot with a different pier side.
    #[must_use]
    pub fn with_pier_side(self, pier_side: PierSide) -> Self {
        Self { pier_side, ..self }
    }

    /// Same snapshot re-stamped with another hour angle.
    #[must_use]
    pub fn with_hour_angle(self, hour_angle: f64) -> Self {
        Self {
            hour_angle: range_ha(hour_angle),
            ..self
        }
    }
}

impl Default for PointingSnapshot {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Display for PointingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return write!(f, "<invalid>");
        }
        write!(
            f,
            "{} HA={:+.4}h pier={}",
            self.direction, self.hour_angle, self.pier_side
        )
    }
}
