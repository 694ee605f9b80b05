// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod position;

pub use position::PointingSnapshot;

pub const HOURS_PER_DAY: f64 = 24.0;
pub const DEGREES_PER_HOUR: f64 = 15.0;

/// Normalize an hour value into `[-12, +12)`.
#[must_use]
pub fn range_ha(hours: f64) -> f64 {
    let wrapped = (hours + 12.0).rem_euclid(HOURS_PER_DAY) - 12.0;
    // rem_euclid can round up to exactly 24.0 for tiny negative inputs
    if wrapped >= 12.0 {
        wrapped - HOURS_PER_DAY
    } else {
        wrapped
    }
}

/// Hour angle of an object at `ra_hours` for the given local sidereal time.
#[must_use]
pub fn hour_angle(lst_hours: f64, ra_hours: f64) -> f64 {
    range_ha(lst_hours - ra_hours)
}

/// Equatorial pointing direction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EquatorialCoord {
    pub ra_hours: f64,
    pub dec_deg: f64,
}

impl EquatorialCoord {
    #[must_use]
    pub fn new(ra_hours: f64, dec_deg: f64) -> Self {
        Self {
            ra_hours: ra_hours.rem_euclid(HOURS_PER_DAY),
            dec_deg: dec_deg.clamp(-90.0, 90.0),
        }
    }
}

impl fmt::Display for EquatorialCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RA={:.4}h DEC={:+.3}°", self.ra_hours, self.dec_deg)
    }
}

/// Side of the pier the optical tube sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PierSide {
    East,
    West,
    #[default]
    Unknown,
}

impl PierSide {
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::East => Self::West,
            Self::West => Self::East,
            Self::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for PierSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::East => write!(f, "East"),
            Self::West => write!(f, "West"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}
