// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Flip policy: when a flip is due and how long to back off after a failure.
//!
//! Everything here is pure so it can be tested without a mount, a timer or
//! a running state machine.

use crate::sky::{range_ha, PierSide, PointingSnapshot, DEGREES_PER_HOUR, HOURS_PER_DAY};

use super::config::FlipConfig;

/// A mount may flip up to three hours before the meridian; hour angles at or
/// beyond this are treated as "before the meridian on the previous day".
pub const EARLY_FLIP_WINDOW_HOURS: f64 = 9.0;

/// Configured meridian offset in hours.
pub fn offset_hours(config: &FlipConfig) -> f64 {
    range_ha(config.offset_degrees / DEGREES_PER_HOUR)
}

/// Hours until the next flip is due, or `None` if the snapshot is invalid.
///
/// Zero or negative means a flip is due now. The hour angle is taken
/// relative to the meridian the mount will flip at: a mount on the West side
/// flips near HA 0h, one on the East side (pointing below the pole) near
/// HA 12h. `Unknown` is treated as West; see [`infer_pier_side`].
pub fn hours_to_flip(current: &PointingSnapshot, config: &FlipConfig, delay: f64) -> Option<f64> {
    if !current.valid {
        return None;
    }

    let mut ha = match current.pier_side {
        PierSide::East => range_ha(current.hour_angle + 12.0),
        PierSide::West | PierSide::Unknown => current.hour_angle,
    };
    if ha >= EARLY_FLIP_WINDOW_HOURS {
        ha -= HOURS_PER_DAY;
    }

    Some(offset_hours(config) + delay - ha)
}

/// Whether a flip is due. Exactly at the threshold a flip is due.
pub fn is_flip_due(current: &PointingSnapshot, config: &FlipConfig, delay: f64) -> bool {
    hours_to_flip(current, config, delay).is_some_and(|hours| hours <= 0.0)
}

/// Approximate the pier side of a mount that does not report it, from the
/// hour angle at which it was slewed to its target.
///
/// This is a heuristic for German equatorial mounts, not a hardware fact:
/// a target acquired before the meridian leaves the tube on the West side,
/// one acquired after it on the East side.
pub fn infer_pier_side(slew_hour_angle: f64) -> PierSide {
    if range_ha(slew_hour_angle) < 0.0 {
        PierSide::West
    } else {
        PierSide::East
    }
}

/// Render a countdown in hours as `hh:mm:ss`. Overdue values render as zero.
pub fn format_countdown(hours: f64) -> String {
    let total_secs = if hours.is_finite() && hours > 0.0 {
        (hours * 3600.0).round() as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60
    )
}

/// Additive backoff applied to the flip threshold after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryBackoff {
    increment_hours: f64,
    max_delay_hours: f64,
}

impl RetryBackoff {
    pub fn new(increment_hours: f64, max_delay_hours: f64) -> Self {
        Self {
            increment_hours,
            max_delay_hours,
        }
    }

    pub fn increment_hours(&self) -> f64 {
        self.increment_hours
    }

    pub fn max_delay_hours(&self) -> f64 {
        self.max_delay_hours
    }

    /// A delay beyond the maximum means further retries are pointless.
    pub fn is_exhausted(&self, delay: f64) -> bool {
        delay > self.max_delay_hours
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(4.0 / 60.0, 1.0)
    }
}

/// Delay to use for the next flip-due evaluation after a failure.
///
/// `hours_past_threshold` is how far the mount already is beyond the
/// undelayed flip threshold when the attempt failed. The next attempt lies
/// one increment beyond whichever is later, the previous delay or the
/// current position, so a late failure never makes the flip due again at
/// once.
pub fn compute_retry_delay(
    previous_delay: f64,
    hours_past_threshold: f64,
    backoff: &RetryBackoff,
) -> f64 {
    previous_delay.max(hours_past_threshold).max(0.0) + backoff.increment_hours()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sky::EquatorialCoord;

    fn at(ha: f64, pier_side: PierSide) -> PointingSnapshot {
        PointingSnapshot::new(EquatorialCoord::new(5.0, 30.0), pier_side, ha)
    }

    fn with_offset(offset_degrees: f64) -> FlipConfig {
        FlipConfig {
            offset_degrees,
            ..FlipConfig::default()
        }
    }

    #[test]
    fn test_flip_due_crossing_meridian() {
        let config = with_offset(0.0);
        assert!(!is_flip_due(&at(-0.01, PierSide::West), &config, 0.0));
        assert!(is_flip_due(&at(0.01, PierSide::West), &config, 0.0));
    }

    #[test]
    fn test_flip_due_exactly_at_threshold() {
        let config = with_offset(15.0);
        assert!(is_flip_due(&at(1.0, PierSide::West), &config, 0.0));
        assert!(is_flip_due(&at(1.5, PierSide::West), &config, 0.5));
        assert!(!is_flip_due(&at(1.4, PierSide::West), &config, 0.5));
    }

    #[test]
    fn test_flip_due_matches_threshold_over_grid() {
        for offset_steps in -8..=8 {
            let offset_degrees = offset_steps as f64 * 7.5;
            let config = with_offset(offset_degrees);
            for delay_steps in 0..4 {
                let delay = delay_steps as f64 * 0.25;
                let threshold = offset_degrees / 15.0 + delay;
                for ha_steps in -36..36 {
                    let ha = ha_steps as f64 * 0.25;
                    let due = is_flip_due(&at(ha, PierSide::West), &config, delay);
                    assert_eq!(
                        due,
                        ha >= threshold,
                        "ha={ha} offset={offset_degrees} delay={delay}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_east_pier_side_flips_near_lower_culmination() {
        let config = with_offset(0.0);
        assert!(!is_flip_due(&at(6.0, PierSide::East), &config, 0.0));
        assert!(!is_flip_due(&at(11.9, PierSide::East), &config, 0.0));
        assert!(is_flip_due(&at(-11.9, PierSide::East), &config, 0.0));
    }

    #[test]
    fn test_early_flip_window() {
        let config = with_offset(0.0);
        assert!(is_flip_due(&at(8.9, PierSide::West), &config, 0.0));
        assert!(!is_flip_due(&at(9.0, PierSide::West), &config, 0.0));
        let hours = hours_to_flip(&at(10.0, PierSide::West), &config, 0.0).unwrap();
        assert!((hours - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_snapshot_never_due() {
        let config = with_offset(0.0);
        assert!(!is_flip_due(&PointingSnapshot::invalid(), &config, 0.0));
        assert!(hours_to_flip(&PointingSnapshot::invalid(), &config, 0.0).is_none());
    }

    #[test]
    fn test_unknown_pier_side_treated_as_west() {
        let config = with_offset(0.0);
        assert_eq!(
            is_flip_due(&at(0.2, PierSide::Unknown), &config, 0.0),
            is_flip_due(&at(0.2, PierSide::West), &config, 0.0)
        );
    }

    #[test]
    fn test_infer_pier_side() {
        assert_eq!(infer_pier_side(-0.5), PierSide::West);
        assert_eq!(infer_pier_side(0.0), PierSide::East);
        assert_eq!(infer_pier_side(3.0), PierSide::East);
        assert_eq!(infer_pier_side(23.0), PierSide::West);
    }

    #[test]
    fn test_retry_delay_is_additive() {
        let backoff = RetryBackoff::new(0.1, 1.0);
        let first = compute_retry_delay(0.0, 0.0, &backoff);
        assert!((first - 0.1).abs() < 1e-12);
        let second = compute_retry_delay(first, 0.05, &backoff);
        assert!((second - 0.2).abs() < 1e-12);
        assert!(!backoff.is_exhausted(1.0));
        assert!(backoff.is_exhausted(1.05));
    }

    #[test]
    fn test_retry_delay_follows_late_failure() {
        let backoff = RetryBackoff::default();
        // failed half an hour past the meridian
        let delay = compute_retry_delay(0.0, 0.5, &backoff);
        assert!((delay - (0.5 + 4.0 / 60.0)).abs() < 1e-12);
        let config = with_offset(0.0);
        assert!(!is_flip_due(&at(0.5, PierSide::West), &config, delay));
        assert!(is_flip_due(&at(0.57, PierSide::West), &config, delay));
        // before the threshold only the previous delay counts
        let early = compute_retry_delay(0.2, -1.0, &backoff);
        assert!((early - (0.2 + 4.0 / 60.0)).abs() < 1e-12);
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(1.5), "01:30:00");
        assert_eq!(format_countdown(10.0 / 3600.0), "00:00:10");
        assert_eq!(format_countdown(-0.5), "00:00:00");
    }
}
