// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Session settings for meridian flip handling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policies::RetryBackoff;

/// Meridian flip settings, loaded once per session and injected into the
/// state machine. Never read from ambient global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlipConfig {
    /// Execute meridian flips at all.
    pub enabled: bool,
    /// How far past the meridian (degrees of hour angle) before flipping.
    pub offset_degrees: f64,
    /// Re-align (plate solve) after a flip before capture resumes.
    pub resume_alignment_after_flip: bool,
    /// Restart guiding after a flip before capture resumes.
    pub resume_guiding_after_flip: bool,
    /// Pier side changes reported sooner than this after the flip slew
    /// starts are not trusted.
    pub min_flip_duration_ms: u64,
    /// Added to the flip delay after every failed attempt (minutes).
    pub retry_increment_minutes: f64,
    /// Give up retrying once the accumulated delay exceeds this (hours).
    pub max_flip_delay_hours: f64,
    /// Alignment/guiding failures tolerated after a flip before aborting.
    pub post_flip_max_retries: u32,
}

impl Default for FlipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            offset_degrees: 0.0,
            resume_alignment_after_flip: true,
            resume_guiding_after_flip: true,
            min_flip_duration_ms: 4_000,
            retry_increment_minutes: 4.0,
            max_flip_delay_hours: 1.0,
            post_flip_max_retries: 3,
        }
    }
}

impl FlipConfig {
    pub fn min_flip_duration(&self) -> Duration {
        Duration::from_millis(self.min_flip_duration_ms)
    }

    pub fn backoff(&self) -> RetryBackoff {
        RetryBackoff::new(self.retry_increment_minutes / 60.0, self.max_flip_delay_hours)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.offset_degrees.is_finite() {
            return Err("[flip].offset_degrees must be a finite number".to_string());
        }
        if !(-180.0..180.0).contains(&self.offset_degrees) {
            return Err("[flip].offset_degrees must be in range -180..180".to_string());
        }
        if !self.retry_increment_minutes.is_finite() || self.retry_increment_minutes <= 0.0 {
            return Err("[flip].retry_increment_minutes must be > 0".to_string());
        }
        if !self.max_flip_delay_hours.is_finite() || self.max_flip_delay_hours < 0.0 {
            return Err("[flip].max_flip_delay_hours must be >= 0".to_string());
        }
        if self.post_flip_max_retries == 0 {
            return Err("[flip].post_flip_max_retries must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FlipConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_flip_duration(), Duration::from_secs(4));
        assert!((config.backoff().increment_hours() - 4.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = FlipConfig {
            retry_increment_minutes: 0.0,
            ..FlipConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FlipConfig {
            offset_degrees: f64::INFINITY,
            ..FlipConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FlipConfig {
            post_flip_max_retries: 0,
            ..FlipConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
