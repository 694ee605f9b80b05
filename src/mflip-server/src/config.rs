// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for mflip-server.
//!
//! Config is loaded from the `[mflip-server]` section of `mflip-rs.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./mflip-rs.toml`
//! 3. `~/.config/mflip-rs/mflip-rs.toml`
//! 4. `/etc/mflip-rs/mflip-rs.toml`

use std::time::Duration;

use mflip_app::ConfigFile;
use mflip_core::FlipConfig;
use serde::{Deserialize, Serialize};

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Meridian flip session settings
    pub flip: FlipConfig,
    /// Simulated mount
    pub mount: MountSimConfig,
    /// Simulated capture, alignment and guiding
    pub collaborators: CollaboratorsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
    /// Log every flip notification as a JSON line
    pub trace_json: bool,
}

/// Simulated German equatorial mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSimConfig {
    /// Target right ascension (hours)
    pub target_ra_hours: f64,
    /// Target declination (degrees)
    pub target_dec_deg: f64,
    /// Hour angle of the target when the session starts (hours)
    pub start_hour_angle: f64,
    /// Position report interval (milliseconds)
    pub tick_ms: u64,
    /// Sky clock speed-up factor
    pub time_scale: f64,
    /// Duration of an ordinary slew (milliseconds)
    pub slew_ms: u64,
    /// Extra slew time when the pier side changes (milliseconds)
    pub pier_change_extra_ms: u64,
    /// Report the pier side; mounts that cannot report it send Unknown
    pub report_pier_side: bool,
}

impl Default for MountSimConfig {
    fn default() -> Self {
        Self {
            target_ra_hours: 5.5,
            target_dec_deg: 22.0,
            start_hour_angle: -0.05,
            tick_ms: 250,
            time_scale: 60.0,
            slew_ms: 3_000,
            pier_change_extra_ms: 2_000,
            report_pier_side: true,
        }
    }
}

impl MountSimConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn slew_duration(&self, pier_change: bool) -> Duration {
        let extra = if pier_change {
            self.pier_change_extra_ms
        } else {
            0
        };
        Duration::from_millis(self.slew_ms + extra)
    }
}

/// Reply delays of the simulated collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorsConfig {
    /// Time capture needs to finish the running exposure (milliseconds)
    pub capture_busy_ms: u64,
    /// Time a post-flip plate solve takes (milliseconds)
    pub alignment_ms: u64,
    /// Failed alignment attempts before one succeeds
    pub alignment_failures: u32,
    /// Time guiding needs to calibrate and settle (milliseconds)
    pub guiding_ms: u64,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            capture_busy_ms: 1_500,
            alignment_ms: 2_000,
            alignment_failures: 0,
            guiding_ms: 2_000,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;
        self.flip.validate()?;

        let mount = &self.mount;
        if !mount.target_ra_hours.is_finite() || !(0.0..24.0).contains(&mount.target_ra_hours) {
            return Err("[mount].target_ra_hours must be in range 0..24".to_string());
        }
        if !(-90.0..=90.0).contains(&mount.target_dec_deg) {
            return Err("[mount].target_dec_deg must be in range -90..=90".to_string());
        }
        if !(-12.0..12.0).contains(&mount.start_hour_angle) {
            return Err("[mount].start_hour_angle must be in range -12..12".to_string());
        }
        if mount.tick_ms == 0 {
            return Err("[mount].tick_ms must be > 0".to_string());
        }
        if !(mount.time_scale.is_finite() && mount.time_scale > 0.0) {
            return Err("[mount].time_scale must be > 0".to_string());
        }
        Ok(())
    }

    /// Generate an example configuration wrapped under the `[mflip-server]`
    /// section header, suitable for use in a combined `mflip-rs.toml` file.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "mflip-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
                trace_json: false,
            },
            flip: FlipConfig {
                offset_degrees: 1.0,
                ..FlipConfig::default()
            },
            mount: MountSimConfig::default(),
            collaborators: CollaboratorsConfig::default(),
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "mflip-server"
    }

    fn validate(&self) -> Result<(), String> {
        ServerConfig::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.general.log_level.is_none());
        assert!(config.flip.enabled);
        assert_eq!(config.flip.offset_degrees, 0.0);
        assert_eq!(config.flip.post_flip_max_retries, 3);
        assert_eq!(config.mount.tick_ms, 250);
        assert!(config.mount.report_pier_side);
        assert_eq!(config.collaborators.alignment_failures, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[flip]
offset_degrees = 2.5
resume_guiding_after_flip = false

[mount]
report_pier_side = false
"#;

        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        assert_eq!(config.flip.offset_degrees, 2.5);
        assert!(!config.flip.resume_guiding_after_flip);
        assert!(config.flip.resume_alignment_after_flip);
        assert!(!config.mount.report_pier_side);
        assert_eq!(config.mount.slew_ms, 3_000);
    }

    #[test]
    fn test_example_combined_toml_parses() {
        let example = ServerConfig::example_combined_toml();
        let config = <ServerConfig as ConfigFile>::load_from_str(&example).unwrap();
        assert_eq!(config.flip.offset_degrees, 1.0);
        assert_eq!(config.general.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = ServerConfig::default();
        config.general.log_level = Some("chatty".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_mount() {
        let mut config = ServerConfig::default();
        config.mount.tick_ms = 0;
        assert!(config.validate().unwrap_err().contains("tick_ms"));

        let mut config = ServerConfig::default();
        config.mount.target_dec_deg = 95.0;
        assert!(config.validate().unwrap_err().contains("target_dec_deg"));
    }

    #[test]
    fn test_validate_forwards_flip_errors() {
        let mut config = ServerConfig::default();
        config.flip.max_flip_delay_hours = -1.0;
        assert!(config.validate().unwrap_err().starts_with("[flip]"));
    }

    #[test]
    fn test_slew_duration_includes_pier_change() {
        let mount = MountSimConfig::default();
        assert_eq!(mount.slew_duration(false), Duration::from_millis(3_000));
        assert_eq!(mount.slew_duration(true), Duration::from_millis(5_000));
    }
}
