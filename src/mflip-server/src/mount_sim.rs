// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated German equatorial mount.
//!
//! Tracks one target while a scaled sidereal clock runs, answers slew
//! commands from the flip coordinator and lands on the pier side implied by
//! the hour angle at the end of the slew.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use mflip_core::flip::FlipNotification;
use mflip_core::sky::{hour_angle, HOURS_PER_DAY};
use mflip_core::{
    DynResult, EquatorialCoord, FlipCommand, MountStatus, PierSide, PointingSnapshot,
};

use crate::config::MountSimConfig;

/// Sidereal hours per solar hour.
const SIDEREAL_RATE: f64 = 1.002_737_909;

/// Pier side a German mount ends up on after slewing at `ha`.
pub fn pier_side_for(ha: f64) -> PierSide {
    if ha <= 0.0 {
        PierSide::West
    } else {
        PierSide::East
    }
}

#[derive(Debug, Clone, Copy)]
struct Slew {
    remaining: Duration,
    landing: PierSide,
}

#[derive(Debug, Clone)]
pub struct SimulatedMount {
    target: EquatorialCoord,
    lst_hours: f64,
    pier_side: PierSide,
    status: MountStatus,
    slew: Option<Slew>,
    report_pier_side: bool,
    time_scale: f64,
}

impl SimulatedMount {
    pub fn new(config: &MountSimConfig) -> Self {
        let target = EquatorialCoord::new(config.target_ra_hours, config.target_dec_deg);
        Self {
            target,
            lst_hours: (target.ra_hours + config.start_hour_angle).rem_euclid(HOURS_PER_DAY),
            pier_side: pier_side_for(config.start_hour_angle),
            status: MountStatus::Tracking,
            slew: None,
            report_pier_side: config.report_pier_side,
            time_scale: config.time_scale,
        }
    }

    pub fn status(&self) -> MountStatus {
        self.status
    }

    pub fn pier_side(&self) -> PierSide {
        self.pier_side
    }

    pub fn hour_angle(&self) -> f64 {
        hour_angle(self.lst_hours, self.target.ra_hours)
    }

    /// Position as the device layer reports it.
    pub fn position(&self) -> PointingSnapshot {
        let pier_side = if self.report_pier_side {
            self.pier_side
        } else {
            PierSide::Unknown
        };
        PointingSnapshot::new(self.target, pier_side, self.hour_angle())
    }

    /// Start slewing to `target`. The pier side changes only on arrival.
    pub fn begin_slew(&mut self, target: EquatorialCoord, config: &MountSimConfig) -> Duration {
        let landing = pier_side_for(hour_angle(self.lst_hours, target.ra_hours));
        let duration = config.slew_duration(landing != self.pier_side);
        self.target = target;
        self.status = MountStatus::Slewing;
        self.slew = Some(Slew {
            remaining: duration,
            landing,
        });
        duration
    }

    /// Advance the simulation by `elapsed` wall time. Returns true when the
    /// motion status changed.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        let sky_hours = elapsed.as_secs_f64() / 3600.0 * self.time_scale * SIDEREAL_RATE;
        self.lst_hours = (self.lst_hours + sky_hours).rem_euclid(HOURS_PER_DAY);

        let Some(mut slew) = self.slew.take() else {
            return false;
        };
        slew.remaining = slew.remaining.saturating_sub(elapsed);
        if !slew.remaining.is_zero() {
            self.slew = Some(slew);
            return false;
        }
        self.pier_side = slew.landing;
        self.status = MountStatus::Tracking;
        true
    }
}

async fn report(tx: &mpsc::Sender<FlipCommand>, cmd: FlipCommand) -> bool {
    tx.send(cmd).await.is_ok()
}

/// Drive a simulated mount against the flip coordinator.
pub async fn run_mount_sim(
    config: MountSimConfig,
    cmd_tx: mpsc::Sender<FlipCommand>,
    mut events_rx: broadcast::Receiver<FlipNotification>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> DynResult<()> {
    let mut mount = SimulatedMount::new(&config);
    info!(
        "Simulated mount on {} at HA {:.3}h, pier side {}",
        mount.position().direction,
        mount.hour_angle(),
        mount.pier_side()
    );

    if !report(&cmd_tx, FlipCommand::SetTarget(mount.position())).await
        || !report(&cmd_tx, FlipCommand::MountStatus(mount.status())).await
    {
        return Ok(());
    }

    let mut ticker = time::interval(config.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            },

            _ = ticker.tick() => {
                let now = Instant::now();
                let status_changed = mount.advance(now - last_tick);
                last_tick = now;

                if !report(&cmd_tx, FlipCommand::UpdatePosition(mount.position())).await {
                    break;
                }
                if status_changed {
                    info!("Simulated mount arrived, pier side {}", mount.pier_side());
                    if !report(&cmd_tx, FlipCommand::MountStatus(mount.status())).await {
                        break;
                    }
                }
            },

            event = events_rx.recv() => match event {
                Ok(FlipNotification::SlewCommand { target }) => {
                    let duration = mount.begin_slew(target.direction, &config);
                    info!("Simulated mount slewing to {} ({:?})", target.direction, duration);
                    if !report(&cmd_tx, FlipCommand::MountStatus(MountStatus::Slewing)).await {
                        break;
                    }
                }
                Ok(other) => debug!("Mount ignores {:?}", other),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Simulated mount missed {} flip notifications", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!("Simulated mount stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MountSimConfig {
        MountSimConfig {
            start_hour_angle: -0.1,
            time_scale: 3600.0,
            slew_ms: 1_000,
            pier_change_extra_ms: 500,
            ..MountSimConfig::default()
        }
    }

    #[test]
    fn test_pier_side_for_hour_angle() {
        assert_eq!(pier_side_for(-1.0), PierSide::West);
        assert_eq!(pier_side_for(0.0), PierSide::West);
        assert_eq!(pier_side_for(0.01), PierSide::East);
    }

    #[test]
    fn test_starts_tracking_west_before_meridian() {
        let mount = SimulatedMount::new(&config());
        assert_eq!(mount.status(), MountStatus::Tracking);
        assert_eq!(mount.pier_side(), PierSide::West);
        assert!((mount.hour_angle() + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_clock_advances_hour_angle() {
        let mut mount = SimulatedMount::new(&config());
        // one wall second is one sky hour at this scale
        assert!(!mount.advance(Duration::from_millis(100)));
        let expected = -0.1 + 0.1 * SIDEREAL_RATE;
        assert!((mount.hour_angle() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_flip_slew_lands_on_east_side() {
        let cfg = config();
        let mut mount = SimulatedMount::new(&cfg);
        mount.advance(Duration::from_millis(200));
        assert!(mount.hour_angle() > 0.0);

        let target = mount.position().direction;
        let duration = mount.begin_slew(target, &cfg);
        assert_eq!(duration, Duration::from_millis(1_500));
        assert_eq!(mount.status(), MountStatus::Slewing);

        assert!(!mount.advance(Duration::from_millis(1_000)));
        assert_eq!(mount.pier_side(), PierSide::West);
        assert!(mount.advance(Duration::from_millis(500)));
        assert_eq!(mount.status(), MountStatus::Tracking);
        assert_eq!(mount.pier_side(), PierSide::East);
    }

    #[test]
    fn test_hidden_pier_side_reports_unknown() {
        let mount = SimulatedMount::new(&MountSimConfig {
            report_pier_side: false,
            ..config()
        });
        assert_eq!(mount.position().pier_side, PierSide::Unknown);
        assert_eq!(mount.pier_side(), PierSide::West);
    }

    #[tokio::test]
    async fn test_sim_reports_target_and_answers_slew() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cfg = MountSimConfig {
            tick_ms: 10,
            ..config()
        };
        let handle = tokio::spawn(run_mount_sim(cfg, cmd_tx, events_rx, shutdown_rx));

        let first = cmd_rx.recv().await.unwrap();
        assert!(matches!(first, FlipCommand::SetTarget(s) if s.valid));
        let second = cmd_rx.recv().await.unwrap();
        assert!(matches!(second, FlipCommand::MountStatus(MountStatus::Tracking)));

        events_tx
            .send(FlipNotification::SlewCommand {
                target: PointingSnapshot::new(
                    EquatorialCoord::new(5.5, 22.0),
                    PierSide::West,
                    0.0,
                ),
            })
            .unwrap();

        let saw_slewing = time::timeout(Duration::from_secs(2), async {
            while let Some(cmd) = cmd_rx.recv().await {
                if matches!(cmd, FlipCommand::MountStatus(MountStatus::Slewing)) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(saw_slewing);

        shutdown_tx.send(true).unwrap();
        let result = time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
