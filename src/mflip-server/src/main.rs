// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod bridge;
mod collaborators;
mod config;
mod flip_task;
mod mount_sim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use mflip_app::{init_logging, ConfigFile};
use mflip_core::flip::{FlipListener, FlipNotification};
use mflip_core::{DynResult, FlipCommand, FlipStatus, MeridianFlipStateMachine, MfStage};

use bridge::{JsonTraceListener, NotificationBridge};
use config::ServerConfig;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - meridian flip coordinator");
const FLIP_TASK_CHANNEL_BUFFER: usize = 64;
const NOTIFICATION_BUFFER: usize = 128;

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,
    /// Meridian offset in degrees of hour angle
    #[arg(short = 'o', long = "offset")]
    offset_degrees: Option<f64>,
    /// Log every flip notification as JSON
    #[arg(long = "trace-json")]
    trace_json: bool,
    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long = "run-for", value_name = "SECS")]
    run_for: Option<u64>,
}

/// Merge CLI overrides into the loaded configuration.
fn apply_cli_overrides(cli: &Cli, cfg: &mut ServerConfig) {
    if let Some(level) = cli.log_level.as_ref() {
        cfg.general.log_level = Some(level.clone());
    }
    if let Some(offset) = cli.offset_degrees {
        cfg.flip.offset_degrees = offset;
    }
    if cli.trace_json {
        cfg.general.trace_json = true;
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            break;
        }
    }
}

/// Running tasks of one simulated observing session.
struct Session {
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<FlipStatus>,
    task_handles: Vec<JoinHandle<()>>,
}

impl Session {
    fn status(&self) -> FlipStatus {
        self.state_rx.borrow().clone()
    }

    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        tokio::time::sleep(Duration::from_millis(200)).await;

        for handle in &self.task_handles {
            if !handle.is_finished() {
                handle.abort();
            }
        }
        for handle in self.task_handles {
            let _ = handle.await;
        }
    }
}

/// Spawn the coordinator, the simulated mount and the collaborators.
/// `extra_listeners` are registered after the notification bridge.
fn spawn_session(cfg: &ServerConfig, extra_listeners: Vec<Arc<dyn FlipListener>>) -> Session {
    let (cmd_tx, cmd_rx) = mpsc::channel::<FlipCommand>(FLIP_TASK_CHANNEL_BUFFER);
    let (events_tx, _) = broadcast::channel::<FlipNotification>(NOTIFICATION_BUFFER);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(MeridianFlipStateMachine::default().snapshot());
    let mut task_handles: Vec<JoinHandle<()>> = Vec::new();

    let mut listeners: Vec<Arc<dyn FlipListener>> =
        vec![Arc::new(NotificationBridge::new(events_tx.clone()))];
    listeners.extend(extra_listeners);

    // Subscribe before the coordinator can emit anything.
    let mount_events_rx = events_tx.subscribe();
    let collab_events_rx = events_tx.subscribe();

    let flip_config = flip_task::FlipTaskConfig {
        flip: cfg.flip.clone(),
        listeners,
    };
    let flip_shutdown_rx = shutdown_rx.clone();
    task_handles.push(tokio::spawn(async move {
        if let Err(e) =
            flip_task::run_flip_task(flip_config, cmd_rx, state_tx, flip_shutdown_rx).await
        {
            error!("Flip task error: {:?}", e);
        }
    }));

    let mount_cfg = cfg.mount.clone();
    let mount_tx = cmd_tx.clone();
    let mount_shutdown_rx = shutdown_rx.clone();
    task_handles.push(tokio::spawn(async move {
        if let Err(e) =
            mount_sim::run_mount_sim(mount_cfg, mount_tx, mount_events_rx, mount_shutdown_rx).await
        {
            error!("Mount simulator error: {:?}", e);
        }
    }));

    let collab_cfg = cfg.collaborators.clone();
    let collab_shutdown_rx = shutdown_rx.clone();
    task_handles.push(tokio::spawn(async move {
        if let Err(e) = collaborators::run_collaborators(
            collab_cfg,
            cmd_tx,
            collab_events_rx,
            collab_shutdown_rx,
        )
        .await
        {
            error!("Collaborators error: {:?}", e);
        }
    }));

    // Status watcher: one line per stage change.
    let mut status_rx = state_rx.clone();
    let status_shutdown_rx = shutdown_rx.clone();
    task_handles.push(tokio::spawn(async move {
        let mut last_stage = MfStage::None;
        tokio::select! {
            _ = async {
                while status_rx.changed().await.is_ok() {
                    let status = status_rx.borrow_and_update().clone();
                    if status.stage != last_stage {
                        info!(
                            "Flip status: stage {}, mount {}, delay {:.1} min",
                            status.stage,
                            status.mount_state,
                            status.flip_delay_hours * 60.0
                        );
                        last_stage = status.stage;
                    }
                }
            } => {}
            _ = wait_for_shutdown(status_shutdown_rx) => {}
        }
    }));

    Session {
        shutdown_tx,
        state_rx,
        task_handles,
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = ServerConfig::load(cli.config.as_deref())?;
    apply_cli_overrides(&cli, &mut cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }
    info!(
        "Starting mflip-server (offset {:.2}°, align after flip: {}, guide after flip: {})",
        cfg.flip.offset_degrees,
        cfg.flip.resume_alignment_after_flip,
        cfg.flip.resume_guiding_after_flip
    );

    let mut listeners: Vec<Arc<dyn FlipListener>> = Vec::new();
    if cfg.general.trace_json {
        listeners.push(Arc::new(JsonTraceListener));
    }
    let session = spawn_session(&cfg, listeners);

    match cli.run_for {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("Run time elapsed, shutting down");
                }
                res = signal::ctrl_c() => {
                    res?;
                    info!("Ctrl+C received, shutting down");
                }
            }
        }
        None => {
            signal::ctrl_c().await?;
            info!("Ctrl+C received, shutting down");
        }
    }

    let status = session.status();
    info!(
        "Final flip status: stage {}, mount {}, retry delay {:.1} min",
        status.stage,
        status.mount_state,
        status.flip_delay_hours * 60.0
    );
    session.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{CollaboratorsConfig, MountSimConfig};
    use mflip_core::flip::RecordingListener;
    use mflip_core::{FlipConfig, PierSide};

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "mflip-server",
            "--log-level",
            "debug",
            "--offset",
            "2.5",
            "--trace-json",
        ]);
        let mut cfg = ServerConfig::default();
        apply_cli_overrides(&cli, &mut cfg);
        assert_eq!(cfg.general.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.flip.offset_degrees, 2.5);
        assert!(cfg.general.trace_json);
    }

    #[test]
    fn test_cli_without_overrides_keeps_config() {
        let cli = Cli::parse_from(["mflip-server", "-C", "/tmp/mflip-rs.toml"]);
        let mut cfg = ServerConfig::default();
        cfg.flip.offset_degrees = 1.0;
        apply_cli_overrides(&cli, &mut cfg);
        assert_eq!(cfg.flip.offset_degrees, 1.0);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/mflip-rs.toml")));
    }

    #[tokio::test]
    async fn test_simulated_session_runs_full_flip_cycle() {
        let cfg = ServerConfig {
            flip: FlipConfig {
                min_flip_duration_ms: 100,
                ..FlipConfig::default()
            },
            mount: MountSimConfig {
                start_hour_angle: -0.001,
                tick_ms: 10,
                time_scale: 3600.0,
                slew_ms: 100,
                pier_change_extra_ms: 50,
                ..MountSimConfig::default()
            },
            collaborators: CollaboratorsConfig {
                capture_busy_ms: 50,
                alignment_ms: 30,
                alignment_failures: 1,
                guiding_ms: 30,
            },
            ..ServerConfig::default()
        };
        let recorder = Arc::new(RecordingListener::new());
        let session = spawn_session(&cfg, vec![recorder.clone() as Arc<dyn FlipListener>]);

        let finished = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stages = recorder.stages();
                if stages.contains(&MfStage::Guiding) && stages.last() == Some(&MfStage::None) {
                    return stages;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("flip cycle did not finish");

        assert_eq!(
            finished,
            vec![
                MfStage::Requested,
                MfStage::Ready,
                MfStage::Initiated,
                MfStage::Flipping,
                MfStage::Completed,
                MfStage::Aligning,
                MfStage::Guiding,
                MfStage::None,
            ]
        );
        let status = session.status();
        assert_eq!(status.current.pier_side, PierSide::East);
        assert_eq!(status.flip_delay_hours, 0.0);
        session.shutdown().await;
    }
}
