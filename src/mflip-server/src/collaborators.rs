// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated capture, alignment and guiding modules.
//!
//! Each one reacts to flip notifications and answers the coordinator after a
//! configured delay, the way the real modules answer once their own work
//! (finishing an exposure, plate solving, calibrating) is done.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use mflip_core::flip::FlipNotification;
use mflip_core::{DynResult, FlipCommand, MfStage};

use crate::config::CollaboratorsConfig;

/// Replies a collaborator sends in response to one notification, each after
/// its delay.
pub fn plan_replies(
    config: &CollaboratorsConfig,
    notification: &FlipNotification,
) -> Vec<(Duration, FlipCommand)> {
    match notification {
        FlipNotification::FlipRequested => {
            if config.capture_busy_ms == 0 {
                vec![(Duration::ZERO, FlipCommand::CaptureReady(true))]
            } else {
                vec![
                    (Duration::ZERO, FlipCommand::CaptureReady(false)),
                    (
                        Duration::from_millis(config.capture_busy_ms),
                        FlipCommand::CaptureReady(true),
                    ),
                ]
            }
        }
        FlipNotification::StageChanged {
            new: MfStage::Aligning,
            ..
        } => {
            let attempt = Duration::from_millis(config.alignment_ms);
            let mut replies: Vec<_> = (0..config.alignment_failures)
                .map(|_| (attempt, FlipCommand::AlignmentFailed))
                .collect();
            replies.push((attempt, FlipCommand::AlignmentReady));
            replies
        }
        FlipNotification::StageChanged {
            new: MfStage::Guiding,
            ..
        } => vec![(
            Duration::from_millis(config.guiding_ms),
            FlipCommand::GuidingReady,
        )],
        _ => Vec::new(),
    }
}

/// Send `replies` one after another, sleeping before each.
fn spawn_replies(
    cmd_tx: mpsc::Sender<FlipCommand>,
    replies: Vec<(Duration, FlipCommand)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        for (delay, cmd) in replies {
            if !delay.is_zero() {
                time::sleep(delay).await;
            }
            debug!("Collaborator reply {:?}", cmd);
            if cmd_tx.send(cmd).await.is_err() {
                break;
            }
        }
    })
}

/// Run the simulated collaborators until shutdown.
pub async fn run_collaborators(
    config: CollaboratorsConfig,
    cmd_tx: mpsc::Sender<FlipCommand>,
    mut events_rx: broadcast::Receiver<FlipNotification>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> DynResult<()> {
    let mut pending: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            },

            event = events_rx.recv() => match event {
                Ok(notification) => {
                    let cycle_over = matches!(
                        notification,
                        FlipNotification::StageChanged { new: MfStage::None, .. }
                    );
                    if cycle_over {
                        // cycle over or cancelled: stale answers must not be sent
                        if let Some(task) = pending.take() {
                            task.abort();
                        }
                        continue;
                    }
                    let replies = plan_replies(&config, &notification);
                    if replies.is_empty() {
                        continue;
                    }
                    info!("Collaborators answering {:?}", notification);
                    if let Some(task) = pending.take() {
                        task.abort();
                    }
                    pending = Some(spawn_replies(cmd_tx.clone(), replies));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Collaborators missed {} flip notifications", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    if let Some(task) = pending.take() {
        task.abort();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_capture_waits_then_accepts() {
        let config = CollaboratorsConfig {
            capture_busy_ms: 300,
            ..CollaboratorsConfig::default()
        };
        let replies = plan_replies(&config, &FlipNotification::FlipRequested);
        assert_eq!(replies.len(), 2);
        assert!(matches!(replies[0], (d, FlipCommand::CaptureReady(false)) if d.is_zero()));
        assert!(matches!(
            replies[1],
            (d, FlipCommand::CaptureReady(true)) if d == Duration::from_millis(300)
        ));
    }

    #[test]
    fn test_idle_capture_accepts_at_once() {
        let config = CollaboratorsConfig {
            capture_busy_ms: 0,
            ..CollaboratorsConfig::default()
        };
        let replies = plan_replies(&config, &FlipNotification::FlipRequested);
        assert!(matches!(replies.as_slice(), [(_, FlipCommand::CaptureReady(true))]));
    }

    #[test]
    fn test_alignment_failures_precede_success() {
        let config = CollaboratorsConfig {
            alignment_failures: 2,
            ..CollaboratorsConfig::default()
        };
        let replies = plan_replies(
            &config,
            &FlipNotification::StageChanged {
                old: MfStage::Completed,
                new: MfStage::Aligning,
            },
        );
        let cmds: Vec<_> = replies.into_iter().map(|(_, cmd)| cmd).collect();
        assert!(matches!(
            cmds.as_slice(),
            [
                FlipCommand::AlignmentFailed,
                FlipCommand::AlignmentFailed,
                FlipCommand::AlignmentReady
            ]
        ));
    }

    #[test]
    fn test_unrelated_notifications_get_no_reply() {
        let config = CollaboratorsConfig::default();
        assert!(plan_replies(
            &config,
            &FlipNotification::StageChanged {
                old: MfStage::Ready,
                new: MfStage::Initiated
            }
        )
        .is_empty());
        assert!(plan_replies(&config, &FlipNotification::FlipCountdown { hours: 0.5 }).is_empty());
    }

    #[tokio::test]
    async fn test_guiding_reply_is_sent() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = broadcast::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = CollaboratorsConfig {
            guiding_ms: 20,
            ..CollaboratorsConfig::default()
        };
        let handle = tokio::spawn(run_collaborators(config, cmd_tx, events_rx, shutdown_rx));

        events_tx
            .send(FlipNotification::StageChanged {
                old: MfStage::Completed,
                new: MfStage::Guiding,
            })
            .unwrap();
        let reply = time::timeout(Duration::from_secs(2), cmd_rx.recv())
            .await
            .unwrap();
        assert!(matches!(reply, Some(FlipCommand::GuidingReady)));

        shutdown_tx.send(true).unwrap();
        assert!(time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .is_ok());
    }
}
