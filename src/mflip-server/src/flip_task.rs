// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Coordination task owning the meridian flip state machine.
//!
//! Every input (mount reports, collaborator answers, timer expiries) reaches
//! the machine through this task, one at a time, so listeners observe
//! transitions in the order they happened.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use mflip_core::flip::{FlipListener, TimerToken};
use mflip_core::{
    DynResult, FlipCommand, FlipConfig, FlipStatus, MeridianFlipStateMachine, MfStage,
};

/// Configuration for the flip task.
#[derive(Default)]
pub struct FlipTaskConfig {
    pub flip: FlipConfig,
    /// Registered in order; dispatch follows the same order.
    pub listeners: Vec<Arc<dyn FlipListener>>,
}

/// The minimum-flip-duration deadline currently scheduled.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    token: TimerToken,
    at: Instant,
}

/// Run the flip task until the command channel closes or shutdown is set.
pub async fn run_flip_task(
    config: FlipTaskConfig,
    mut rx: mpsc::Receiver<FlipCommand>,
    state_tx: watch::Sender<FlipStatus>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> DynResult<()> {
    config.flip.validate()?;
    let mut machine = MeridianFlipStateMachine::new(config.flip);
    for listener in config.listeners {
        machine.register_listener(listener);
    }
    info!("Meridian flip coordinator ready");

    let mut deadline: Option<Deadline> = None;
    let _ = state_tx.send(machine.snapshot());

    loop {
        let scheduled = deadline;
        let timer = async move {
            match scheduled {
                Some(d) => time::sleep_until(d.at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            },

            maybe_cmd = rx.recv() => {
                let Some(first_cmd) = maybe_cmd else { break; };

                // Batch up anything already queued; applied in arrival order.
                let mut batch = vec![first_cmd];
                while let Ok(next) = rx.try_recv() {
                    batch.push(next);
                }

                for cmd in batch {
                    let label = format!("{:?}", cmd);
                    let started = std::time::Instant::now();
                    process_command(&mut machine, cmd, &mut deadline);
                    let elapsed = started.elapsed();
                    if elapsed > Duration::from_millis(50) {
                        warn!("Flip command {} took {:?}", label, elapsed);
                    }
                }
                let _ = state_tx.send(machine.snapshot());
            },

            _ = timer => {
                if let Some(expired) = deadline.take() {
                    let cmd = FlipCommand::TimerElapsed(expired.token);
                    process_command(&mut machine, cmd, &mut deadline);
                    let _ = state_tx.send(machine.snapshot());
                }
            },
        }
    }

    info!("Flip task shutting down");
    Ok(())
}

/// Apply one command, start the flip once capture has accepted, and keep
/// the scheduled deadline in step with the machine's timer.
fn process_command(
    machine: &mut MeridianFlipStateMachine,
    cmd: FlipCommand,
    deadline: &mut Option<Deadline>,
) {
    if cmd.is_cancellation() {
        debug!("Cancelling pending flip work: {:?}", cmd);
    }
    machine.apply(cmd);

    if machine.stage() == MfStage::Ready {
        machine.start_flip();
    }
    sync_deadline(machine, deadline);
}

fn sync_deadline(machine: &MeridianFlipStateMachine, deadline: &mut Option<Deadline>) {
    match machine.armed_timer() {
        Some(armed) => {
            if deadline.map(|d| d.token) != Some(armed.token) {
                debug!(
                    "Flip timer armed for {:?} (generation {})",
                    armed.duration,
                    armed.token.generation()
                );
                *deadline = Some(Deadline {
                    token: armed.token,
                    at: Instant::now() + armed.duration,
                });
            }
        }
        None => {
            if deadline.take().is_some() {
                debug!("Flip timer cancelled");
            }
        }
    }
}
