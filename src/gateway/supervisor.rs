//! Ping timer and timeout task.
//!
//! The ping timer advances the shared ping counter once per `ping_period`
//! and pokes the timeout task, which evicts nodes that stayed silent for
//! more than `max_skipped_pings` periods. Eviction is computed from counts,
//! so a poke lost to a full queue is made up by the next scan.

use super::shared::Shared;
use super::status::PowerMode;
use crate::stats::GatewayStats;
use log::{debug, info, trace, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Command for the timeout task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerCommand {
    /// The ping counter advanced; scan for stale nodes.
    Ping,
}

/// Advance the ping counter every period while the gateway is awake.
pub(crate) async fn run_ping_timer(
    shared: Arc<Shared>,
    mode: watch::Receiver<PowerMode>,
    commands: mpsc::Sender<TimerCommand>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(shared.config.ping_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // Skip first

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Ping timer shutting down");
                break;
            }

            _ = ticker.tick() => {
                if *mode.borrow() == PowerMode::Asleep {
                    continue;
                }
                let count = shared.ping_count.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
                trace!("Ping {}", count);

                match commands.try_send(TimerCommand::Ping) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("Timeout task queue full, skipping scan for ping {}", count);
                        GatewayStats::incr(&shared.stats.pings_skipped);
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!("Timeout task gone, stopping ping timer");
                        break;
                    }
                }
            }
        }
    }
}

/// Evict stale nodes on every ping.
pub(crate) async fn run_timeout_task(
    shared: Arc<Shared>,
    mut commands: mpsc::Receiver<TimerCommand>,
    cancel: CancellationToken,
    ready: oneshot::Sender<()>,
) {
    if ready.send(()).is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Timeout task shutting down");
                break;
            }

            command = commands.recv() => match command {
                Some(TimerCommand::Ping) => {
                    let evicted = shared.evict_stale();
                    if !evicted.is_empty() {
                        info!("Evicted {} silent nodes", evicted.len());
                    }
                }
                None => break,
            },
        }
    }
}
