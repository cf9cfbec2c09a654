//! Channel task.
//!
//! One task per configured channel owns that channel's transceiver. It
//! listens continuously, dispatches received frames, sends receive-window
//! replies and queued class-B downlinks, and follows the controller's power
//! mode.
//!
//! # Transmit Path
//!
//! 1. Listen-before-talk: read RSSI, back off while busy, give up after
//!    `max_tx_retries` busy readings.
//! 2. Hand the frame to the radio and wait for TxDone (at most `tx_timeout`).
//!    Events arriving meanwhile are kept in a backlog and handled next.
//!
//! A sleep request during backoff parks a class-B frame; it is sent first
//! after wake. A receive-window reply cannot outlive its window: on sleep or
//! give-up its payload goes back to the head of the node's pending queue for
//! the next uplink. A transmit error, a TxDone timeout or a radio fault event ends the
//! task with the channel in `Fault`.

use super::dispatch;
use super::shared::{Shared, TxKind, TxRequest};
use super::status::{GatewayStatus, PowerMode};
use crate::config::ChannelConfig;
use crate::lora::{
    Access, EventSender, LbtConfig, ListenBeforeTalk, RadioError, RadioEvent, Transceiver,
};
use crate::mac::Address;
use crate::stats::GatewayStats;
use log::{debug, error, info, warn};
use rand_core::{OsRng, RngCore};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Whether the task keeps running after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct ChannelTask<R: Transceiver> {
    index: usize,
    config: ChannelConfig,
    radio: R,
    shared: Arc<Shared>,
    events_tx: EventSender,
    events: mpsc::Receiver<RadioEvent>,
    requests: mpsc::Receiver<TxRequest>,
    mode: watch::Receiver<PowerMode>,
    status: watch::Sender<GatewayStatus>,
    cancel: CancellationToken,
    lbt: ListenBeforeTalk,
    deferred: Option<TxRequest>,
    backlog: VecDeque<RadioEvent>,
}

impl<R: Transceiver> ChannelTask<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        config: ChannelConfig,
        radio: R,
        shared: Arc<Shared>,
        requests: mpsc::Receiver<TxRequest>,
        mode: watch::Receiver<PowerMode>,
        status: watch::Sender<GatewayStatus>,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events) = mpsc::channel(shared.config.event_queue_depth);
        let mut lbt = ListenBeforeTalk::new(LbtConfig::from(&shared.config));
        lbt.seed(OsRng.next_u32());
        Self {
            index,
            config,
            radio,
            shared,
            events_tx,
            events,
            requests,
            mode,
            status,
            cancel,
            lbt,
            deferred: None,
            backlog: VecDeque::new(),
        }
    }

    /// Start listening, report the outcome on `ready`, then serve the
    /// channel until cancelled or faulted.
    pub async fn run(mut self, ready: oneshot::Sender<Result<(), RadioError>>) {
        if let Err(e) = self.radio.start_listening(self.events_tx.clone()) {
            error!("Channel {} ({}): failed to start: {}", self.index, self.config, e);
            self.status.send_replace(GatewayStatus::Fault);
            let _ = ready.send(Err(e));
            return;
        }
        self.status.send_replace(GatewayStatus::Listening);
        info!("Channel {} ({}) listening", self.index, self.config);
        if ready.send(Ok(())).is_err() {
            // init gave up on us
            self.stop_radio();
            return;
        }

        loop {
            let flow = if let Some(event) = self.backlog.pop_front() {
                self.handle_event(event).await
            } else if *self.mode.borrow_and_update() == PowerMode::Asleep {
                self.doze().await
            } else if let Some(request) = self.deferred.take() {
                self.transmit(request).await
            } else {
                self.next_input().await
            };
            if flow == Flow::Stop {
                break;
            }
        }

        if *self.status.borrow() != GatewayStatus::Fault {
            self.stop_radio();
        }
        debug!("Channel {} task exited", self.index);
    }

    async fn next_input(&mut self) -> Flow {
        tokio::select! {
            _ = self.cancel.cancelled() => Flow::Stop,

            changed = self.mode.changed() => {
                if changed.is_err() {
                    return Flow::Stop;
                }
                Flow::Continue
            }

            event = self.events.recv() => match event {
                Some(event) => self.handle_event(event).await,
                None => Flow::Stop,
            },

            request = self.requests.recv() => match request {
                Some(request) => self.transmit(request).await,
                None => Flow::Stop,
            },
        }
    }

    async fn handle_event(&mut self, event: RadioEvent) -> Flow {
        match event {
            RadioEvent::RxDone(packet) => {
                GatewayStats::incr(&self.shared.stats.uplinks);
                debug!(
                    "Channel {}: rx {} bytes (rssi {} dBm, snr {} dB)",
                    self.index,
                    packet.data.len(),
                    packet.rssi,
                    packet.snr
                );
                match dispatch::handle_uplink(&self.shared, self.index, &packet.data) {
                    Some(reply) => self.reply_in_window(reply).await,
                    None => Flow::Continue,
                }
            }
            RadioEvent::TxDone => {
                debug!("Channel {}: stray TxDone", self.index);
                Flow::Continue
            }
            RadioEvent::CrcError => {
                GatewayStats::incr(&self.shared.stats.crc_errors);
                debug!("Channel {}: CRC error", self.index);
                Flow::Continue
            }
            RadioEvent::Fault(e) => {
                self.fault(&e.to_string());
                Flow::Stop
            }
        }
    }

    async fn reply_in_window(&mut self, reply: TxRequest) -> Flow {
        let delay = self.shared.config.rx_window_delay();
        tokio::select! {
            _ = self.cancel.cancelled() => return Flow::Stop,
            _ = tokio::time::sleep(delay) => {}
        }
        self.transmit(reply).await
    }

    async fn transmit(&mut self, request: TxRequest) -> Flow {
        self.lbt.reset();
        loop {
            let rssi = match self.radio.rssi() {
                Ok(rssi) => rssi,
                Err(e) => {
                    self.fault(&format!("RSSI read failed: {}", e));
                    return Flow::Stop;
                }
            };
            match self.lbt.try_access(rssi) {
                Access::Transmit => break,
                Access::Backoff { ms } => {
                    GatewayStats::incr(&self.shared.stats.lbt_backoffs);
                    debug!(
                        "Channel {}: busy ({} dBm), backing off {} ms",
                        self.index, rssi, ms
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Flow::Stop,
                        _ = async { let _ = self.mode.wait_for(|m| *m == PowerMode::Asleep).await; } => {
                            match request.kind {
                                TxKind::Scheduled => {
                                    info!(
                                        "Channel {}: sleep requested during backoff, deferring frame for {}",
                                        self.index, request.addr
                                    );
                                    self.deferred = Some(request);
                                }
                                TxKind::Window { requeue } => {
                                    info!(
                                        "Channel {}: sleep requested during backoff, receive window of {} missed",
                                        self.index, request.addr
                                    );
                                    self.window_missed(request.addr, requeue);
                                }
                            }
                            return Flow::Continue;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(u64::from(ms))) => {}
                    }
                }
                Access::GiveUp => {
                    warn!(
                        "Channel {}: still busy after {} retries, dropping frame for {}",
                        self.index,
                        self.lbt.retries(),
                        request.addr
                    );
                    GatewayStats::incr(&self.shared.stats.lbt_dropped);
                    if let TxKind::Window { requeue } = request.kind {
                        self.window_missed(request.addr, requeue);
                    }
                    return Flow::Continue;
                }
            }
        }

        self.status.send_replace(GatewayStatus::Transmitting);
        if let Err(e) = self
            .radio
            .transmit(&request.frame, self.config.data_rate, self.config.channel)
        {
            self.fault(&format!("transmit failed: {}", e));
            return Flow::Stop;
        }

        let deadline = tokio::time::sleep(self.shared.config.tx_timeout());
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Flow::Stop,
                _ = &mut deadline => {
                    self.fault("timed out waiting for TxDone");
                    return Flow::Stop;
                }
                event = self.events.recv() => match event {
                    Some(RadioEvent::TxDone) => break,
                    Some(RadioEvent::Fault(e)) => {
                        self.fault(&e.to_string());
                        return Flow::Stop;
                    }
                    Some(other) => self.backlog.push_back(other),
                    None => return Flow::Stop,
                },
            }
        }

        GatewayStats::incr(&self.shared.stats.downlinks);
        self.status.send_replace(GatewayStatus::Listening);
        debug!(
            "Channel {}: sent {} bytes to {}",
            self.index,
            request.frame.len(),
            request.addr
        );
        Flow::Continue
    }

    /// Park the radio until the controller wakes the gateway.
    async fn doze(&mut self) -> Flow {
        if let Err(e) = self.radio.sleep() {
            warn!("Channel {}: radio sleep failed: {}", self.index, e);
        }
        self.status.send_replace(GatewayStatus::Sleep);
        info!("Channel {} asleep", self.index);

        tokio::select! {
            _ = self.cancel.cancelled() => return Flow::Stop,
            woke = self.mode.wait_for(|m| *m == PowerMode::Awake) => {
                if woke.is_err() {
                    return Flow::Stop;
                }
            }
        }

        match self.radio.start_listening(self.events_tx.clone()) {
            Ok(()) => {
                self.status.send_replace(GatewayStatus::Listening);
                info!("Channel {} awake", self.index);
                Flow::Continue
            }
            Err(e) => {
                self.fault(&format!("restart after sleep failed: {}", e));
                Flow::Stop
            }
        }
    }

    fn window_missed(&self, addr: Address, requeue: Option<Vec<u8>>) {
        if let Some(payload) = requeue {
            self.shared.requeue_pending(addr, payload);
        }
    }

    fn fault(&mut self, reason: &str) {
        error!("Channel {} ({}) fault: {}", self.index, self.config, reason);
        self.status.send_replace(GatewayStatus::Fault);
        if let Err(e) = self.radio.stop_listening() {
            debug!("Channel {}: stop after fault failed: {}", self.index, e);
        }
    }

    fn stop_radio(&mut self) {
        if let Err(e) = self.radio.stop_listening() {
            warn!("Channel {}: stop listening failed: {}", self.index, e);
        }
        self.status.send_replace(GatewayStatus::Sleep);
    }
}
