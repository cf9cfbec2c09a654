//! Gateway controller.
//!
//! [`Gateway`] owns the channel set, the device registry, the event sink and
//! the background tasks:
//!
//! - one channel task per configured channel (see `channel`),
//! - the ping timer and the timeout task (see `supervisor`).
//!
//! All tasks share one `Arc<Shared>`. The registry sits behind a single
//! `std::sync::Mutex` that is never held across an await or a callback.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lora_star_gate::{
//!     ChannelConfig, DataRate, Gateway, GatewayConfig, GatewayEventSink, GatewaySettings,
//!     JoinKey, RadioChannel, SimTransceiver,
//! };
//!
//! struct OpenDoor;
//!
//! impl GatewayEventSink for OpenDoor {
//!     fn accept_join(&self, _dev_id: u64, _app_id: u64) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn run() -> lora_star_gate::Result<()> {
//! let (radio, _air) = SimTransceiver::new();
//! let gateway = Gateway::init(
//!     GatewaySettings::new(0xcafe, JoinKey::new([0x2b; 16])),
//!     vec![RadioChannel::new(ChannelConfig::new(DataRate::DR3, 0), radio)],
//!     Arc::new(OpenDoor),
//!     GatewayConfig::default(),
//! )
//! .await?;
//!
//! gateway.broadcast(b"hello")?;
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod channel;
mod dispatch;
mod events;
mod shared;
mod status;
mod supervisor;

pub use events::GatewayEventSink;
pub use status::GatewayStatus;

use crate::config::{ChannelConfig, GatewayConfig, GatewaySettings};
use crate::error::{GatewayError, Result};
use crate::lora::Transceiver;
use crate::mac::{Address, FrameCodec, StarCodec};
use crate::registry::{DeviceRegistry, Node};
use crate::stats::{GatewayStats, StatsSnapshot};
use channel::ChannelTask;
use log::{debug, error, info};
use shared::Shared;
use status::PowerMode;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A channel configuration paired with the transceiver that serves it.
#[derive(Debug)]
pub struct RadioChannel<R> {
    /// Data rate and channel number.
    pub config: ChannelConfig,
    /// Driver for this channel's radio.
    pub radio: R,
}

impl<R: Transceiver> RadioChannel<R> {
    /// Pair a configuration with its radio.
    pub fn new(config: ChannelConfig, radio: R) -> Self {
        Self { config, radio }
    }
}

/// Running gateway.
///
/// Dropping the gateway cancels its tasks; [`shutdown`](Self::shutdown) also
/// waits for them to finish.
pub struct Gateway {
    shared: Arc<Shared>,
    mode: watch::Sender<PowerMode>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Start a gateway with the default [`StarCodec`].
    pub async fn init<R: Transceiver>(
        settings: GatewaySettings,
        channels: Vec<RadioChannel<R>>,
        sink: Arc<dyn GatewayEventSink>,
        config: GatewayConfig,
    ) -> Result<Self> {
        Self::init_with_codec(settings, channels, sink, config, Arc::new(StarCodec)).await
    }

    /// Start a gateway with a custom frame codec.
    ///
    /// Starts one task per channel and waits until each radio is listening,
    /// then starts the timeout task and the ping timer. If any step fails,
    /// everything started so far is cancelled and awaited (stopping those
    /// radios) before the error is returned.
    pub async fn init_with_codec<R: Transceiver>(
        settings: GatewaySettings,
        channels: Vec<RadioChannel<R>>,
        sink: Arc<dyn GatewayEventSink>,
        config: GatewayConfig,
        codec: Arc<dyn FrameCodec>,
    ) -> Result<Self> {
        config.validate()?;
        if channels.is_empty() {
            return Err(GatewayError::InvalidConfig("at least one channel is required"));
        }

        let (mode_tx, _) = watch::channel(PowerMode::Awake);
        let cancel = CancellationToken::new();

        let mut tx_queues = Vec::with_capacity(channels.len());
        let mut request_rxs = Vec::with_capacity(channels.len());
        let mut status_txs = Vec::with_capacity(channels.len());
        let mut status_rxs = Vec::with_capacity(channels.len());
        for _ in &channels {
            let (tx, rx) = mpsc::channel(config.tx_queue_depth);
            tx_queues.push(tx);
            request_rxs.push(rx);
            let (tx, rx) = watch::channel(GatewayStatus::Sleep);
            status_txs.push(tx);
            status_rxs.push(rx);
        }

        let shared = Arc::new(Shared {
            settings,
            config,
            channels: channels.iter().map(|c| c.config).collect(),
            registry: Mutex::new(DeviceRegistry::new(config.max_nodes)),
            sink,
            codec,
            ping_count: AtomicU32::new(0),
            stats: GatewayStats::new(),
            tx_queues,
            channel_status: status_rxs,
        });

        let mut gateway = Self {
            shared: shared.clone(),
            mode: mode_tx,
            cancel: cancel.clone(),
            tasks: Vec::with_capacity(channels.len() + 2),
        };

        let per_channel = channels.into_iter().zip(request_rxs).zip(status_txs);
        for (index, ((channel, requests), status)) in per_channel.enumerate() {
            let task = ChannelTask::new(
                index,
                channel.config,
                channel.radio,
                shared.clone(),
                requests,
                gateway.mode.subscribe(),
                status,
                cancel.child_token(),
            );
            let (ready_tx, ready_rx) = oneshot::channel();
            gateway.tasks.push(tokio::spawn(task.run(ready_tx)));

            let started = match ready_rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("channel task exited during startup".to_string()),
            };
            if let Err(reason) = started {
                gateway.teardown().await;
                return Err(GatewayError::ChannelTaskStart {
                    channel: index,
                    reason,
                });
            }
        }

        let (timer_tx, timer_rx) = mpsc::channel(shared.config.timer_queue_depth);
        let (ready_tx, ready_rx) = oneshot::channel();
        gateway.tasks.push(tokio::spawn(supervisor::run_timeout_task(
            shared.clone(),
            timer_rx,
            cancel.child_token(),
            ready_tx,
        )));
        if ready_rx.await.is_err() {
            gateway.teardown().await;
            return Err(GatewayError::TimeoutTaskStart);
        }

        gateway.tasks.push(tokio::spawn(supervisor::run_ping_timer(
            shared.clone(),
            gateway.mode.subscribe(),
            timer_tx,
            cancel.child_token(),
        )));

        info!(
            "Gateway {:016x} started on {} channels",
            shared.settings.gate_id,
            shared.channels.len()
        );
        Ok(gateway)
    }

    /// Queue `payload` for the node at `addr`.
    ///
    /// Class A nodes receive it in their next receive window; class B nodes
    /// are scheduled on their channel immediately. Never blocks.
    pub fn send_to(&self, addr: Address, payload: &[u8]) -> Result<()> {
        self.shared.send_to(addr, payload)
    }

    /// [`send_to`](Self::send_to) every registered node.
    ///
    /// Per-node failures are logged and skipped. Returns the number of nodes
    /// the payload was scheduled for.
    pub fn broadcast(&self, payload: &[u8]) -> Result<usize> {
        self.shared.broadcast(payload)
    }

    /// Remove a node; `node_kicked` fires once.
    pub fn kick(&self, addr: Address) -> Result<Node> {
        self.shared.kick(addr)
    }

    /// Put every channel to sleep and pause ping counting.
    ///
    /// Returns once each channel reports Sleep (or Fault). A frame already on
    /// the air finishes first; a frame waiting out a busy channel is kept and
    /// sent after [`wake`](Self::wake).
    pub async fn sleep(&self) {
        info!("Gateway going to sleep");
        self.mode.send_replace(PowerMode::Asleep);
        self.wait_channels(|s| matches!(s, GatewayStatus::Sleep | GatewayStatus::Fault))
            .await;
    }

    /// Resume listening on every channel.
    pub async fn wake(&self) {
        info!("Gateway waking up");
        self.mode.send_replace(PowerMode::Awake);
        self.wait_channels(|s| *s != GatewayStatus::Sleep).await;
    }

    async fn wait_channels(&self, done: impl Fn(&GatewayStatus) -> bool) {
        for (index, status) in self.shared.channel_status.iter().enumerate() {
            let mut status = status.clone();
            if status.wait_for(|s| done(s)).await.is_err() {
                debug!("Channel {} task has exited", index);
            }
        }
    }

    /// Cancel all tasks and wait for them to finish.
    pub async fn shutdown(mut self) {
        info!("Gateway {:016x} shutting down", self.shared.settings.gate_id);
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Gateway task failed: {}", e);
            }
        }
    }

    /// Aggregate status of all channels.
    pub fn status(&self) -> GatewayStatus {
        self.shared.status()
    }

    /// Status of one channel.
    pub fn channel_status(&self, index: usize) -> Option<GatewayStatus> {
        self.shared.channel_status.get(index).map(|rx| *rx.borrow())
    }

    /// Current ping count.
    pub fn ping_count(&self) -> u32 {
        self.shared.ping_count()
    }

    /// Snapshot of the node at `addr`.
    pub fn node(&self, addr: Address) -> Option<Node> {
        self.shared.registry().get(addr).cloned()
    }

    /// Snapshot of all registered nodes, ordered by address.
    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.shared.registry().iter().cloned().collect();
        nodes.sort_by_key(|n| n.addr);
        nodes
    }

    /// Frames waiting for a class-A node's receive window.
    pub fn pending(&self, addr: Address) -> Option<usize> {
        self.shared.registry().pending_len(addr)
    }

    /// Network settings; fixed for the gateway's lifetime.
    pub fn settings(&self) -> &GatewaySettings {
        &self.shared.settings
    }

    /// Tunables the gateway was started with.
    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    /// Configured channels, in init order.
    pub fn channels(&self) -> &[ChannelConfig] {
        &self.shared.channels
    }

    /// Live counters.
    pub fn stats(&self) -> &GatewayStats {
        &self.shared.stats
    }

    /// Read-only view for monitoring (e.g. the stats server).
    pub fn monitor(&self) -> GatewayMonitor {
        GatewayMonitor {
            shared: self.shared.clone(),
        }
    }

    /// Weak handle for calling back into the gateway from the event sink.
    pub fn handle(&self) -> GatewayHandle {
        GatewayHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Cloneable downlink handle that does not keep the gateway alive.
///
/// Once the gateway is dropped every call returns [`GatewayError::Stopped`].
#[derive(Clone)]
pub struct GatewayHandle {
    shared: Weak<Shared>,
}

impl GatewayHandle {
    fn shared(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(GatewayError::Stopped)
    }

    /// See [`Gateway::send_to`].
    pub fn send_to(&self, addr: Address, payload: &[u8]) -> Result<()> {
        self.shared()?.send_to(addr, payload)
    }

    /// See [`Gateway::broadcast`].
    pub fn broadcast(&self, payload: &[u8]) -> Result<usize> {
        self.shared()?.broadcast(payload)
    }

    /// See [`Gateway::kick`].
    pub fn kick(&self, addr: Address) -> Result<Node> {
        self.shared()?.kick(addr)
    }
}

/// Read-only gateway view.
#[derive(Clone)]
pub struct GatewayMonitor {
    shared: Arc<Shared>,
}

impl GatewayMonitor {
    /// Aggregate status.
    pub fn status(&self) -> GatewayStatus {
        self.shared.status()
    }

    /// Current ping count.
    pub fn ping_count(&self) -> u32 {
        self.shared.ping_count()
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.shared.registry().len()
    }

    /// Everything the stats endpoint reports.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.shared.snapshot()
    }
}
