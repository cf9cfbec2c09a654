//! Simulated LoRa-Star gateway.
//!
//! Runs a gateway over in-memory transceivers with a handful of simulated
//! nodes that join, send periodic uplinks and receive echoed downlinks.
//! Statistics are served at http://localhost:8080/stats.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sim-gate                    # built-in two-channel setup
//! cargo run --bin sim-gate -- gateway.json    # channels and tuning from a manifest
//! RUST_LOG=debug cargo run --bin sim-gate
//! ```

use log::{debug, error, info, warn};
use lora_star_gate::config::{ChannelConfig, DataRate, GatewayManifest, GatewaySettings, JoinKey};
use lora_star_gate::mac::crypto::{sign_join_request, verify_join_accept};
use lora_star_gate::mac::{DataFrame, FrameCodec, JoinRequest, MacFrame, StarCodec, MIC_LEN};
use lora_star_gate::stats::DEFAULT_STATS_PORT;
use lora_star_gate::{
    Address, Gateway, GatewayEventSink, GatewayHandle, Node, NodeClass, RadioChannel, SimHandle,
    SimTransceiver, StatsServer,
};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const UPLINK_INTERVAL: Duration = Duration::from_secs(5);

/// Accepts every join and echoes each uplink back to its sender.
struct EchoSink {
    gateway: OnceLock<GatewayHandle>,
}

impl GatewayEventSink for EchoSink {
    fn accept_join(&self, dev_id: u64, app_id: u64) -> bool {
        info!("Join request from dev {:016x} (app {:016x})", dev_id, app_id);
        true
    }

    fn node_joined(&self, node: &Node) -> u32 {
        info!("Node {} joined (class {})", node.addr, node.class);
        node.addr.0 ^ 0x5a5a_5a5a
    }

    fn node_kicked(&self, node: &Node) {
        warn!("Node {} (dev {:016x}) kicked", node.addr, node.dev_id);
    }

    fn data_received(&self, node: &Node, channel: &ChannelConfig, payload: &[u8]) {
        info!(
            "Data from {} on {}: {:?}",
            node.addr,
            channel,
            String::from_utf8_lossy(payload)
        );
        if let Some(gateway) = self.gateway.get() {
            let mut echo = b"echo: ".to_vec();
            echo.extend_from_slice(payload);
            if let Err(e) = gateway.send_to(node.addr, &echo) {
                warn!("Echo to {} failed: {}", node.addr, e);
            }
        }
    }

    fn data_acked(&self, node: &Node, _channel: &ChannelConfig) {
        debug!("Node {} acked", node.addr);
    }

    fn link_ok(&self, node: &Node, _channel: &ChannelConfig) {
        debug!("Link check from {}", node.addr);
    }
}

/// A simulated end node.
struct SimNode {
    dev_id: u64,
    class: NodeClass,
    channel: usize,
    nonce: u16,
    addr: Option<Address>,
    sent: u32,
}

fn default_manifest() -> GatewayManifest {
    GatewayManifest {
        settings: GatewaySettings::new(0x0000_0000_5eed_0001, JoinKey::new(*b"lora-star-demo!!")),
        channels: vec![
            ChannelConfig::new(DataRate::DR3, 0),
            ChannelConfig::new(DataRate::DR3, 1),
        ],
        tuning: Default::default(),
    }
}

fn load_manifest() -> lora_star_gate::Result<GatewayManifest> {
    match std::env::args().nth(1) {
        Some(path) => GatewayManifest::load(path),
        None => Ok(default_manifest()),
    }
}

/// Deliver gateway downlinks to the simulated nodes and send their uplinks.
fn simulate_air(
    codec: &StarCodec,
    key: &JoinKey,
    air: &[SimHandle],
    nodes: &mut [SimNode],
) {
    for (channel, handle) in air.iter().enumerate() {
        for tx in handle.take_transmitted() {
            match codec.decode(&tx.frame) {
                Ok(MacFrame::JoinAccept(accept)) => {
                    let node = nodes
                        .iter_mut()
                        .find(|n| n.dev_id == accept.dev_id && n.channel == channel);
                    match node {
                        Some(node) if verify_join_accept(key, &accept).is_ok() => {
                            info!(
                                "[sim] dev {:016x} got address {} (app_data {:08x})",
                                node.dev_id, accept.addr, accept.app_data
                            );
                            node.addr = Some(accept.addr);
                        }
                        Some(_) => warn!("[sim] join accept with bad MIC"),
                        None => {}
                    }
                }
                Ok(MacFrame::Data(data)) => info!(
                    "[sim] {} received {:?} (ack {}, pending {})",
                    data.addr,
                    String::from_utf8_lossy(&data.payload),
                    data.ack,
                    data.frame_pending
                ),
                Ok(other) => debug!("[sim] downlink {:?}", other),
                Err(e) => warn!("[sim] undecodable downlink: {}", e),
            }
        }
    }

    for node in nodes.iter_mut() {
        let frame = match node.addr {
            None => {
                node.nonce = node.nonce.wrapping_add(1);
                let mut req = JoinRequest {
                    dev_id: node.dev_id,
                    app_id: 0x00a1,
                    class: node.class,
                    dev_nonce: node.nonce,
                    mic: [0; MIC_LEN],
                };
                sign_join_request(key, &mut req);
                MacFrame::JoinRequest(req)
            }
            Some(addr) => {
                node.sent += 1;
                MacFrame::Data(DataFrame {
                    addr,
                    confirm: node.sent % 2 == 0,
                    ack: false,
                    frame_pending: false,
                    payload: format!("reading #{}", node.sent).into_bytes(),
                })
            }
        };
        match codec.encode(&frame) {
            Ok(bytes) => {
                if !air[node.channel].inject_uplink(&bytes) {
                    debug!("[sim] channel {} not listening", node.channel);
                }
            }
            Err(e) => error!("[sim] encode failed: {}", e),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== LoRa-Star simulated gateway starting ===");

    let manifest = match load_manifest() {
        Ok(m) => m,
        Err(e) => {
            error!("Invalid manifest: {}", e);
            std::process::exit(1);
        }
    };
    let key = manifest.settings.join_key.clone();

    let mut air = Vec::with_capacity(manifest.channels.len());
    let mut channels = Vec::with_capacity(manifest.channels.len());
    for config in &manifest.channels {
        let (radio, handle) = SimTransceiver::new();
        channels.push(RadioChannel::new(*config, radio));
        air.push(handle);
    }

    let sink = Arc::new(EchoSink {
        gateway: OnceLock::new(),
    });
    let gateway = match Gateway::init(
        manifest.settings,
        channels,
        sink.clone(),
        manifest.tuning,
    )
    .await
    {
        Ok(g) => g,
        Err(e) => {
            error!("Gateway init failed: {}", e);
            std::process::exit(1);
        }
    };
    let _ = sink.gateway.set(gateway.handle());

    // Keep server alive; dropping it stops the thread
    let _stats_server = match StatsServer::start(None, DEFAULT_STATS_PORT, gateway.monitor()) {
        Ok(server) => {
            info!(
                "Stats server running at http://localhost:{}/stats",
                server.port()
            );
            Some(server)
        }
        Err(e) => {
            warn!("Failed to start stats server: {}", e);
            None
        }
    };

    let channel_count = air.len();
    let mut nodes: Vec<SimNode> = (0..4u64)
        .map(|i| SimNode {
            dev_id: 0x1122_3344_5566_7700 + i,
            class: if i == 3 { NodeClass::B } else { NodeClass::A },
            channel: i as usize % channel_count,
            nonce: 0,
            addr: None,
            sent: 0,
        })
        .collect();

    let codec = StarCodec;
    let mut ticker = tokio::time::interval(UPLINK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
            _ = ticker.tick() => {
                simulate_air(&codec, &key, &air, &mut nodes);
                debug!("Status: {}", gateway.status());
            }
        }
    }

    gateway.shutdown().await;
    info!("Goodbye");
}
