//! End-to-end gateway behaviour over simulated radios.
//!
//! All tests run with paused time: sleeps advance the clock instantly once
//! every gateway task is idle.

use lora_star_gate::config::{ChannelConfig, DataRate, GatewayConfig, GatewaySettings, JoinKey};
use lora_star_gate::mac::crypto::{sign_join_request, verify_join_accept};
use lora_star_gate::mac::{DataFrame, FrameCodec, JoinAccept, JoinRequest, MacFrame, StarCodec};
use lora_star_gate::{
    Address, Gateway, GatewayError, GatewayEventSink, GatewayStatus, Node, NodeClass,
    RadioChannel, SimHandle, SimTransceiver, MAX_PAYLOAD_LEN, PENDING_QUEUE_CAPACITY,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

const GATE_ID: u64 = 0x0000_0000_c0ff_ee01;
const DEV_ID: u64 = 0x1122_3344_5566_7788;
const APP_DATA: u32 = 0xabcd_0042;

#[derive(Default)]
struct RecordingSink {
    reject: AtomicBool,
    accept_calls: AtomicUsize,
    joined: Mutex<Vec<Node>>,
    kicked: Mutex<Vec<Node>>,
    received: Mutex<Vec<(Address, Vec<u8>)>>,
    acked: AtomicUsize,
    links: AtomicUsize,
}

impl RecordingSink {
    fn joined(&self) -> Vec<Node> {
        self.joined.lock().unwrap().clone()
    }

    fn kicked(&self) -> Vec<Node> {
        self.kicked.lock().unwrap().clone()
    }
}

impl GatewayEventSink for RecordingSink {
    fn accept_join(&self, _dev_id: u64, _app_id: u64) -> bool {
        self.accept_calls.fetch_add(1, Ordering::SeqCst);
        !self.reject.load(Ordering::SeqCst)
    }

    fn node_joined(&self, node: &Node) -> u32 {
        self.joined.lock().unwrap().push(node.clone());
        APP_DATA
    }

    fn node_kicked(&self, node: &Node) {
        self.kicked.lock().unwrap().push(node.clone());
    }

    fn data_received(&self, node: &Node, _channel: &ChannelConfig, payload: &[u8]) {
        self.received
            .lock()
            .unwrap()
            .push((node.addr, payload.to_vec()));
    }

    fn data_acked(&self, _node: &Node, _channel: &ChannelConfig) {
        self.acked.fetch_add(1, Ordering::SeqCst);
    }

    fn link_ok(&self, _node: &Node, _channel: &ChannelConfig) {
        self.links.fetch_add(1, Ordering::SeqCst);
    }
}

fn key() -> JoinKey {
    JoinKey::new([0x2b; 16])
}

fn settings() -> GatewaySettings {
    GatewaySettings::new(GATE_ID, key())
}

fn test_config() -> GatewayConfig {
    GatewayConfig {
        ping_period_ms: 1_000,
        max_skipped_pings: 3,
        rx_window_delay_ms: 100,
        tx_timeout_ms: 2_000,
        ..Default::default()
    }
}

const RX_WINDOW: Duration = Duration::from_millis(150);

async fn start(
    channels: usize,
    sink: Arc<RecordingSink>,
    config: GatewayConfig,
) -> (Gateway, Vec<SimHandle>) {
    let mut air = Vec::new();
    let mut radios = Vec::new();
    for ch in 0..channels {
        let (radio, handle) = SimTransceiver::new();
        radios.push(RadioChannel::new(
            ChannelConfig::new(DataRate::DR3, ch as u8),
            radio,
        ));
        air.push(handle);
    }
    let gateway = Gateway::init(settings(), radios, sink, config)
        .await
        .expect("gateway starts");
    (gateway, air)
}

fn encode(frame: MacFrame) -> Vec<u8> {
    StarCodec.encode(&frame).unwrap()
}

fn decode(raw: &[u8]) -> MacFrame {
    StarCodec.decode(raw).unwrap()
}

fn join_request(dev_id: u64, class: NodeClass, nonce: u16) -> Vec<u8> {
    let mut req = JoinRequest {
        dev_id,
        app_id: 7,
        class,
        dev_nonce: nonce,
        mic: [0; 4],
    };
    sign_join_request(&key(), &mut req);
    encode(MacFrame::JoinRequest(req))
}

fn uplink(addr: Address, confirm: bool, payload: &[u8]) -> Vec<u8> {
    encode(MacFrame::Data(DataFrame {
        addr,
        confirm,
        ack: false,
        frame_pending: false,
        payload: payload.to_vec(),
    }))
}

/// Join `dev_id` on `channel` and return the accepted address.
async fn join(air: &[SimHandle], channel: usize, dev_id: u64, class: NodeClass) -> Address {
    assert!(air[channel].inject_uplink(&join_request(dev_id, class, 1)));
    sleep(RX_WINDOW).await;
    let accept = air[channel]
        .take_transmitted()
        .into_iter()
        .find_map(|tx| match decode(&tx.frame) {
            MacFrame::JoinAccept(acc) if acc.dev_id == dev_id => Some(acc),
            _ => None,
        })
        .expect("join accept sent");
    accept.addr
}

fn data_frames(handle: &SimHandle) -> Vec<DataFrame> {
    handle
        .take_transmitted()
        .into_iter()
        .filter_map(|tx| match decode(&tx.frame) {
            MacFrame::Data(data) => Some(data),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_join_registers_node_and_sends_accept() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink.clone(), test_config()).await;
    let ping_at_join = gw.ping_count();

    assert!(air[0].inject_uplink(&join_request(DEV_ID, NodeClass::A, 0x0102)));
    sleep(Duration::from_millis(10)).await;

    let nodes = gw.nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].dev_id, DEV_ID);
    assert_eq!(nodes[0].last_seen_ping, ping_at_join);
    assert_eq!(nodes[0].channel, 0);
    assert_eq!(sink.joined().len(), 1);

    // Accept goes out in the receive window, not before
    assert!(air[0].transmitted().is_empty());
    sleep(RX_WINDOW).await;

    let sent = air[0].take_transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data_rate, DataRate::DR3);
    assert_eq!(sent[0].channel, 0);
    let accept: JoinAccept = match decode(&sent[0].frame) {
        MacFrame::JoinAccept(acc) => acc,
        other => panic!("expected join accept, got {:?}", other),
    };
    assert_eq!(accept.dev_id, DEV_ID);
    assert_eq!(accept.addr, nodes[0].addr);
    assert_eq!(accept.app_data, APP_DATA);
    assert_eq!(accept.dev_nonce, 0x0102);
    assert_eq!(accept.gate_id, GATE_ID);
    assert!(verify_join_accept(&key(), &accept).is_ok());
    assert_eq!(gw.stats().counters().joins_accepted, 1);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_node_is_evicted_once() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink.clone(), test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::A).await;

    // max_skipped_pings = 3: still registered after three periods
    sleep(Duration::from_millis(3_300)).await;
    assert!(gw.node(addr).is_some());
    assert!(sink.kicked().is_empty());

    sleep(Duration::from_millis(1_000)).await;
    assert!(gw.node(addr).is_none());
    assert_eq!(sink.kicked().len(), 1);
    assert_eq!(sink.kicked()[0].dev_id, DEV_ID);
    assert_eq!(gw.send_to(addr, b"late"), Err(GatewayError::NoSuchDevice(addr)));

    sleep(Duration::from_millis(5_000)).await;
    assert_eq!(sink.kicked().len(), 1);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_uplinks_keep_node_alive() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink.clone(), test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::A).await;

    for _ in 0..6 {
        sleep(Duration::from_millis(1_000)).await;
        assert!(air[0].inject_uplink(&encode(MacFrame::LinkCheck(addr))));
    }
    sleep(Duration::from_millis(100)).await;

    assert!(gw.node(addr).is_some());
    assert!(sink.kicked().is_empty());
    assert_eq!(sink.links.load(Ordering::SeqCst), 6);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_class_a_queue_overflow() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink, test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::A).await;

    for i in 0..PENDING_QUEUE_CAPACITY {
        gw.send_to(addr, &[i as u8]).unwrap();
    }
    assert_eq!(
        gw.send_to(addr, b"one too many"),
        Err(GatewayError::QueueOverflow(addr))
    );
    assert_eq!(gw.pending(addr), Some(PENDING_QUEUE_CAPACITY));

    // Class A frames wait for an uplink
    sleep(Duration::from_millis(500)).await;
    assert!(air[0].transmitted().is_empty());

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_class_b_sends_immediately() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink, test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::B).await;

    gw.send_to(addr, b"now").unwrap();
    assert_eq!(gw.pending(addr), Some(0));
    sleep(Duration::from_millis(10)).await;

    let frames = data_frames(&air[0]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].addr, addr);
    assert_eq!(frames[0].payload, b"now");

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_broadcast() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(2, sink, test_config()).await;

    assert_eq!(gw.broadcast(b"nobody"), Ok(0));

    let a = join(&air, 0, DEV_ID, NodeClass::A).await;
    let b = join(&air, 1, DEV_ID + 1, NodeClass::B).await;
    assert_eq!(gw.broadcast(b"all"), Ok(2));
    assert_eq!(gw.pending(a), Some(1));

    sleep(Duration::from_millis(10)).await;
    let frames = data_frames(&air[1]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].addr, b);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_join_sends_nothing() {
    let sink = Arc::new(RecordingSink::default());
    sink.reject.store(true, Ordering::SeqCst);
    let (gw, air) = start(1, sink.clone(), test_config()).await;

    assert!(air[0].inject_uplink(&join_request(DEV_ID, NodeClass::A, 1)));
    sleep(Duration::from_millis(500)).await;

    assert!(air[0].transmitted().is_empty());
    assert!(gw.nodes().is_empty());
    assert!(sink.joined().is_empty());
    assert_eq!(gw.stats().counters().joins_rejected, 1);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bad_mic_is_dropped_silently() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink.clone(), test_config()).await;

    let mut frame = join_request(DEV_ID, NodeClass::A, 1);
    let last = frame.len() - 1;
    frame[last] ^= 0xff;
    assert!(air[0].inject_uplink(&frame));
    sleep(Duration::from_millis(500)).await;

    assert!(air[0].transmitted().is_empty());
    assert!(gw.nodes().is_empty());
    assert_eq!(sink.accept_calls.load(Ordering::SeqCst), 0);
    assert_eq!(gw.stats().counters().mic_failures, 1);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_registry_full_rejects_join() {
    let sink = Arc::new(RecordingSink::default());
    let config = GatewayConfig {
        max_nodes: 1,
        ..test_config()
    };
    let (gw, air) = start(1, sink.clone(), config).await;
    join(&air, 0, DEV_ID, NodeClass::A).await;

    assert!(air[0].inject_uplink(&join_request(DEV_ID + 1, NodeClass::A, 1)));
    sleep(Duration::from_millis(500)).await;

    assert!(air[0].transmitted().is_empty());
    assert_eq!(gw.nodes().len(), 1);
    assert_eq!(sink.joined().len(), 1);
    assert_eq!(gw.stats().counters().joins_rejected, 1);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_uplink_flushes_pending_frames_in_order() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink.clone(), test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::A).await;

    gw.send_to(addr, b"first").unwrap();
    gw.send_to(addr, b"second").unwrap();

    // Confirmed uplink: first frame, acked, more pending
    assert!(air[0].inject_uplink(&uplink(addr, true, b"temp=21")));
    sleep(RX_WINDOW).await;
    let frames = data_frames(&air[0]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, b"first");
    assert!(frames[0].ack);
    assert!(frames[0].frame_pending);
    assert_eq!(gw.pending(addr), Some(1));

    // Unconfirmed uplink: last frame, nothing more pending
    assert!(air[0].inject_uplink(&uplink(addr, false, b"temp=22")));
    sleep(RX_WINDOW).await;
    let frames = data_frames(&air[0]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, b"second");
    assert!(!frames[0].ack);
    assert!(!frames[0].frame_pending);

    // Confirmed uplink with an empty queue: bare ack
    assert!(air[0].inject_uplink(&uplink(addr, true, b"temp=23")));
    sleep(RX_WINDOW).await;
    let sent = air[0].take_transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(decode(&sent[0].frame), MacFrame::Ack(addr));

    let received = sink.received.lock().unwrap().clone();
    assert_eq!(received.len(), 3);
    assert_eq!(received[0], (addr, b"temp=21".to_vec()));

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_busy_channel_backs_off_then_sends() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink, test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::B).await;
    let reads_before = air[0].rssi_reads();

    air[0].set_busy_reads(2);
    gw.send_to(addr, b"patience").unwrap();

    sleep(Duration::from_millis(50)).await;
    assert!(air[0].transmitted().is_empty());

    sleep(Duration::from_millis(2_000)).await;
    let frames = data_frames(&air[0]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, b"patience");
    assert_eq!(air[0].rssi_reads() - reads_before, 3);
    assert_eq!(gw.stats().counters().lbt_backoffs, 2);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_always_busy_channel_drops_frame() {
    let sink = Arc::new(RecordingSink::default());
    let config = GatewayConfig {
        max_tx_retries: 2,
        ..test_config()
    };
    let (gw, air) = start(1, sink, config).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::B).await;

    air[0].set_busy_reads(u32::MAX);
    gw.send_to(addr, b"lost").unwrap();
    sleep(Duration::from_millis(3_000)).await;

    assert!(air[0].transmitted().is_empty());
    assert_eq!(gw.stats().counters().lbt_dropped, 1);
    assert_eq!(gw.status(), GatewayStatus::Listening);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sleep_during_backoff_defers_frame_until_wake() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink, test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::B).await;

    air[0].set_busy_reads(1);
    gw.send_to(addr, b"deferred").unwrap();
    sleep(Duration::from_millis(10)).await;

    gw.sleep().await;
    assert_eq!(gw.status(), GatewayStatus::Sleep);
    assert!(air[0].is_asleep());

    let ping_before = gw.ping_count();
    sleep(Duration::from_millis(5_000)).await;
    assert!(air[0].transmitted().is_empty());
    assert_eq!(gw.ping_count(), ping_before);
    assert!(gw.node(addr).is_some());

    gw.wake().await;
    sleep(Duration::from_millis(10)).await;
    assert!(air[0].is_listening());
    let frames = data_frames(&air[0]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, b"deferred");
    assert_eq!(gw.status(), GatewayStatus::Listening);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_radio_fault_is_terminal() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(2, sink, test_config()).await;

    assert!(air[1].inject_fault("SPI timeout"));
    sleep(Duration::from_millis(10)).await;

    assert_eq!(gw.channel_status(0), Some(GatewayStatus::Listening));
    assert_eq!(gw.channel_status(1), Some(GatewayStatus::Fault));
    assert_eq!(gw.status(), GatewayStatus::Fault);

    gw.wake().await;
    assert_eq!(gw.status(), GatewayStatus::Fault);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_tx_done_faults_channel() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink, test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::B).await;

    air[0].swallow_tx_done(true);
    gw.send_to(addr, b"void").unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(gw.status(), GatewayStatus::Transmitting);

    sleep(Duration::from_millis(2_500)).await;
    assert_eq!(gw.status(), GatewayStatus::Fault);
    assert!(matches!(
        gw.send_to(addr, b"more"),
        Err(GatewayError::ChannelUnavailable(0))
    ));

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_channel_start_rolls_back() {
    let sink = Arc::new(RecordingSink::default());
    let (first, first_air) = SimTransceiver::new();
    let (second, second_air) = SimTransceiver::new();
    second_air.fail_start(true);

    let result = Gateway::init(
        settings(),
        vec![
            RadioChannel::new(ChannelConfig::new(DataRate::DR3, 0), first),
            RadioChannel::new(ChannelConfig::new(DataRate::DR3, 1), second),
        ],
        sink,
        test_config(),
    )
    .await;

    match result {
        Err(GatewayError::ChannelTaskStart { channel, .. }) => assert_eq!(channel, 1),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("init should fail"),
    }
    assert_eq!(first_air.start_count(), 1);
    assert!(!first_air.is_listening());
    assert!(!second_air.is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_init_rejects_bad_arguments() {
    let sink = Arc::new(RecordingSink::default());
    let empty: Vec<RadioChannel<SimTransceiver>> = Vec::new();
    assert!(matches!(
        Gateway::init(settings(), empty, sink.clone(), test_config()).await,
        Err(GatewayError::InvalidConfig(_))
    ));

    let (radio, air) = SimTransceiver::new();
    let config = GatewayConfig {
        tx_delay_min_ms: 900,
        tx_delay_max_ms: 100,
        ..test_config()
    };
    assert!(matches!(
        Gateway::init(
            settings(),
            vec![RadioChannel::new(ChannelConfig::new(DataRate::DR3, 0), radio)],
            sink,
            config,
        )
        .await,
        Err(GatewayError::InvalidConfig(_))
    ));
    assert_eq!(air.start_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_kick_fires_callback_once() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink.clone(), test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::A).await;
    gw.send_to(addr, b"bye").unwrap();

    let node = gw.kick(addr).unwrap();
    assert_eq!(node.dev_id, DEV_ID);
    assert_eq!(gw.kick(addr), Err(GatewayError::NoSuchDevice(addr)));
    assert_eq!(sink.kicked().len(), 1);
    assert_eq!(gw.stats().counters().pending_discarded, 1);

    // Eviction later must not report it again
    sleep(Duration::from_millis(6_000)).await;
    assert_eq!(sink.kicked().len(), 1);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_keeps_address_and_drops_pending() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink.clone(), test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::A).await;
    gw.send_to(addr, b"stale").unwrap();

    sleep(Duration::from_millis(2_000)).await;
    let again = join(&air, 0, DEV_ID, NodeClass::A).await;

    assert_eq!(again, addr);
    assert_eq!(gw.nodes().len(), 1);
    assert_eq!(gw.pending(addr), Some(0));
    assert_eq!(gw.node(addr).unwrap().last_seen_ping, gw.ping_count());
    assert_eq!(sink.joined().len(), 2);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_callback_can_reply_through_handle() {
    struct Replier {
        handle: std::sync::OnceLock<lora_star_gate::GatewayHandle>,
    }

    impl GatewayEventSink for Replier {
        fn accept_join(&self, _dev_id: u64, _app_id: u64) -> bool {
            true
        }

        fn data_received(&self, node: &Node, _channel: &ChannelConfig, payload: &[u8]) {
            if let Some(handle) = self.handle.get() {
                handle.send_to(node.addr, payload).unwrap();
            }
        }
    }

    let sink = Arc::new(Replier {
        handle: std::sync::OnceLock::new(),
    });
    let (radio, handle) = SimTransceiver::new();
    let gw = Gateway::init(
        settings(),
        vec![RadioChannel::new(ChannelConfig::new(DataRate::DR3, 0), radio)],
        sink.clone(),
        test_config(),
    )
    .await
    .unwrap();
    assert!(sink.handle.set(gw.handle()).is_ok());

    let air = vec![handle];
    let addr = join(&air, 0, DEV_ID, NodeClass::A).await;
    assert!(air[0].inject_uplink(&uplink(addr, false, b"ping")));
    sleep(RX_WINDOW).await;

    // Queued from inside the callback, delivered in the same window
    let frames = data_frames(&air[0]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, b"ping");

    let weak = gw.handle();
    gw.shutdown().await;
    assert_eq!(weak.send_to(addr, b"x"), Err(GatewayError::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_settings_are_stable_and_payload_limit_enforced() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink, test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::A).await;

    let too_big = vec![0u8; MAX_PAYLOAD_LEN + 1];
    assert_eq!(
        gw.send_to(addr, &too_big),
        Err(GatewayError::PayloadTooLarge {
            len: MAX_PAYLOAD_LEN + 1,
            max: MAX_PAYLOAD_LEN
        })
    );
    gw.send_to(addr, &too_big[..MAX_PAYLOAD_LEN]).unwrap();

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(gw.settings(), &settings());
    assert_eq!(gw.settings().gate_id, GATE_ID);

    let snapshot = gw.monitor().snapshot();
    assert_eq!(snapshot.nodes, 1);
    assert_eq!(snapshot.pending_frames, 1);
    assert_eq!(snapshot.gate_id, format!("{:016x}", GATE_ID));

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stats_endpoint_serves_snapshot() {
    use std::io::{Read, Write};

    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink, test_config()).await;
    join(&air, 0, DEV_ID, NodeClass::A).await;

    let server = lora_star_gate::StatsServer::start(
        Some(std::net::Ipv4Addr::LOCALHOST.into()),
        0,
        gw.monitor(),
    )
    .unwrap();

    let mut stream = std::net::TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    stream
        .write_all(b"GET /stats HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"nodes\":1"));
    assert!(response.contains("\"joins_accepted\":1"));

    drop(server);
    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sleep_during_window_backoff_keeps_class_a_frame_queued() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(1, sink, test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::A).await;

    gw.send_to(addr, b"held").unwrap();
    air[0].set_busy_reads(1);
    assert!(air[0].inject_uplink(&uplink(addr, false, b"hi")));

    // Window opens at 100 ms, the busy read backs off at least 100 ms more
    sleep(Duration::from_millis(110)).await;
    gw.sleep().await;
    assert_eq!(gw.pending(addr), Some(1));
    assert!(air[0].transmitted().is_empty());

    sleep(Duration::from_secs(30)).await;
    gw.wake().await;
    sleep(Duration::from_millis(10)).await;

    // Nothing goes out until the node opens another window
    assert!(air[0].transmitted().is_empty());
    assert_eq!(gw.pending(addr), Some(1));

    assert!(air[0].inject_uplink(&uplink(addr, true, b"again")));
    sleep(RX_WINDOW).await;
    let frames = data_frames(&air[0]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, b"held");
    assert!(frames[0].ack);
    assert!(!frames[0].frame_pending);
    assert_eq!(gw.pending(addr), Some(0));

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_busy_window_returns_frame_to_queue() {
    let sink = Arc::new(RecordingSink::default());
    let config = GatewayConfig {
        max_tx_retries: 2,
        ..test_config()
    };
    let (gw, air) = start(1, sink, config).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::A).await;

    gw.send_to(addr, b"first").unwrap();
    gw.send_to(addr, b"second").unwrap();
    air[0].set_busy_reads(u32::MAX);
    assert!(air[0].inject_uplink(&uplink(addr, false, b"hi")));
    sleep(Duration::from_millis(2_500)).await;

    assert!(air[0].transmitted().is_empty());
    assert_eq!(gw.stats().counters().lbt_dropped, 1);
    assert_eq!(gw.pending(addr), Some(2));

    air[0].set_busy_reads(0);
    assert!(air[0].inject_uplink(&uplink(addr, false, b"hi again")));
    sleep(RX_WINDOW).await;
    let frames = data_frames(&air[0]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, b"first");
    assert!(frames[0].frame_pending);

    gw.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_class_b_node_follows_uplink_channel() {
    let sink = Arc::new(RecordingSink::default());
    let (gw, air) = start(2, sink, test_config()).await;
    let addr = join(&air, 0, DEV_ID, NodeClass::B).await;

    assert!(air[1].inject_uplink(&encode(MacFrame::LinkCheck(addr))));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(gw.node(addr).unwrap().channel, 1);

    gw.send_to(addr, b"over here").unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(data_frames(&air[0]).is_empty());
    let frames = data_frames(&air[1]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, b"over here");

    gw.shutdown().await;
}

/// Poll `done` in real time until it holds or `limit` passes.
async fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    done()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_sends_and_evictions_stay_consistent() {
    use std::collections::HashSet;

    const CHANNELS: usize = 4;
    const PER_CHANNEL: u64 = 4;
    const NODES: usize = CHANNELS * PER_CHANNEL as usize;

    let sink = Arc::new(RecordingSink::default());
    let config = GatewayConfig {
        ping_period_ms: 20,
        max_skipped_pings: 10,
        rx_window_delay_ms: 1,
        tx_delay_min_ms: 1,
        tx_delay_max_ms: 5,
        ..test_config()
    };
    let (gw, air) = start(CHANNELS, sink.clone(), config).await;

    // Every channel receives its joins at the same time
    let injectors: Vec<_> = air
        .iter()
        .enumerate()
        .map(|(ch, handle)| {
            let handle = handle.clone();
            std::thread::spawn(move || {
                for i in 0..PER_CHANNEL {
                    let dev_id = DEV_ID + ch as u64 * PER_CHANNEL + i;
                    assert!(handle.inject_uplink(&join_request(dev_id, NodeClass::A, 1)));
                }
            })
        })
        .collect();
    for injector in injectors {
        injector.join().unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || sink.joined().len() == NODES).await);

    let joined = sink.joined();
    let addrs: HashSet<Address> = joined.iter().map(|n| n.addr).collect();
    let devs: HashSet<u64> = joined.iter().map(|n| n.dev_id).collect();
    assert_eq!(addrs.len(), NODES);
    assert_eq!(devs.len(), NODES);

    // Enqueue from several threads while the timeout task evicts the
    // silent nodes
    let targets: Vec<Address> = addrs.iter().copied().collect();
    let senders: Vec<_> = (0..4)
        .map(|_| {
            let handle = gw.handle();
            let targets = targets.clone();
            tokio::task::spawn_blocking(move || {
                let mut accepted = 0u64;
                for _ in 0..300 {
                    for addr in &targets {
                        match handle.send_to(*addr, b"burst") {
                            Ok(()) => accepted += 1,
                            Err(GatewayError::QueueOverflow(_))
                            | Err(GatewayError::NoSuchDevice(_)) => {}
                            Err(e) => panic!("unexpected send error {}", e),
                        }
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                accepted
            })
        })
        .collect();
    let mut accepted = 0;
    for sender in senders {
        accepted += sender.await.unwrap();
    }

    assert!(wait_until(Duration::from_secs(3), || gw.nodes().is_empty()).await);
    let kicked = sink.kicked();
    assert_eq!(kicked.len(), NODES);
    assert_eq!(
        kicked.iter().map(|n| n.dev_id).collect::<HashSet<_>>(),
        devs
    );

    // Every accepted frame was either still queued at eviction or dropped
    // with it; none vanished and none were counted twice
    let counters = gw.stats().counters();
    assert!(accepted > 0);
    assert_eq!(counters.pending_discarded, accepted);
    assert_eq!(counters.nodes_kicked, NODES as u64);

    gw.shutdown().await;
}
