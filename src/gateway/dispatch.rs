//! Uplink dispatch.
//!
//! Turns one received frame into application callbacks and, when the node
//! expects it, the downlink to send in its receive window.

use super::shared::{Shared, TxKind, TxRequest};
use crate::mac::crypto::{sign_join_accept, verify_join_request};
use crate::mac::{Address, DataFrame, JoinAccept, JoinRequest, MacFrame, MIC_LEN};
use crate::registry::{JoinOutcome, Node};
use crate::stats::GatewayStats;
use log::{debug, info, warn};

/// Handle a frame received on channel `channel`.
///
/// Returns the downlink for the sender's receive window, if any.
pub(crate) fn handle_uplink(shared: &Shared, channel: usize, raw: &[u8]) -> Option<TxRequest> {
    let frame = match shared.codec.decode(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Channel {}: dropping undecodable frame: {}", channel, e);
            GatewayStats::incr(&shared.stats.decode_errors);
            return None;
        }
    };

    match frame {
        MacFrame::JoinRequest(req) => handle_join(shared, channel, req),
        MacFrame::Data(data) => handle_data(shared, channel, data),
        MacFrame::Ack(addr) => {
            let node = heard(shared, channel, addr)?;
            shared.sink.data_acked(&node, &shared.channels[channel]);
            None
        }
        MacFrame::LinkCheck(addr) => {
            let node = heard(shared, channel, addr)?;
            shared.sink.link_ok(&node, &shared.channels[channel]);
            next_downlink(shared, &node, false)
        }
        MacFrame::JoinAccept(acc) => {
            debug!(
                "Channel {}: ignoring join accept for dev {:016x} from another gateway",
                channel, acc.dev_id
            );
            None
        }
    }
}

fn handle_join(shared: &Shared, channel: usize, req: JoinRequest) -> Option<TxRequest> {
    if verify_join_request(&shared.settings.join_key, &req).is_err() {
        debug!("Join from dev {:016x}: bad MIC", req.dev_id);
        GatewayStats::incr(&shared.stats.mic_failures);
        return None;
    }

    if !shared.sink.accept_join(req.dev_id, req.app_id) {
        info!(
            "Join from dev {:016x} (app {:016x}) rejected by application",
            req.dev_id, req.app_id
        );
        GatewayStats::incr(&shared.stats.joins_rejected);
        return None;
    }

    let outcome = shared.registry().join(
        req.dev_id,
        req.app_id,
        req.class,
        channel,
        shared.ping_count(),
    );
    let node = match outcome {
        Ok(JoinOutcome::Joined(node)) => node,
        Ok(JoinOutcome::Rejoined { node, discarded }) => {
            debug!(
                "Dev {:016x} re-joined as {}, {} pending frames dropped",
                node.dev_id, node.addr, discarded
            );
            GatewayStats::add(&shared.stats.pending_discarded, discarded as u64);
            node
        }
        Err(e) => {
            warn!("Join from dev {:016x} refused: {}", req.dev_id, e);
            GatewayStats::incr(&shared.stats.joins_rejected);
            return None;
        }
    };
    GatewayStats::incr(&shared.stats.joins_accepted);
    info!(
        "Dev {:016x} joined as {} (class {}, {})",
        node.dev_id, node.addr, node.class, shared.channels[channel]
    );

    let app_data = shared.sink.node_joined(&node);
    let mut accept = JoinAccept {
        dev_id: node.dev_id,
        addr: node.addr,
        app_data,
        dev_nonce: req.dev_nonce,
        gate_id: shared.settings.gate_id,
        mic: [0; MIC_LEN],
    };
    sign_join_accept(&shared.settings.join_key, &mut accept);

    let frame = shared.encode(&MacFrame::JoinAccept(accept))?;
    Some(TxRequest {
        addr: node.addr,
        frame,
        kind: TxKind::Window { requeue: None },
    })
}

fn handle_data(shared: &Shared, channel: usize, data: DataFrame) -> Option<TxRequest> {
    let node = heard(shared, channel, data.addr)?;
    let config = &shared.channels[channel];

    shared.sink.data_received(&node, config, &data.payload);
    if data.ack {
        shared.sink.data_acked(&node, config);
    }
    next_downlink(shared, &node, data.confirm)
}

/// Refresh a node's liveness; `None` for unknown addresses.
fn heard(shared: &Shared, channel: usize, addr: Address) -> Option<Node> {
    let touched = shared.registry().touch(addr, channel, shared.ping_count());
    if touched.is_none() {
        debug!("Channel {}: frame from unknown address {}", channel, addr);
    }
    touched
}

/// Downlink for the receive window opened by `node`'s uplink.
///
/// Sends one pending frame (flagging whether more remain), or a bare ack if
/// nothing is queued and the uplink asked for confirmation.
fn next_downlink(shared: &Shared, node: &Node, confirm: bool) -> Option<TxRequest> {
    let next = {
        let mut registry = shared.registry();
        registry
            .pending_mut(node.addr)
            .and_then(|queue| queue.pop().map(|payload| (payload, !queue.is_empty())))
    };

    let mut requeue = None;
    let frame = match next {
        Some((payload, more)) => {
            debug!(
                "Flushing {} bytes to {} (more pending: {})",
                payload.len(),
                node.addr,
                more
            );
            requeue = Some(payload.clone());
            MacFrame::Data(DataFrame {
                addr: node.addr,
                confirm: false,
                ack: confirm,
                frame_pending: more,
                payload,
            })
        }
        None if confirm => MacFrame::Ack(node.addr),
        None => return None,
    };

    let frame = shared.encode(&frame)?;
    Some(TxRequest {
        addr: node.addr,
        frame,
        kind: TxKind::Window { requeue },
    })
}
