//! Application callbacks.

use crate::config::ChannelConfig;
use crate::registry::Node;

/// Receives gateway events.
///
/// Set once at [`Gateway::init`](crate::Gateway::init) and called
/// synchronously from whichever task detects the event (a channel task or
/// the timeout task). The registry lock is never held during a call, so an
/// implementation may call back into the gateway through a
/// [`GatewayHandle`](crate::GatewayHandle), e.g. to queue a reply from
/// `data_received`.
///
/// Calls must return quickly: a slow callback delays the channel's receive
/// window.
pub trait GatewayEventSink: Send + Sync + 'static {
    /// Admission policy for a join request with a valid MIC.
    fn accept_join(&self, dev_id: u64, app_id: u64) -> bool;

    /// A node joined (or re-joined). The return value is sent to the node
    /// as the `app_data` word of its join accept.
    fn node_joined(&self, _node: &Node) -> u32 {
        0
    }

    /// A node was removed, by timeout or by `kick`.
    fn node_kicked(&self, _node: &Node) {}

    /// Application payload received from a node.
    fn data_received(&self, _node: &Node, _channel: &ChannelConfig, _payload: &[u8]) {}

    /// A node acknowledged a confirmed downlink.
    fn data_acked(&self, _node: &Node, _channel: &ChannelConfig) {}

    /// A node sent a link check.
    fn link_ok(&self, _node: &Node, _channel: &ChannelConfig) {}
}
