//! LoRa-Star MAC frames.
//!
//! This module contains:
//! - [`frame`]: MAC frame types, the [`FrameCodec`] trait and the default
//!   [`StarCodec`] wire format
//! - [`crypto`]: Join MIC computation and verification (AES-128-CMAC)

pub mod crypto;
mod frame;

pub use crypto::{MicError, MIC_LEN};
pub use frame::{
    Address, CodecError, DataFrame, FrameCodec, JoinAccept, JoinRequest, MacFrame, NodeClass,
    StarCodec, BROADCAST_ADDRESS, MAX_FRAME_LEN, MAX_PAYLOAD_LEN,
};
