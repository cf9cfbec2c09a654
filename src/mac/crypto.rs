//! Join message integrity codes.
//!
//! The MIC is the first [`MIC_LEN`] bytes of AES-128-CMAC keyed by the
//! gateway join key, computed over the frame fields in wire order (not over
//! the encoded frame, so any [`FrameCodec`] can carry it):
//!
//! - Join request: `dev_id || app_id || class || dev_nonce`
//! - Join accept: `dev_id || addr || app_data || dev_nonce || gate_id`
//!
//! [`FrameCodec`]: super::FrameCodec

use super::frame::{JoinAccept, JoinRequest};
use crate::config::JoinKey;
use aes::Aes128;
use cmac::{Cmac, Mac};
use std::fmt;

/// MIC size in bytes.
pub const MIC_LEN: usize = 4;

/// MIC verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicError;

impl fmt::Display for MicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MIC mismatch")
    }
}

impl std::error::Error for MicError {}

fn keyed(key: &JoinKey) -> Cmac<Aes128> {
    <Cmac<Aes128> as Mac>::new(key.as_bytes().into())
}

fn truncate(mac: Cmac<Aes128>) -> [u8; MIC_LEN] {
    let tag = mac.finalize().into_bytes();
    let mut mic = [0u8; MIC_LEN];
    mic.copy_from_slice(&tag[..MIC_LEN]);
    mic
}

fn join_request_input(key: &JoinKey, req: &JoinRequest) -> Cmac<Aes128> {
    let mut mac = keyed(key);
    mac.update(&req.dev_id.to_le_bytes());
    mac.update(&req.app_id.to_le_bytes());
    mac.update(&[req.class.to_wire()]);
    mac.update(&req.dev_nonce.to_le_bytes());
    mac
}

fn join_accept_input(key: &JoinKey, acc: &JoinAccept) -> Cmac<Aes128> {
    let mut mac = keyed(key);
    mac.update(&acc.dev_id.to_le_bytes());
    mac.update(&acc.addr.0.to_le_bytes());
    mac.update(&acc.app_data.to_le_bytes());
    mac.update(&acc.dev_nonce.to_le_bytes());
    mac.update(&acc.gate_id.to_le_bytes());
    mac
}

/// Compute the MIC of a join request (its `mic` field is ignored).
pub fn join_request_mic(key: &JoinKey, req: &JoinRequest) -> [u8; MIC_LEN] {
    truncate(join_request_input(key, req))
}

/// Fill in the MIC of a join request.
pub fn sign_join_request(key: &JoinKey, req: &mut JoinRequest) {
    req.mic = join_request_mic(key, req);
}

/// Check a join request MIC in constant time.
pub fn verify_join_request(key: &JoinKey, req: &JoinRequest) -> Result<(), MicError> {
    join_request_input(key, req)
        .verify_truncated_left(&req.mic)
        .map_err(|_| MicError)
}

/// Compute the MIC of a join accept (its `mic` field is ignored).
pub fn join_accept_mic(key: &JoinKey, acc: &JoinAccept) -> [u8; MIC_LEN] {
    truncate(join_accept_input(key, acc))
}

/// Fill in the MIC of a join accept.
pub fn sign_join_accept(key: &JoinKey, acc: &mut JoinAccept) {
    acc.mic = join_accept_mic(key, acc);
}

/// Check a join accept MIC in constant time.
pub fn verify_join_accept(key: &JoinKey, acc: &JoinAccept) -> Result<(), MicError> {
    join_accept_input(key, acc)
        .verify_truncated_left(&acc.mic)
        .map_err(|_| MicError)
}
