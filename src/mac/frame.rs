//! MAC frame types and wire codec.
//!
//! The gateway core only depends on the [`FrameCodec`] trait; [`StarCodec`]
//! is the compact little-endian layout used by LoRa-Star nodes.
//!
//! # Wire Layout
//!
//! | Frame | Type | Body |
//! |-------|------|------|
//! | JoinRequest | `0x01` | dev_id u64, app_id u64, class u8, dev_nonce u16, mic\[4\] |
//! | JoinAccept | `0x02` | dev_id u64, addr u32, app_data u32, dev_nonce u16, gate_id u64, mic\[4\] |
//! | Data | `0x03` | flags u8, addr u32, payload |
//! | Ack | `0x04` | addr u32 |
//! | LinkCheck | `0x05` | addr u32 |
//!
//! Data flags: bit 0 = confirmation requested, bit 1 = acknowledges the last
//! uplink, bit 2 = more frames pending at the gateway.

use super::crypto::MIC_LEN;
use std::fmt;

/// Maximum LoRa frame length in bytes.
pub const MAX_FRAME_LEN: usize = 255;

/// Data frame header: type, flags, address.
const DATA_HEADER_LEN: usize = 1 + 1 + 4;

/// Largest application payload that fits in one data frame.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - DATA_HEADER_LEN;

/// Address reserved for broadcast; never assigned to a node.
pub const BROADCAST_ADDRESS: Address = Address(u32::MAX);

const TYPE_JOIN_REQUEST: u8 = 0x01;
const TYPE_JOIN_ACCEPT: u8 = 0x02;
const TYPE_DATA: u8 = 0x03;
const TYPE_ACK: u8 = 0x04;
const TYPE_LINK_CHECK: u8 = 0x05;

const FLAG_CONFIRM: u8 = 0x01;
const FLAG_ACK: u8 = 0x02;
const FLAG_PENDING: u8 = 0x04;

/// Short network address assigned to a joined node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub u32);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Node delivery class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    /// Receives downlink only in the window following its own uplink.
    A,
    /// May receive downlink at any time chosen by the gateway.
    B,
}

impl NodeClass {
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    fn from_wire(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::A),
            1 => Ok(Self::B),
            other => Err(CodecError::InvalidClass(other)),
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Join request sent by a node that wants to enter the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Device identifier.
    pub dev_id: u64,
    /// Application identifier.
    pub app_id: u64,
    /// Requested delivery class.
    pub class: NodeClass,
    /// Device nonce, echoed in the accept.
    pub dev_nonce: u16,
    /// Message integrity code keyed by the join key.
    pub mic: [u8; MIC_LEN],
}

/// Join accept returned to an admitted node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAccept {
    /// Device identifier from the request.
    pub dev_id: u64,
    /// Network address assigned to the node.
    pub addr: Address,
    /// Application-provided acceptance word.
    pub app_data: u32,
    /// Device nonce from the request.
    pub dev_nonce: u16,
    /// Identifier of the accepting gateway.
    pub gate_id: u64,
    /// Message integrity code keyed by the join key.
    pub mic: [u8; MIC_LEN],
}

/// Application data frame (either direction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Node address.
    pub addr: Address,
    /// Sender asks for an acknowledgement.
    pub confirm: bool,
    /// Frame acknowledges the peer's last confirmed frame.
    pub ack: bool,
    /// More downlink frames are queued for the node.
    pub frame_pending: bool,
    /// Application payload.
    pub payload: Vec<u8>,
}

impl DataFrame {
    /// Plain downlink carrying `payload`.
    pub fn downlink(addr: Address, payload: Vec<u8>) -> Self {
        Self {
            addr,
            confirm: false,
            ack: false,
            frame_pending: false,
            payload,
        }
    }
}

/// Decoded MAC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacFrame {
    /// Node asks to join.
    JoinRequest(JoinRequest),
    /// Gateway admits a node.
    JoinAccept(JoinAccept),
    /// Application data.
    Data(DataFrame),
    /// Bare acknowledgement.
    Ack(Address),
    /// Node liveness ping.
    LinkCheck(Address),
}

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Zero-length frame.
    Empty,
    /// Unrecognized frame type byte.
    UnknownType(u8),
    /// Frame ended before all fields were read.
    Truncated,
    /// Extra bytes after a fixed-size frame.
    TrailingBytes(usize),
    /// Frame exceeds the radio MTU.
    TooLong {
        /// Encoded length.
        len: usize,
    },
    /// Unknown node class value.
    InvalidClass(u8),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty frame"),
            Self::UnknownType(t) => write!(f, "unknown frame type 0x{:02x}", t),
            Self::Truncated => write!(f, "truncated frame"),
            Self::TrailingBytes(n) => write!(f, "{} trailing bytes after frame", n),
            Self::TooLong { len } => {
                write!(f, "frame too long: {} bytes (max {})", len, MAX_FRAME_LEN)
            }
            Self::InvalidClass(c) => write!(f, "invalid node class {}", c),
        }
    }
}

impl std::error::Error for CodecError {}

/// Wire codec for MAC frames.
///
/// Implementations must be stateless or internally synchronized: every
/// channel task decodes through the same shared codec.
pub trait FrameCodec: Send + Sync + 'static {
    /// Decode a received frame.
    fn decode(&self, raw: &[u8]) -> Result<MacFrame, CodecError>;

    /// Encode a frame for transmission.
    fn encode(&self, frame: &MacFrame) -> Result<Vec<u8>, CodecError>;
}

/// Default LoRa-Star wire codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct StarCodec;

impl FrameCodec for StarCodec {
    fn decode(&self, raw: &[u8]) -> Result<MacFrame, CodecError> {
        if raw.len() > MAX_FRAME_LEN {
            return Err(CodecError::TooLong { len: raw.len() });
        }
        let (&frame_type, body) = raw.split_first().ok_or(CodecError::Empty)?;
        let mut r = Reader::new(body);

        let frame = match frame_type {
            TYPE_JOIN_REQUEST => MacFrame::JoinRequest(JoinRequest {
                dev_id: r.u64()?,
                app_id: r.u64()?,
                class: NodeClass::from_wire(r.u8()?)?,
                dev_nonce: r.u16()?,
                mic: r.array()?,
            }),
            TYPE_JOIN_ACCEPT => MacFrame::JoinAccept(JoinAccept {
                dev_id: r.u64()?,
                addr: Address(r.u32()?),
                app_data: r.u32()?,
                dev_nonce: r.u16()?,
                gate_id: r.u64()?,
                mic: r.array()?,
            }),
            TYPE_DATA => {
                let flags = r.u8()?;
                let addr = Address(r.u32()?);
                return Ok(MacFrame::Data(DataFrame {
                    addr,
                    confirm: flags & FLAG_CONFIRM != 0,
                    ack: flags & FLAG_ACK != 0,
                    frame_pending: flags & FLAG_PENDING != 0,
                    payload: r.rest().to_vec(),
                }));
            }
            TYPE_ACK => MacFrame::Ack(Address(r.u32()?)),
            TYPE_LINK_CHECK => MacFrame::LinkCheck(Address(r.u32()?)),
            other => return Err(CodecError::UnknownType(other)),
        };

        r.finish()?;
        Ok(frame)
    }

    fn encode(&self, frame: &MacFrame) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(32);
        match frame {
            MacFrame::JoinRequest(req) => {
                out.push(TYPE_JOIN_REQUEST);
                out.extend_from_slice(&req.dev_id.to_le_bytes());
                out.extend_from_slice(&req.app_id.to_le_bytes());
                out.push(req.class.to_wire());
                out.extend_from_slice(&req.dev_nonce.to_le_bytes());
                out.extend_from_slice(&req.mic);
            }
            MacFrame::JoinAccept(acc) => {
                out.push(TYPE_JOIN_ACCEPT);
                out.extend_from_slice(&acc.dev_id.to_le_bytes());
                out.extend_from_slice(&acc.addr.0.to_le_bytes());
                out.extend_from_slice(&acc.app_data.to_le_bytes());
                out.extend_from_slice(&acc.dev_nonce.to_le_bytes());
                out.extend_from_slice(&acc.gate_id.to_le_bytes());
                out.extend_from_slice(&acc.mic);
            }
            MacFrame::Data(data) => {
                let mut flags = 0;
                if data.confirm {
                    flags |= FLAG_CONFIRM;
                }
                if data.ack {
                    flags |= FLAG_ACK;
                }
                if data.frame_pending {
                    flags |= FLAG_PENDING;
                }
                out.push(TYPE_DATA);
                out.push(flags);
                out.extend_from_slice(&data.addr.0.to_le_bytes());
                out.extend_from_slice(&data.payload);
            }
            MacFrame::Ack(addr) => {
                out.push(TYPE_ACK);
                out.extend_from_slice(&addr.0.to_le_bytes());
            }
            MacFrame::LinkCheck(addr) => {
                out.push(TYPE_LINK_CHECK);
                out.extend_from_slice(&addr.0.to_le_bytes());
            }
        }

        if out.len() > MAX_FRAME_LEN {
            return Err(CodecError::TooLong { len: out.len() });
        }
        Ok(out)
    }
}

/// Little-endian cursor over a frame body.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        if self.buf.len() < N {
            return Err(CodecError::Truncated);
        }
        let (head, tail) = self.buf.split_at(N);
        self.buf = tail;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn rest(self) -> &'a [u8] {
        self.buf
    }

    fn finish(&self) -> Result<(), CodecError> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}
