//! Network identity and channel layout.

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Join key length (AES-128).
pub const JOIN_KEY_LEN: usize = 16;

/// Secret used to authenticate join requests and sign join accepts.
///
/// The key bytes are wiped when the value is dropped. `Debug` never prints
/// the key material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Deserialize)]
#[serde(transparent)]
pub struct JoinKey([u8; JOIN_KEY_LEN]);

impl JoinKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; JOIN_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        let key: [u8; JOIN_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| ConfigError::InvalidJoinKey { len: bytes.len() })?;
        Ok(Self(key))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; JOIN_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JoinKey(..)")
    }
}

/// Gateway network settings.
///
/// Fixed for the lifetime of a running gateway; the controller only ever
/// hands out shared references.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewaySettings {
    /// Unique gateway identifier, echoed in every join accept.
    pub gate_id: u64,
    /// Join MIC key.
    pub join_key: JoinKey,
}

impl GatewaySettings {
    /// Create new settings.
    pub fn new(gate_id: u64, join_key: JoinKey) -> Self {
        Self { gate_id, join_key }
    }
}

/// LoRa-Star data rate index (DR0 slowest .. DR6 fastest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DataRate(u8);

impl DataRate {
    /// Highest supported index.
    pub const MAX_INDEX: u8 = 6;

    /// Data rate used for the default receive window.
    pub const DR3: DataRate = DataRate(3);

    /// Create a data rate from its index.
    pub fn new(index: u8) -> Result<Self, ConfigError> {
        if index > Self::MAX_INDEX {
            return Err(ConfigError::InvalidDataRate(index));
        }
        Ok(Self(index))
    }

    /// Data rate index.
    pub fn index(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DataRate {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DataRate> for u8 {
    fn from(dr: DataRate) -> u8 {
        dr.0
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DR{}", self.0)
    }
}

/// One configured (data rate, channel) pairing served by one transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Data rate for this channel.
    pub data_rate: DataRate,
    /// Channel number.
    pub channel: u8,
}

impl ChannelConfig {
    /// Create a channel configuration.
    pub fn new(data_rate: DataRate, channel: u8) -> Self {
        Self { data_rate, channel }
    }
}

impl fmt::Display for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}@{}", self.channel, self.data_rate)
    }
}
