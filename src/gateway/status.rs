//! Gateway and channel status.

use serde::Serialize;
use std::fmt;

/// Operating state of a channel, or of the whole gateway.
///
/// Each channel task publishes its own status. The gateway status is derived
/// from them with [`GatewayStatus::aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    /// Radio in low-power mode; nothing is received.
    Sleep,
    /// A frame is on the air.
    Transmitting,
    /// Receiving.
    Listening,
    /// Radio failure. Terminal until the gateway is restarted.
    Fault,
}

impl GatewayStatus {
    /// Combine per-channel states.
    ///
    /// Fault wins over Transmitting, which wins over Listening. An empty set
    /// (or all channels asleep) is Sleep.
    pub fn aggregate<I>(states: I) -> Self
    where
        I: IntoIterator<Item = GatewayStatus>,
    {
        states.into_iter().fold(Self::Sleep, |acc, s| {
            if acc.rank() >= s.rank() {
                acc
            } else {
                s
            }
        })
    }

    fn rank(self) -> u8 {
        match self {
            Self::Sleep => 0,
            Self::Listening => 1,
            Self::Transmitting => 2,
            Self::Fault => 3,
        }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sleep => write!(f, "sleep"),
            Self::Transmitting => write!(f, "transmitting"),
            Self::Listening => write!(f, "listening"),
            Self::Fault => write!(f, "fault"),
        }
    }
}

/// Power mode requested by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PowerMode {
    Awake,
    Asleep,
}
