//! LoRa radio support.
//!
//! This module contains:
//! - [`radio`]: The [`Transceiver`] driver trait and radio events
//! - [`lbt`]: Listen-before-talk channel access with randomized backoff
//! - [`sim`]: In-memory transceiver for host testing and simulation

mod lbt;
mod radio;
mod sim;

pub use lbt::{Access, LbtConfig, ListenBeforeTalk};
pub use radio::{EventSender, RadioError, RadioEvent, ReceivedPacket, Transceiver};
pub use sim::{SimHandle, SimTransceiver, SimTransmission};
