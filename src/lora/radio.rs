//! Transceiver driver interface.
//!
//! One [`Transceiver`] backs each gateway channel. The driver owns the radio
//! registers and interrupt handling; the gateway only sees this trait and the
//! [`RadioEvent`]s the driver pushes into the channel's bounded event queue.
//!
//! # Contract
//!
//! - Methods are quick register-level operations and must not block for the
//!   duration of an air-time.
//! - `transmit` starts a transmission and returns; completion is reported
//!   with [`RadioEvent::TxDone`]. After TxDone the driver resumes listening.
//! - Events are delivered with `try_send`; a full queue is the driver's
//!   problem to report (the gateway never sees a silently lost frame as
//!   success).
//!
//! `Box<dyn Transceiver>` is itself a [`Transceiver`], so one gateway can mix
//! drivers.

use crate::config::DataRate;
use std::fmt;
use tokio::sync::mpsc;

/// Sender half of a channel's inbound event queue.
pub type EventSender = mpsc::Sender<RadioEvent>;

/// A frame received from the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// Raw frame bytes.
    pub data: Vec<u8>,
    /// RSSI of the frame (dBm).
    pub rssi: i16,
    /// SNR of the frame (dB).
    pub snr: i8,
}

/// Asynchronous transceiver event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A frame was received with a valid CRC.
    RxDone(ReceivedPacket),
    /// The current transmission finished.
    TxDone,
    /// A frame was received but failed its CRC.
    CrcError,
    /// Unrecoverable hardware fault.
    Fault(RadioError),
}

/// Transceiver errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// Radio did not respond or reported a hardware failure.
    Hardware(String),
    /// Radio is in the wrong mode for the request.
    InvalidState(&'static str),
    /// Frame does not fit the radio FIFO.
    FrameTooLong(usize),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware(msg) => write!(f, "radio hardware error: {}", msg),
            Self::InvalidState(msg) => write!(f, "radio in invalid state: {}", msg),
            Self::FrameTooLong(len) => write!(f, "frame too long for radio: {} bytes", len),
        }
    }
}

impl std::error::Error for RadioError {}

/// Per-channel radio hardware abstraction.
pub trait Transceiver: Send + 'static {
    /// Enter continuous receive, delivering events into `events`.
    fn start_listening(&mut self, events: EventSender) -> Result<(), RadioError>;

    /// Leave receive mode; no further events are delivered.
    fn stop_listening(&mut self) -> Result<(), RadioError>;

    /// Start transmitting `frame` on `channel` at `data_rate`.
    fn transmit(&mut self, frame: &[u8], data_rate: DataRate, channel: u8)
        -> Result<(), RadioError>;

    /// Instantaneous channel RSSI (dBm), used for channel-busy sensing.
    fn rssi(&mut self) -> Result<i16, RadioError>;

    /// Put the radio into its low-power state.
    fn sleep(&mut self) -> Result<(), RadioError>;
}

impl<T: Transceiver + ?Sized> Transceiver for Box<T> {
    fn start_listening(&mut self, events: EventSender) -> Result<(), RadioError> {
        (**self).start_listening(events)
    }

    fn stop_listening(&mut self) -> Result<(), RadioError> {
        (**self).stop_listening()
    }

    fn transmit(&mut self, frame: &[u8], data_rate: DataRate, channel: u8)
        -> Result<(), RadioError> {
        (**self).transmit(frame, data_rate, channel)
    }

    fn rssi(&mut self) -> Result<i16, RadioError> {
        (**self).rssi()
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        (**self).sleep()
    }
}
