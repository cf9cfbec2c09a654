//! In-memory transceiver for host testing and simulation.
//!
//! [`SimTransceiver`] implements [`Transceiver`] without hardware. The paired
//! [`SimHandle`] plays the role of the air: it injects uplink frames and
//! faults, makes the channel look busy, and records every transmitted frame.
//!
//! ```
//! use lora_star_gate::lora::SimTransceiver;
//!
//! let (radio, handle) = SimTransceiver::new();
//! assert!(!handle.is_listening());
//! # drop(radio);
//! ```

use super::radio::{EventSender, RadioError, RadioEvent, ReceivedPacket, Transceiver};
use crate::config::DataRate;
use log::warn;
use std::sync::{Arc, Mutex, MutexGuard};

/// RSSI reported while the simulated channel is busy.
const BUSY_RSSI_DBM: i16 = -60;

/// RSSI reported for a quiet channel.
const NOISE_FLOOR_DBM: i16 = -120;

/// A frame the simulated radio put on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTransmission {
    /// Raw frame bytes.
    pub frame: Vec<u8>,
    /// Data rate used.
    pub data_rate: DataRate,
    /// Channel number used.
    pub channel: u8,
}

#[derive(Debug)]
struct SimState {
    events: Option<EventSender>,
    listening: bool,
    asleep: bool,
    busy_reads: u32,
    fail_start: bool,
    fail_transmit: bool,
    swallow_tx_done: bool,
    starts: u32,
    rssi_reads: u32,
    transmitted: Vec<SimTransmission>,
}

impl SimState {
    fn post(&self, event: RadioEvent) -> bool {
        match &self.events {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Sim radio mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Simulated radio owned by a channel task.
#[derive(Debug)]
pub struct SimTransceiver {
    state: Arc<Mutex<SimState>>,
}

/// Test-side view of a [`SimTransceiver`].
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimTransceiver {
    /// Create a simulated radio and its control handle.
    pub fn new() -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState {
            events: None,
            listening: false,
            asleep: false,
            busy_reads: 0,
            fail_start: false,
            fail_transmit: false,
            swallow_tx_done: false,
            starts: 0,
            rssi_reads: 0,
            transmitted: Vec::new(),
        }));
        (
            Self {
                state: state.clone(),
            },
            SimHandle { state },
        )
    }
}

impl Transceiver for SimTransceiver {
    fn start_listening(&mut self, events: EventSender) -> Result<(), RadioError> {
        let mut s = lock(&self.state);
        if s.fail_start {
            return Err(RadioError::Hardware("no response from radio".to_string()));
        }
        s.events = Some(events);
        s.listening = true;
        s.asleep = false;
        s.starts += 1;
        Ok(())
    }

    fn stop_listening(&mut self) -> Result<(), RadioError> {
        let mut s = lock(&self.state);
        s.listening = false;
        s.events = None;
        Ok(())
    }

    fn transmit(
        &mut self,
        frame: &[u8],
        data_rate: DataRate,
        channel: u8,
    ) -> Result<(), RadioError> {
        let mut s = lock(&self.state);
        if s.fail_transmit {
            return Err(RadioError::Hardware("PA failure".to_string()));
        }
        if !s.listening {
            return Err(RadioError::InvalidState("transmit while stopped"));
        }
        s.transmitted.push(SimTransmission {
            frame: frame.to_vec(),
            data_rate,
            channel,
        });
        if !s.swallow_tx_done {
            s.post(RadioEvent::TxDone);
        }
        Ok(())
    }

    fn rssi(&mut self) -> Result<i16, RadioError> {
        let mut s = lock(&self.state);
        s.rssi_reads += 1;
        if s.busy_reads > 0 {
            s.busy_reads -= 1;
            return Ok(BUSY_RSSI_DBM);
        }
        Ok(NOISE_FLOOR_DBM)
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        let mut s = lock(&self.state);
        s.listening = false;
        s.asleep = true;
        s.events = None;
        Ok(())
    }
}

impl SimHandle {
    /// Deliver a received frame. Returns false if the radio is not listening
    /// or the event queue is full.
    pub fn inject_uplink(&self, frame: &[u8]) -> bool {
        self.inject(RadioEvent::RxDone(ReceivedPacket {
            data: frame.to_vec(),
            rssi: -80,
            snr: 7,
        }))
    }

    /// Deliver an arbitrary radio event.
    pub fn inject(&self, event: RadioEvent) -> bool {
        let s = lock(&self.state);
        s.listening && s.post(event)
    }

    /// Report a hardware fault.
    pub fn inject_fault(&self, reason: &str) -> bool {
        let s = lock(&self.state);
        s.post(RadioEvent::Fault(RadioError::Hardware(reason.to_string())))
    }

    /// Make the next `reads` RSSI readings report a busy channel.
    pub fn set_busy_reads(&self, reads: u32) {
        lock(&self.state).busy_reads = reads;
    }

    /// Make `start_listening` fail.
    pub fn fail_start(&self, fail: bool) {
        lock(&self.state).fail_start = fail;
    }

    /// Make `transmit` fail.
    pub fn fail_transmit(&self, fail: bool) {
        lock(&self.state).fail_transmit = fail;
    }

    /// Never report TxDone (simulates a hung transmitter).
    pub fn swallow_tx_done(&self, swallow: bool) {
        lock(&self.state).swallow_tx_done = swallow;
    }

    /// Whether the radio is in receive mode.
    pub fn is_listening(&self) -> bool {
        lock(&self.state).listening
    }

    /// Whether the radio was put to sleep.
    pub fn is_asleep(&self) -> bool {
        lock(&self.state).asleep
    }

    /// Number of successful `start_listening` calls.
    pub fn start_count(&self) -> u32 {
        lock(&self.state).starts
    }

    /// Number of RSSI readings taken.
    pub fn rssi_reads(&self) -> u32 {
        lock(&self.state).rssi_reads
    }

    /// Frames transmitted so far.
    pub fn transmitted(&self) -> Vec<SimTransmission> {
        lock(&self.state).transmitted.clone()
    }

    /// Drain the transmitted frame log.
    pub fn take_transmitted(&self) -> Vec<SimTransmission> {
        std::mem::take(&mut lock(&self.state).transmitted)
    }
}
