// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use midly::{
    live::LiveEvent,
    num::{u4, u7},
    MidiMessage,
};
use tracing::debug;

use crate::playsync::CancelHandle;

pub mod buffer;
pub mod midir;
#[cfg(test)]
pub mod mock;

pub use self::buffer::Buffer;
pub use self::midir::{list_endpoints, Client, Device, Direction, Endpoint};

/// The MIDI channel the device listens on.
pub const DEFAULT_CHANNEL: u8 = 0;

/// A decoded control change message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CcMessage {
    pub channel: u8,
    pub cc: u8,
    pub value: u8,
}

/// A lazy sequence of inbound control changes.
pub type CcStream<'a> = Box<dyn Iterator<Item = CcMessage> + Send + 'a>;

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("port {0} is not connected")]
    Disconnected(String),

    #[error("port {0} cannot send")]
    NotWritable(String),

    #[error("invalid control change (channel {channel}, cc {cc}, value {value})")]
    InvalidMessage { channel: u8, cc: u8, value: u8 },

    #[error("MIDI encode error: {0}")]
    Encode(String),

    #[error("MIDI init error: {0}")]
    Init(#[from] ::midir::InitError),

    #[error("MIDI port info error: {0}")]
    PortInfo(#[from] ::midir::PortInfoError),

    #[error("MIDI connect error: {0}")]
    Connect(String),

    #[error("MIDI send error: {0}")]
    Send(#[from] ::midir::SendError),

    #[error("no MIDI endpoint found with name {0}")]
    NotFound(String),

    #[error("found too many MIDI endpoints that match {name} ({matches}), use a less ambiguous name")]
    Ambiguous { name: String, matches: String },
}

/// The modulator bank a device is believed to have selected, as seen through one port.
/// Bank 0 means no modulator bank has been selected.
#[derive(Debug, Default)]
pub struct BankState {
    selected: AtomicU8,
}

impl BankState {
    /// Gets the selected bank.
    pub fn selected(&self) -> u8 {
        self.selected.load(Ordering::SeqCst)
    }

    /// Records that the device has switched to the given bank. Returns true if this
    /// changed the selection.
    pub fn select(&self, bank: u8) -> bool {
        let previous = self.selected.swap(bank, Ordering::SeqCst);
        if previous != bank {
            debug!(previous, bank, "Modulator bank selected.");
        }
        previous != bank
    }
}

/// A MIDI endpoint that control changes can be sent to and read from.
pub trait Port: fmt::Display + Send + Sync {
    /// Returns the name of the port.
    fn name(&self) -> &str;

    /// Sends a single control change.
    fn send_cc(&self, channel: u8, cc: u8, value: u8) -> Result<(), PortError>;

    /// Reads control changes arriving at this port. Live ports end the sequence once the
    /// cancel handle is set and no event arrived within the poll timeout.
    fn read_cc<'a>(&'a self, cancel: &'a CancelHandle, poll_timeout: Duration) -> CcStream<'a>;

    /// Returns the bank state of this port.
    fn bank(&self) -> &BankState;

    /// Returns the modulator bank selected through this port.
    fn selected_mod(&self) -> u8 {
        self.bank().selected()
    }
}

/// Encodes a control change into its 3-byte wire form.
pub fn encode_cc(channel: u8, cc: u8, value: u8) -> Result<Vec<u8>, PortError> {
    let invalid = || PortError::InvalidMessage { channel, cc, value };
    let event = LiveEvent::Midi {
        channel: u4::try_from(channel).ok_or_else(invalid)?,
        message: MidiMessage::Controller {
            controller: u7::try_from(cc).ok_or_else(invalid)?,
            value: u7::try_from(value).ok_or_else(invalid)?,
        },
    };

    let mut buf: Vec<u8> = Vec::with_capacity(3);
    event
        .write(&mut buf)
        .map_err(|e| PortError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes a single complete MIDI message, returning it only if it is a control change.
pub fn decode_cc(raw: &[u8]) -> Option<CcMessage> {
    LiveEvent::parse(raw).ok().and_then(control_change)
}

/// Returns the event as a control change, if it is one.
pub(crate) fn control_change(event: LiveEvent<'_>) -> Option<CcMessage> {
    match event {
        LiveEvent::Midi {
            channel,
            message: MidiMessage::Controller { controller, value },
        } => Some(CcMessage {
            channel: channel.as_int(),
            cc: controller.as_int(),
            value: value.as_int(),
        }),
        _ => None,
    }
}

/// Turns a channel of raw inbound events into a cancellable stream of control changes.
/// Each wait is bounded by the poll timeout, after which the cancel handle is checked.
pub(crate) fn poll_stream<'a>(
    name: &'a str,
    events: &'a Receiver<Vec<u8>>,
    cancel: &'a CancelHandle,
    poll_timeout: Duration,
) -> CcStream<'a> {
    Box::new(std::iter::from_fn(move || loop {
        match events.recv_timeout(poll_timeout) {
            Ok(raw) => match decode_cc(&raw) {
                Some(message) => return Some(message),
                None => debug!(port = name, event = ?raw, "Skipped MIDI event."),
            },
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    return None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }))
}
