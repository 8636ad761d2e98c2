// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
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
use std::{fmt, time::Duration};

use midly::stream::{DefaultBuffer, MidiStream};
use parking_lot::Mutex;

use crate::playsync::CancelHandle;

use super::{control_change, encode_cc, BankState, CcMessage, CcStream, PortError};

/// An in-memory port. Sent control changes are appended to a byte buffer, and reading
/// replays every control change in the buffer. Used to capture and restore snapshots.
pub struct Buffer {
    name: String,
    bytes: Mutex<Vec<u8>>,
    bank: BankState,
}

impl Buffer {
    /// Creates an empty buffer port.
    pub fn new(name: &str) -> Buffer {
        Buffer::from_bytes(name, Vec::new())
    }

    /// Creates a buffer port holding the given bytes.
    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Buffer {
        Buffer {
            name: name.to_string(),
            bytes: Mutex::new(bytes),
            bank: BankState::default(),
        }
    }

    /// Returns a copy of the bytes written so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Consumes the port, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes.into_inner()
    }
}

impl super::Port for Buffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_cc(&self, channel: u8, cc: u8, value: u8) -> Result<(), PortError> {
        let encoded = encode_cc(channel, cc, value)?;
        self.bytes.lock().extend_from_slice(&encoded);
        Ok(())
    }

    /// Replays the buffer as it is at the time of the call. Buffers never block, so the
    /// cancel handle and poll timeout are unused.
    fn read_cc<'a>(&'a self, _cancel: &'a CancelHandle, _poll_timeout: Duration) -> CcStream<'a> {
        Box::new(decode_stream(&self.bytes.lock()).into_iter())
    }

    fn bank(&self) -> &BankState {
        &self.bank
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Buffer, {} bytes)", self.name, self.bytes.lock().len())
    }
}

/// Decodes every control change in a raw MIDI byte stream. Other channel messages,
/// system common messages, SysEx and stray data bytes are skipped. Running status is
/// honoured for channel messages, and a message cut short at the end is dropped.
pub fn decode_stream(bytes: &[u8]) -> Vec<CcMessage> {
    let mut messages = Vec::new();
    let mut stream = MidiStream::<DefaultBuffer>::default();
    stream.feed(bytes, |event| messages.extend(control_change(event)));
    messages
}
