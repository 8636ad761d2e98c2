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
use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::playsync::CancelHandle;

use super::{poll_stream, BankState, CcMessage, CcStream, PortError};

/// A mock device port. Records what is sent and replays events fed to it, behaving like
/// a live input otherwise.
pub struct Port {
    name: String,
    sent: Mutex<Vec<CcMessage>>,
    fail_sends: AtomicBool,
    failed: AtomicUsize,
    events_tx: Sender<Vec<u8>>,
    events_rx: Receiver<Vec<u8>>,
    bank: BankState,
}

impl Port {
    /// Gets the given mock port.
    pub fn get(name: &str) -> Port {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Port {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            failed: AtomicUsize::new(0),
            events_tx,
            events_rx,
            bank: BankState::default(),
        }
    }

    /// Feeds a raw event to anyone reading the port.
    pub fn mock_event(&self, event: &[u8]) {
        self.events_tx
            .send(event.to_vec())
            .expect("error sending mock event");
    }

    /// Gets every control change sent so far.
    pub fn sent(&self) -> Vec<CcMessage> {
        self.sent.lock().clone()
    }

    /// Makes every send fail as if the port were disconnected, or stops doing so.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Gets the number of sends that failed.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Forgets the control changes sent so far.
    pub fn reset_sent(&self) {
        self.sent.lock().clear();
    }
}

impl super::Port for Port {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_cc(&self, channel: u8, cc: u8, value: u8) -> Result<(), PortError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(PortError::Disconnected(self.name.clone()));
        }
        self.sent.lock().push(CcMessage { channel, cc, value });
        Ok(())
    }

    fn read_cc<'a>(&'a self, cancel: &'a CancelHandle, poll_timeout: Duration) -> CcStream<'a> {
        poll_stream(&self.name, &self.events_rx, cancel, poll_timeout)
    }

    fn bank(&self) -> &BankState {
        &self.bank
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
