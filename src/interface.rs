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
    mem,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, span, warn, Level};

use crate::{
    playsync::CancelHandle,
    port::{Buffer, CcStream, Port},
    register::{Outcome, Register, RegisterError},
    store::{GroupId, SnapshotId, SnapshotStore, StoreError},
};

/// Work for the writer. Requests are carried out strictly in the order they were queued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Send a value to the device.
    Write { name: String, bank: u8, value: u8 },
    /// Make the device select a modulator bank.
    SelectBank(u8),
    /// Send every stored value to the device.
    Resync,
}

/// A value that arrived from the device, for the user interface to display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub name: String,
    pub bank: u8,
    pub value: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("the session has stopped")]
    Stopped,
}

/// The ports a session talks through.
#[derive(Clone)]
pub struct Ports {
    /// Where the device reports its own changes.
    pub device_in: Arc<dyn Port>,
    /// Where values are sent to the device.
    pub device_out: Arc<dyn Port>,
    /// An optional extra input, e.g. a keyboard, forwarded verbatim to the device.
    pub passthrough: Option<Arc<dyn Port>>,
}

/// Tunables of a session.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// The longest any flow waits before checking for shutdown.
    pub poll_timeout: Duration,
    /// How many requests may be queued before callers block.
    pub queue_capacity: usize,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            poll_timeout: Duration::from_millis(100),
            queue_capacity: 64,
        }
    }
}

/// An editing session. The interface owns the register and runs a writer flow, which
/// sends queued requests to the device, and reader flows, which feed what the device
/// reports back into the register and out to the user interface as changes.
///
/// All register access, and every port write that depends on bank state, happens while
/// holding the register lock, so a bank select and the write that needs it are never
/// split by another write.
pub struct Interface {
    register: Arc<Mutex<Register>>,
    ports: Ports,
    requests_tx: Sender<Request>,
    requests_rx: Receiver<Request>,
    changes_tx: Sender<Change>,
    changes_rx: Receiver<Change>,
    cancel: CancelHandle,
    poll_timeout: Duration,
    flows: Mutex<Vec<JoinHandle<()>>>,
}

impl Interface {
    /// Creates a session. Nothing is read or written until `start` is called.
    pub fn new(register: Register, ports: Ports, options: Options) -> Interface {
        let (requests_tx, requests_rx) = crossbeam_channel::bounded(options.queue_capacity.max(1));
        let (changes_tx, changes_rx) = crossbeam_channel::unbounded();
        Interface {
            register: Arc::new(Mutex::new(register)),
            ports,
            requests_tx,
            requests_rx,
            changes_tx,
            changes_rx,
            cancel: CancelHandle::new(),
            poll_timeout: options.poll_timeout,
            flows: Mutex::new(Vec::new()),
        }
    }

    /// Starts the writer and reader flows.
    pub fn start(&self) {
        let mut flows = self.flows.lock();
        if !flows.is_empty() {
            warn!("Session already started.");
            return;
        }

        flows.push({
            let register = self.register.clone();
            let device_out = self.ports.device_out.clone();
            let requests = self.requests_rx.clone();
            let cancel = self.cancel.clone();
            let poll_timeout = self.poll_timeout;
            thread::spawn(move || write_flow(register, device_out, requests, cancel, poll_timeout))
        });

        let mut sources = vec![(self.ports.device_in.clone(), false)];
        if let Some(passthrough) = &self.ports.passthrough {
            sources.push((passthrough.clone(), true));
        }
        for (source, forward) in sources {
            let register = self.register.clone();
            let device_out = self.ports.device_out.clone();
            let changes = self.changes_tx.clone();
            let cancel = self.cancel.clone();
            let poll_timeout = self.poll_timeout;
            flows.push(thread::spawn(move || {
                read_flow(register, source, device_out, forward, changes, cancel, poll_timeout)
            }));
        }

        info!(flows = flows.len(), "Session started.");
    }

    /// Stops every flow and waits for them to finish. Each flow notices within one poll
    /// timeout.
    pub fn stop(&self) {
        self.cancel.cancel();
        let flows = mem::take(&mut *self.flows.lock());
        if flows.is_empty() {
            return;
        }
        for flow in flows {
            if flow.join().is_err() {
                error!("Session flow panicked.");
            }
        }
        info!("Session stopped.");
    }

    /// Records a value from the user and, if it changed, queues it for the device.
    /// Blocks while the queue is full. Returns true if the value changed.
    ///
    /// The value is stored before it reaches the wire. If the write fails, e.g. because
    /// the device is disconnected, setting the same value again is a no-op; `resync`
    /// sends it once the device is back.
    pub fn set_value(&self, name: &str, bank: u8, value: u8) -> Result<bool, InterfaceError> {
        if self.cancel.is_cancelled() {
            return Err(InterfaceError::Stopped);
        }

        let changed = self.register.lock().update_from_gui(name, bank, value)?;
        if changed {
            self.enqueue(Request::Write {
                name: name.to_string(),
                bank,
                value,
            })?;
        }
        Ok(changed)
    }

    /// Queues a bank selection for the device.
    pub fn select_bank(&self, bank: u8) -> Result<(), InterfaceError> {
        if usize::from(bank) > self.register.lock().modulators().len() {
            return Err(RegisterError::UnknownBank(bank).into());
        }
        self.enqueue(Request::SelectBank(bank))
    }

    /// Queues a full resynchronization of the device.
    pub fn resync(&self) -> Result<(), InterfaceError> {
        self.enqueue(Request::Resync)
    }

    /// Changes reported by the device. Every clone of the receiver competes for the same
    /// changes, so the user interface should hold a single one.
    pub fn changes(&self) -> Receiver<Change> {
        self.changes_rx.clone()
    }

    /// Gets a stored value.
    pub fn value(&self, name: &str, bank: u8) -> Option<u8> {
        self.register.lock().value(name, bank)
    }

    /// Runs a function against the register while holding its lock.
    pub fn with_register<R>(&self, f: impl FnOnce(&Register) -> R) -> R {
        f(&self.register.lock())
    }

    /// Serializes every stored value, all banks, into MIDI bytes.
    pub fn capture(&self) -> Result<Vec<u8>, InterfaceError> {
        let buffer = Buffer::new("capture");
        self.register.lock().send_all(&buffer)?;
        Ok(buffer.into_bytes())
    }

    /// Replays captured MIDI bytes as if they came from the device, forwarding each
    /// message to the device. Returns the number of changed values.
    pub fn restore(&self, midi: &[u8]) -> usize {
        let span = span!(Level::INFO, "restore", bytes = midi.len());
        let _enter = span.enter();

        let buffer = Buffer::from_bytes("restore", midi.to_vec());
        let changed = pump(
            &self.register,
            &buffer,
            self.ports.device_out.as_ref(),
            true,
            buffer.read_cc(&self.cancel, self.poll_timeout),
            &self.changes_tx,
        );
        info!(changed, "Snapshot restored.");
        changed
    }

    /// Captures the current state into the store.
    pub fn save_snapshot(
        &self,
        store: &mut dyn SnapshotStore,
        group: GroupId,
        tags: &[String],
    ) -> Result<SnapshotId, InterfaceError> {
        let midi = self.capture()?;
        Ok(store.create_snapshot(group, &midi, tags)?)
    }

    /// Restores a snapshot from the store.
    pub fn load_snapshot(
        &self,
        store: &dyn SnapshotStore,
        id: SnapshotId,
    ) -> Result<usize, InterfaceError> {
        let snapshot = store.fetch_snapshot(id)?;
        Ok(self.restore(&snapshot.midi))
    }

    /// Queues a request, blocking while the queue is full.
    fn enqueue(&self, request: Request) -> Result<(), InterfaceError> {
        let mut request = request;
        loop {
            match self.requests_tx.send_timeout(request, self.poll_timeout) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(pending)) => {
                    if self.cancel.is_cancelled() {
                        return Err(InterfaceError::Stopped);
                    }
                    debug!("Outbound queue is full.");
                    request = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(InterfaceError::Stopped),
            }
        }
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sends queued requests to the device until cancelled.
fn write_flow(
    register: Arc<Mutex<Register>>,
    device_out: Arc<dyn Port>,
    requests: Receiver<Request>,
    cancel: CancelHandle,
    poll_timeout: Duration,
) {
    let span = span!(Level::INFO, "writer", port = device_out.name());
    let _enter = span.enter();

    info!("Writer started.");
    loop {
        let request = match requests.recv_timeout(poll_timeout) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let register = register.lock();
        let result = match &request {
            Request::Write { name, bank, value } => {
                register.resolve_outbound(device_out.as_ref(), name, *bank, *value)
            }
            Request::SelectBank(bank) => register.select_bank(device_out.as_ref(), *bank),
            Request::Resync => register.send_all(device_out.as_ref()),
        };
        if let Err(e) = result {
            error!(
                request = format!("{:?}", request),
                err = e.to_string(),
                "Error writing to device."
            );
        }
    }
    info!("Writer stopped.");
}

/// Feeds a port's messages into the register until its stream ends.
fn read_flow(
    register: Arc<Mutex<Register>>,
    source: Arc<dyn Port>,
    device_out: Arc<dyn Port>,
    forward: bool,
    changes: Sender<Change>,
    cancel: CancelHandle,
    poll_timeout: Duration,
) {
    let span = span!(Level::INFO, "reader", port = source.name());
    let _enter = span.enter();

    info!(forwarding = forward, "Reader started.");
    let changed = pump(
        &register,
        source.as_ref(),
        device_out.as_ref(),
        forward,
        source.read_cc(&cancel, poll_timeout),
        &changes,
    );
    info!(changed, "Reader stopped.");
}

/// Ingests every message of the stream, forwarding it verbatim to the device if asked
/// to, and reports changed values. Bank selections seen on the source also move the
/// device port's bank state, since both describe the same hardware. Returns the number
/// of changed values.
fn pump(
    register: &Mutex<Register>,
    source: &dyn Port,
    device_out: &dyn Port,
    forward: bool,
    messages: CcStream<'_>,
    changes: &Sender<Change>,
) -> usize {
    let mut changed = 0;
    for message in messages {
        let outcome = {
            let mut register = register.lock();
            let outcome = register.ingest_inbound(source, message.cc, message.value);
            if forward {
                match device_out.send_cc(message.channel, message.cc, message.value) {
                    Ok(()) => register.track_outbound(device_out, message.cc, message.value),
                    Err(e) => warn!(
                        port = device_out.name(),
                        err = e.to_string(),
                        "Error forwarding CC."
                    ),
                }
            } else if let Outcome::BankSelected { .. } = outcome {
                register.track_outbound(device_out, message.cc, message.value);
            }
            outcome
        };

        match outcome {
            Outcome::Changed { bank, name, value } => {
                changed += 1;
                if changes.send(Change { name, bank, value }).is_err() {
                    debug!("Nobody is listening for changes.");
                }
            }
            Outcome::BankSelected { bank } => debug!(port = source.name(), bank, "Bank selected."),
            Outcome::Unknown { cc } => debug!(port = source.name(), cc, "Dropped unknown CC."),
            Outcome::Unattributed { cc, bank } => {
                debug!(port = source.name(), cc, bank, "Dropped unattributed CC.")
            }
        }
    }
    changed
}
