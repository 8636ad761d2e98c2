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
use std::{collections::BTreeMap, fmt, mem, sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, Sender};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection, PortInfoError};
use parking_lot::Mutex;
use tracing::{debug, error, info, span, warn, Level};

use crate::playsync::CancelHandle;

use super::{encode_cc, poll_stream, BankState, CcStream, PortError};

/// The connection context shared by every device port of a session. Each port opens
/// its own midir handle through it under the client's name.
#[derive(Clone, Debug)]
pub struct Client {
    name: String,
}

impl Client {
    /// Creates a new client with the given name.
    pub fn new(name: &str) -> Client {
        Client {
            name: name.to_string(),
        }
    }

    /// Returns the name of the client.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn input(&self, purpose: &str) -> Result<MidiInput, PortError> {
        Ok(MidiInput::new(&format!("{} {}", self.name, purpose))?)
    }

    fn output(&self, purpose: &str) -> Result<MidiOutput, PortError> {
        Ok(MidiOutput::new(&format!("{} {}", self.name, purpose))?)
    }
}

/// Which way a device port carries messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Messages arrive from the endpoint.
    In,
    /// Messages are sent to the endpoint.
    Out,
}

/// An endpoint visible to the MIDI system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub input: bool,
    pub output: bool,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut capabilities: Vec<String> = Vec::new();
        if self.input {
            capabilities.push(String::from("Input"));
        }
        if self.output {
            capabilities.push(String::from("Output"));
        }

        write!(f, "{} ({})", self.name, capabilities.join("/"))
    }
}

/// Lists the endpoints currently visible, sorted by name.
pub fn list_endpoints(client: &Client) -> Result<Vec<Endpoint>, PortError> {
    let input = client.input("input listing")?;
    let output = client.output("output listing")?;

    let mut endpoints: BTreeMap<String, Endpoint> = BTreeMap::new();
    for port in input.ports() {
        let name = input.port_name(&port)?;
        endpoints
            .entry(name.clone())
            .or_insert_with(|| Endpoint {
                name,
                input: false,
                output: false,
            })
            .input = true;
    }
    for port in output.ports() {
        let name = output.port_name(&port)?;
        endpoints
            .entry(name.clone())
            .or_insert_with(|| Endpoint {
                name,
                input: false,
                output: false,
            })
            .output = true;
    }

    Ok(endpoints.into_values().collect())
}

/// Picks the single port whose name contains `target`.
fn find_port<P>(
    ports: Vec<P>,
    port_name: impl Fn(&P) -> Result<String, PortInfoError>,
    target: &str,
) -> Result<P, PortError> {
    let mut matches: Vec<(String, P)> = Vec::new();
    for port in ports {
        let name = port_name(&port)?;
        if name.contains(target) {
            matches.push((name, port));
        }
    }

    if matches.len() > 1 {
        return Err(PortError::Ambiguous {
            name: target.to_string(),
            matches: matches
                .iter()
                .map(|(name, _)| name.clone())
                .collect::<Vec<String>>()
                .join(", "),
        });
    }

    match matches.pop() {
        Some((_, port)) => Ok(port),
        None => Err(PortError::NotFound(target.to_string())),
    }
}

/// A live MIDI port. Input ports queue every event midir delivers; output ports send
/// each control change as soon as it is given.
pub struct Device {
    /// The name of this port, as registered with the MIDI system.
    name: String,
    client: Arc<Client>,
    direction: Direction,
    /// The endpoint name to look for when connecting.
    target: String,
    input_connection: Mutex<Option<MidiInputConnection<()>>>,
    output_connection: Mutex<Option<MidiOutputConnection>>,
    events_tx: Sender<Vec<u8>>,
    events_rx: Receiver<Vec<u8>>,
    bank: BankState,
}

impl Device {
    /// Creates an unconnected device port.
    pub fn new(client: Arc<Client>, name: &str, direction: Direction, target: &str) -> Device {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Device {
            name: name.to_string(),
            client,
            direction,
            target: target.to_string(),
            input_connection: Mutex::new(None),
            output_connection: Mutex::new(None),
            events_tx,
            events_rx,
            bank: BankState::default(),
        }
    }

    /// Returns the direction of the port.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns true if the port is connected to an endpoint.
    pub fn is_connected(&self) -> bool {
        match self.direction {
            Direction::In => self.input_connection.lock().is_some(),
            Direction::Out => self.output_connection.lock().is_some(),
        }
    }

    /// Connects to the target endpoint. Replaces any existing connection.
    pub fn connect(&self) -> Result<(), PortError> {
        let span = span!(Level::INFO, "connect (midir)");
        let _enter = span.enter();

        match self.direction {
            Direction::In => {
                let input = self.client.input(&self.name)?;
                let port = find_port(input.ports(), |port| input.port_name(port), &self.target)?;
                let events_tx = self.events_tx.clone();
                let port_name = self.name.clone();
                let connection = input
                    .connect(
                        &port,
                        &self.name,
                        move |_, raw_event, _| {
                            if let Err(e) = events_tx.send(Vec::from(raw_event)) {
                                error!(
                                    port = port_name,
                                    err = e.to_string(),
                                    "Error queueing MIDI event."
                                );
                            }
                        },
                        (),
                    )
                    .map_err(|e| PortError::Connect(e.to_string()))?;
                *self.input_connection.lock() = Some(connection);
            }
            Direction::Out => {
                let output = self.client.output(&self.name)?;
                let port =
                    find_port(output.ports(), |port| output.port_name(port), &self.target)?;
                let connection = output
                    .connect(&port, &self.name)
                    .map_err(|e| PortError::Connect(e.to_string()))?;
                *self.output_connection.lock() = Some(connection);
            }
        }

        info!(port = self.name, target = self.target, "Connected.");
        Ok(())
    }

    /// Best-effort connection to the target endpoint. Failure is logged and leaves the
    /// port unconnected; it is not retried.
    pub fn auto_connect(&self) -> bool {
        match self.connect() {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    port = self.name,
                    target = self.target,
                    err = e.to_string(),
                    "Could not auto-connect."
                );
                false
            }
        }
    }

    /// Drops the connection, if any.
    pub fn disconnect(&self) {
        mem::drop(self.input_connection.lock().take());
        mem::drop(self.output_connection.lock().take());
    }
}

impl super::Port for Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_cc(&self, channel: u8, cc: u8, value: u8) -> Result<(), PortError> {
        if self.direction != Direction::Out {
            return Err(PortError::NotWritable(self.name.clone()));
        }

        let buf = encode_cc(channel, cc, value)?;
        let mut connection = self.output_connection.lock();
        match connection.as_mut() {
            Some(connection) => {
                debug!(port = self.name, channel, cc, value, "Sending CC.");
                connection.send(&buf)?;
                Ok(())
            }
            None => Err(PortError::Disconnected(self.name.clone())),
        }
    }

    fn read_cc<'a>(&'a self, cancel: &'a CancelHandle, poll_timeout: Duration) -> CcStream<'a> {
        poll_stream(&self.name, &self.events_rx, cancel, poll_timeout)
    }

    fn bank(&self) -> &BankState {
        &self.bank
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_connected() {
            "connected"
        } else {
            "disconnected"
        };
        let direction = match self.direction {
            Direction::In => "Input",
            Direction::Out => "Output",
        };
        write!(f, "{} ({} from {}, {})", self.name, direction, self.target, state)
    }
}
