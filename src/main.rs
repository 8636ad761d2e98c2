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
use std::error::Error;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use nymphes_cc::config::{Catalog, Session};
use nymphes_cc::console::Console;
use nymphes_cc::interface::{Interface, Options, Ports};
use nymphes_cc::playsync::CancelHandle;
use nymphes_cc::port::{self, Buffer, Client, Device, Direction, Port};
use nymphes_cc::register::{Outcome, Register};
use nymphes_cc::store::MemoryStore;
use tracing::info;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A MIDI CC editor for the Dreadbox Nymphes."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available MIDI input/output devices.
    MidiDevices {},
    /// Lists the settings of a catalog.
    Settings {
        /// The path to the catalog. The bundled catalog is used if omitted.
        catalog: Option<String>,
    },
    /// Prints the values stored in a snapshot file.
    Decode {
        /// The path to the snapshot file.
        path: String,
        /// The path to the catalog. The bundled catalog is used if omitted.
        #[arg[short, long]]
        catalog: Option<String>,
    },
    /// Start will start an editing session on the console.
    Start {
        /// The path to the session config.
        session_path: String,
    },
}

fn load_catalog(path: Option<String>) -> Result<Catalog, Box<dyn Error>> {
    Ok(match path {
        Some(path) => Catalog::deserialize(&PathBuf::from(path))?,
        None => Catalog::bundled()?,
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MidiDevices {} => {
            let endpoints = port::list_endpoints(&Client::new("NymphesCC"))?;

            if endpoints.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for endpoint in endpoints {
                println!("- {}", endpoint);
            }
        }
        Commands::Settings { catalog } => {
            let catalog = load_catalog(catalog)?;
            for group in catalog.groups() {
                match group.description() {
                    Some(description) => {
                        println!("{} ({}): {}", group.name(), group.long(), description)
                    }
                    None => println!("{} ({}):", group.name(), group.long()),
                }
                for setting in group.settings() {
                    let bounds = setting.bounds();
                    let mod_cc = setting
                        .mod_cc()
                        .map(|mod_cc| format!(", mod {}", mod_cc))
                        .unwrap_or_default();
                    println!(
                        "- {}.{} ({}): cc {}{}, {}..={}",
                        group.name(),
                        setting.name(),
                        setting.long(),
                        setting.cc(),
                        mod_cc,
                        bounds.lower,
                        bounds.upper
                    );
                }
            }
        }
        Commands::Decode { path, catalog } => {
            let mut register = Register::new(&load_catalog(catalog)?)?;
            let buffer = Buffer::from_bytes(&path, fs::read(&path)?);
            let cancel = CancelHandle::new();

            println!("Values in {}:", path);
            for message in buffer.read_cc(&cancel, Duration::ZERO) {
                match register.ingest_inbound(&buffer, message.cc, message.value) {
                    Outcome::Changed { bank, name, value } => {
                        let label = register
                            .setting(&name)
                            .and_then(|setting| setting.label(value))
                            .map(|label| format!(" ({})", label))
                            .unwrap_or_default();
                        println!("- [{}] {} = {}{}", bank, name, value, label);
                    }
                    Outcome::BankSelected { .. } => {}
                    Outcome::Unknown { cc } => {
                        println!("- unknown cc {} = {}", cc, message.value)
                    }
                    Outcome::Unattributed { cc, bank } => {
                        println!("- unattributed cc {} in bank {}", cc, bank)
                    }
                }
            }
        }
        Commands::Start { session_path } => {
            let session = Session::deserialize(&PathBuf::from(&session_path))?;
            let register = Register::new(&session.catalog()?)?;
            let options = Options {
                poll_timeout: session.poll_timeout()?,
                queue_capacity: session.queue_capacity(),
            };

            let client = Arc::new(Client::new(session.client_name()));
            let device_in = Arc::new(Device::new(
                client.clone(),
                &format!("{} in", client.name()),
                Direction::In,
                session.device(),
            ));
            let device_out = Arc::new(Device::new(
                client.clone(),
                &format!("{} out", client.name()),
                Direction::Out,
                session.device(),
            ));
            device_in.auto_connect();
            device_out.auto_connect();

            let passthrough: Option<Arc<dyn Port>> = match session.passthrough() {
                Some(target) => {
                    let passthrough = Arc::new(Device::new(
                        client.clone(),
                        &format!("{} thru", client.name()),
                        Direction::In,
                        target,
                    ));
                    passthrough.auto_connect();
                    Some(passthrough as Arc<dyn Port>)
                }
                None => None,
            };

            let interface = Arc::new(Interface::new(
                register,
                Ports {
                    device_in,
                    device_out,
                    passthrough,
                },
                options,
            ));
            interface.start();

            let changes = interface.changes();
            thread::spawn(move || {
                for change in changes {
                    info!(
                        name = change.name,
                        bank = change.bank,
                        value = change.value,
                        "Device changed value."
                    );
                }
            });

            Console::new(interface.clone(), MemoryStore::new())
                .run(io::stdin().lock(), io::stdout())?;
            interface.stop();
        }
    }

    Ok(())
}
