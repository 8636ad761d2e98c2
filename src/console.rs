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
use std::{fs, io, path::PathBuf, sync::Arc};

use tracing::{info, span, warn, Level};

use crate::{
    interface::{Interface, InterfaceError},
    store::{GroupId, SnapshotId, SnapshotStore},
};

const SET: &str = "set";
const GET: &str = "get";
const BANK: &str = "bank";
const SHOW: &str = "show";
const SYNC: &str = "sync";
const DUMP: &str = "dump";
const LOAD: &str = "load";
const SAVE: &str = "save";
const LIST: &str = "list";
const RECALL: &str = "recall";
const QUIT: &str = "quit";

/// A console command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Set { name: String, bank: u8, value: u8 },
    Get { name: String, bank: u8 },
    Bank(u8),
    Show { bank: u8 },
    Sync,
    Dump(PathBuf),
    Load(PathBuf),
    Save { group: String, tags: Vec<String> },
    List,
    Recall(SnapshotId),
    Quit,
}

impl Command {
    /// Parses a line of input. Returns None if the line is not a well formed command.
    pub fn parse(line: &str) -> Option<Command> {
        let mut words = line.split_whitespace();
        let command = words.next()?.to_lowercase();
        let args: Vec<&str> = words.collect();

        let command = match (command.as_str(), args.as_slice()) {
            (SET, [name, bank, value]) => Command::Set {
                name: name.to_string(),
                bank: bank.parse().ok()?,
                value: value.parse().ok()?,
            },
            (GET, [name]) => Command::Get {
                name: name.to_string(),
                bank: 0,
            },
            (GET, [name, bank]) => Command::Get {
                name: name.to_string(),
                bank: bank.parse().ok()?,
            },
            (BANK, [bank]) => Command::Bank(bank.parse().ok()?),
            (SHOW, []) => Command::Show { bank: 0 },
            (SHOW, [bank]) => Command::Show {
                bank: bank.parse().ok()?,
            },
            (SYNC, []) => Command::Sync,
            (DUMP, [path]) => Command::Dump(PathBuf::from(path)),
            (LOAD, [path]) => Command::Load(PathBuf::from(path)),
            (SAVE, [group, tags @ ..]) => Command::Save {
                group: group.to_string(),
                tags: tags.iter().map(|tag| tag.to_string()).collect(),
            },
            (LIST, []) => Command::List,
            (RECALL, [id]) => Command::Recall(id.parse().ok()?),
            (QUIT, []) => Command::Quit,
            _ => return None,
        };
        Some(command)
    }
}

#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error(transparent)]
    Interface(#[from] InterfaceError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A line oriented front end that edits a session from a terminal.
pub struct Console<S: SnapshotStore> {
    interface: Arc<Interface>,
    store: S,
}

impl<S: SnapshotStore> Console<S> {
    pub fn new(interface: Arc<Interface>, store: S) -> Console<S> {
        Console { interface, store }
    }

    /// Runs commands from the reader until it is exhausted or the user quits.
    pub fn run<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<(), io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let span = span!(Level::INFO, "console");
        let _enter = span.enter();

        info!("Console started.");
        while self.monitor_io(&mut reader, &mut writer)? {}
        info!("Console stopped.");
        Ok(())
    }

    /// Prompts for, reads and runs a single command. Returns false once there is
    /// nothing more to do.
    fn monitor_io<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}): ",
            SET, GET, BANK, SHOW, SYNC, DUMP, LOAD, SAVE, LIST, RECALL, QUIT,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }

        let Some(command) = Command::parse(&input) else {
            warn!(input = input.trim(), "Unrecognized input");
            return Ok(true);
        };
        if command == Command::Quit {
            return Ok(false);
        }

        if let Err(e) = self.execute(command, writer) {
            match e {
                CommandError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe => return Err(e),
                e => writeln!(writer, "Error: {}", e)?,
            }
        }
        Ok(true)
    }

    fn execute<W: io::Write>(&mut self, command: Command, writer: &mut W) -> Result<(), CommandError> {
        match command {
            Command::Set { name, bank, value } => {
                if !self.interface.set_value(&name, bank, value)? {
                    writeln!(writer, "{} is already {}", name, value)?;
                }
            }
            Command::Get { name, bank } => match self.interface.value(&name, bank) {
                Some(value) => writeln!(writer, "{}", self.describe(&name, value))?,
                None => writeln!(writer, "No value for {} in bank {}", name, bank)?,
            },
            Command::Bank(bank) => self.interface.select_bank(bank)?,
            Command::Show { bank } => {
                let lines = self.interface.with_register(|register| {
                    register
                        .settings()
                        .filter_map(|(name, setting)| {
                            register.value(name, bank).map(|value| {
                                format!("{} = {}", name, labelled(value, setting.label(value)))
                            })
                        })
                        .collect::<Vec<String>>()
                });
                for line in lines {
                    writeln!(writer, "- {}", line)?;
                }
            }
            Command::Sync => self.interface.resync()?,
            Command::Dump(path) => {
                let midi = self.interface.capture()?;
                fs::write(&path, &midi)?;
                writeln!(writer, "Wrote {} bytes to {}", midi.len(), path.display())?;
            }
            Command::Load(path) => {
                let midi = fs::read(&path)?;
                let changed = self.interface.restore(&midi);
                writeln!(writer, "Restored {} values", changed)?;
            }
            Command::Save { group, tags } => {
                let group = self.group_id(&group)?;
                let id = self
                    .interface
                    .save_snapshot(&mut self.store, group, &tags)?;
                writeln!(writer, "Saved snapshot {}", id)?;
            }
            Command::List => {
                let groups = self.store.list_groups().map_err(InterfaceError::from)?;
                if groups.is_empty() {
                    writeln!(writer, "No snapshots.")?;
                }
                for group in groups {
                    writeln!(writer, "{} (snapshots: {}):", group.name, group.snapshots.len())?;
                    for snapshot in group.snapshots {
                        writeln!(
                            writer,
                            "- {} [{}] ({} bytes)",
                            snapshot.id,
                            snapshot.tags.join(", "),
                            snapshot.midi.len()
                        )?;
                    }
                }
            }
            Command::Recall(id) => {
                let changed = self.interface.load_snapshot(&self.store, id)?;
                writeln!(writer, "Restored {} values", changed)?;
            }
            Command::Quit => {}
        }
        Ok(())
    }

    /// Finds the group with the given name, creating it if needed.
    fn group_id(&mut self, name: &str) -> Result<GroupId, InterfaceError> {
        let existing = self
            .store
            .list_groups()?
            .into_iter()
            .find(|group| group.name == name);
        Ok(match existing {
            Some(group) => group.id,
            None => self.store.create_group(name, None)?,
        })
    }

    fn describe(&self, name: &str, value: u8) -> String {
        self.interface.with_register(|register| {
            let label = register.setting(name).and_then(|setting| setting.label(value));
            format!("{} = {}", name, labelled(value, label))
        })
    }
}

fn labelled(value: u8, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{} ({})", value, label),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod test {
    use std::{
        error::Error,
        io::{BufReader, BufWriter},
        path::PathBuf,
        sync::Arc,
    };

    use crate::{
        interface::{Interface, Options, Ports},
        port::mock,
        store::{MemoryStore, SnapshotStore},
        testutil::register,
    };

    use super::{Command, Console};

    fn console() -> Console<MemoryStore> {
        let ports = Ports {
            device_in: Arc::new(mock::Port::get("in")),
            device_out: Arc::new(mock::Port::get("out")),
            passthrough: None,
        };
        let interface = Interface::new(register(), ports, Options::default());
        Console::new(Arc::new(interface), MemoryStore::new())
    }

    fn run(console: &mut Console<MemoryStore>, input: &str) -> Result<String, Box<dyn Error>> {
        let mut writer = BufWriter::new(Vec::new());
        console.run(BufReader::new(input.as_bytes()), &mut writer)?;
        Ok(String::from_utf8(writer.into_inner()?)?)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Some(Command::Set {
                name: "osc.pitch".to_string(),
                bank: 2,
                value: 64
            }),
            Command::parse("set osc.pitch 2 64\n")
        );
        assert_eq!(
            Some(Command::Get {
                name: "filter.cutoff".to_string(),
                bank: 0
            }),
            Command::parse("GET filter.cutoff")
        );
        assert_eq!(Some(Command::Bank(1)), Command::parse("bank 1"));
        assert_eq!(Some(Command::Show { bank: 3 }), Command::parse("show 3"));
        assert_eq!(Some(Command::Sync), Command::parse("sync"));
        assert_eq!(
            Some(Command::Dump(PathBuf::from("/tmp/patch.mid"))),
            Command::parse("dump /tmp/patch.mid")
        );
        assert_eq!(
            Some(Command::Save {
                group: "pads".to_string(),
                tags: vec!["warm".to_string(), "slow".to_string()]
            }),
            Command::parse("save pads warm slow")
        );
        assert_eq!(Some(Command::List), Command::parse("list"));
        assert_eq!(Some(Command::Recall(4)), Command::parse("recall 4"));
        assert_eq!(Some(Command::Quit), Command::parse(" quit "));

        assert_eq!(None, Command::parse(""));
        assert_eq!(None, Command::parse("unrecognized"));
        assert_eq!(None, Command::parse("set osc.pitch 2"));
        assert_eq!(None, Command::parse("set osc.pitch 2 300"));
        assert_eq!(None, Command::parse("bank one"));
    }

    #[test]
    fn test_edit_session() -> Result<(), Box<dyn Error>> {
        let mut console = console();
        let output = run(
            &mut console,
            "set osc.wave 0 3\nget osc.wave\nset osc.wave 0 3\nset osc.wave 0 9\nquit\nget osc.wave\n",
        )?;

        assert!(output.contains("osc.wave = 3 (Pulse)"));
        assert!(output.contains("osc.wave is already 3"));
        assert!(output.contains("Error: osc.wave: value 9 is outside 0..=3"));
        assert_eq!(Some(3), console.interface.value("osc.wave", 0));
        Ok(())
    }

    #[test]
    fn test_snapshots() -> Result<(), Box<dyn Error>> {
        let mut console = console();
        let output = run(
            &mut console,
            "set filter.cutoff 0 80\nsave bright tag\nset filter.cutoff 0 10\nsave bright\nlist\nrecall 2\n",
        )?;

        assert!(output.contains("Saved snapshot 2"));
        assert!(output.contains("bright (snapshots: 2):"));
        assert_eq!(1, console.store.list_groups()?.len());
        assert_eq!(Some(80), console.interface.value("filter.cutoff", 0));

        let output = run(&mut console, "recall 99\n")?;
        assert!(output.contains("Error: no snapshot with id 99"));
        Ok(())
    }

    #[test]
    fn test_dump_and_load() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("patch.mid");

        let mut source = console();
        run(
            &mut source,
            &format!("set osc.pitch 1 99\ndump {}\n", path.display()),
        )?;

        let mut target = console();
        let output = run(&mut target, &format!("load {}\nshow 1\n", path.display()))?;
        assert!(output.contains("- osc.pitch = 99"));
        assert_eq!(Some(99), target.interface.value("osc.pitch", 1));
        Ok(())
    }
}
