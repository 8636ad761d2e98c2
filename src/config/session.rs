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
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::{catalog::Catalog, error::ConfigError};

const DEFAULT_DEVICE: &str = "Nymphes";
const DEFAULT_CLIENT_NAME: &str = "NymphesCC";
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// A YAML representation of an editing session.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Session {
    /// The endpoint to connect to. Matched as a substring of the endpoint name.
    device: Option<String>,

    /// The name this program registers with the MIDI system.
    client_name: Option<String>,

    /// An endpoint whose input is forwarded to the device.
    passthrough: Option<String>,

    /// How long the reader and writer wait before checking for shutdown.
    poll_timeout: Option<String>,

    /// How many outbound requests may be queued before callers block.
    queue_capacity: Option<usize>,

    /// The parameter catalog, relative to the session file.
    catalog: Option<String>,

    /// The directory holding the session file.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Session {
    /// Creates a session configuration for the given device using defaults otherwise.
    #[cfg(test)]
    pub fn new(device: &str, passthrough: Option<String>) -> Session {
        Session {
            device: Some(device.to_string()),
            passthrough,
            ..Default::default()
        }
    }

    /// Parse a session from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Session, ConfigError> {
        let mut session = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Session>()?;
        session.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(session)
    }

    /// Returns the device endpoint name.
    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    /// Returns the client name.
    pub fn client_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(DEFAULT_CLIENT_NAME)
    }

    /// Returns the pass-through endpoint name.
    pub fn passthrough(&self) -> Option<&str> {
        self.passthrough.as_deref()
    }

    /// Returns the poll timeout.
    pub fn poll_timeout(&self) -> Result<Duration, ConfigError> {
        match &self.poll_timeout {
            Some(poll_timeout) => Ok(DurationString::from_string(poll_timeout.clone())
                .map_err(|e| ConfigError::Duration {
                    value: poll_timeout.clone(),
                    reason: e.to_string(),
                })?
                .into()),
            None => Ok(DEFAULT_POLL_TIMEOUT),
        }
    }

    /// Returns the outbound queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .filter(|capacity| *capacity > 0)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY)
    }

    /// Returns the path of the catalog, if one is configured.
    pub fn catalog_path(&self) -> Option<PathBuf> {
        self.catalog
            .as_ref()
            .map(|catalog| self.base_dir.join(catalog))
    }

    /// Loads the configured catalog, or the bundled one if none is configured.
    pub fn catalog(&self) -> Result<Catalog, ConfigError> {
        match self.catalog_path() {
            Some(path) => Catalog::deserialize(&path),
            None => Catalog::bundled(),
        }
    }
}
