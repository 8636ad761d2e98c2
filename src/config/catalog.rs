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
use std::{collections::HashSet, path::Path};

use config::{Config, File, FileFormat};
use serde::Deserialize;

use super::error::ConfigError;

/// The catalog compiled into the binary, used when no catalog path is configured.
const BUNDLED_CATALOG: &str = include_str!("../../assets/catalog.yaml");

/// The qualified name of the setting that selects the active modulator bank. Its labels
/// name the modulator banks.
pub const SELECTOR: &str = "modulators.selector";

/// The largest value a 7-bit MIDI data byte can carry.
const MAX_DATA_BYTE: u8 = 127;

/// Lower and upper bounds of a setting, both inclusive.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub lower: u8,
    pub upper: u8,
}

impl Bounds {
    /// Returns true if the value lies within the bounds.
    pub fn contains(&self, value: u8) -> bool {
        (self.lower..=self.upper).contains(&value)
    }
}

/// A known value of a setting with a description.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Tic {
    pub value: u8,
    pub label: String,
}

/// A YAML representation of a single synthesizer parameter.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Setting {
    /// The name of the setting, unique within its group.
    name: String,
    /// Human readable name.
    long: String,
    /// The baseline MIDI CC address.
    cc: u8,
    /// The range of values the setting accepts.
    bounds: Bounds,
    /// An optional longer description.
    description: Option<String>,
    /// The MIDI CC address of this setting inside a modulator bank.
    #[serde(rename = "mod")]
    mod_cc: Option<u8>,
    /// Known values with descriptions.
    tics: Option<Vec<Tic>>,
    /// Aliases for every value in the bounds interval.
    labels: Option<Vec<String>>,
}

impl Setting {
    /// Gets the name of the setting.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the human readable name of the setting.
    pub fn long(&self) -> &str {
        &self.long
    }

    /// Gets the baseline CC address.
    pub fn cc(&self) -> u8 {
        self.cc
    }

    /// Gets the bounds of the setting.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Gets the description of the setting.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Gets the CC address used inside a modulator bank, if the setting is modulatable.
    pub fn mod_cc(&self) -> Option<u8> {
        self.mod_cc
    }

    /// Gets the known values of the setting.
    pub fn tics(&self) -> &[Tic] {
        self.tics.as_deref().unwrap_or_default()
    }

    /// Gets the enumeration labels of the setting.
    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    /// Returns true if the setting spans the full 7-bit range.
    pub fn is_scale(&self) -> bool {
        self.bounds.lower == 0 && self.bounds.upper == MAX_DATA_BYTE
    }

    /// Returns true if the setting is an enumeration.
    pub fn is_enum(&self) -> bool {
        self.labels.is_some()
    }

    /// Gets the label for the given value: its enumeration label, or else the label of a
    /// tic at exactly that value.
    pub fn label(&self, value: u8) -> Option<&str> {
        if !self.bounds.contains(value) {
            return None;
        }
        match &self.labels {
            Some(labels) => labels
                .get(usize::from(value - self.bounds.lower))
                .map(String::as_str),
            None => self
                .tics()
                .iter()
                .find(|tic| tic.value == value)
                .map(|tic| tic.label.as_str()),
        }
    }

    /// Checks the bounds and label invariants. `qualified` is only used for reporting.
    pub fn validate(&self, qualified: &str) -> Result<(), ConfigError> {
        for (field, value) in [
            ("cc", Some(self.cc)),
            ("mod", self.mod_cc),
            ("upper bound", Some(self.bounds.upper)),
        ] {
            if let Some(value) = value.filter(|value| *value > MAX_DATA_BYTE) {
                return Err(ConfigError::OutOfRange {
                    setting: qualified.to_string(),
                    field,
                    value,
                });
            }
        }

        if self.bounds.lower >= self.bounds.upper {
            return Err(ConfigError::IllegalBounds {
                setting: qualified.to_string(),
                lower: self.bounds.lower,
                upper: self.bounds.upper,
            });
        }

        if let Some(labels) = &self.labels {
            let expected = usize::from(self.bounds.upper - self.bounds.lower) + 1;
            if labels.len() != expected {
                return Err(ConfigError::LabelCount {
                    setting: qualified.to_string(),
                    expected,
                    found: labels.len(),
                });
            }
        }

        Ok(())
    }
}

/// A YAML representation of a group of settings.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Group {
    name: String,
    long: String,
    description: Option<String>,
    settings: Vec<Setting>,
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn long(&self) -> &str {
        &self.long
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    /// The settings that span the full 7-bit range.
    pub fn scales(&self) -> Vec<&Setting> {
        self.settings.iter().filter(|s| s.is_scale()).collect()
    }

    /// The settings that are enumerations.
    pub fn enums(&self) -> Vec<&Setting> {
        self.settings.iter().filter(|s| s.is_enum()).collect()
    }
}

/// The catalog of all parameters the device understands.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Catalog {
    groups: Vec<Group>,
}

impl Catalog {
    /// Parse and validate a catalog from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Catalog, ConfigError> {
        Self::validated(
            Config::builder()
                .add_source(File::from(path))
                .build()?
                .try_deserialize::<Catalog>()?,
        )
    }

    /// Parse and validate a catalog from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Catalog, ConfigError> {
        Self::validated(
            Config::builder()
                .add_source(File::from_str(yaml, FileFormat::Yaml))
                .build()?
                .try_deserialize::<Catalog>()?,
        )
    }

    /// The catalog bundled with the binary.
    pub fn bundled() -> Result<Catalog, ConfigError> {
        Self::from_yaml(BUNDLED_CATALOG)
    }

    fn validated(catalog: Catalog) -> Result<Catalog, ConfigError> {
        catalog.validate()?;
        Ok(catalog)
    }

    /// Validates every setting and checks that qualified names are unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (qualified, setting) in self.settings() {
            setting.validate(&qualified)?;
            if !seen.insert(qualified.clone()) {
                return Err(ConfigError::DuplicateSetting(qualified));
            }
        }
        Ok(())
    }

    /// Gets the groups in catalog order.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Gets the group with the given name.
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.name == name)
    }

    /// All settings with their qualified "group.name" names, in catalog order.
    pub fn settings(&self) -> impl Iterator<Item = (String, &Setting)> {
        self.groups.iter().flat_map(|group| {
            group
                .settings
                .iter()
                .map(move |setting| (format!("{}.{}", group.name, setting.name), setting))
        })
    }

    /// The labels of the modulator banks, bank 1 first.
    pub fn modulators(&self) -> Option<&[String]> {
        self.settings()
            .find(|(qualified, _)| qualified == SELECTOR)
            .and_then(|(_, setting)| setting.labels())
    }
}
