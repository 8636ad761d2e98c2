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

/// Typed error for catalog and session config failures. Every variant is fatal at
/// startup: a catalog is either loaded whole or not at all.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{setting}: illegal bounds {lower}..{upper}")]
    IllegalBounds {
        setting: String,
        lower: u8,
        upper: u8,
    },

    #[error("{setting}: wrong number of labels (expected {expected}, found {found})")]
    LabelCount {
        setting: String,
        expected: usize,
        found: usize,
    },

    #[error("{setting}: {field} {value} does not fit in 7 bits")]
    OutOfRange {
        setting: String,
        field: &'static str,
        value: u8,
    },

    #[error("duplicate setting {0}")]
    DuplicateSetting(String),

    #[error("CC {cc} is claimed by both {first} and {second}")]
    CcCollision {
        cc: u8,
        first: String,
        second: String,
    },

    #[error("catalog has no {0} setting with modulator labels")]
    MissingSelector(&'static str),

    #[error("invalid duration {value}: {reason}")]
    Duration { value: String, reason: String },
}
