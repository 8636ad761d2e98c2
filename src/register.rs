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
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::{
    config::{Catalog, ConfigError, Setting, SELECTOR},
    port::{Port, PortError, DEFAULT_CHANNEL},
};

/// How a CC address relates to its setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// The setting has no modulator address.
    Global,
    /// The baseline address of a modulatable setting.
    Baseline,
    /// The address of a modulatable setting inside the selected modulator bank.
    Mod,
}

/// What an inbound control change meant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A parameter value was stored.
    Changed { bank: u8, name: String, value: u8 },
    /// The device switched to another modulator bank.
    BankSelected { bank: u8 },
    /// The CC address is not in the catalog.
    Unknown { cc: u8 },
    /// The message needs a modulator bank that is not selected or does not exist. The
    /// value is dropped and neither the table nor the port's bank state changes.
    Unattributed { cc: u8, bank: u8 },
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("unknown setting {0}")]
    UnknownSetting(String),

    #[error("unknown modulator bank {0}")]
    UnknownBank(u8),

    #[error("{0} has no modulator address")]
    NotModulatable(String),

    #[error("{name}: value {value} is outside {lower}..={upper}")]
    OutOfBounds {
        name: String,
        value: u8,
        lower: u8,
        upper: u8,
    },

    #[error("{0} selects modulator banks and has no value of its own")]
    Selector(String),

    #[error(transparent)]
    Port(#[from] PortError),
}

/// Values of every setting, per bank. Bank 0 holds every setting, modulator banks hold
/// the modulatable settings only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueTable {
    banks: Vec<HashMap<String, u8>>,
}

impl ValueTable {
    /// Gets a value.
    pub fn get(&self, bank: u8, name: &str) -> Option<u8> {
        self.bank(bank).and_then(|values| values.get(name)).copied()
    }

    /// Gets every value of a bank.
    pub fn bank(&self, bank: u8) -> Option<&HashMap<String, u8>> {
        self.banks.get(usize::from(bank))
    }

    /// Returns the number of banks, baseline included.
    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }
}

/// The register maps named settings onto CC addresses and keeps the last known value of
/// each setting in each bank.
pub struct Register {
    flat_config: HashMap<String, Setting>,
    /// Qualified names in catalog order.
    order: Vec<String>,
    midi_map: HashMap<u8, (Kind, String)>,
    values: ValueTable,
    /// Modulator bank labels, bank 1 first.
    modulators: Vec<String>,
    selector_cc: u8,
}

impl Register {
    /// Builds a register from the catalog. Fails if the catalog is invalid, if any two
    /// addresses collide or if there is no modulator selector.
    pub fn new(catalog: &Catalog) -> Result<Register, ConfigError> {
        catalog.validate()?;

        let modulators = catalog
            .modulators()
            .ok_or(ConfigError::MissingSelector(SELECTOR))?
            .to_vec();

        let mut flat_config = HashMap::new();
        let mut order = Vec::new();
        let mut midi_map = HashMap::new();
        for (name, setting) in catalog.settings() {
            match setting.mod_cc() {
                None => claim(&mut midi_map, setting.cc(), Kind::Global, &name)?,
                Some(mod_cc) => {
                    claim(&mut midi_map, setting.cc(), Kind::Baseline, &name)?;
                    claim(&mut midi_map, mod_cc, Kind::Mod, &name)?;
                }
            }
            order.push(name.clone());
            flat_config.insert(name, setting.clone());
        }

        let selector_cc = flat_config
            .get(SELECTOR)
            .map(Setting::cc)
            .ok_or(ConfigError::MissingSelector(SELECTOR))?;

        let mut banks = vec![order.iter().map(|name| (name.clone(), 0)).collect()];
        for _ in &modulators {
            banks.push(
                order
                    .iter()
                    .filter(|name| flat_config.get(*name).and_then(Setting::mod_cc).is_some())
                    .map(|name| (name.clone(), 0))
                    .collect(),
            );
        }

        Ok(Register {
            flat_config,
            order,
            midi_map,
            values: ValueTable { banks },
            modulators,
            selector_cc,
        })
    }

    /// Records a value coming from the user. Returns true if the value differs from the
    /// stored one, in which case the caller should send it to the device.
    pub fn update_from_gui(&mut self, name: &str, bank: u8, value: u8) -> Result<bool, RegisterError> {
        if name == SELECTOR {
            return Err(RegisterError::Selector(name.to_string()));
        }

        let setting = self.lookup(name)?;
        let bounds = setting.bounds();
        if !bounds.contains(value) {
            return Err(RegisterError::OutOfBounds {
                name: name.to_string(),
                value,
                lower: bounds.lower,
                upper: bounds.upper,
            });
        }

        let slot = self.slot(name, bank)?;
        if *slot == value {
            return Ok(false);
        }
        *slot = value;
        Ok(true)
    }

    /// Sends a value to the port. Modulator bank values are preceded by a bank select
    /// message whenever the port has another bank selected.
    pub fn resolve_outbound(
        &self,
        port: &dyn Port,
        name: &str,
        bank: u8,
        value: u8,
    ) -> Result<(), RegisterError> {
        let setting = self.lookup(name)?;
        if bank == 0 {
            port.send_cc(DEFAULT_CHANNEL, setting.cc(), value)?;
            return Ok(());
        }

        let mod_cc = setting
            .mod_cc()
            .ok_or_else(|| RegisterError::NotModulatable(name.to_string()))?;
        self.select_bank(port, bank)?;
        port.send_cc(DEFAULT_CHANNEL, mod_cc, value)?;
        Ok(())
    }

    /// Makes the device select the given modulator bank through the port, unless the
    /// port already has it selected. Bank 0 cannot be selected and is a no-op.
    pub fn select_bank(&self, port: &dyn Port, bank: u8) -> Result<(), RegisterError> {
        if usize::from(bank) > self.modulators.len() {
            return Err(RegisterError::UnknownBank(bank));
        }
        if bank == 0 || port.selected_mod() == bank {
            return Ok(());
        }

        port.send_cc(DEFAULT_CHANNEL, self.selector_cc, bank - 1)?;
        port.bank().select(bank);
        Ok(())
    }

    /// Sends every stored value to the port: the baseline first, then each modulator
    /// bank, settings in catalog order.
    pub fn send_all(&self, port: &dyn Port) -> Result<(), RegisterError> {
        for (bank, values) in self.values.banks.iter().enumerate() {
            let bank = bank as u8;
            for name in &self.order {
                if name == SELECTOR {
                    continue;
                }
                if let Some(value) = values.get(name) {
                    self.resolve_outbound(port, name, bank, *value)?;
                }
            }
        }
        Ok(())
    }

    /// Interprets a control change that arrived through the port.
    pub fn ingest_inbound(&mut self, port: &dyn Port, cc: u8, value: u8) -> Outcome {
        let Some((kind, name)) = self.midi_map.get(&cc) else {
            debug!(port = port.name(), cc, value, "Unknown CC.");
            return Outcome::Unknown { cc };
        };

        let bank = match kind {
            Kind::Mod => port.selected_mod(),
            _ if name == SELECTOR => {
                let bank = value.saturating_add(1);
                if usize::from(bank) > self.modulators.len() {
                    warn!(port = port.name(), bank, "Selected modulator bank does not exist.");
                    return Outcome::Unattributed { cc, bank };
                }
                port.bank().select(bank);
                return Outcome::BankSelected { bank };
            }
            _ => 0,
        };

        if *kind == Kind::Mod && bank == 0 {
            debug!(port = port.name(), cc, value, "Modulator CC before any bank was selected.");
            return Outcome::Unattributed { cc, bank };
        }

        match self
            .values
            .banks
            .get_mut(usize::from(bank))
            .and_then(|values| values.get_mut(name))
        {
            Some(slot) => {
                *slot = value;
                Outcome::Changed {
                    bank,
                    name: name.clone(),
                    value,
                }
            }
            None => Outcome::Unattributed { cc, bank },
        }
    }

    /// Keeps the bank state of a port in step with a raw control change forwarded to it.
    pub fn track_outbound(&self, port: &dyn Port, cc: u8, value: u8) {
        if cc == self.selector_cc && usize::from(value) < self.modulators.len() {
            port.bank().select(value + 1);
        }
    }

    /// Gets the setting with the given qualified name.
    pub fn setting(&self, name: &str) -> Option<&Setting> {
        self.flat_config.get(name)
    }

    /// All settings in catalog order.
    pub fn settings(&self) -> impl Iterator<Item = (&str, &Setting)> {
        self.order.iter().filter_map(|name| {
            self.flat_config
                .get(name)
                .map(|setting| (name.as_str(), setting))
        })
    }

    /// Looks up which setting a CC address belongs to.
    pub fn identify(&self, cc: u8) -> Option<(Kind, &str)> {
        self.midi_map
            .get(&cc)
            .map(|(kind, name)| (*kind, name.as_str()))
    }

    /// Gets a stored value.
    pub fn value(&self, name: &str, bank: u8) -> Option<u8> {
        self.values.get(bank, name)
    }

    /// Gets every stored value.
    pub fn values(&self) -> &ValueTable {
        &self.values
    }

    /// Gets the modulator bank labels, bank 1 first.
    pub fn modulators(&self) -> &[String] {
        &self.modulators
    }

    /// Gets the CC address of the modulator selector.
    pub fn selector_cc(&self) -> u8 {
        self.selector_cc
    }

    fn lookup(&self, name: &str) -> Result<&Setting, RegisterError> {
        self.flat_config
            .get(name)
            .ok_or_else(|| RegisterError::UnknownSetting(name.to_string()))
    }

    fn slot(&mut self, name: &str, bank: u8) -> Result<&mut u8, RegisterError> {
        let values = self
            .values
            .banks
            .get_mut(usize::from(bank))
            .ok_or(RegisterError::UnknownBank(bank))?;
        values
            .get_mut(name)
            .ok_or_else(|| RegisterError::NotModulatable(name.to_string()))
    }
}

/// Adds an address to the map, refusing addresses already claimed.
fn claim(
    midi_map: &mut HashMap<u8, (Kind, String)>,
    cc: u8,
    kind: Kind,
    name: &str,
) -> Result<(), ConfigError> {
    if let Some((_, first)) = midi_map.get(&cc) {
        return Err(ConfigError::CcCollision {
            cc,
            first: first.clone(),
            second: name.to_string(),
        });
    }
    midi_map.insert(cc, (kind, name.to_string()));
    Ok(())
}

#[cfg(test)]
mod test {
    use std::{collections::HashSet, error::Error, time::Duration};

    use crate::{
        config::{Catalog, ConfigError},
        playsync::CancelHandle,
        port::{mock, Buffer, CcMessage, Port},
        testutil::{catalog, register},
    };

    use super::{Kind, Outcome, Register, RegisterError};

    fn cc(cc: u8, value: u8) -> CcMessage {
        CcMessage {
            channel: 0,
            cc,
            value,
        }
    }

    #[test]
    fn builds_value_table() {
        let register = register();
        let values = register.values();
        assert_eq!(4, values.len());

        let baseline: HashSet<&str> = values
            .bank(0)
            .expect("baseline")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(
            HashSet::from(["osc.pitch", "osc.wave", "filter.cutoff", "modulators.selector"]),
            baseline
        );
        for bank in 1..=3 {
            let values = values.bank(bank).expect("modulator bank");
            assert_eq!(1, values.len());
            assert_eq!(Some(&0), values.get("osc.pitch"));
        }
        assert!(values.bank(0).expect("baseline").values().all(|v| *v == 0));
        assert_eq!(None, values.bank(4));
    }

    #[test]
    fn builds_midi_map() {
        let register = register();
        assert_eq!(Some((Kind::Baseline, "osc.pitch")), register.identify(12));
        assert_eq!(Some((Kind::Mod, "osc.pitch")), register.identify(35));
        assert_eq!(Some((Kind::Global, "osc.wave")), register.identify(70));
        assert_eq!(Some((Kind::Global, "modulators.selector")), register.identify(30));
        assert_eq!(None, register.identify(1));
        assert_eq!(30, register.selector_cc());
        assert_eq!(3, register.modulators().len());

        let names: Vec<&str> = register.settings().map(|(name, _)| name).collect();
        assert_eq!(
            vec!["osc.pitch", "osc.wave", "filter.cutoff", "modulators.selector"],
            names
        );
    }

    #[test]
    fn rejects_colliding_addresses() {
        let yaml = r#"
groups:
  - name: osc
    long: Oscillator
    settings:
      - name: pitch
        long: Pitch
        cc: 12
        mod: 74
        bounds: { lower: 0, upper: 127 }
      - name: cutoff
        long: Cutoff
        cc: 74
        bounds: { lower: 0, upper: 127 }
  - name: modulators
    long: Modulators
    settings:
      - name: selector
        long: Modulator source
        cc: 30
        bounds: { lower: 0, upper: 1 }
        labels: [LFO2, Wheel]
"#;
        let catalog = Catalog::from_yaml(yaml).expect("catalog is valid on its own");
        assert!(matches!(
            Register::new(&catalog),
            Err(ConfigError::CcCollision { cc: 74, .. })
        ));
    }

    #[test]
    fn rejects_missing_selector() {
        let yaml = r#"
groups:
  - name: osc
    long: Oscillator
    settings:
      - name: pitch
        long: Pitch
        cc: 12
        bounds: { lower: 0, upper: 127 }
"#;
        let catalog = Catalog::from_yaml(yaml).expect("catalog is valid on its own");
        assert!(matches!(
            Register::new(&catalog),
            Err(ConfigError::MissingSelector(_))
        ));
    }

    #[test]
    fn resolve_outbound_selects_bank_first() -> Result<(), Box<dyn Error>> {
        let register = register();
        let port = mock::Port::get("out");
        assert_eq!(0, port.selected_mod());

        register.resolve_outbound(&port, "osc.pitch", 2, 64)?;
        assert_eq!(vec![cc(30, 1), cc(35, 64)], port.sent());
        assert_eq!(2, port.selected_mod());

        // Same bank again: no select message.
        port.reset_sent();
        register.resolve_outbound(&port, "osc.pitch", 2, 65)?;
        assert_eq!(vec![cc(35, 65)], port.sent());

        // Another bank: select again.
        port.reset_sent();
        register.resolve_outbound(&port, "osc.pitch", 1, 66)?;
        assert_eq!(vec![cc(30, 0), cc(35, 66)], port.sent());
        assert_eq!(1, port.selected_mod());
        Ok(())
    }

    #[test]
    fn resolve_outbound_baseline() -> Result<(), Box<dyn Error>> {
        let register = register();
        let port = mock::Port::get("out");
        port.bank().select(3);

        register.resolve_outbound(&port, "osc.pitch", 0, 10)?;
        register.resolve_outbound(&port, "filter.cutoff", 0, 20)?;
        assert_eq!(vec![cc(12, 10), cc(74, 20)], port.sent());
        assert_eq!(3, port.selected_mod());
        Ok(())
    }

    #[test]
    fn resolve_outbound_errors() {
        let register = register();
        let port = mock::Port::get("out");

        assert!(matches!(
            register.resolve_outbound(&port, "osc.nope", 0, 1),
            Err(RegisterError::UnknownSetting(_))
        ));
        assert!(matches!(
            register.resolve_outbound(&port, "osc.wave", 1, 1),
            Err(RegisterError::NotModulatable(_))
        ));
        assert!(matches!(
            register.resolve_outbound(&port, "osc.pitch", 4, 1),
            Err(RegisterError::UnknownBank(4))
        ));
        assert!(port.sent().is_empty());
        assert_eq!(0, port.selected_mod());
    }

    #[test]
    fn select_bank() -> Result<(), Box<dyn Error>> {
        let register = register();
        let port = mock::Port::get("out");

        register.select_bank(&port, 0)?;
        register.select_bank(&port, 3)?;
        register.select_bank(&port, 3)?;
        assert_eq!(vec![cc(30, 2)], port.sent());
        assert_eq!(3, port.selected_mod());
        assert!(register.select_bank(&port, 4).is_err());
        Ok(())
    }

    #[test]
    fn update_from_gui_suppresses_repeats() -> Result<(), Box<dyn Error>> {
        let mut register = register();
        assert!(register.update_from_gui("osc.pitch", 2, 64)?);
        assert!(!register.update_from_gui("osc.pitch", 2, 64)?);
        assert!(register.update_from_gui("osc.pitch", 2, 65)?);
        assert_eq!(Some(65), register.value("osc.pitch", 2));
        assert_eq!(Some(0), register.value("osc.pitch", 0));

        // Zero is the initial value, so it is not a change.
        assert!(!register.update_from_gui("filter.cutoff", 0, 0)?);
        Ok(())
    }

    #[test]
    fn update_from_gui_errors() {
        let mut register = register();
        assert!(matches!(
            register.update_from_gui("osc.wave", 0, 4),
            Err(RegisterError::OutOfBounds {
                value: 4,
                upper: 3,
                ..
            })
        ));
        assert!(matches!(
            register.update_from_gui("osc.wave", 1, 1),
            Err(RegisterError::NotModulatable(_))
        ));
        assert!(matches!(
            register.update_from_gui("osc.pitch", 9, 1),
            Err(RegisterError::UnknownBank(9))
        ));
        assert!(matches!(
            register.update_from_gui("modulators.selector", 0, 1),
            Err(RegisterError::Selector(_))
        ));
        assert!(matches!(
            register.update_from_gui("nope", 0, 1),
            Err(RegisterError::UnknownSetting(_))
        ));
    }

    #[test]
    fn ingest_selector() {
        let mut register = register();
        let port = mock::Port::get("in");
        let before = register.values().clone();

        assert_eq!(
            Outcome::BankSelected { bank: 3 },
            register.ingest_inbound(&port, 30, 2)
        );
        assert_eq!(3, port.selected_mod());
        assert_eq!(&before, register.values());

        // Bank 4 does not exist.
        assert_eq!(
            Outcome::Unattributed { cc: 30, bank: 4 },
            register.ingest_inbound(&port, 30, 3)
        );
        assert_eq!(3, port.selected_mod());
    }

    #[test]
    fn ingest_values() {
        let mut register = register();
        let port = mock::Port::get("in");

        assert_eq!(Outcome::Unknown { cc: 1 }, register.ingest_inbound(&port, 1, 5));
        assert_eq!(
            Outcome::Unattributed { cc: 35, bank: 0 },
            register.ingest_inbound(&port, 35, 5)
        );
        assert_eq!(Some(0), register.value("osc.pitch", 0));

        assert_eq!(
            Outcome::Changed {
                bank: 0,
                name: "osc.pitch".to_string(),
                value: 7
            },
            register.ingest_inbound(&port, 12, 7)
        );

        register.ingest_inbound(&port, 30, 1);
        assert_eq!(
            Outcome::Changed {
                bank: 2,
                name: "osc.pitch".to_string(),
                value: 9
            },
            register.ingest_inbound(&port, 35, 9)
        );
        // Baseline addresses are unaffected by the bank selection.
        assert_eq!(
            Outcome::Changed {
                bank: 0,
                name: "filter.cutoff".to_string(),
                value: 11
            },
            register.ingest_inbound(&port, 74, 11)
        );

        assert_eq!(Some(7), register.value("osc.pitch", 0));
        assert_eq!(Some(9), register.value("osc.pitch", 2));
        assert_eq!(Some(0), register.value("osc.pitch", 1));
        assert_eq!(Some(11), register.value("filter.cutoff", 0));
    }

    #[test]
    fn bank_state_is_per_port() {
        let mut register = register();
        let first = mock::Port::get("first");
        let second = mock::Port::get("second");

        register.ingest_inbound(&first, 30, 0);
        register.ingest_inbound(&second, 30, 2);
        register.ingest_inbound(&first, 35, 1);
        register.ingest_inbound(&second, 35, 3);

        assert_eq!(Some(1), register.value("osc.pitch", 1));
        assert_eq!(Some(3), register.value("osc.pitch", 3));
    }

    #[test]
    fn track_outbound_follows_selector() {
        let register = register();
        let port = mock::Port::get("out");

        register.track_outbound(&port, 74, 2);
        assert_eq!(0, port.selected_mod());
        register.track_outbound(&port, 30, 2);
        assert_eq!(3, port.selected_mod());
        register.track_outbound(&port, 30, 9);
        assert_eq!(3, port.selected_mod());
    }

    #[test]
    fn send_all_order() -> Result<(), Box<dyn Error>> {
        let mut register = register();
        register.update_from_gui("osc.pitch", 0, 1)?;
        register.update_from_gui("osc.wave", 0, 2)?;
        register.update_from_gui("osc.pitch", 2, 4)?;

        let port = mock::Port::get("out");
        register.send_all(&port)?;
        assert_eq!(
            vec![
                cc(12, 1),
                cc(70, 2),
                cc(74, 0),
                cc(30, 0),
                cc(35, 0),
                cc(30, 1),
                cc(35, 4),
                cc(30, 2),
                cc(35, 0),
            ],
            port.sent()
        );
        assert_eq!(3, port.selected_mod());
        Ok(())
    }

    #[test]
    fn send_all_round_trip() -> Result<(), Box<dyn Error>> {
        let mut register = register();
        register.update_from_gui("osc.pitch", 0, 10)?;
        register.update_from_gui("osc.wave", 0, 3)?;
        register.update_from_gui("filter.cutoff", 0, 100)?;
        register.update_from_gui("osc.pitch", 1, 20)?;
        register.update_from_gui("osc.pitch", 3, 40)?;

        let capture = Buffer::new("capture");
        register.send_all(&capture)?;

        let mut restored = Register::new(&catalog())?;
        let replay = Buffer::from_bytes("replay", capture.into_bytes());
        let cancel = CancelHandle::new();
        for message in replay.read_cc(&cancel, Duration::ZERO) {
            restored.ingest_inbound(&replay, message.cc, message.value);
        }

        assert_eq!(register.values(), restored.values());
        Ok(())
    }
}
