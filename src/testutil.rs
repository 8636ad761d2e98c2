// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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
    thread,
    time::{Duration, SystemTime},
};

use crate::{config::Catalog, register::Register};

/// A small catalog: one modulatable setting, two global ones, and a selector with
/// three modulator banks.
pub const CATALOG_YAML: &str = r#"
groups:
  - name: osc
    long: Oscillator
    settings:
      - name: pitch
        long: Pitch
        cc: 12
        mod: 35
        bounds: { lower: 0, upper: 127 }
      - name: wave
        long: Wave
        cc: 70
        bounds: { lower: 0, upper: 3 }
        tics:
          - { value: 0, label: Saw }
          - { value: 3, label: Pulse }
  - name: filter
    long: Filter
    description: Low pass filter
    settings:
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
        bounds: { lower: 0, upper: 2 }
        labels: [LFO2, Wheel, Velocity]
"#;

/// Gets the test catalog.
pub fn catalog() -> Catalog {
    Catalog::from_yaml(CATALOG_YAML).expect("test catalog should parse")
}

/// Gets a register built from the test catalog.
pub fn register() -> Register {
    Register::new(&catalog()).expect("test catalog should build a register")
}

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed().expect("System time error");

        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}
