//! Per-window collection of the latest reading from each beacon.

use std::collections::HashMap;

use crate::models::{BeaconReading, MacAddress};

/// A decoded reading together with the loop time it was captured at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedReading {
    pub reading: BeaconReading,
    pub captured_ms: u64,
}

/// Latest reading per device address for one scan window
///
/// Readings stay structured for the whole window; they are only serialized
/// when the drained window is published.
#[derive(Debug, Default)]
pub struct BeaconAggregator {
    readings: HashMap<MacAddress, CapturedReading>,
}

impl BeaconAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reading, replacing any earlier one from the same address.
    pub fn insert(&mut self, reading: BeaconReading, captured_ms: u64) {
        self.readings.insert(
            reading.address(),
            CapturedReading {
                reading,
                captured_ms,
            },
        );
    }

    pub fn get(&self, address: &MacAddress) -> Option<&CapturedReading> {
        self.readings.get(address)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    /// Take every reading out of the window, ordered by address.
    pub fn drain(&mut self) -> Vec<CapturedReading> {
        let mut drained: Vec<CapturedReading> = self.readings.drain().map(|(_, r)| r).collect();
        drained.sort_by_key(|r| r.reading.address());
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenericEnvBeacon;

    fn beacon(last_octet: u8, sequence: u8) -> BeaconReading {
        BeaconReading::GenericEnvBeacon(GenericEnvBeacon {
            address: MacAddress([0xAA, 0, 0, 0, 0, last_octet]),
            sequence,
            temperature_x100: 2000,
            humidity_x100: 5000,
            pressure_x10: 10100,
            battery_millivolts: 3000,
        })
    }

    #[test]
    fn same_address_keeps_latest() {
        let mut window = BeaconAggregator::new();
        window.insert(beacon(1, 10), 100);
        window.insert(beacon(1, 11), 250);

        assert_eq!(window.len(), 1);
        let kept = window.get(&MacAddress([0xAA, 0, 0, 0, 0, 1])).unwrap();
        assert_eq!(kept.reading, beacon(1, 11));
        assert_eq!(kept.captured_ms, 250);
    }

    #[test]
    fn drain_returns_each_address_once_and_empties() {
        let mut window = BeaconAggregator::new();
        for n in [5, 3, 9, 1] {
            window.insert(beacon(n, n), u64::from(n));
        }
        window.insert(beacon(3, 42), 7);

        let drained = window.drain();
        assert_eq!(drained.len(), 4);
        let order: Vec<u8> = drained.iter().map(|r| r.reading.address().0[5]).collect();
        assert_eq!(order, vec![1, 3, 5, 9]);
        assert_eq!(drained[1].reading, beacon(3, 42));

        assert!(window.is_empty());
        assert!(window.drain().is_empty());
    }
}
