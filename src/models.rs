//! Plain data types shared by the scanner, the board and telemetry.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::error::ConfigError;

/// 48-bit device address.
///
/// `Display` renders lowercase colon-separated octets, which is the form used
/// in beacon topics. `{:X}` renders the uppercase form used for board MACs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::UpperHex for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidMac(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddress(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One advertisement observed during a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementRecord {
    pub address: Option<MacAddress>,
    /// Raw manufacturer-specific AD payloads, each starting with the
    /// little-endian company identifier.
    pub manufacturer_data: Vec<Vec<u8>>,
    pub service_uuids: Vec<Uuid>,
    pub service_data: Vec<(Uuid, Vec<u8>)>,
}

impl AdvertisementRecord {
    pub fn new(address: MacAddress) -> Self {
        Self {
            address: Some(address),
            ..Default::default()
        }
    }

    /// Build a record from a host stack's keyed advertisement properties.
    ///
    /// Manufacturer payloads arrive keyed by company identifier with the
    /// identifier stripped; it is put back in front, little-endian, as it
    /// appears on air. Entries are sorted by key.
    ///
    /// # Arguments
    /// * `address` - Advertiser address
    /// * `manufacturer_data` - Payloads keyed by 16-bit company identifier
    /// * `service_uuids` - Advertised service UUIDs
    /// * `service_data` - Payloads keyed by service UUID
    pub fn from_properties(
        address: MacAddress,
        manufacturer_data: HashMap<u16, Vec<u8>>,
        service_uuids: impl IntoIterator<Item = Uuid>,
        service_data: HashMap<Uuid, Vec<u8>>,
    ) -> Self {
        let mut manufacturer: Vec<_> = manufacturer_data.into_iter().collect();
        manufacturer.sort_by_key(|(company_id, _)| *company_id);
        let mut service_uuids: Vec<_> = service_uuids.into_iter().collect();
        service_uuids.sort();
        let mut service_data: Vec<_> = service_data.into_iter().collect();
        service_data.sort_by_key(|(uuid, _)| *uuid);

        Self {
            address: Some(address),
            manufacturer_data: manufacturer
                .into_iter()
                .map(|(company_id, payload)| {
                    let mut bytes = company_id.to_le_bytes().to_vec();
                    bytes.extend(payload);
                    bytes
                })
                .collect(),
            service_uuids,
            service_data,
        }
    }
}

/// Diagnostic status bits carried by a SwitchBot meter advertisement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchBotFlags {
    pub encrypted: bool,
    pub dual_state_mode: bool,
    pub status_off: bool,
    pub temperature_high_alert: bool,
    pub temperature_low_alert: bool,
    pub humidity_high_alert: bool,
    pub humidity_low_alert: bool,
    pub fahrenheit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchBotMeter {
    pub address: MacAddress,
    pub battery_pct: u8,
    pub temperature_x10: i16,
    pub humidity_pct: u8,
    pub flags: SwitchBotFlags,
}

impl SwitchBotMeter {
    pub fn temperature_celsius(&self) -> f64 {
        f64::from(self.temperature_x10) / 10.0
    }
}

/// Reading from a beacon advertising under company identifier `0xFFFF`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericEnvBeacon {
    pub address: MacAddress,
    pub sequence: u8,
    pub temperature_x100: i16,
    pub humidity_x100: i16,
    pub pressure_x10: i16,
    pub battery_millivolts: u16,
}

impl GenericEnvBeacon {
    pub fn temperature_celsius(&self) -> f64 {
        f64::from(self.temperature_x100) / 100.0
    }

    pub fn humidity_pct(&self) -> f64 {
        f64::from(self.humidity_x100) / 100.0
    }

    pub fn pressure_hpa(&self) -> f64 {
        f64::from(self.pressure_x10) / 10.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeaconReading {
    SwitchBotMeter(SwitchBotMeter),
    GenericEnvBeacon(GenericEnvBeacon),
}

impl BeaconReading {
    pub fn address(&self) -> MacAddress {
        match self {
            BeaconReading::SwitchBotMeter(m) => m.address,
            BeaconReading::GenericEnvBeacon(b) => b.address,
        }
    }
}

/// One sample from the onboard temperature/humidity chip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocalSample {
    pub temperature: f32,
    pub humidity: f32,
}

/// Power-management readings (voltages in mV, currents in mA).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PowerStatus {
    pub vbat: f32,
    pub temp: f32,
    pub ibat: f32,
    pub vaps: f32,
    pub vusb: f32,
    pub iusb: f32,
    pub vex: f32,
    pub iex: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    A,
    B,
    P,
}

impl Button {
    pub fn as_str(&self) -> &'static str {
        match self {
            Button::A => "A",
            Button::B => "B",
            Button::P => "P",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Pressed,
    Released,
    LongPress,
    ShortPress,
}

impl ButtonAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ButtonAction::Pressed => "wasPressed",
            ButtonAction::Released => "wasReleased",
            ButtonAction::LongPress => "long_press",
            ButtonAction::ShortPress => "short_press",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: Button,
    pub action: ButtonAction,
}

impl ButtonEvent {
    pub fn new(button: Button, action: ButtonAction) -> Self {
        Self { button, action }
    }

    /// Releasing button A restarts the node.
    pub fn is_restart(&self) -> bool {
        self.button == Button::A && self.action == ButtonAction::Released
    }
}

/// A message delivered on one of the subscribed topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}
