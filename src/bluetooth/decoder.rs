//! Decoding of SwitchBot meter and 0xFFFF environment beacon advertisements.

use log::debug;
use uuid::Uuid;

use crate::models::{
    AdvertisementRecord, BeaconReading, GenericEnvBeacon, MacAddress, SwitchBotFlags,
    SwitchBotMeter,
};

// SwitchBot protocol constants
pub const SWITCHBOT_SERVICE_UUID: Uuid = Uuid::from_u128(0xcba20d00_224d_11e6_9fb8_0002a5d5c51b);
pub const SWITCHBOT_SERVICE_DATA_UUID: Uuid =
    Uuid::from_u128(0x00000d00_0000_1000_8000_00805f9b34fb); // 16-bit 0x0D00
const SWITCHBOT_MIN_LEN: usize = 6;

// Generic environment beacon constants
pub const GENERIC_COMPANY_ID: u16 = 0xFFFF; // Reserved "no company" identifier
const GENERIC_MIN_LEN: usize = 11;

/// Decode one advertisement into a beacon reading
///
/// SwitchBot meters are tried first, then the generic 0xFFFF beacon format.
/// Records without an address or matching neither format yield `None`.
pub fn decode(record: &AdvertisementRecord) -> Option<BeaconReading> {
    let address = record.address?;
    decode_switchbot(address, record)
        .map(BeaconReading::SwitchBotMeter)
        .or_else(|| decode_generic(address, record).map(BeaconReading::GenericEnvBeacon))
}

/// Decode SwitchBot meter service data
///
/// The record must advertise the SwitchBot service UUID and carry service
/// data under the 0x0D00 data UUID:
/// - Byte 0: bit 7 encrypted
/// - Byte 1: bit 7 dual state mode, bit 6 status off
/// - Byte 2: bits 0-6 battery (%)
/// - Byte 3: bits 0-3 temperature tenths, bits 4-7 alert flags
/// - Byte 4: bits 0-6 temperature integer part, bit 7 set when above freezing
/// - Byte 5: bits 0-6 humidity (%), bit 7 Fahrenheit display unit
pub fn decode_switchbot(address: MacAddress, record: &AdvertisementRecord) -> Option<SwitchBotMeter> {
    if !record.service_uuids.contains(&SWITCHBOT_SERVICE_UUID) {
        return None;
    }
    let data = record
        .service_data
        .iter()
        .find(|(uuid, _)| *uuid == SWITCHBOT_SERVICE_DATA_UUID)
        .map(|(_, data)| data.as_slice())?;
    if data.len() < SWITCHBOT_MIN_LEN {
        debug!("Short SwitchBot service data from {}: len={}", address, data.len());
        return None;
    }

    let battery_pct = data[2] & 0x7F;
    let above_freezing = data[4] & 0x80 != 0;
    let magnitude = i16::from(data[3] & 0x0F) + i16::from(data[4] & 0x7F) * 10;
    let temperature_x10 = if above_freezing { magnitude } else { -magnitude };
    let humidity_pct = data[5] & 0x7F;

    let flags = SwitchBotFlags {
        encrypted: data[0] & 0x80 != 0,
        dual_state_mode: data[1] & 0x80 != 0,
        status_off: data[1] & 0x40 != 0,
        temperature_high_alert: data[3] & 0x80 != 0,
        temperature_low_alert: data[3] & 0x40 != 0,
        humidity_high_alert: data[3] & 0x20 != 0,
        humidity_low_alert: data[3] & 0x10 != 0,
        fahrenheit: data[5] & 0x80 != 0,
    };

    let meter = SwitchBotMeter {
        address,
        battery_pct,
        temperature_x10,
        humidity_pct,
        flags,
    };
    debug!(
        "SwitchBot meter {}: battery={}% temp={:.1}°C humidity={}% flags={:?}",
        address,
        battery_pct,
        meter.temperature_celsius(),
        humidity_pct,
        flags
    );
    Some(meter)
}

/// Decode a 0xFFFF manufacturer data payload
///
/// Layout (little-endian, offsets include the company identifier):
/// - Bytes 0-1: Company identifier (0xFFFF)
/// - Byte 2: Sequence number
/// - Bytes 3-4: Temperature (signed 16-bit, 0.01°C)
/// - Bytes 5-6: Humidity (signed 16-bit, 0.01%)
/// - Bytes 7-8: Pressure (signed 16-bit, 0.1 hPa)
/// - Bytes 9-10: Battery voltage (mV)
///
/// # Arguments
/// * `address` - Advertiser address copied into the reading
/// * `record` - Advertisement whose manufacturer payloads are searched
///
/// # Returns
/// The first 0xFFFF payload decoded, or `None` if there is none or it is
/// shorter than 11 bytes.
pub fn decode_generic(address: MacAddress, record: &AdvertisementRecord) -> Option<GenericEnvBeacon> {
    let data = record.manufacturer_data.iter().find(|data| {
        data.len() >= 2 && u16::from_le_bytes([data[0], data[1]]) == GENERIC_COMPANY_ID
    })?;
    if data.len() < GENERIC_MIN_LEN {
        debug!("Short 0xFFFF manufacturer data from {}: len={}", address, data.len());
        return None;
    }

    let beacon = GenericEnvBeacon {
        address,
        sequence: data[2],
        temperature_x100: i16::from_le_bytes([data[3], data[4]]),
        humidity_x100: i16::from_le_bytes([data[5], data[6]]),
        pressure_x10: i16::from_le_bytes([data[7], data[8]]),
        battery_millivolts: u16::from_le_bytes([data[9], data[10]]),
    };
    debug!(
        "0xFFFF beacon {}: seq={} temp={:.2}°C humidity={:.2}% pressure={:.1} hPa vbat={} mV",
        address,
        beacon.sequence,
        beacon.temperature_celsius(),
        beacon.humidity_pct(),
        beacon.pressure_hpa(),
        beacon.battery_millivolts
    );
    Some(beacon)
}
