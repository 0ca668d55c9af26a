//! Node configuration from the environment and the device profile table.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use url::Url;

use crate::error::ConfigError;
use crate::models::MacAddress;

const DEFAULT_MQTT_URL: &str = "mqtt://octopi.local:1883";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_INTERFACE: &str = "wlan0";
const DEFAULT_NTP_SERVER: &str = "ntp.nict.jp";
const DEFAULT_UTC_OFFSET_HOURS: i8 = 9; // JST

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hat {
    None,
    Env,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    Env,
    Ir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    None,
    ScanAndMqtt,
    SensorBleffff,
    ScanDemo,
}

/// Static description of one board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub index: u16,
    pub mac: MacAddress,
    pub hat: Hat,
    pub unit: Unit,
    pub role: Role,
}

impl Profile {
    pub fn client_id(&self) -> String {
        format!("ENV{:03}", self.index)
    }

    /// Whether the board carries the temperature/humidity chip.
    pub fn has_local_sensor(&self) -> bool {
        self.hat == Hat::Env || self.unit == Unit::Env
    }

    /// Find the profile of a board that should scan and publish.
    ///
    /// # Arguments
    /// * `profiles` - The configured profile table
    /// * `mac` - Board MAC to look up
    ///
    /// # Returns
    /// The matching profile, or `None` when the board is unknown or its role
    /// does not scan and publish.
    pub fn lookup(profiles: &[Profile], mac: MacAddress) -> Option<&Profile> {
        profiles
            .iter()
            .find(|p| p.mac == mac)
            .filter(|p| p.role == Role::ScanAndMqtt)
    }

    fn parse_entry(entry: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidProfile {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };
        let (mac, rest) = entry.split_once('=').ok_or_else(|| invalid("expected <MAC>=<index>"))?;
        let mac: MacAddress = mac.trim().parse()?;
        let mut fields = rest.split('/').map(str::trim);
        let index = fields
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| invalid("index must be a number"))?;
        let hat = parse_hat(fields.next().unwrap_or("none")).ok_or_else(|| invalid("unknown hat"))?;
        let unit =
            parse_unit(fields.next().unwrap_or("none")).ok_or_else(|| invalid("unknown unit"))?;
        let role = parse_role(fields.next().unwrap_or("scan_and_mqtt"))
            .ok_or_else(|| invalid("unknown role"))?;
        Ok(Profile {
            index,
            mac,
            hat,
            unit,
            role,
        })
    }
}

/// Non-empty, trimmed value of one variable.
fn var<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_hat(s: &str) -> Option<Hat> {
    match s.to_ascii_lowercase().as_str() {
        "" | "none" => Some(Hat::None),
        "env" => Some(Hat::Env),
        _ => None,
    }
}

fn parse_unit(s: &str) -> Option<Unit> {
    match s.to_ascii_lowercase().as_str() {
        "" | "none" => Some(Unit::None),
        "env" => Some(Unit::Env),
        "ir" => Some(Unit::Ir),
        _ => None,
    }
}

fn parse_role(s: &str) -> Option<Role> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Some(Role::None),
        "" | "scan_and_mqtt" => Some(Role::ScanAndMqtt),
        "sensor_bleffff" => Some(Role::SensorBleffff),
        "scan_demo" => Some(Role::ScanDemo),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub profiles: Vec<Profile>,
    pub broker_host: String,
    pub broker_port: u16,
    pub board_mac: Option<MacAddress>,
    pub interface: String,
    pub ntp_server: String,
    pub utc_offset_hours: i8,
    pub local_sensor_dir: Option<PathBuf>,
    pub power_battery_dir: Option<PathBuf>,
    pub power_usb_dir: Option<PathBuf>,
    pub power_external_dir: Option<PathBuf>,
    pub status_led: Option<PathBuf>,
}

impl NodeConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();
        Self::from_vars(env::vars())
    }

    /// Build the configuration from `(name, value)` pairs.
    ///
    /// # Arguments
    /// * `vars` - Environment-style variables, e.g. `std::env::vars()`
    ///
    /// # Returns
    /// The configuration, or the first `ConfigError` met
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let mut profiles = Vec::new();

        // Try NODE_PROFILES format first
        if let Some(entries) = var(&vars, "NODE_PROFILES") {
            debug!("Found NODE_PROFILES: '{}'", entries);
            for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                profiles.push(Profile::parse_entry(entry)?);
            }
        } else {
            // Fallback to individual environment variables
            debug!("NODE_PROFILES not found, trying individual variables");
            let mut keys: Vec<&String> = vars
                .keys()
                .filter(|k| k.starts_with("NODE_PROFILE_") && k.ends_with("_MAC"))
                .collect();
            keys.sort();
            for key in keys {
                let Some(n) = key
                    .strip_prefix("NODE_PROFILE_")
                    .and_then(|s| s.strip_suffix("_MAC"))
                else {
                    continue;
                };
                let field = |name: &str| var(&vars, &format!("NODE_PROFILE_{n}_{name}")).unwrap_or("");
                let index = match field("INDEX") {
                    "" => n,
                    index => index,
                };
                let entry = format!(
                    "{}={}/{}/{}/{}",
                    vars[key].trim(),
                    index,
                    field("HAT"),
                    field("UNIT"),
                    field("ROLE")
                );
                profiles.push(Profile::parse_entry(&entry)?);
            }
        }

        info!("Total profiles loaded: {}", profiles.len());
        for profile in &profiles {
            debug!("Profile: {:X} -> {}", profile.mac, profile.client_id());
        }

        if profiles.is_empty() {
            return Err(ConfigError::NoProfiles);
        }

        let mqtt_url = var(&vars, "MQTT_URL").unwrap_or(DEFAULT_MQTT_URL);
        let url = Url::parse(mqtt_url)?;
        let broker_host = url
            .host_str()
            .ok_or_else(|| ConfigError::MissingHost(mqtt_url.to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let broker_port = url.port().unwrap_or(DEFAULT_MQTT_PORT);

        let board_mac = var(&vars, "NODE_MAC").map(str::parse::<MacAddress>).transpose()?;

        let utc_offset_hours = match var(&vars, "NODE_UTC_OFFSET_HOURS") {
            Some(value) => value
                .parse::<i8>()
                .ok()
                .filter(|h| (-23..=23).contains(h))
                .ok_or_else(|| ConfigError::InvalidNumber {
                    var: "NODE_UTC_OFFSET_HOURS",
                    value: value.to_string(),
                })?,
            None => DEFAULT_UTC_OFFSET_HOURS,
        };

        let path = |key: &str| var(&vars, key).map(PathBuf::from);

        Ok(NodeConfig {
            profiles,
            broker_host,
            broker_port,
            board_mac,
            interface: var(&vars, "NODE_INTERFACE").unwrap_or(DEFAULT_INTERFACE).to_string(),
            ntp_server: var(&vars, "NTP_SERVER").unwrap_or(DEFAULT_NTP_SERVER).to_string(),
            utc_offset_hours,
            local_sensor_dir: path("LOCAL_SENSOR_DIR"),
            power_battery_dir: path("POWER_BATTERY_DIR"),
            power_usb_dir: path("POWER_USB_DIR"),
            power_external_dir: path("POWER_EXTERNAL_DIR"),
            status_led: path("STATUS_LED"),
        })
    }

    /// MAC address used for the profile lookup.
    pub fn board_mac(&self) -> Result<MacAddress, ConfigError> {
        if let Some(mac) = self.board_mac {
            return Ok(mac);
        }
        let path = Path::new("/sys/class/net").join(&self.interface).join("address");
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::BoardMac {
            path: path.clone(),
            source,
        })?;
        raw.trim().parse()
    }
}
