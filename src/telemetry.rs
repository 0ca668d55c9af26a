//! Telemetry messages, their topics and the shared JSON envelope, plus the
//! inbound command format.
//!
//! Every outbound message is serialized as
//! `{"clientId": ..., ["sensorId": ...,] "rtc": ..., "<kind>": {...}}`.

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::models::{BeaconReading, ButtonEvent, LocalSample, MacAddress, PowerStatus};
use crate::mqtt::Transport;

const TOPIC_ROOT: &str = "env";

/// One outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Power(PowerStatus),
    LocalSensor(LocalSample),
    Button(ButtonEvent),
    Status { status: String, millis: u64 },
    Beacon(BeaconReading),
}

impl Telemetry {
    pub fn status(status: &str, millis: u64) -> Self {
        Telemetry::Status {
            status: status.to_string(),
            millis,
        }
    }

    pub fn topic(&self, client_id: &str) -> String {
        match self {
            Telemetry::Power(_) => format!("{TOPIC_ROOT}/{client_id}/sensor/axp192"),
            Telemetry::LocalSensor(_) => format!("{TOPIC_ROOT}/{client_id}/sensor/dht12"),
            Telemetry::Button(event) => format!(
                "{TOPIC_ROOT}/{client_id}/button/{}/{}",
                event.button.as_str(),
                event.action.as_str()
            ),
            Telemetry::Status { .. } => format!("{TOPIC_ROOT}/{client_id}/status"),
            Telemetry::Beacon(BeaconReading::SwitchBotMeter(m)) => {
                format!("{TOPIC_ROOT}/{}/switchbot_meter", m.address)
            }
            Telemetry::Beacon(BeaconReading::GenericEnvBeacon(b)) => {
                format!("{TOPIC_ROOT}/{}/bleffff_meter", b.address)
            }
        }
    }

    fn body(&self) -> Body<'_> {
        match self {
            Telemetry::Power(status) => Body::Axp192(status),
            Telemetry::LocalSensor(sample) => Body::Dht12(sample),
            Telemetry::Button(event) => Body::Button(ButtonBody {
                button: event.button.as_str(),
                event: event.action.as_str(),
            }),
            Telemetry::Status { status, millis } => Body::Status(StatusBody {
                status,
                millis: *millis,
            }),
            Telemetry::Beacon(BeaconReading::SwitchBotMeter(m)) => {
                Body::SwitchbotMeter(SwitchBotBody {
                    address: m.address,
                    battery: m.battery_pct,
                    temperature: m.temperature_celsius(),
                    humidity: m.humidity_pct,
                })
            }
            Telemetry::Beacon(BeaconReading::GenericEnvBeacon(b)) => {
                Body::BleffffMeter(GenericBeaconBody {
                    address: b.address,
                    vbat: b.battery_millivolts,
                    temperature: b.temperature_celsius(),
                    humidity: b.humidity_pct(),
                    pressure: b.pressure_hpa(),
                })
            }
        }
    }

    fn sensor_id(&self) -> Option<MacAddress> {
        match self {
            Telemetry::Beacon(reading) => Some(reading.address()),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "clientId")]
    client_id: &'a str,
    #[serde(rename = "sensorId", skip_serializing_if = "Option::is_none")]
    sensor_id: Option<MacAddress>,
    rtc: &'a str,
    #[serde(flatten)]
    body: Body<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Body<'a> {
    Axp192(&'a PowerStatus),
    Dht12(&'a LocalSample),
    Button(ButtonBody),
    Status(StatusBody<'a>),
    SwitchbotMeter(SwitchBotBody),
    BleffffMeter(GenericBeaconBody),
}

#[derive(Serialize)]
struct ButtonBody {
    button: &'static str,
    event: &'static str,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: &'a str,
    millis: u64,
}

#[derive(Serialize)]
struct SwitchBotBody {
    address: MacAddress,
    battery: u8,
    temperature: f64,
    humidity: u8,
}

#[derive(Serialize)]
struct GenericBeaconBody {
    address: MacAddress,
    vbat: u16,
    temperature: f64,
    humidity: f64,
    pressure: f64,
}

/// Serializes telemetry for one node and hands it to the transport.
pub struct TelemetryPublisher {
    client_id: String,
}

impl TelemetryPublisher {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn encode(&self, message: &Telemetry, rtc: &str) -> serde_json::Result<String> {
        serde_json::to_string(&Envelope {
            client_id: &self.client_id,
            sensor_id: message.sensor_id(),
            rtc,
            body: message.body(),
        })
    }

    /// Publish one message. Returns whether the transport accepted it.
    pub fn publish(&self, transport: &mut dyn Transport, clock: &dyn Clock, message: &Telemetry) -> bool {
        let topic = message.topic(&self.client_id);
        let payload = match self.encode(message, &clock.rtc()) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode telemetry for {}: {}", topic, e);
                return false;
            }
        };
        info!("send {} {}", topic, payload);
        transport.publish(&topic, &payload)
    }
}

/// Subscription covering every topic addressed to this node.
pub fn node_subscription(client_id: &str) -> String {
    format!("{TOPIC_ROOT}/{client_id}/#")
}

/// Subscription covering topics addressed to every node.
pub fn broadcast_subscription() -> &'static str {
    "env/ALL/#"
}

/// Command carried by an inbound JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    #[serde(rename = "LED")]
    Led {
        #[serde(default)]
        on: bool,
    },
}

/// Parse an inbound payload. Non-JSON payloads and unknown commands yield
/// `None`.
pub fn parse_command(payload: &str) -> Option<Command> {
    if !payload.starts_with('{') {
        return None;
    }
    serde_json::from_str(payload).ok()
}
