//! Host board support: link state, local sensor, power readings and buttons
//! taken from Linux sysfs and process signals.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::connectivity::LinkMonitor;
use crate::error::SensorError;
use crate::models::{ButtonEvent, LocalSample, PowerStatus};
use crate::utils::read_sysfs_number;

/// Onboard temperature/humidity sensor.
pub trait LocalSensor {
    fn read(&mut self) -> Result<LocalSample, SensorError>;
}

/// Power-management chip readings.
pub trait PowerMonitor {
    fn status(&mut self) -> PowerStatus;
}

/// Button presses observed since the last poll.
pub trait ButtonSource {
    fn poll(&mut self) -> Vec<ButtonEvent>;
}

/// Link considered up when the interface's `operstate` reads `up`.
pub struct SysfsLink {
    operstate: PathBuf,
}

impl SysfsLink {
    pub fn new(interface: &str) -> Self {
        Self {
            operstate: Path::new("/sys/class/net").join(interface).join("operstate"),
        }
    }
}

impl LinkMonitor for SysfsLink {
    fn is_up(&mut self) -> bool {
        fs::read_to_string(&self.operstate)
            .map(|state| state.trim() == "up")
            .unwrap_or(false)
    }
}

/// Temperature/humidity from a Linux IIO device directory.
///
/// Reads `in_temp_input` (m°C) and `in_humidityrelative_input` (m%).
pub struct IioSensor {
    device: Option<PathBuf>,
}

impl IioSensor {
    pub fn new(device: Option<PathBuf>) -> Self {
        Self { device }
    }
}

impl LocalSensor for IioSensor {
    fn read(&mut self) -> Result<LocalSample, SensorError> {
        let device = self.device.as_ref().ok_or(SensorError::NotConfigured)?;
        let temperature = read_sysfs_number(&device.join("in_temp_input"))? / 1000.0;
        let humidity = read_sysfs_number(&device.join("in_humidityrelative_input"))? / 1000.0;
        debug!("Local sensor: temperature={:.1} humidity={:.1}", temperature, humidity);
        Ok(LocalSample {
            temperature: temperature as f32,
            humidity: humidity as f32,
        })
    }
}

/// Readings from Linux `power_supply` class directories.
#[derive(Debug, Clone, Default)]
pub struct SysfsPower {
    pub battery: Option<PathBuf>,
    pub usb: Option<PathBuf>,
    pub external: Option<PathBuf>,
}

impl SysfsPower {
    /// `(voltage mV, current mA)` of one supply, zero when unavailable.
    fn supply(dir: Option<&PathBuf>) -> (f32, f32) {
        let Some(dir) = dir else {
            return (0.0, 0.0);
        };
        let micro = |name: &str| {
            read_sysfs_number(&dir.join(name))
                .map(|v| (v / 1000.0) as f32)
                .unwrap_or(0.0)
        };
        (micro("voltage_now"), micro("current_now"))
    }
}

impl PowerMonitor for SysfsPower {
    fn status(&mut self) -> PowerStatus {
        let (vbat, ibat) = Self::supply(self.battery.as_ref());
        let (vusb, iusb) = Self::supply(self.usb.as_ref());
        let (vex, iex) = Self::supply(self.external.as_ref());
        let temp = self
            .battery
            .as_ref()
            .and_then(|dir| read_sysfs_number(&dir.join("temp")).ok())
            .map(|tenths| (tenths / 10.0) as f32)
            .unwrap_or(0.0);
        PowerStatus {
            vbat,
            temp,
            ibat,
            // The system rail follows whichever input is highest
            vaps: vbat.max(vusb).max(vex),
            vusb,
            iusb,
            vex,
            iex,
        }
    }
}

/// Button events queued by another task.
pub struct QueuedButtons {
    events: mpsc::UnboundedReceiver<ButtonEvent>,
}

impl QueuedButtons {
    pub fn channel() -> (mpsc::UnboundedSender<ButtonEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { events: rx })
    }
}

impl ButtonSource for QueuedButtons {
    fn poll(&mut self) -> Vec<ButtonEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Map process signals to button events
///
/// `SIGUSR1` is a short press of the power button, `SIGUSR2` a press and
/// release of button A.
#[cfg(unix)]
pub fn spawn_signal_buttons(tx: mpsc::UnboundedSender<ButtonEvent>) -> std::io::Result<()> {
    use crate::models::{Button, ButtonAction};
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    tokio::spawn(async move {
        loop {
            let events = tokio::select! {
                _ = usr1.recv() => vec![ButtonEvent::new(Button::P, ButtonAction::ShortPress)],
                _ = usr2.recv() => vec![
                    ButtonEvent::new(Button::A, ButtonAction::Pressed),
                    ButtonEvent::new(Button::A, ButtonAction::Released),
                ],
            };
            for event in events {
                if tx.send(event).is_err() {
                    warn!("Button queue closed");
                    return;
                }
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Button, ButtonAction};

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("envnode-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn iio_sensor_scales_milli_units() {
        let dir = scratch("iio");
        fs::write(dir.join("in_temp_input"), "23400\n").unwrap();
        fs::write(dir.join("in_humidityrelative_input"), "51250\n").unwrap();

        let sample = IioSensor::new(Some(dir.clone())).read().unwrap();
        assert_eq!(sample.temperature, 23.4);
        assert_eq!(sample.humidity, 51.25);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn iio_sensor_errors() {
        assert!(matches!(
            IioSensor::new(None).read(),
            Err(SensorError::NotConfigured)
        ));
        assert!(matches!(
            IioSensor::new(Some(PathBuf::from("/nonexistent/iio"))).read(),
            Err(SensorError::Io { .. })
        ));
    }

    #[test]
    fn power_from_supplies() {
        let battery = scratch("bat");
        fs::write(battery.join("voltage_now"), "4100000").unwrap();
        fs::write(battery.join("current_now"), "-12000").unwrap();
        fs::write(battery.join("temp"), "315").unwrap();
        let usb = scratch("usb");
        fs::write(usb.join("voltage_now"), "5020000").unwrap();
        fs::write(usb.join("current_now"), "250000").unwrap();

        let mut power = SysfsPower {
            battery: Some(battery.clone()),
            usb: Some(usb.clone()),
            external: None,
        };
        let status = power.status();
        assert_eq!(status.vbat, 4100.0);
        assert_eq!(status.ibat, -12.0);
        assert_eq!(status.temp, 31.5);
        assert_eq!(status.vusb, 5020.0);
        assert_eq!(status.iusb, 250.0);
        assert_eq!(status.vaps, 5020.0);
        assert_eq!((status.vex, status.iex), (0.0, 0.0));

        fs::remove_dir_all(&battery).ok();
        fs::remove_dir_all(&usb).ok();
    }

    #[test]
    fn missing_interface_is_down() {
        assert!(!SysfsLink::new("envnode-test-nonexistent0").is_up());
    }

    #[test]
    fn queued_buttons_drain_in_order() {
        let (tx, mut buttons) = QueuedButtons::channel();
        tx.send(ButtonEvent::new(Button::A, ButtonAction::Pressed)).unwrap();
        tx.send(ButtonEvent::new(Button::A, ButtonAction::Released)).unwrap();
        assert_eq!(
            buttons.poll(),
            vec![
                ButtonEvent::new(Button::A, ButtonAction::Pressed),
                ButtonEvent::new(Button::A, ButtonAction::Released),
            ]
        );
        assert!(buttons.poll().is_empty());
    }
}
