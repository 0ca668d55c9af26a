//! Fault reporting through the log and the status LED.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{error, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const BLINK_ON_MS: u64 = 200;
const BLINK_OFF_MS: u64 = 200;
const ROUND_PAUSE_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    Timeout = 2,
    LocalSensorFailed = 3,
    ScanFailed = 4,
    ProfileNotFound = 10,
}

impl FaultCode {
    pub fn number(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: FaultCode,
    pub message: String,
    pub repeat: u8,
}

impl Fault {
    pub fn new(code: FaultCode, message: impl Into<String>, repeat: u8) -> Self {
        Self {
            code,
            message: message.into(),
            repeat,
        }
    }

    pub fn timeout() -> Self {
        Self::new(FaultCode::Timeout, "timeout", 3)
    }

    pub fn local_sensor_failed() -> Self {
        Self::new(FaultCode::LocalSensorFailed, "dht12 failed.", 1)
    }

    pub fn scan_failed() -> Self {
        Self::new(FaultCode::ScanFailed, "BLE scan failed.", 3)
    }

    pub fn profile_not_found() -> Self {
        Self::new(FaultCode::ProfileNotFound, "profile not found.", 5)
    }

    /// LED steps: `repeat` rounds of `code` blinks, each round followed by a
    /// pause. Each step is `(led_on, hold_ms)`.
    pub fn blink_pattern(&self) -> Vec<(bool, u64)> {
        let mut steps = Vec::new();
        for _ in 0..self.repeat {
            for _ in 0..self.code.number() {
                steps.push((true, BLINK_ON_MS));
                steps.push((false, BLINK_OFF_MS));
            }
            steps.push((false, ROUND_PAUSE_MS));
        }
        steps
    }

    pub fn display_duration(&self) -> Duration {
        Duration::from_millis(self.blink_pattern().iter().map(|(_, ms)| ms).sum())
    }
}

pub trait Indicator {
    fn show_fault(&mut self, fault: &Fault);

    fn set_led(&mut self, on: bool);
}

/// Logs faults and, when configured, blinks a sysfs LED.
///
/// A blink pattern runs as a task on the current tokio runtime. Starting a
/// new pattern or setting the LED directly cancels the one in progress.
pub struct LedIndicator {
    led: Option<PathBuf>,
    pattern: Option<JoinHandle<()>>,
}

impl LedIndicator {
    pub fn new(led: Option<PathBuf>) -> Self {
        Self { led, pattern: None }
    }

    fn cancel_pattern(&mut self) {
        if let Some(pattern) = self.pattern.take() {
            pattern.abort();
        }
    }
}

impl Indicator for LedIndicator {
    fn show_fault(&mut self, fault: &Fault) {
        error!("[ERROR] number={} msg={}", fault.code.number(), fault.message);
        let Some(led) = self.led.clone() else {
            return;
        };
        self.cancel_pattern();
        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime to blink fault {}", fault.code.number());
            return;
        };
        let pattern = fault.blink_pattern();
        self.pattern = Some(runtime.spawn(async move {
            for (on, hold_ms) in pattern {
                write_brightness(&led, on);
                tokio::time::sleep(Duration::from_millis(hold_ms)).await;
            }
        }));
    }

    fn set_led(&mut self, on: bool) {
        self.cancel_pattern();
        if let Some(led) = &self.led {
            write_brightness(led, on);
        }
    }
}

fn write_brightness(led: &Path, on: bool) {
    let path = led.join("brightness");
    if let Err(e) = fs::write(&path, if on { "1" } else { "0" }) {
        warn!("Failed to write {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn led_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("envnode-led-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn fault_codes_are_distinct() {
        let codes = [
            Fault::timeout(),
            Fault::local_sensor_failed(),
            Fault::scan_failed(),
            Fault::profile_not_found(),
        ]
        .map(|f| f.code.number());
        assert_eq!(codes, [2, 3, 4, 10]);
    }

    #[test]
    fn blink_pattern_counts() {
        let fault = Fault::profile_not_found();
        let pattern = fault.blink_pattern();
        let blinks = pattern.iter().filter(|(on, _)| *on).count();
        assert_eq!(blinks, 10 * 5);
        assert_eq!(pattern.len(), 5 * (10 * 2 + 1));
        assert_eq!(fault.display_duration(), Duration::from_millis(5 * (10 * 400 + 1000)));
    }

    #[test]
    fn led_indicator_writes_brightness() {
        let dir = led_dir("plain");
        let mut indicator = LedIndicator::new(Some(dir.clone()));

        indicator.set_led(true);
        assert_eq!(fs::read_to_string(dir.join("brightness")).unwrap(), "1");
        indicator.set_led(false);
        assert_eq!(fs::read_to_string(dir.join("brightness")).unwrap(), "0");
        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn led_command_cancels_a_running_blink_pattern() {
        let dir = led_dir("pattern");
        let brightness = dir.join("brightness");
        let mut indicator = LedIndicator::new(Some(dir.clone()));

        // Three 200 ms blinks: on at 0, 400 and 800 ms
        indicator.show_fault(&Fault::local_sensor_failed());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fs::read_to_string(&brightness).unwrap(), "1");

        indicator.set_led(false);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fs::read_to_string(&brightness).unwrap(), "0");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn fault_without_runtime_only_logs() {
        let dir = led_dir("no-runtime");
        let mut indicator = LedIndicator::new(Some(dir.clone()));
        indicator.show_fault(&Fault::timeout());
        assert!(indicator.pattern.is_none());
        assert!(!dir.join("brightness").exists());
        fs::remove_dir_all(&dir).ok();
    }
}
