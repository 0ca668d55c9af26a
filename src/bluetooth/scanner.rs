//! Bluetooth Low Energy scan lifecycle and beacon collection.

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::bluetooth::aggregator::{BeaconAggregator, CapturedReading};
use crate::bluetooth::decoder;
use crate::error::ScanError;
use crate::models::AdvertisementRecord;

pub const SCAN_DURATION: Duration = Duration::from_secs(15); // Length of one scan window
pub const RADIO_QUEUE_DEPTH: usize = 64; // Pending radio events between loop iterations

/// Event delivered by the radio while a scan is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Discovered(AdvertisementRecord),
    ScanComplete,
    /// The radio accepted the scan but could not run it.
    ScanFailed,
}

/// Radio hardware that can run a timed scan.
///
/// Discovered advertisements and the final completion are delivered through
/// the sender half of [`radio_channel`], never through a direct callback.
pub trait Radio {
    /// Request a scan of `duration`. Returns `false` if the radio refused.
    fn start_scan(&mut self, duration: Duration, active: bool) -> bool;

    /// Release scan resources after completion.
    fn stop_scan(&mut self);
}

/// Bounded queue carrying radio events to the main loop.
pub fn radio_channel() -> (mpsc::Sender<RadioEvent>, mpsc::Receiver<RadioEvent>) {
    mpsc::channel(RADIO_QUEUE_DEPTH)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning { active: bool },
    Complete,
}

/// Owns the scan window: starts scans, feeds advertisements through the
/// decoders and hands the collected readings back once the window closes.
pub struct ScanController {
    radio: Box<dyn Radio>,
    events: mpsc::Receiver<RadioEvent>,
    state: ScanState,
    window: BeaconAggregator,
    duration: Duration,
}

impl ScanController {
    pub fn new(radio: Box<dyn Radio>, events: mpsc::Receiver<RadioEvent>) -> Self {
        Self {
            radio,
            events,
            state: ScanState::Idle,
            window: BeaconAggregator::new(),
            duration: SCAN_DURATION,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn window(&self) -> &BeaconAggregator {
        &self.window
    }

    /// Open a new scan window
    ///
    /// Does nothing while a scan is already running. A completed window must
    /// be drained first.
    pub fn start(&mut self, active: bool) -> Result<(), ScanError> {
        match self.state {
            ScanState::Scanning { .. } => return Ok(()),
            ScanState::Complete => return Err(ScanError::NotDrained),
            ScanState::Idle => {}
        }

        // Drop anything a previous window left queued
        while self.events.try_recv().is_ok() {}
        self.window.clear();

        info!("BLE scan start: active={} duration={:?}", active, self.duration);
        if !self.radio.start_scan(self.duration, active) {
            warn!("Radio refused to start scan");
            return Err(ScanError::RadioRefused);
        }
        self.state = ScanState::Scanning { active };
        Ok(())
    }

    /// Process everything the radio queued since the last call.
    ///
    /// # Arguments
    /// * `now_ms` - Loop clock stamped on every reading captured
    ///
    /// # Returns
    /// `Err(ScanError::RadioFailed)` when the radio gave up on the running
    /// scan; the controller is back to `Idle` by then.
    pub fn pump(&mut self, now_ms: u64) -> Result<(), ScanError> {
        let mut result = Ok(());
        while let Ok(event) = self.events.try_recv() {
            match event {
                RadioEvent::Discovered(record) => {
                    self.on_advertisement_discovered(record, now_ms);
                }
                RadioEvent::ScanComplete => self.on_scan_complete(),
                RadioEvent::ScanFailed => {
                    if self.on_scan_failed() {
                        result = Err(ScanError::RadioFailed);
                    }
                }
            }
        }
        result
    }

    /// Decode one advertisement into the window. Returns whether it was kept.
    pub fn on_advertisement_discovered(&mut self, record: AdvertisementRecord, now_ms: u64) -> bool {
        if !matches!(self.state, ScanState::Scanning { .. }) {
            return false;
        }
        match decoder::decode(&record) {
            Some(reading) => {
                self.window.insert(reading, now_ms);
                true
            }
            None => false,
        }
    }

    pub fn on_scan_complete(&mut self) {
        if !matches!(self.state, ScanState::Scanning { .. }) {
            debug!("Ignoring scan completion in state {:?}", self.state);
            return;
        }
        self.radio.stop_scan();
        info!("BLE scan complete: {} beacons", self.window.len());
        self.state = ScanState::Complete;
    }

    /// Abandon a scan the radio could not run. Returns whether a running
    /// scan was abandoned.
    pub fn on_scan_failed(&mut self) -> bool {
        if !matches!(self.state, ScanState::Scanning { .. }) {
            debug!("Ignoring scan failure in state {:?}", self.state);
            return false;
        }
        self.radio.stop_scan();
        self.window.clear();
        warn!("BLE scan failed, window discarded");
        self.state = ScanState::Idle;
        true
    }

    /// Hand out the completed window and return to idle.
    pub fn drain(&mut self) -> Option<Vec<CapturedReading>> {
        if self.state != ScanState::Complete {
            return None;
        }
        self.state = ScanState::Idle;
        Some(self.window.drain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::decoder::GENERIC_COMPANY_ID;
    use crate::mock::MockRadio;
    use crate::models::MacAddress;

    fn beacon_record(last_octet: u8, sequence: u8) -> AdvertisementRecord {
        let mut data = GENERIC_COMPANY_ID.to_le_bytes().to_vec();
        data.extend_from_slice(&[sequence, 0x66, 0x08, 0xAD, 0x11, 0x94, 0x27, 0xC4, 0x0B]);
        AdvertisementRecord {
            manufacturer_data: vec![data],
            ..AdvertisementRecord::new(MacAddress([0xAA, 0, 0, 0, 0, last_octet]))
        }
    }

    fn controller() -> (ScanController, MockRadio) {
        let (tx, rx) = radio_channel();
        let radio = MockRadio::new(tx);
        (ScanController::new(Box::new(radio.clone()), rx), radio)
    }

    #[test]
    fn full_window_lifecycle() {
        let (mut scan, radio) = controller();
        assert_eq!(scan.state(), ScanState::Idle);

        scan.start(true).unwrap();
        assert_eq!(scan.state(), ScanState::Scanning { active: true });
        assert_eq!(radio.starts(), vec![(SCAN_DURATION, true)]);

        radio.discover(beacon_record(1, 1));
        radio.discover(beacon_record(2, 1));
        radio.discover(beacon_record(1, 2));
        radio.discover(AdvertisementRecord::new(MacAddress([0xBB; 6])));
        scan.pump(500).unwrap();
        assert_eq!(scan.window().len(), 2);
        assert_eq!(scan.state(), ScanState::Scanning { active: true });

        radio.complete();
        scan.pump(15_000).unwrap();
        assert_eq!(scan.state(), ScanState::Complete);
        assert_eq!(radio.stops(), 1);

        let drained = scan.drain().unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(scan.state(), ScanState::Idle);
        assert!(scan.drain().is_none());
    }

    #[test]
    fn start_while_scanning_is_noop() {
        let (mut scan, radio) = controller();
        scan.start(false).unwrap();
        radio.discover(beacon_record(1, 1));
        scan.pump(10).unwrap();

        scan.start(true).unwrap();
        assert_eq!(scan.state(), ScanState::Scanning { active: false });
        assert_eq!(radio.starts().len(), 1);
        assert_eq!(scan.window().len(), 1);
    }

    #[test]
    fn start_requires_drain_after_complete() {
        let (mut scan, radio) = controller();
        scan.start(false).unwrap();
        radio.complete();
        scan.pump(0).unwrap();

        assert_eq!(scan.start(false), Err(ScanError::NotDrained));
        scan.drain().unwrap();
        scan.start(false).unwrap();
        assert_eq!(radio.starts().len(), 2);
    }

    #[test]
    fn refused_scan_stays_idle() {
        let (mut scan, radio) = controller();
        radio.refuse_scans(true);
        assert_eq!(scan.start(true), Err(ScanError::RadioRefused));
        assert_eq!(scan.state(), ScanState::Idle);
    }

    #[test]
    fn advertisements_outside_a_scan_are_ignored() {
        let (mut scan, _radio) = controller();
        assert!(!scan.on_advertisement_discovered(beacon_record(1, 1), 0));
        scan.on_scan_complete();
        assert_eq!(scan.state(), ScanState::Idle);
        assert!(scan.window().is_empty());
    }

    #[test]
    fn new_window_starts_empty() {
        let (mut scan, radio) = controller();
        scan.start(false).unwrap();
        radio.discover(beacon_record(1, 1));
        radio.complete();
        scan.pump(0).unwrap();
        assert_eq!(scan.drain().unwrap().len(), 1);

        scan.start(false).unwrap();
        radio.complete();
        scan.pump(0).unwrap();
        assert!(scan.drain().unwrap().is_empty());
    }

    #[test]
    fn failed_scan_returns_to_idle() {
        let (mut scan, radio) = controller();
        scan.start(true).unwrap();
        radio.discover(beacon_record(1, 1));
        radio.fail();
        assert_eq!(scan.pump(20), Err(ScanError::RadioFailed));
        assert_eq!(scan.state(), ScanState::Idle);
        assert!(scan.window().is_empty());
        assert_eq!(radio.stops(), 1);
        assert!(scan.drain().is_none());

        // The next window runs normally
        scan.start(false).unwrap();
        radio.complete();
        assert_eq!(scan.pump(40), Ok(()));
        assert_eq!(scan.state(), ScanState::Complete);
    }

    #[test]
    fn failure_outside_a_scan_is_ignored() {
        let (mut scan, radio) = controller();
        radio.fail();
        assert_eq!(scan.pump(0), Ok(()));
        assert_eq!(scan.state(), ScanState::Idle);
        assert_eq!(radio.stops(), 0);
    }
}
