//! The cooperative main loop of one sensor node.
//!
//! `Node::poll` is called repeatedly with a monotonic millisecond clock and
//! drives every subsystem one non-blocking step at a time.

use std::collections::VecDeque;
use std::time::Duration;

use log::{info, warn};

use crate::bluetooth::scanner::{ScanController, ScanState};
use crate::board::{ButtonSource, LocalSensor, PowerMonitor};
use crate::clock::Clock;
use crate::config::{NodeConfig, Profile};
use crate::connectivity::{ConnectionState, ConnectivityStateMachine, LinkMonitor, Network, Resolver};
use crate::indicator::{Fault, Indicator};
use crate::error::ScanError;
use crate::models::{BeaconReading, ButtonEvent, InboundMessage, MacAddress};
use crate::mqtt::Transport;
use crate::scheduler::{ScheduledAction, TickScheduler};
use crate::telemetry::{parse_command, Command, Telemetry, TelemetryPublisher};
use crate::watchdog::WatchdogSupervisor;

/// Extra wait on top of the fault display before the process restarts.
const RESTART_GRACE: Duration = Duration::from_millis(100);

/// Beacon readings published per loop iteration once a window closes.
pub const BEACONS_PER_POLL: usize = 8;

/// Hardware and network collaborators owned by the node.
pub struct Peripherals {
    pub link: Box<dyn LinkMonitor>,
    pub resolver: Box<dyn Resolver>,
    pub transport: Box<dyn Transport>,
    pub clock: Box<dyn Clock>,
    pub sensor: Box<dyn LocalSensor>,
    pub power: Box<dyn PowerMonitor>,
    pub buttons: Box<dyn ButtonSource>,
    pub indicator: Box<dyn Indicator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    ProfileNotFound,
    InboundTimeout,
    ButtonReleased,
}

/// The node gave up and wants the process restarted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartRequest {
    pub reason: RestartReason,
    pub fault: Option<Fault>,
}

impl RestartRequest {
    fn new(reason: RestartReason, fault: Option<Fault>) -> Self {
        Self { reason, fault }
    }

    /// How long to wait so the fault pattern is fully shown first.
    pub fn delay(&self) -> Duration {
        let display = self
            .fault
            .as_ref()
            .map(Fault::display_duration)
            .unwrap_or_default();
        display + RESTART_GRACE
    }
}

pub struct Node {
    profile: Profile,
    publisher: TelemetryPublisher,
    connectivity: ConnectivityStateMachine,
    scan: ScanController,
    scheduler: TickScheduler,
    watchdog: WatchdogSupervisor,
    peripherals: Peripherals,
    active_scan_requested: bool,
    scan_retry_at: Option<u64>,
    pending_beacons: VecDeque<BeaconReading>,
}

impl Node {
    /// Select this board's profile and set up the subsystems.
    ///
    /// An unknown board shows the profile fault and asks for a restart
    /// without touching the network.
    ///
    /// # Arguments
    /// * `config` - Profile table and broker settings
    /// * `mac` - This board's MAC, used to pick the profile
    /// * `scan` - Scan controller already wired to the radio queue
    /// * `peripherals` - Hardware and network collaborators
    /// * `now_ms` - Loop clock at boot, the watchdog's first baseline
    pub fn boot(
        config: &NodeConfig,
        mac: MacAddress,
        scan: ScanController,
        mut peripherals: Peripherals,
        now_ms: u64,
    ) -> Result<Self, RestartRequest> {
        info!("Board MAC: {}", mac);
        let Some(profile) = Profile::lookup(&config.profiles, mac).cloned() else {
            let fault = Fault::profile_not_found();
            peripherals.indicator.show_fault(&fault);
            return Err(RestartRequest::new(RestartReason::ProfileNotFound, Some(fault)));
        };

        let client_id = profile.client_id();
        info!(
            "Profile {}: hat={:?} unit={:?} role={:?}",
            client_id, profile.hat, profile.unit, profile.role
        );
        Ok(Self {
            publisher: TelemetryPublisher::new(client_id.clone()),
            connectivity: ConnectivityStateMachine::new(
                client_id,
                config.broker_host.clone(),
                config.broker_port,
            ),
            profile,
            scan,
            scheduler: TickScheduler::new(),
            watchdog: WatchdogSupervisor::new(now_ms),
            peripherals,
            active_scan_requested: false,
            scan_retry_at: None,
            pending_beacons: VecDeque::new(),
        })
    }

    pub fn client_id(&self) -> &str {
        self.publisher.client_id()
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn state(&self) -> ConnectionState {
        self.connectivity.state()
    }

    pub fn scan_state(&self) -> ScanState {
        self.scan.state()
    }

    pub fn last_inbound_ms(&self) -> u64 {
        self.watchdog.last_inbound_ms()
    }

    /// Beacon readings from the last window still waiting to be published.
    pub fn pending_beacons(&self) -> usize {
        self.pending_beacons.len()
    }

    /// Run one iteration of the main loop.
    pub fn poll(&mut self, now_ms: u64) -> Option<RestartRequest> {
        let buttons = self.peripherals.buttons.poll();

        if self.connectivity.services_transport() {
            for message in self.peripherals.transport.service() {
                self.on_inbound(message, now_ms);
            }
        }

        let p = &mut self.peripherals;
        let mut net = Network {
            link: p.link.as_mut(),
            resolver: p.resolver.as_mut(),
            transport: p.transport.as_mut(),
            clock: p.clock.as_mut(),
        };
        if let Some(state) = self.connectivity.step(&mut net, &self.publisher, now_ms) {
            info!("Connection state: {:?}", state);
            if state == ConnectionState::Ready {
                self.scheduler.start(now_ms);
            }
        }

        if self.connectivity.state() == ConnectionState::Ready {
            self.run_ready(&buttons, now_ms);
        }

        if self.watchdog.is_expired(now_ms) {
            warn!(
                "No inbound message since {} ms, restarting",
                self.watchdog.last_inbound_ms()
            );
            let fault = Fault::timeout();
            self.peripherals.indicator.show_fault(&fault);
            return Some(RestartRequest::new(RestartReason::InboundTimeout, Some(fault)));
        }

        if buttons.iter().any(ButtonEvent::is_restart) {
            info!("Button A released, restarting");
            return Some(RestartRequest::new(RestartReason::ButtonReleased, None));
        }
        None
    }

    fn on_inbound(&mut self, message: InboundMessage, now_ms: u64) {
        info!("recv {} {}", message.topic, message.payload);
        self.watchdog.record_inbound(now_ms);
        if let Some(Command::Led { on }) = parse_command(&message.payload) {
            self.peripherals.indicator.set_led(on);
        }
    }

    fn run_ready(&mut self, buttons: &[ButtonEvent], now_ms: u64) {
        for event in buttons {
            self.publish(&Telemetry::Button(*event));
        }
        for action in self.scheduler.poll(now_ms) {
            self.run_action(action, now_ms);
        }
        self.run_scan(now_ms);
        self.publish_pending_beacons();
    }

    fn run_action(&mut self, action: ScheduledAction, now_ms: u64) {
        match action {
            ScheduledAction::RequestActiveScan => self.active_scan_requested = true,
            ScheduledAction::PublishPower => {
                let status = self.peripherals.power.status();
                self.publish(&Telemetry::Power(status));
            }
            ScheduledAction::PublishLocalSensor => {
                if !self.profile.has_local_sensor() {
                    return;
                }
                match self.peripherals.sensor.read() {
                    Ok(sample) => {
                        self.publish(&Telemetry::LocalSensor(sample));
                    }
                    Err(e) => {
                        warn!("Local sensor read failed: {}", e);
                        self.peripherals.indicator.show_fault(&Fault::local_sensor_failed());
                    }
                }
            }
            ScheduledAction::Ping => {
                self.publish(&Telemetry::status("ping", now_ms));
            }
            ScheduledAction::ResyncClock => {
                if !self.peripherals.clock.synchronize() {
                    warn!("Clock resync could not be started");
                }
            }
        }
    }

    fn run_scan(&mut self, now_ms: u64) {
        if let Err(e) = self.scan.pump(now_ms) {
            self.on_scan_failure(e, now_ms);
        }
        match self.scan.state() {
            ScanState::Idle => {
                // Hold off retries while the previous failure is displayed
                if let Some(retry_at) = self.scan_retry_at {
                    if now_ms < retry_at {
                        return;
                    }
                    self.scan_retry_at = None;
                }
                let active = std::mem::take(&mut self.active_scan_requested);
                if let Err(e) = self.scan.start(active) {
                    self.on_scan_failure(e, now_ms);
                }
            }
            ScanState::Scanning { .. } => {}
            ScanState::Complete => {
                let Some(readings) = self.scan.drain() else {
                    return;
                };
                info!("Scan window closed with {} beacons", readings.len());
                self.pending_beacons
                    .extend(readings.into_iter().map(|captured| captured.reading));
            }
        }
    }

    fn on_scan_failure(&mut self, e: ScanError, now_ms: u64) {
        warn!("Scan failed: {}", e);
        let fault = Fault::scan_failed();
        self.peripherals.indicator.show_fault(&fault);
        self.scan_retry_at = Some(now_ms + fault.display_duration().as_millis() as u64);
    }

    fn publish_pending_beacons(&mut self) {
        for _ in 0..BEACONS_PER_POLL {
            let Some(reading) = self.pending_beacons.pop_front() else {
                return;
            };
            self.publish(&Telemetry::Beacon(reading));
        }
    }

    fn publish(&mut self, message: &Telemetry) -> bool {
        let p = &mut self.peripherals;
        let sent = self.publisher.publish(p.transport.as_mut(), p.clock.as_ref(), message);
        if !sent {
            warn!("Publish rejected for {}", message.topic(self.publisher.client_id()));
        }
        sent
    }
}
