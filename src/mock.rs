//! In-memory collaborators for driving the node without hardware.
//!
//! Every mock is a cheap handle over shared state: keep a clone to inspect
//! or steer it after boxing the other clone into the node.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;

use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::bluetooth::scanner::{Radio, RadioEvent};
use crate::board::{ButtonSource, LocalSensor, PowerMonitor};
use crate::clock::Clock;
use crate::connectivity::{LinkMonitor, Resolver};
use crate::error::SensorError;
use crate::indicator::{Fault, Indicator};
use crate::models::{AdvertisementRecord, ButtonEvent, InboundMessage, LocalSample, PowerStatus};
use crate::mqtt::Transport;

struct RadioState {
    events: mpsc::Sender<RadioEvent>,
    starts: Vec<(Duration, bool)>,
    stops: usize,
    refuse: bool,
}

#[derive(Clone)]
pub struct MockRadio {
    state: Rc<RefCell<RadioState>>,
}

impl MockRadio {
    pub fn new(events: mpsc::Sender<RadioEvent>) -> Self {
        Self {
            state: Rc::new(RefCell::new(RadioState {
                events,
                starts: Vec::new(),
                stops: 0,
                refuse: false,
            })),
        }
    }

    pub fn refuse_scans(&self, refuse: bool) {
        self.state.borrow_mut().refuse = refuse;
    }

    pub fn starts(&self) -> Vec<(Duration, bool)> {
        self.state.borrow().starts.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.borrow().stops
    }

    pub fn discover(&self, record: AdvertisementRecord) {
        let _ = self.state.borrow().events.try_send(RadioEvent::Discovered(record));
    }

    pub fn complete(&self) {
        let _ = self.state.borrow().events.try_send(RadioEvent::ScanComplete);
    }

    /// Report that the accepted scan could not run.
    pub fn fail(&self) {
        let _ = self.state.borrow().events.try_send(RadioEvent::ScanFailed);
    }
}

impl Radio for MockRadio {
    fn start_scan(&mut self, duration: Duration, active: bool) -> bool {
        let mut state = self.state.borrow_mut();
        if state.refuse {
            return false;
        }
        state.starts.push((duration, active));
        true
    }

    fn stop_scan(&mut self) {
        self.state.borrow_mut().stops += 1;
    }
}

#[derive(Default)]
struct TransportState {
    connected: bool,
    refuse_publish: bool,
    connects: Vec<(String, SocketAddr)>,
    subscriptions: Vec<String>,
    published: Vec<(String, String)>,
    inbound: VecDeque<InboundMessage>,
}

/// Records traffic; publishes on a subscribed topic loop back as inbound
/// messages, as they do on a real broker.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.borrow_mut().connected = connected;
    }

    pub fn refuse_publish(&self, refuse: bool) {
        self.state.borrow_mut().refuse_publish = refuse;
    }

    pub fn deliver(&self, topic: &str, payload: &str) {
        self.state.borrow_mut().inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    pub fn connects(&self) -> Vec<(String, SocketAddr)> {
        self.state.borrow().connects.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.borrow().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.state.borrow().published.clone()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.state
            .borrow()
            .published
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn clear_published(&self) {
        self.state.borrow_mut().published.clear();
    }
}

fn topic_matches(filter: &str, topic: &str) -> bool {
    match filter.strip_suffix('#') {
        Some(prefix) => topic.starts_with(prefix),
        None => filter == topic,
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, client_id: &str, broker: SocketAddr) {
        self.state
            .borrow_mut()
            .connects
            .push((client_id.to_string(), broker));
    }

    fn service(&mut self) -> Vec<InboundMessage> {
        self.state.borrow_mut().inbound.drain(..).collect()
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return false;
        }
        state.subscriptions.push(topic.to_string());
        true
    }

    fn publish(&mut self, topic: &str, payload: &str) -> bool {
        let mut state = self.state.borrow_mut();
        if state.refuse_publish {
            return false;
        }
        state.published.push((topic.to_string(), payload.to_string()));
        if state.subscriptions.iter().any(|f| topic_matches(f, topic)) {
            state.inbound.push_back(InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_string(),
            });
        }
        true
    }
}

#[derive(Clone)]
pub struct MockLink {
    up: Rc<RefCell<bool>>,
}

impl MockLink {
    pub fn new(up: bool) -> Self {
        Self {
            up: Rc::new(RefCell::new(up)),
        }
    }

    pub fn set_up(&self, up: bool) {
        *self.up.borrow_mut() = up;
    }
}

impl LinkMonitor for MockLink {
    fn is_up(&mut self) -> bool {
        *self.up.borrow()
    }
}

#[derive(Default)]
struct ResolverState {
    answer: Option<IpAddr>,
    queries: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MockResolver {
    state: Rc<RefCell<ResolverState>>,
}

impl MockResolver {
    pub fn new(answer: Option<IpAddr>) -> Self {
        let resolver = Self::default();
        resolver.set_answer(answer);
        resolver
    }

    pub fn set_answer(&self, answer: Option<IpAddr>) {
        self.state.borrow_mut().answer = answer;
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.borrow().queries.clone()
    }
}

impl Resolver for MockResolver {
    fn resolve(&mut self, host: &str) -> Option<IpAddr> {
        let mut state = self.state.borrow_mut();
        state.queries.push(host.to_string());
        state.answer
    }
}

struct ClockState {
    rtc: String,
    syncs: usize,
    fail: bool,
}

#[derive(Clone)]
pub struct MockClock {
    state: Rc<RefCell<ClockState>>,
}

impl MockClock {
    pub fn new(rtc: &str) -> Self {
        Self {
            state: Rc::new(RefCell::new(ClockState {
                rtc: rtc.to_string(),
                syncs: 0,
                fail: false,
            })),
        }
    }

    pub fn fail_sync(&self, fail: bool) {
        self.state.borrow_mut().fail = fail;
    }

    pub fn sync_count(&self) -> usize {
        self.state.borrow().syncs
    }
}

impl Clock for MockClock {
    fn rtc(&self) -> String {
        self.state.borrow().rtc.clone()
    }

    fn synchronize(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        state.syncs += 1;
        !state.fail
    }
}

/// Returns the configured sample, or `NotConfigured` when there is none.
#[derive(Clone)]
pub struct MockSensor {
    state: Rc<RefCell<(Option<LocalSample>, usize)>>,
}

impl MockSensor {
    pub fn new(sample: Option<LocalSample>) -> Self {
        Self {
            state: Rc::new(RefCell::new((sample, 0))),
        }
    }

    pub fn set_sample(&self, sample: Option<LocalSample>) {
        self.state.borrow_mut().0 = sample;
    }

    pub fn reads(&self) -> usize {
        self.state.borrow().1
    }
}

impl LocalSensor for MockSensor {
    fn read(&mut self) -> Result<LocalSample, SensorError> {
        let mut state = self.state.borrow_mut();
        state.1 += 1;
        state.0.ok_or(SensorError::NotConfigured)
    }
}

#[derive(Clone, Default)]
pub struct MockPower(pub PowerStatus);

impl PowerMonitor for MockPower {
    fn status(&mut self) -> PowerStatus {
        self.0
    }
}

#[derive(Clone, Default)]
pub struct MockButtons {
    queue: Rc<RefCell<Vec<ButtonEvent>>>,
}

impl MockButtons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, event: ButtonEvent) {
        self.queue.borrow_mut().push(event);
    }
}

impl ButtonSource for MockButtons {
    fn poll(&mut self) -> Vec<ButtonEvent> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }
}

#[derive(Default)]
struct IndicatorState {
    faults: Vec<Fault>,
    led: Option<bool>,
}

#[derive(Clone, Default)]
pub struct RecordingIndicator {
    state: Rc<RefCell<IndicatorState>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> Vec<Fault> {
        self.state.borrow().faults.clone()
    }

    pub fn led(&self) -> Option<bool> {
        self.state.borrow().led
    }
}

impl Indicator for RecordingIndicator {
    fn show_fault(&mut self, fault: &Fault) {
        self.state.borrow_mut().faults.push(fault.clone());
    }

    fn set_led(&mut self, on: bool) {
        self.state.borrow_mut().led = Some(on);
    }
}
