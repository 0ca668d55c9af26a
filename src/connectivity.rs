//! Network bring-up sequence: link, broker resolution, transport connect and
//! subscription, one attempt per call.

use std::net::{IpAddr, SocketAddr};

use log::{info, warn};
use tokio::sync::oneshot;

use crate::clock::Clock;
use crate::mqtt::Transport;
use crate::telemetry::{broadcast_subscription, node_subscription, Telemetry, TelemetryPublisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    LinkDown,
    ResolvingBroker,
    ConnectingTransport,
    Subscribing,
    Ready,
}

/// Reports whether the network link is associated.
pub trait LinkMonitor {
    fn is_up(&mut self) -> bool;
}

/// Non-blocking broker name resolution.
pub trait Resolver {
    /// Returns the address once known; `None` while still pending or failed.
    fn resolve(&mut self, host: &str) -> Option<IpAddr>;
}

/// Collaborators the bring-up sequence drives, borrowed for one step.
pub struct Network<'a> {
    pub link: &'a mut dyn LinkMonitor,
    pub resolver: &'a mut dyn Resolver,
    pub transport: &'a mut dyn Transport,
    pub clock: &'a mut dyn Clock,
}

pub struct ConnectivityStateMachine {
    state: ConnectionState,
    client_id: String,
    broker_host: String,
    broker_port: u16,
    broker: Option<SocketAddr>,
}

impl ConnectivityStateMachine {
    pub fn new(client_id: impl Into<String>, broker_host: impl Into<String>, broker_port: u16) -> Self {
        Self {
            state: ConnectionState::LinkDown,
            client_id: client_id.into(),
            broker_host: broker_host.into(),
            broker_port,
            broker: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn broker(&self) -> Option<SocketAddr> {
        self.broker
    }

    /// The transport event loop needs servicing once a connect was issued.
    pub fn services_transport(&self) -> bool {
        self.state >= ConnectionState::Subscribing
    }

    /// Make one attempt at the current stage. Returns the new state when
    /// the machine advanced.
    pub fn step(
        &mut self,
        net: &mut Network<'_>,
        publisher: &TelemetryPublisher,
        now_ms: u64,
    ) -> Option<ConnectionState> {
        let next = match self.state {
            ConnectionState::LinkDown => {
                if !net.link.is_up() {
                    return None;
                }
                info!("Network link up");
                if net.clock.synchronize() {
                    info!("Clock sync started: rtc={}", net.clock.rtc());
                } else {
                    warn!("Clock sync could not be started");
                }
                ConnectionState::ResolvingBroker
            }
            ConnectionState::ResolvingBroker => {
                let ip = net.resolver.resolve(&self.broker_host)?;
                let broker = SocketAddr::new(ip, self.broker_port);
                info!("Broker {} resolved to {}", self.broker_host, broker);
                self.broker = Some(broker);
                ConnectionState::ConnectingTransport
            }
            ConnectionState::ConnectingTransport => {
                let broker = self.broker?;
                info!("clientId={}", self.client_id);
                net.transport.connect(&self.client_id, broker);
                ConnectionState::Subscribing
            }
            ConnectionState::Subscribing => {
                if !net.transport.is_connected() {
                    return None;
                }
                net.transport.subscribe(&node_subscription(&self.client_id));
                net.transport.subscribe(broadcast_subscription());
                publisher.publish(net.transport, net.clock, &Telemetry::status("hello", now_ms));
                ConnectionState::Ready
            }
            ConnectionState::Ready => return None,
        };
        self.state = next;
        Some(next)
    }
}

/// Resolves host names on the tokio blocking pool.
///
/// A lookup is started on the first call and polled on the following ones;
/// a failed lookup is retried on the next call.
#[derive(Default)]
pub struct TokioResolver {
    pending: Option<oneshot::Receiver<Option<IpAddr>>>,
}

impl TokioResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Resolver for TokioResolver {
    fn resolve(&mut self, host: &str) -> Option<IpAddr> {
        let Some(pending) = self.pending.as_mut() else {
            let (tx, rx) = oneshot::channel();
            let target = format!("{host}:0");
            tokio::spawn(async move {
                let address = match tokio::net::lookup_host(target.as_str()).await {
                    Ok(mut addrs) => addrs.next().map(|a| a.ip()),
                    Err(e) => {
                        warn!("Name resolution for {} failed: {}", target, e);
                        None
                    }
                };
                let _ = tx.send(address);
            });
            self.pending = Some(rx);
            return None;
        };

        match pending.try_recv() {
            Ok(address) => {
                self.pending = None;
                address
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.pending = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClock, MockLink, MockResolver, MockTransport};

    struct Harness {
        link: MockLink,
        resolver: MockResolver,
        transport: MockTransport,
        clock: MockClock,
        publisher: TelemetryPublisher,
        machine: ConnectivityStateMachine,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                link: MockLink::new(false),
                resolver: MockResolver::new(None),
                transport: MockTransport::new(),
                clock: MockClock::new("2024-05-01_12:00:00"),
                publisher: TelemetryPublisher::new("ENV002"),
                machine: ConnectivityStateMachine::new("ENV002", "octopi.local", 1883),
            }
        }

        fn step(&mut self, now_ms: u64) -> Option<ConnectionState> {
            let mut net = Network {
                link: &mut self.link,
                resolver: &mut self.resolver,
                transport: &mut self.transport,
                clock: &mut self.clock,
            };
            self.machine.step(&mut net, &self.publisher, now_ms)
        }
    }

    #[test]
    fn waits_for_link_then_syncs_clock() {
        let mut h = Harness::new();
        assert_eq!(h.step(0), None);
        assert_eq!(h.machine.state(), ConnectionState::LinkDown);
        assert_eq!(h.clock.sync_count(), 0);

        h.link.set_up(true);
        assert_eq!(h.step(1), Some(ConnectionState::ResolvingBroker));
        assert_eq!(h.clock.sync_count(), 1);
    }

    #[test]
    fn failed_clock_sync_is_not_fatal() {
        let mut h = Harness::new();
        h.link.set_up(true);
        h.clock.fail_sync(true);
        assert_eq!(h.step(0), Some(ConnectionState::ResolvingBroker));
    }

    #[test]
    fn never_passes_resolution_without_an_address() {
        let mut h = Harness::new();
        h.link.set_up(true);
        h.step(0);
        for now in 1..50 {
            assert_eq!(h.step(now), None);
        }
        assert_eq!(h.machine.state(), ConnectionState::ResolvingBroker);
        assert_eq!(h.machine.broker(), None);
        assert!(h.transport.connects().is_empty());

        h.resolver.set_answer(Some("192.168.1.20".parse().unwrap()));
        assert_eq!(h.step(50), Some(ConnectionState::ConnectingTransport));
        assert_eq!(h.machine.broker(), Some("192.168.1.20:1883".parse().unwrap()));
        assert_eq!(h.resolver.queries(), vec!["octopi.local".to_string(); 50]);
    }

    #[test]
    fn connect_then_subscribe_then_hello() {
        let mut h = Harness::new();
        h.link.set_up(true);
        h.resolver.set_answer(Some("10.0.0.5".parse().unwrap()));
        h.step(0);
        h.step(1);
        assert!(!h.machine.services_transport());

        assert_eq!(h.step(2), Some(ConnectionState::Subscribing));
        assert_eq!(
            h.transport.connects(),
            vec![("ENV002".to_string(), "10.0.0.5:1883".parse().unwrap())]
        );
        assert!(h.machine.services_transport());

        // Not connected yet: no subscriptions and no hello
        assert_eq!(h.step(3), None);
        assert!(h.transport.subscriptions().is_empty());
        assert!(h.transport.published().is_empty());

        h.transport.set_connected(true);
        assert_eq!(h.step(4), Some(ConnectionState::Ready));
        assert_eq!(
            h.transport.subscriptions(),
            vec!["env/ENV002/#".to_string(), "env/ALL/#".to_string()]
        );
        let published = h.transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "env/ENV002/status");
        assert_eq!(
            published[0].1,
            r#"{"clientId":"ENV002","rtc":"2024-05-01_12:00:00","status":{"status":"hello","millis":4}}"#
        );

        assert_eq!(h.step(5), None);
        assert_eq!(h.machine.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn tokio_resolver_polls_until_answered() {
        let mut resolver = TokioResolver::new();
        assert_eq!(resolver.resolve("127.0.0.1"), None);

        let mut answer = None;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            answer = resolver.resolve("127.0.0.1");
            if answer.is_some() {
                break;
            }
        }
        assert_eq!(answer, Some(IpAddr::from([127, 0, 0, 1])));
    }
}
