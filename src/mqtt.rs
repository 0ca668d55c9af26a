//! Publish/subscribe transport backed by `rumqttc`.
//!
//! The rumqttc event loop runs in its own tokio task; the node loop only
//! sees non-blocking calls and a queue of inbound messages.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::models::InboundMessage;

const KEEP_ALIVE: Duration = Duration::from_secs(15);
const REQUEST_CAPACITY: usize = 64;
const INBOUND_QUEUE_DEPTH: usize = 32;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Messaging link used by the node.
pub trait Transport {
    /// Start connecting to the broker. Completion shows up in `is_connected`.
    fn connect(&mut self, client_id: &str, broker: SocketAddr);

    /// Service the link and collect anything received since the last call.
    fn service(&mut self) -> Vec<InboundMessage>;

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, topic: &str) -> bool;

    fn publish(&mut self, topic: &str, payload: &str) -> bool;
}

/// MQTT 3.1.1 client at QoS 0.
#[derive(Default)]
pub struct MqttTransport {
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for MqttTransport {
    fn connect(&mut self, client_id: &str, broker: SocketAddr) {
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);

        let mut options = MqttOptions::new(client_id, broker.ip().to_string(), broker.port());
        options.set_keep_alive(KEEP_ALIVE);
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let connected = Arc::clone(&self.connected);

        info!("MQTT connecting to {} as {}", broker, client_id);
        self.event_loop = Some(tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                        connected.store(true, Ordering::SeqCst);
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let message = InboundMessage {
                            topic: p.topic.clone(),
                            payload: String::from_utf8_lossy(&p.payload).into_owned(),
                        };
                        if tx.try_send(message).is_err() {
                            warn!("Inbound queue full, dropping message on {}", p.topic);
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("MQTT disconnected");
                        connected.store(false, Ordering::SeqCst);
                    }
                    Ok(event) => debug!("MQTT event: {:?}", event),
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        connected.store(false, Ordering::SeqCst);
                        sleep(RETRY_DELAY).await;
                    }
                }
            }
        }));
        self.client = Some(client);
        self.inbound = Some(rx);
    }

    fn service(&mut self) -> Vec<InboundMessage> {
        let mut received = Vec::new();
        if let Some(inbound) = self.inbound.as_mut() {
            while let Ok(message) = inbound.try_recv() {
                received.push(message);
            }
        }
        received
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        let Some(client) = self.client.as_ref() else {
            return false;
        };
        match client.try_subscribe(topic, QoS::AtMostOnce) {
            Ok(()) => true,
            Err(e) => {
                warn!("Subscribe to {} failed: {}", topic, e);
                false
            }
        }
    }

    fn publish(&mut self, topic: &str, payload: &str) -> bool {
        let Some(client) = self.client.as_ref() else {
            return false;
        };
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .is_ok()
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconnected_transport_refuses_traffic() {
        let mut transport = MqttTransport::new();
        assert!(!transport.is_connected());
        assert!(!transport.publish("env/ENV001/status", "{}"));
        assert!(!transport.subscribe("env/ALL/#"));
        assert!(transport.service().is_empty());
    }

    #[tokio::test]
    async fn connect_without_broker_stays_disconnected() {
        let mut transport = MqttTransport::new();
        transport.connect("ENV001", "127.0.0.1:9".parse().unwrap());
        sleep(Duration::from_millis(50)).await;
        assert!(!transport.is_connected());
        // Requests are queued locally even before the broker answers
        assert!(transport.publish("env/ENV001/status", "{}"));
    }
}
