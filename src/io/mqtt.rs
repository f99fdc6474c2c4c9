//! MQTT transport for tag events
//!
//! The rumqttc event loop (connect, keepalive pings, reconnect) is owned by
//! `ConnectionSupervisor`, which runs as its own task and reports the
//! connection state over a watch channel. Publishing never waits for a
//! reconnect: while the link is down `publish` fails and the event is lost.

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, trace, warn};
use uuid::Uuid;

/// Request queue between client handle and event loop
const REQUEST_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No broker connection; the message is dropped
    Disconnected,
    /// Client refused the publish (request queue full or closed)
    Rejected(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Disconnected => f.write_str("not connected to broker"),
            TransportError::Rejected(reason) => write!(f, "publish rejected: {}", reason),
        }
    }
}

impl std::error::Error for TransportError {}

/// Fire-and-forget message sink
pub trait EventTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Hand one payload to the transport without waiting for delivery
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Client id as `<prefix>-<4 random hex digits>`
pub fn client_id(prefix: &str) -> String {
    let id = Uuid::now_v7().simple().to_string();
    format!("{}-{}", prefix, &id[id.len() - 4..])
}

/// Publishing half of the MQTT connection
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
}

impl EventTransport for MqttTransport {
    fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

/// Owns the event loop; reconnects with a fixed backoff, forever
pub struct ConnectionSupervisor {
    eventloop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    backoff: Duration,
    client_id: String,
    metrics: Arc<Metrics>,
}

/// Build the MQTT client. Nothing touches the network until the
/// supervisor runs.
pub fn connect(config: &Config, metrics: Arc<Metrics>) -> (MqttTransport, ConnectionSupervisor) {
    let client_id = client_id(config.mqtt_client_id_prefix());
    let mut mqttoptions = MqttOptions::new(&client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs()));
    mqttoptions.set_clean_session(true);

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, eventloop) = AsyncClient::new(mqttoptions, REQUEST_CAPACITY);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

    let transport = MqttTransport { client, state: state_rx };
    let supervisor = ConnectionSupervisor {
        eventloop,
        state_tx,
        backoff: Duration::from_millis(config.reconnect_backoff_ms()),
        client_id,
        metrics,
    };
    (transport, supervisor)
}

impl ConnectionSupervisor {
    /// Connection state updates, for tasks that want to observe the link
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = %previous.as_str(), to = %state.as_str(), "mqtt_state_changed");
        }
    }

    /// Drive the event loop until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(client_id = %self.client_id, backoff_ms = %self.backoff.as_millis(), "mqtt_supervisor_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_shutdown");
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                }
                result = self.eventloop.poll() => {
                    match result {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            self.metrics.record_connected();
                            info!(code = ?ack.code, "mqtt_connected");
                            self.set_state(ConnectionState::Connected);
                        }
                        Ok(Event::Incoming(Packet::PingResp)) => {
                            trace!("mqtt_ping_ok");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            self.metrics.record_connection_error();
                            self.set_state(ConnectionState::Disconnected);
                            warn!(
                                error = %e,
                                retry_in_ms = %self.backoff.as_millis(),
                                "mqtt_connection_failed"
                            );
                            // The next poll() reconnects
                            tokio::select! {
                                _ = tokio::time::sleep(self.backoff) => {}
                                _ = shutdown.changed() => {}
                            }
                            if *shutdown.borrow() {
                                info!("mqtt_shutdown");
                                return;
                            }
                            self.set_state(ConnectionState::Connecting);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_client_id_format() {
        let id = client_id("ESP32Client");
        let suffix = id.strip_prefix("ESP32Client-").unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_publish_rejected_before_connack() {
        let (transport, supervisor) = connect(&Config::default(), Arc::new(Metrics::new()));
        let state = supervisor.subscribe();
        assert_eq!(*state.borrow(), ConnectionState::Connecting);
        assert!(!transport.is_connected());
        assert_eq!(
            transport.publish("rfid/tags", b"{}".to_vec()),
            Err(TransportError::Disconnected)
        );
    }

    /// Config pointing at a local port nothing listens on
    fn unreachable_config(backoff_ms: u64) -> Config {
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[mqtt]\nhost = \"127.0.0.1\"\nport = {}\nreconnect_backoff_ms = {}\n",
            port, backoff_ms
        )
        .unwrap();
        file.flush().unwrap();
        Config::from_file(file.path()).unwrap()
    }

    #[tokio::test]
    async fn test_supervisor_retries_forever_with_fixed_backoff() {
        let metrics = Arc::new(Metrics::new());
        let (transport, supervisor) = connect(&unreachable_config(100), metrics.clone());
        let mut state = supervisor.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(supervisor.run(shutdown_rx));

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!transport.is_connected());
        assert_eq!(
            transport.publish("rfid/tags", b"{}".to_vec()),
            Err(TransportError::Disconnected)
        );

        let first = metrics.report().connection_errors_total;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let errors = metrics.report().connection_errors_total - first;

        // ~one attempt per 100 ms backoff: keeps retrying, never spins
        assert!(errors >= 3, "expected repeated reconnects, got {}", errors);
        assert!(errors <= 12, "backoff not applied, got {} errors", errors);
        assert_eq!(metrics.report().connects_total, 0);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let metrics = Arc::new(Metrics::new());
        let (_transport, supervisor) = connect(&unreachable_config(60_000), metrics.clone());
        let mut state = supervisor.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(supervisor.run(shutdown_rx));

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(metrics.report().connection_errors_total, 1);

        // Supervisor is now inside the 60 s backoff sleep
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Disconnected.to_string(), "not connected to broker");
        assert_eq!(
            TransportError::Rejected("queue full".to_string()).to_string(),
            "publish rejected: queue full"
        );
    }
}
