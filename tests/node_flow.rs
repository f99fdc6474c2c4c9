//! End-to-end poll cycles: simulated reader -> node -> recording transport

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tag_node::domain::{MifareKey, TagEvent, TagKind};
use tag_node::infra::{ManualClock, Metrics};
use tag_node::io::{EventTransport, Scenario, SimulatedReader, TransportError};
use tag_node::services::{CycleOutcome, PublishOutcome, ReaderNode, TagAcquisition, TagPublisher};
use tokio::sync::watch;

/// Transport double recording every accepted payload
#[derive(Clone, Default)]
struct RecordingTransport {
    connected: Arc<Mutex<bool>>,
    sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl RecordingTransport {
    fn connected() -> Self {
        let transport = Self::default();
        transport.set_connected(true);
        transport
    }

    fn set_connected(&self, connected: bool) {
        *self.connected.lock() = connected;
    }

    fn documents(&self) -> Vec<serde_json::Value> {
        self.sent.lock().iter().map(|(_, payload)| serde_json::from_slice(payload).unwrap()).collect()
    }

    fn events(&self) -> Vec<TagEvent> {
        self.sent.lock().iter().map(|(_, payload)| TagEvent::from_json(payload).unwrap()).collect()
    }
}

impl EventTransport for RecordingTransport {
    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.sent.lock().push((topic.to_string(), payload));
        Ok(())
    }
}

type TestNode = ReaderNode<SimulatedReader<ManualClock>, RecordingTransport, ManualClock>;

struct Harness {
    node: TestNode,
    clock: ManualClock,
    transport: RecordingTransport,
    metrics: Arc<Metrics>,
}

impl Harness {
    fn new(scenario: &str) -> Self {
        Self::with_transport(scenario, RecordingTransport::connected())
    }

    fn with_transport(scenario: &str, transport: RecordingTransport) -> Self {
        Self::build(scenario, transport, Duration::from_millis(10))
    }

    fn build(scenario: &str, transport: RecordingTransport, poll_interval: Duration) -> Self {
        let clock = ManualClock::new(0);
        let metrics = Arc::new(Metrics::new());
        let reader = SimulatedReader::new(Scenario::from_toml_str(scenario).unwrap(), clock.clone());
        let acquisition = TagAcquisition::new(reader, 4, MifareKey::DEFAULT, metrics.clone());
        let publisher = TagPublisher::new(transport.clone(), "rfid/tags", metrics.clone());
        let node = ReaderNode::new(
            acquisition,
            publisher,
            clock.clone(),
            poll_interval,
            metrics.clone(),
        );
        Self { node, clock, transport, metrics }
    }

    async fn poll_at(&mut self, t: u64) -> CycleOutcome {
        self.clock.set(t);
        self.node.poll_once().await
    }
}

const RFID_TAG: &str = r#"
[[presentation]]
at_ms = 0
hold_ms = 10000
uid = "04a1223f"
sak = 0x00
"#;

#[tokio::test]
async fn test_rfid_tag_document() {
    let mut h = Harness::new(RFID_TAG);
    let outcome = h.poll_at(250).await;

    assert!(matches!(outcome, CycleOutcome::Published(_, PublishOutcome::Delivered)));
    assert_eq!(
        h.transport.documents(),
        vec![serde_json::json!({"tag_id": "04a1223f", "tipo": "RFID", "timestamp": 250})]
    );
    assert_eq!(h.transport.sent.lock()[0].0, "rfid/tags");
    assert!(h.node.acquisition().reader().is_released());
}

#[tokio::test]
async fn test_nfc_tag_document() {
    let mut h = Harness::new(
        r#"
[[presentation]]
at_ms = 0
hold_ms = 1000
uid = "04a1223f"
sak = 0x08
block = "0102030405060708090a0b0c0d0e0f10"
"#,
    );
    h.poll_at(5).await;

    let docs = h.transport.documents();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["tipo"], "NFC");
    assert_eq!(docs[0]["nfc_data"], "0102030405060708090a0b0c0d0e0f10");
    assert_eq!(docs[0]["tag_id"], "04a1223f");
    assert_eq!(docs[0]["timestamp"], 5);
}

#[tokio::test]
async fn test_auth_failure_publishes_rfid() {
    let mut h = Harness::new(
        r#"
[[presentation]]
at_ms = 0
hold_ms = 1000
uid = "04a1223f"
sak = 0x08
block = "0102030405060708090a0b0c0d0e0f10"
key = "000000000000"
"#,
    );
    h.poll_at(5).await;

    let events = h.transport.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, TagKind::Rfid);
    assert_eq!(events[0].nfc_data, None);
    assert!(h.transport.documents()[0].get("nfc_data").is_none());
    assert!(h.node.acquisition().reader().is_released());
}

#[tokio::test]
async fn test_suppression_example() {
    let mut h = Harness::new(RFID_TAG);

    assert!(matches!(h.poll_at(0).await, CycleOutcome::Published(..)));
    assert!(matches!(h.poll_at(1500).await, CycleOutcome::Suppressed(_)));
    assert!(matches!(h.poll_at(3600).await, CycleOutcome::Published(..)));

    let stamps: Vec<u64> = h.transport.events().iter().map(|e| e.observed_at).collect();
    assert_eq!(stamps, vec![0, 3600]);
}

#[tokio::test]
async fn test_burst_within_window_publishes_once() {
    let mut h = Harness::new(RFID_TAG);
    for t in (0..=3000).step_by(50) {
        h.poll_at(t).await;
    }
    assert_eq!(h.transport.events().len(), 1);
    assert_eq!(h.metrics.suppressed_total(), 60);

    assert!(matches!(h.poll_at(3001).await, CycleOutcome::Published(..)));
    assert_eq!(h.transport.events().len(), 2);
}

#[tokio::test]
async fn test_distinct_tags_not_suppressed() {
    let mut h = Harness::new(
        r#"
[[presentation]]
at_ms = 0
hold_ms = 20
uid = "aaaaaaaa"

[[presentation]]
at_ms = 20
hold_ms = 20
uid = "bbbbbbbb"

[[presentation]]
at_ms = 40
hold_ms = 20
uid = "aaaaaaaa"
"#,
    );
    h.poll_at(10).await;
    h.poll_at(25).await;
    h.poll_at(45).await;

    let ids: Vec<String> = h.transport.events().into_iter().map(|e| e.tag_id).collect();
    assert_eq!(ids, vec!["aaaaaaaa", "bbbbbbbb", "aaaaaaaa"]);
}

#[tokio::test]
async fn test_empty_field_is_idle() {
    let mut h = Harness::new(RFID_TAG);
    assert_eq!(h.poll_at(10_001).await, CycleOutcome::Idle);
    assert!(h.transport.events().is_empty());
    assert_eq!(h.node.acquisition().reader().halt_count(), 0);
}

#[tokio::test]
async fn test_publish_while_disconnected_is_lost() {
    let transport = RecordingTransport::default();
    let mut h = Harness::with_transport(RFID_TAG, transport.clone());

    assert!(matches!(h.poll_at(0).await, CycleOutcome::Published(_, PublishOutcome::Failed)));
    transport.set_connected(true);

    // Still inside the window of the failed read: not retried
    assert!(matches!(h.poll_at(1000).await, CycleOutcome::Suppressed(_)));
    assert!(h.transport.events().is_empty());
    assert_eq!(h.metrics.publish_failed_total(), 1);

    assert!(matches!(h.poll_at(3500).await, CycleOutcome::Published(_, PublishOutcome::Delivered)));
    assert_eq!(h.metrics.published_total(), 1);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = Harness::new(RFID_TAG);
    let transport = h.transport.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(h.node.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    // Clock never moved: the tag was seen repeatedly but published once
    assert_eq!(transport.events().len(), 1);
}

#[tokio::test]
async fn test_zero_poll_interval_runs_at_floor() {
    let h = Harness::build(RFID_TAG, RecordingTransport::connected(), Duration::ZERO);
    assert_eq!(h.node.poll_interval(), Duration::from_millis(1));

    let transport = h.transport.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(h.node.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert_eq!(transport.events().len(), 1);
}
