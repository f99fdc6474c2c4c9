//! Read normalizer & publisher
//!
//! Turns accepted raw reads into wire events and hands them to the
//! transport. Delivery is fire-and-forget: a failed publish is logged and
//! dropped, retrying is the connection layer's job.

use crate::domain::event::{normalize, TagEvent, TagKind};
use crate::domain::types::RawRead;
use crate::infra::metrics::Metrics;
use crate::io::mqtt::EventTransport;
use crate::services::dedup::{should_suppress, DedupState};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport
    Delivered,
    /// Serialization or transport failure; the event is lost
    Failed,
}

/// What happened to one raw read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Suppressed(TagEvent),
    Published(TagEvent, PublishOutcome),
}

pub struct TagPublisher<T: EventTransport> {
    transport: T,
    topic: String,
    dedup: DedupState,
    metrics: Arc<Metrics>,
}

impl<T: EventTransport> TagPublisher<T> {
    pub fn new(transport: T, topic: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self::with_state(transport, topic, DedupState::new(), metrics)
    }

    /// Start from an existing dedup state
    pub fn with_state(
        transport: T,
        topic: impl Into<String>,
        dedup: DedupState,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { transport, topic: topic.into(), dedup, metrics }
    }

    pub fn dedup_state(&self) -> &DedupState {
        &self.dedup
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Normalize, dedup and publish one read observed at `now`
    pub fn handle(&mut self, raw: &RawRead, now: u64) -> ReadOutcome {
        let event = normalize(raw, now);

        if should_suppress(&event, &self.dedup, now) {
            self.metrics.record_suppressed();
            debug!(tag_id = %event.tag_id, "tag_suppressed");
            return ReadOutcome::Suppressed(event);
        }

        // Recorded before publishing so a failed publish is not retried as a new read
        self.dedup.record(&event.tag_id, now);

        info!(tag_id = %event.tag_id, tipo = %event.kind.as_str(), timestamp = event.observed_at, "tag_detected");
        if event.kind == TagKind::Nfc {
            debug!(tag_id = %event.tag_id, nfc_data = ?event.nfc_data, "tag_nfc_data");
        }

        let outcome = self.publish(&event);
        ReadOutcome::Published(event, outcome)
    }

    /// Serialize and hand off one event
    pub fn publish(&self, event: &TagEvent) -> PublishOutcome {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                self.metrics.record_publish_failed();
                warn!(tag_id = %event.tag_id, error = %e, "tag_serialize_failed");
                return PublishOutcome::Failed;
            }
        };

        match self.transport.publish(&self.topic, json.into_bytes()) {
            Ok(()) => {
                self.metrics.record_published();
                info!(tag_id = %event.tag_id, topic = %self.topic, "tag_published");
                PublishOutcome::Delivered
            }
            Err(e) => {
                self.metrics.record_publish_failed();
                warn!(tag_id = %event.tag_id, topic = %self.topic, error = %e, "tag_publish_failed");
                PublishOutcome::Failed
            }
        }
    }
}
