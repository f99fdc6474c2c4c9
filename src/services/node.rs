//! Reader node loop
//!
//! One task, one poll per tick: query the reader, then normalize, dedup and
//! publish whatever it produced. The MQTT connection is supervised by a
//! separate task, so a reconnect never stalls polling; the loop is the
//! only owner of the dedup state.

use crate::domain::event::TagEvent;
use crate::infra::clock::Clock;
use crate::infra::metrics::Metrics;
use crate::io::mqtt::EventTransport;
use crate::io::reader::CardReader;
use crate::services::acquisition::TagAcquisition;
use crate::services::publisher::{PublishOutcome, ReadOutcome, TagPublisher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Floor for the poll period; a zero period would spin the loop
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Terminal state of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No card (or selection failed)
    Idle,
    Suppressed(TagEvent),
    Published(TagEvent, PublishOutcome),
}

pub struct ReaderNode<R: CardReader, T: EventTransport, C: Clock> {
    acquisition: TagAcquisition<R>,
    publisher: TagPublisher<T>,
    clock: C,
    poll_interval: Duration,
    metrics: Arc<Metrics>,
}

impl<R: CardReader, T: EventTransport, C: Clock> ReaderNode<R, T, C> {
    pub fn new(
        acquisition: TagAcquisition<R>,
        publisher: TagPublisher<T>,
        clock: C,
        poll_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            acquisition,
            publisher,
            clock,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            metrics,
        }
    }

    pub fn acquisition(&self) -> &TagAcquisition<R> {
        &self.acquisition
    }

    pub fn publisher(&self) -> &TagPublisher<T> {
        &self.publisher
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run one full cycle; the card is already released when this returns
    pub async fn poll_once(&mut self) -> CycleOutcome {
        let started = Instant::now();

        let outcome = match self.acquisition.poll().await {
            None => CycleOutcome::Idle,
            Some(raw) => {
                // Timestamp taken at normalize time, after the card was read
                let now = self.clock.now_ms();
                match self.publisher.handle(&raw, now) {
                    ReadOutcome::Suppressed(event) => CycleOutcome::Suppressed(event),
                    ReadOutcome::Published(event, outcome) => {
                        CycleOutcome::Published(event, outcome)
                    }
                }
            }
        };

        self.metrics.record_poll(started.elapsed().as_micros() as u64);
        outcome
    }

    /// Poll until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            topic = %self.publisher.topic(),
            poll_interval_ms = %self.poll_interval.as_millis(),
            "reader_node_started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reader_node_shutdown");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }
}
