//! tag-node - RFID/NFC reader node
//!
//! Polls a card reader, suppresses duplicate reads of the same tag and
//! publishes one JSON event per presentation to an MQTT topic.
//!
//! Module structure:
//! - `domain/` - Tag reads, events and the wire schema
//! - `io/` - Reader seam, simulated reader, MQTT transport
//! - `services/` - Acquisition, dedup, publisher, node loop
//! - `infra/` - Config, clocks, metrics, embedded broker

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tag_node::infra::{Config, Metrics, MonotonicClock};
use tag_node::io::{Scenario, SimulatedReader};
use tag_node::services::{ReaderNode, TagAcquisition, TagPublisher};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// RFID/NFC reader node publishing tag reads over MQTT
#[derive(Parser, Debug)]
#[command(name = "tag-node", version, about)]
struct Args {
    /// Path to TOML configuration file [default: $CONFIG_FILE or config/dev.toml]
    #[arg(short, long)]
    config: Option<String>,

    /// Presentation scenario for the simulated reader (overrides reader.scenario)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_logging(json: bool) {
    // RUST_LOG=debug shows every cycle transition
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    info!(git_hash = %env!("GIT_HASH"), "tag-node starting");

    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_from_path(&config_path)?;
    if let Some(scenario) = args.scenario {
        config = config.with_scenario(scenario);
    }

    info!(
        config_file = %config.config_file(),
        node_id = %config.node_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        poll_interval_ms = %config.poll_interval_ms(),
        auth_block = %config.auth_block(),
        scenario = %config.scenario(),
        "config_loaded"
    );

    if config.broker_enabled() {
        tag_node::infra::broker::start_local_broker(&config)?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let clock = MonotonicClock::new();

    // MQTT connection runs beside the poll loop
    let (transport, supervisor) = tag_node::io::mqtt::connect(&config, metrics.clone());
    let link_state = supervisor.subscribe();
    let supervisor_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        supervisor.run(supervisor_shutdown).await;
    });

    let scenario = Scenario::from_file(config.scenario())
        .with_context(|| format!("Cannot start simulated reader from {}", config.scenario()))?;
    info!(presentations = scenario.presentations.len(), loop_ms = ?scenario.loop_ms, "reader_scenario_loaded");
    let reader = SimulatedReader::new(scenario, clock);

    let acquisition =
        TagAcquisition::new(reader, config.auth_block(), config.auth_key(), metrics.clone());
    let publisher = TagPublisher::new(transport, config.mqtt_topic(), metrics.clone());
    let node = ReaderNode::new(
        acquisition,
        publisher,
        clock,
        Duration::from_millis(config.poll_interval_ms()),
        metrics.clone(),
    );

    // Periodic metrics summary
    let metrics_interval = config.metrics_interval_secs().max(1);
    let reporter_metrics = metrics.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            reporter_metrics.report().log();
            info!(state = %link_state.borrow().as_str(), "mqtt_link_state");
        }
    });

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    node.run(shutdown_rx).await;

    metrics.report().log();
    info!("tag-node shutdown complete");
    Ok(())
}
