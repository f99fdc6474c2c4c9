//! Tag Watch - subscribes to the tag topic and logs decoded events
//!
//! Diagnostic consumer for reader nodes. Every message is decoded with the
//! same schema the node publishes; malformed documents are logged and
//! skipped.
//!
//! Usage:
//!   tag-watch --config config/dev.toml
//!   tag-watch --topic 'rfid/#'

use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tag_node::domain::{TagEvent, TagKind};
use tag_node::infra::Config;
use tag_node::io::mqtt::client_id;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Tag Watch - log tag events published by reader nodes
#[derive(Parser, Debug)]
#[command(name = "tag-watch", version, about, long_about = None)]
struct Args {
    /// Path to TOML configuration file, mqtt section is used
    /// [default: $CONFIG_FILE or config/dev.toml]
    #[arg(short, long)]
    config: Option<String>,

    /// Topic filter to subscribe to; defaults to mqtt.topic from config
    #[arg(short, long)]
    topic: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load_from_path(&config_path)?;
    let topic = args.topic.unwrap_or_else(|| config.mqtt_topic().to_string());

    loop {
        if let Err(e) = watch_loop(&config, &topic).await {
            error!(error = %e, "tag_watch_error");
        }
        warn!(retry_in_ms = config.reconnect_backoff_ms(), "tag_watch_reconnecting");
        tokio::time::sleep(Duration::from_millis(config.reconnect_backoff_ms())).await;
    }
}

async fn watch_loop(
    config: &Config,
    topic: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions =
        MqttOptions::new(client_id("tag-watch"), config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs()));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 16);
    client.subscribe(topic, QoS::AtMostOnce).await?;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => match TagEvent::from_json(&publish.payload) {
                Ok(event) => log_event(&publish.topic, &event),
                Err(e) => {
                    warn!(
                        topic = %publish.topic,
                        error = %format!("{:#}", e),
                        payload = %String::from_utf8_lossy(&publish.payload),
                        "tag_event_invalid"
                    );
                }
            },
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(host = %config.mqtt_host(), port = %config.mqtt_port(), topic = %topic, "tag_watch_connected");
            }
            Ok(_) => {}
            Err(e) => return Err(Box::new(e)),
        }
    }
}

fn log_event(topic: &str, event: &TagEvent) {
    match event.kind {
        TagKind::Rfid => info!(
            topic = %topic,
            tag_id = %event.tag_id,
            tipo = %event.kind.as_str(),
            node_ms = event.observed_at,
            "tag_event"
        ),
        TagKind::Nfc => info!(
            topic = %topic,
            tag_id = %event.tag_id,
            tipo = %event.kind.as_str(),
            node_ms = event.observed_at,
            nfc_data = %event.nfc_data.as_deref().unwrap_or_default(),
            "tag_event"
        ),
    }
}
