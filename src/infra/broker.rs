//! Embedded MQTT broker (rumqttd) for bench setups without a broker

use crate::infra::config::Config as AppConfig;
use anyhow::Context;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

/// Start the in-process broker on a dedicated thread.
///
/// Only the bind address is validated here; a broker that fails to start
/// later is logged from its own thread.
pub fn start_local_broker(app_config: &AppConfig) -> anyhow::Result<()> {
    let addr_str = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    let listen: SocketAddr = addr_str
        .parse()
        .with_context(|| format!("Invalid broker bind address {}", addr_str))?;

    let router = RouterConfig {
        max_segment_size: 1024 * 1024,
        max_segment_count: 4,
        max_connections: 64,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                // Tag events are well under 1 KiB.
                max_payload_size: 4096,
                max_inflight_count: 100,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        },
    );

    let config = Config {
        id: 0,
        router,
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    };

    thread::Builder::new()
        .name("local-broker".to_string())
        .spawn(move || {
            let mut broker = Broker::new(config);
            // start() blocks for the broker's lifetime
            if let Err(e) = broker.start() {
                error!(error = %e, "local_broker_failed");
            }
        })
        .context("Failed to spawn broker thread")?;

    // Give the listener a moment before the node's client connects
    thread::sleep(Duration::from_millis(100));
    info!(listen = %listen, "local_broker_started");
    Ok(())
}
