//! Infrastructure - configuration, clocks, metrics, and broker
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `clock` - Boot-relative millisecond clocks
//! - `metrics` - Lock-free counters and periodic summary
//! - `broker` - Optional embedded MQTT broker (rumqttd)

pub mod broker;
pub mod clock;
pub mod config;
pub mod metrics;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::Config;
pub use metrics::Metrics;
