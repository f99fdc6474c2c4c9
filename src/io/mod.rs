//! IO modules - external system interfaces
//!
//! - `reader` - `CardReader` hardware seam and reader errors
//! - `simulated_reader` - Scenario-driven reader used without hardware
//! - `mqtt` - MQTT transport and connection supervisor

pub mod mqtt;
pub mod reader;
pub mod simulated_reader;

pub use mqtt::{ConnectionState, ConnectionSupervisor, EventTransport, MqttTransport, TransportError};
pub use reader::{CardReader, ReaderError};
pub use simulated_reader::{Scenario, SimulatedReader};
