//! IO modules - external system interfaces
//!
//! - `framer` - Newline framing of the portal byte stream
//! - `source` - Serial and TCP portal connections
//! - `egress_channel` - Publisher contract and typed channel for MQTT egress
//! - `mqtt_egress` - MQTT publisher for decoded events
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress_channel;
pub mod framer;
pub mod mqtt_egress;
pub mod prometheus;
pub mod source;

pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender, LogPublisher, Publisher};
pub use framer::LineFramer;
pub use mqtt_egress::MqttPublisher;
pub use source::{open_source, PortalStream};
