//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for receiving app events (positions, edits, panic)
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `egress` - Notification output to file (JSONL format)
//! - `hazard_feed` - HTTP poller for threat zones
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress;
pub mod egress_channel;
pub mod hazard_feed;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;

// Re-export commonly used types
pub use egress_channel::{
    create_egress_channel, DestinationsPayload, EgressMessage, EgressSender, LocationPayload,
    SafetyStatusPayload,
};
pub use hazard_feed::HazardFeed;
pub use mqtt_egress::MqttPublisher;
