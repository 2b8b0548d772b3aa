//! Domain models - core business types
//!
//! This module contains the canonical data types used throughout the system:
//! - `Position`, `Destination`, `HazardZone` - evaluator inputs
//! - `ZoneTransition` - entered/exited events
//! - `Notification` - what the notification sink receives
//! - `geo` - Haversine distance and coordinate checks

pub mod geo;
pub mod notification;
pub mod types;
