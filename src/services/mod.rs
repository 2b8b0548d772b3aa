//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `proximity` - Geofence evaluation, transitions and safety score
//! - `monitor` - Central event orchestrator and per-user state
//! - `destinations` - Per-user destination book
//! - `zone_store` - Shared hazard zone snapshot
//! - `location_throttle` - Last-seen location rate limiting

pub mod destinations;
pub mod location_throttle;
pub mod monitor;
pub mod proximity;
pub mod zone_store;

// Re-export commonly used types
pub use monitor::SafetyMonitor;
pub use proximity::{ProximityError, ProximityEvaluator, ProximityState, SafetyPolicy};
pub use zone_store::HazardStore;
