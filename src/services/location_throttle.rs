//! Throttles last-seen location updates
//!
//! A user's location is forwarded only when both:
//! - at least `min_interval` has passed since the last forwarded update
//! - the user moved at least `min_distance_m` (Haversine) from it
//!
//! The first sample for a user is always forwarded.

use crate::domain::geo::distance_to;
use crate::domain::types::{Position, UserId};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

struct LastForwarded {
    position: Position,
    at: Instant,
}

pub struct LocationThrottler {
    last: FxHashMap<UserId, LastForwarded>,
    min_interval: Duration,
    min_distance_m: f64,
}

impl LocationThrottler {
    pub fn new(min_interval: Duration, min_distance_m: f64) -> Self {
        Self { last: FxHashMap::default(), min_interval, min_distance_m }
    }

    /// Returns true (and records the sample) if this position should be forwarded
    pub fn should_forward(&mut self, user: &UserId, position: &Position, now: Instant) -> bool {
        if let Some(last) = self.last.get(user) {
            if now.saturating_duration_since(last.at) < self.min_interval {
                return false;
            }
            let moved = distance_to(position, last.position.latitude, last.position.longitude);
            if moved < self.min_distance_m {
                return false;
            }
        }
        self.last.insert(user.clone(), LastForwarded { position: *position, at: now });
        true
    }

    pub fn forget(&mut self, user: &UserId) {
        self.last.remove(user);
    }

    pub fn tracked_users(&self) -> usize {
        self.last.len()
    }
}
