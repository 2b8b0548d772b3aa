//! Per-user destination book
//!
//! Destinations are owned by a single user and created or removed by
//! explicit user action. Each user's set is kept as an `Arc<[Destination]>`
//! so an evaluation works on a snapshot that later edits cannot change.

use crate::domain::geo::{valid_latitude, valid_longitude};
use crate::domain::notification::new_uuid_v7;
use crate::domain::types::{Destination, DestinationId, UserId};
use crate::services::proximity::{ProximityError, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on destinations per user
pub const MAX_DESTINATIONS_PER_USER: usize = 64;

pub struct DestinationBook {
    by_user: FxHashMap<UserId, Arc<[Destination]>>,
}

impl DestinationBook {
    pub fn new() -> Self {
        Self { by_user: FxHashMap::default() }
    }

    /// Snapshot of a user's destinations (empty if none)
    pub fn snapshot(&self, user: &UserId) -> Arc<[Destination]> {
        self.by_user.get(user).cloned().unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Replace a user's whole set. Invalid entries and repeated ids are skipped.
    /// Returns the number of destinations kept.
    pub fn replace(&mut self, user: &UserId, destinations: Vec<Destination>) -> usize {
        let mut seen: FxHashSet<DestinationId> = FxHashSet::default();
        let mut kept = Vec::with_capacity(destinations.len().min(MAX_DESTINATIONS_PER_USER));

        for dest in destinations {
            if !valid_latitude(dest.latitude) || !valid_longitude(dest.longitude) {
                warn!(user = %user, destination = %dest.id, "destination_invalid_skipped");
                continue;
            }
            if !seen.insert(dest.id.clone()) {
                warn!(user = %user, destination = %dest.id, "destination_duplicate_skipped");
                continue;
            }
            if kept.len() >= MAX_DESTINATIONS_PER_USER {
                warn!(user = %user, limit = %MAX_DESTINATIONS_PER_USER, "destination_limit_reached");
                break;
            }
            kept.push(dest);
        }

        let count = kept.len();
        self.by_user.insert(user.clone(), kept.into());
        count
    }

    /// Add a destination with a fresh id
    pub fn add(
        &mut self,
        user: &UserId,
        name: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Destination> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProximityError::InvalidInput("destination name is empty".to_string()));
        }
        if !valid_latitude(latitude) || !valid_longitude(longitude) {
            return Err(ProximityError::InvalidInput(format!(
                "destination coordinates ({latitude}, {longitude}) out of range"
            )));
        }

        let current = self.snapshot(user);
        if current.len() >= MAX_DESTINATIONS_PER_USER {
            return Err(ProximityError::InvalidInput(format!(
                "user already has {MAX_DESTINATIONS_PER_USER} destinations"
            )));
        }

        let dest = Destination {
            id: DestinationId(new_uuid_v7()),
            name: name.to_string(),
            latitude,
            longitude,
        };
        let mut next = current.to_vec();
        next.push(dest.clone());
        self.by_user.insert(user.clone(), next.into());

        debug!(user = %user, destination = %dest.id, "destination_added");
        Ok(dest)
    }

    /// Remove a destination; returns false if the user had no such id
    pub fn remove(&mut self, user: &UserId, id: &DestinationId) -> bool {
        let Some(current) = self.by_user.get(user) else {
            return false;
        };
        if !current.iter().any(|d| &d.id == id) {
            return false;
        }
        let next: Vec<Destination> = current.iter().filter(|d| &d.id != id).cloned().collect();
        self.by_user.insert(user.clone(), next.into());
        true
    }

    /// Forget a user's destinations entirely
    pub fn clear(&mut self, user: &UserId) {
        self.by_user.remove(user);
    }

    pub fn len(&self, user: &UserId) -> usize {
        self.by_user.get(user).map_or(0, |d| d.len())
    }
}

impl Default for DestinationBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest(id: &str, lat: f64, lon: f64) -> Destination {
        Destination { id: DestinationId::from(id), name: id.to_string(), latitude: lat, longitude: lon }
    }

    #[test]
    fn test_empty_snapshot_for_unknown_user() {
        let book = DestinationBook::new();
        assert!(book.snapshot(&UserId::from("nobody")).is_empty());
    }

    #[test]
    fn test_add_and_remove() {
        let mut book = DestinationBook::new();
        let user = UserId::from("u1");

        let added = book.add(&user, "  Fort Aguada ", 15.49, 73.77).unwrap();
        assert_eq!(added.name, "Fort Aguada");
        assert_eq!(book.len(&user), 1);

        assert!(book.remove(&user, &added.id));
        assert!(!book.remove(&user, &added.id));
        assert_eq!(book.len(&user), 0);
    }

    #[test]
    fn test_add_rejects_bad_input() {
        let mut book = DestinationBook::new();
        let user = UserId::from("u1");
        assert!(book.add(&user, "", 0.0, 0.0).is_err());
        assert!(book.add(&user, "x", 95.0, 0.0).is_err());
        assert!(book.add(&user, "x", 0.0, f64::NAN).is_err());
        assert_eq!(book.len(&user), 0);
    }

    #[test]
    fn test_replace_skips_invalid_and_duplicates() {
        let mut book = DestinationBook::new();
        let user = UserId::from("u1");
        let kept = book.replace(
            &user,
            vec![dest("a", 1.0, 1.0), dest("a", 2.0, 2.0), dest("b", f64::NAN, 0.0), dest("c", 3.0, 3.0)],
        );
        assert_eq!(kept, 2);
        let snap = book.snapshot(&user);
        assert_eq!(snap[0].latitude, 1.0);
        assert_eq!(snap[1].id, DestinationId::from("c"));
    }

    #[test]
    fn test_snapshot_isolated_from_later_edits() {
        let mut book = DestinationBook::new();
        let user = UserId::from("u1");
        book.replace(&user, vec![dest("a", 1.0, 1.0)]);
        let held = book.snapshot(&user);
        book.add(&user, "b", 2.0, 2.0).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(book.len(&user), 2);
    }

    #[test]
    fn test_users_isolated() {
        let mut book = DestinationBook::new();
        book.replace(&UserId::from("u1"), vec![dest("a", 1.0, 1.0)]);
        assert_eq!(book.len(&UserId::from("u2")), 0);
        book.clear(&UserId::from("u1"));
        assert_eq!(book.len(&UserId::from("u1")), 0);
    }
}
