//! Hazard zone snapshot store
//!
//! Holds the current hazard set as an immutable `Arc<[HazardZone]>`.
//! Readers clone the Arc and evaluate against a consistent snapshot while
//! the feed poller swaps in a full replacement set.

use crate::domain::types::{HazardId, HazardZone};
use crate::services::proximity::validate_hazard;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared hazard zone store (static zones from config + feed zones)
pub struct HazardStore {
    snapshot: RwLock<Arc<[HazardZone]>>,
    /// Zones from config, always part of every snapshot
    static_zones: Vec<HazardZone>,
    /// Bumped on every replace
    version: AtomicU64,
}

impl HazardStore {
    pub fn new(static_zones: Vec<HazardZone>) -> Self {
        let static_zones = sanitize(static_zones, &FxHashSet::default());
        let snapshot: Arc<[HazardZone]> = static_zones.clone().into();
        info!(static_zones = %static_zones.len(), "hazard_store_initialized");
        Self { snapshot: RwLock::new(snapshot), static_zones, version: AtomicU64::new(0) }
    }

    /// Current snapshot (cheap Arc clone)
    #[inline]
    pub fn snapshot(&self) -> Arc<[HazardZone]> {
        self.snapshot.read().clone()
    }

    /// Replace feed zones; static zones are kept and win on id collisions.
    /// Invalid or duplicate feed zones are skipped. Returns the new zone count.
    pub fn replace(&self, feed_zones: Vec<HazardZone>) -> usize {
        let static_ids: FxHashSet<HazardId> =
            self.static_zones.iter().map(|z| z.id.clone()).collect();
        let mut zones = self.static_zones.clone();
        zones.extend(sanitize(feed_zones, &static_ids));

        let count = zones.len();
        *self.snapshot.write() = zones.into();
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        info!(zones = %count, version = %version, "hazard_snapshot_replaced");
        count
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a zone by id in the current snapshot
    pub fn get(&self, id: &HazardId) -> Option<HazardZone> {
        self.snapshot.read().iter().find(|z| &z.id == id).cloned()
    }
}

/// Drop zones with bad geometry, ids already in `taken`, or repeated ids
fn sanitize(zones: Vec<HazardZone>, taken: &FxHashSet<HazardId>) -> Vec<HazardZone> {
    let mut seen: FxHashSet<HazardId> = FxHashSet::default();
    let mut out = Vec::with_capacity(zones.len());
    for zone in zones {
        if let Err(e) = validate_hazard(&zone) {
            warn!(zone = %zone.id, error = %e, "hazard_zone_skipped");
            continue;
        }
        if taken.contains(&zone.id) || !seen.insert(zone.id.clone()) {
            warn!(zone = %zone.id, "hazard_zone_duplicate_skipped");
            continue;
        }
        out.push(zone);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Severity;

    fn zone(id: &str, radius_m: f64) -> HazardZone {
        HazardZone {
            id: HazardId::from(id),
            title: id.to_string(),
            description: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            radius_m,
            severity: Severity::Medium,
        }
    }

    #[test]
    fn test_static_zones_in_initial_snapshot() {
        let store = HazardStore::new(vec![zone("s1", 100.0), zone("bad", 0.0)]);
        let snap = store.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, HazardId::from("s1"));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_replace_merges_with_static() {
        let store = HazardStore::new(vec![zone("s1", 100.0)]);
        let count = store.replace(vec![zone("f1", 50.0), zone("f2", 75.0)]);
        assert_eq!(count, 3);
        assert_eq!(store.version(), 1);

        // Full replacement: f1/f2 gone, f3 in
        store.replace(vec![zone("f3", 50.0)]);
        let ids: Vec<String> = store.snapshot().iter().map(|z| z.id.0.clone()).collect();
        assert_eq!(ids, vec!["s1", "f3"]);
    }

    #[test]
    fn test_replace_skips_invalid_and_duplicates() {
        let store = HazardStore::new(vec![zone("s1", 100.0)]);
        let count = store.replace(vec![
            zone("s1", 999.0),
            zone("f1", 50.0),
            zone("f1", 60.0),
            zone("f2", -1.0),
        ]);
        assert_eq!(count, 2);
        assert_eq!(store.get(&HazardId::from("s1")).unwrap().radius_m, 100.0);
        assert_eq!(store.get(&HazardId::from("f1")).unwrap().radius_m, 50.0);
        assert!(store.get(&HazardId::from("f2")).is_none());
    }

    #[test]
    fn test_old_snapshot_unaffected_by_replace() {
        let store = HazardStore::new(Vec::new());
        store.replace(vec![zone("f1", 50.0)]);
        let held = store.snapshot();
        store.replace(Vec::new());
        assert_eq!(held.len(), 1);
        assert!(store.is_empty());
    }
}
