//! Proximity evaluation - geofence and hazard zone membership
//!
//! Converts a position update plus the current destination and hazard
//! snapshots into a safety verdict and a list of membership transitions.
//!
//! `ProximityEvaluator::evaluate` is pure: it reads the previous membership
//! and returns the next one without touching anything else. Callers that
//! carry state between updates use `ProximityState::apply`, which only
//! commits the new membership after a successful evaluation.
//!
//! Key behaviors:
//! - Inside means `haversine(position, center) <= radius` (no hysteresis)
//! - An id with no previous value counts as "not inside"
//! - Score starts at 100, each occupied hazard subtracts its severity penalty,
//!   penalties stack and the result is clamped at 0

use crate::domain::geo::{distance_to, valid_latitude, valid_longitude};
use crate::domain::types::{
    Destination, DestinationId, HazardId, HazardZone, Position, Severity, ZoneRef, ZoneTransition,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use smallvec::SmallVec;
use thiserror::Error;

/// Reference geofence radius for destinations (meters)
pub const DEFAULT_GEOFENCE_RADIUS_M: f64 = 3_000.0;

/// Score with no occupied hazard zones
pub const MAX_SAFETY_SCORE: u8 = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProximityError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ProximityError>;

fn invalid(reason: impl Into<String>) -> ProximityError {
    ProximityError::InvalidInput(reason.into())
}

/// How the aggregate safe/unsafe verdict is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyPolicy {
    /// Safe only inside at least one destination geofence and no hazard zone
    #[default]
    RequireDestination,
    /// Safe whenever no hazard zone contains the position
    HazardFree,
}

impl SafetyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyPolicy::RequireDestination => "require_destination",
            SafetyPolicy::HazardFree => "hazard_free",
        }
    }
}

/// Score penalty per occupied hazard zone, by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SeverityPenalties {
    #[serde(default = "default_low_penalty")]
    pub low: u32,
    #[serde(default = "default_medium_penalty")]
    pub medium: u32,
    #[serde(default = "default_high_penalty")]
    pub high: u32,
}

fn default_low_penalty() -> u32 {
    10
}

fn default_medium_penalty() -> u32 {
    20
}

fn default_high_penalty() -> u32 {
    40
}

impl Default for SeverityPenalties {
    fn default() -> Self {
        Self {
            low: default_low_penalty(),
            medium: default_medium_penalty(),
            high: default_high_penalty(),
        }
    }
}

impl SeverityPenalties {
    /// Every penalty must be positive so each extra hazard lowers the score
    pub fn validate(&self) -> Result<()> {
        for severity in [Severity::Low, Severity::Medium, Severity::High] {
            if self.for_severity(severity) == 0 {
                return Err(invalid(format!("{} severity penalty must be positive", severity.as_str())));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn for_severity(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
        }
    }
}

/// Evaluator parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluatorConfig {
    /// Radius shared by all destination geofences (meters)
    pub geofence_radius_m: f64,
    pub safety_policy: SafetyPolicy,
    pub penalties: SeverityPenalties,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            geofence_radius_m: DEFAULT_GEOFENCE_RADIUS_M,
            safety_policy: SafetyPolicy::default(),
            penalties: SeverityPenalties::default(),
        }
    }
}

/// Per-id "inside" flags carried between evaluations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Membership {
    pub destinations: FxHashMap<DestinationId, bool>,
    pub hazards: FxHashMap<HazardId, bool>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Previous destination membership, defaulting to "not inside"
    #[inline]
    pub fn inside_destination(&self, id: &DestinationId) -> bool {
        self.destinations.get(id).copied().unwrap_or(false)
    }

    /// Previous hazard membership, defaulting to "not inside"
    #[inline]
    pub fn inside_hazard(&self, id: &HazardId) -> bool {
        self.hazards.get(id).copied().unwrap_or(false)
    }

    pub fn inside_any_destination(&self) -> bool {
        self.destinations.values().any(|&inside| inside)
    }

    pub fn inside_any_hazard(&self) -> bool {
        self.hazards.values().any(|&inside| inside)
    }

    /// IDs of hazard zones currently containing the position
    pub fn occupied_hazards(&self) -> impl Iterator<Item = &HazardId> {
        self.hazards.iter().filter(|(_, inside)| **inside).map(|(id, _)| id)
    }
}

/// Result of evaluating one position
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub membership: Membership,
    /// Destinations first (input order), then hazards (input order)
    pub transitions: SmallVec<[ZoneTransition; 4]>,
    pub aggregate_safe: bool,
    /// In [0, 100]
    pub safety_score: u8,
    /// Closest hazard zone center and its distance (meters)
    pub nearest_hazard: Option<(HazardId, f64)>,
}

impl Evaluation {
    pub fn has_transitions(&self) -> bool {
        !self.transitions.is_empty()
    }
}

/// Stateless proximity evaluator
#[derive(Debug, Clone)]
pub struct ProximityEvaluator {
    config: EvaluatorConfig,
}

impl ProximityEvaluator {
    /// Create an evaluator, rejecting a bad geofence radius or a zero penalty
    pub fn new(config: EvaluatorConfig) -> Result<Self> {
        if !(config.geofence_radius_m.is_finite() && config.geofence_radius_m > 0.0) {
            return Err(invalid(format!(
                "geofence radius must be positive, got {}",
                config.geofence_radius_m
            )));
        }
        config.penalties.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate a position against destination and hazard snapshots
    ///
    /// Returns `InvalidInput` before computing anything if any coordinate,
    /// radius or id in the inputs is malformed.
    pub fn evaluate(
        &self,
        position: &Position,
        destinations: &[Destination],
        hazards: &[HazardZone],
        previous: &Membership,
    ) -> Result<Evaluation> {
        validate_position(position)?;
        validate_destinations(destinations)?;
        validate_hazards(hazards)?;

        let mut membership = Membership {
            destinations: FxHashMap::with_capacity_and_hasher(destinations.len(), Default::default()),
            hazards: FxHashMap::with_capacity_and_hasher(hazards.len(), Default::default()),
        };
        let mut transitions: SmallVec<[ZoneTransition; 4]> = SmallVec::new();

        for dest in destinations {
            let distance = distance_to(position, dest.latitude, dest.longitude);
            let inside = distance <= self.config.geofence_radius_m;
            let was_inside = previous.inside_destination(&dest.id);

            if inside != was_inside {
                let zone = ZoneRef::Destination(dest.id.clone());
                transitions.push(if inside {
                    ZoneTransition::entered(zone)
                } else {
                    ZoneTransition::exited(zone)
                });
            }
            membership.destinations.insert(dest.id.clone(), inside);
        }

        let mut penalty: u32 = 0;
        let mut nearest_hazard: Option<(HazardId, f64)> = None;

        for zone in hazards {
            let distance = distance_to(position, zone.latitude, zone.longitude);
            let inside = distance <= zone.radius_m;
            let was_inside = previous.inside_hazard(&zone.id);

            if inside {
                penalty = penalty.saturating_add(self.config.penalties.for_severity(zone.severity));
            }
            if nearest_hazard.as_ref().map_or(true, |(_, d)| distance < *d) {
                nearest_hazard = Some((zone.id.clone(), distance));
            }

            if inside != was_inside {
                let zone_ref = ZoneRef::Hazard(zone.id.clone());
                transitions.push(if inside {
                    ZoneTransition::entered(zone_ref)
                } else {
                    ZoneTransition::exited(zone_ref)
                });
            }
            membership.hazards.insert(zone.id.clone(), inside);
        }

        let in_hazard = membership.inside_any_hazard();
        let aggregate_safe = match self.config.safety_policy {
            SafetyPolicy::RequireDestination => membership.inside_any_destination() && !in_hazard,
            SafetyPolicy::HazardFree => !in_hazard,
        };
        let safety_score = u32::from(MAX_SAFETY_SCORE).saturating_sub(penalty) as u8;

        Ok(Evaluation { membership, transitions, aggregate_safe, safety_score, nearest_hazard })
    }
}

fn validate_position(position: &Position) -> Result<()> {
    if !valid_latitude(position.latitude) {
        return Err(invalid(format!("position latitude {} out of range", position.latitude)));
    }
    if !valid_longitude(position.longitude) {
        return Err(invalid(format!("position longitude {} out of range", position.longitude)));
    }
    Ok(())
}

fn validate_destinations(destinations: &[Destination]) -> Result<()> {
    let mut seen = FxHashSet::default();
    for dest in destinations {
        if !valid_latitude(dest.latitude) || !valid_longitude(dest.longitude) {
            return Err(invalid(format!("destination {} has invalid coordinates", dest.id)));
        }
        if !seen.insert(&dest.id) {
            return Err(invalid(format!("duplicate destination id {}", dest.id)));
        }
    }
    Ok(())
}

/// Check a single hazard zone's geometry
pub fn validate_hazard(zone: &HazardZone) -> Result<()> {
    if !valid_latitude(zone.latitude) || !valid_longitude(zone.longitude) {
        return Err(invalid(format!("hazard {} has invalid coordinates", zone.id)));
    }
    if !(zone.radius_m.is_finite() && zone.radius_m > 0.0) {
        return Err(invalid(format!("hazard {} radius must be positive, got {}", zone.id, zone.radius_m)));
    }
    Ok(())
}

fn validate_hazards(hazards: &[HazardZone]) -> Result<()> {
    let mut seen = FxHashSet::default();
    for zone in hazards {
        validate_hazard(zone)?;
        if !seen.insert(&zone.id) {
            return Err(invalid(format!("duplicate hazard id {}", zone.id)));
        }
    }
    Ok(())
}

/// Carried evaluation state for one user
///
/// Holds the previous membership plus the last verdict so callers can tell
/// when the safety status changed.
#[derive(Debug, Clone, Default)]
pub struct ProximityState {
    membership: Membership,
    last_safe: Option<bool>,
    last_score: Option<u8>,
    last_position: Option<Position>,
}

/// What `ProximityState::apply` reports besides the evaluation itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// First evaluation, or the safe verdict or score changed
    pub changed: bool,
    pub previous_safe: Option<bool>,
    pub previous_score: Option<u8>,
}

impl ProximityState {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    #[inline]
    pub fn last_position(&self) -> Option<&Position> {
        self.last_position.as_ref()
    }

    #[inline]
    pub fn last_safe(&self) -> Option<bool> {
        self.last_safe
    }

    #[inline]
    pub fn last_score(&self) -> Option<u8> {
        self.last_score
    }

    /// Evaluate and commit; on error nothing is written
    pub fn apply(
        &mut self,
        evaluator: &ProximityEvaluator,
        position: &Position,
        destinations: &[Destination],
        hazards: &[HazardZone],
    ) -> Result<(Evaluation, StatusChange)> {
        let evaluation = evaluator.evaluate(position, destinations, hazards, &self.membership)?;

        let change = StatusChange {
            changed: self.last_safe != Some(evaluation.aggregate_safe)
                || self.last_score != Some(evaluation.safety_score),
            previous_safe: self.last_safe,
            previous_score: self.last_score,
        };

        self.membership = evaluation.membership.clone();
        self.last_safe = Some(evaluation.aggregate_safe);
        self.last_score = Some(evaluation.safety_score);
        self.last_position = Some(*position);

        Ok((evaluation, change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{TransitionKind, ZoneKind};

    fn evaluator() -> ProximityEvaluator {
        ProximityEvaluator::new(EvaluatorConfig::default()).unwrap()
    }

    fn hazard(id: &str, lat: f64, lon: f64, radius_m: f64, severity: Severity) -> HazardZone {
        HazardZone {
            id: HazardId::from(id),
            title: format!("zone {id}"),
            description: String::new(),
            latitude: lat,
            longitude: lon,
            radius_m,
            severity,
        }
    }

    fn destination(id: &str, lat: f64, lon: f64) -> Destination {
        Destination {
            id: DestinationId::from(id),
            name: format!("dest {id}"),
            latitude: lat,
            longitude: lon,
        }
    }

    #[test]
    fn test_hazard_at_center_scores_60() {
        let zones = vec![hazard("z1", 0.0, 0.0, 1000.0, Severity::High)];
        let eval = evaluator()
            .evaluate(&Position::new(0.0, 0.0), &[], &zones, &Membership::new())
            .unwrap();

        assert!(eval.membership.inside_hazard(&HazardId::from("z1")));
        assert_eq!(eval.transitions.len(), 1);
        assert_eq!(eval.transitions[0].kind, TransitionKind::Entered);
        assert_eq!(eval.transitions[0].zone_kind(), ZoneKind::Hazard);
        assert_eq!(eval.transitions[0].zone.id(), "z1");
        assert_eq!(eval.safety_score, 60);
        assert!(!eval.aggregate_safe);
    }

    #[test]
    fn test_destination_within_geofence() {
        let dests = vec![destination("d1", 10.001, 10.001)];
        let eval = evaluator()
            .evaluate(&Position::new(10.0, 10.0), &dests, &[], &Membership::new())
            .unwrap();

        assert!(eval.membership.inside_destination(&DestinationId::from("d1")));
        assert!(eval.aggregate_safe);
        assert_eq!(eval.safety_score, 100);
    }

    #[test]
    fn test_configurable_radius() {
        // ~4.4 km away: outside 3 km, inside 5 km
        let dests = vec![destination("d1", 10.04, 10.0)];
        let pos = Position::new(10.0, 10.0);

        let narrow = evaluator().evaluate(&pos, &dests, &[], &Membership::new()).unwrap();
        assert!(!narrow.membership.inside_destination(&DestinationId::from("d1")));

        let wide = ProximityEvaluator::new(EvaluatorConfig {
            geofence_radius_m: 5_000.0,
            ..EvaluatorConfig::default()
        })
        .unwrap()
        .evaluate(&pos, &dests, &[], &Membership::new())
        .unwrap();
        assert!(wide.membership.inside_destination(&DestinationId::from("d1")));
    }

    #[test]
    fn test_exit_transition() {
        let zones = vec![hazard("z1", 0.0, 0.0, 1000.0, Severity::Low)];
        let mut previous = Membership::new();
        previous.hazards.insert(HazardId::from("z1"), true);

        let eval = evaluator()
            .evaluate(&Position::new(0.5, 0.5), &[], &zones, &previous)
            .unwrap();

        assert_eq!(eval.transitions.len(), 1);
        assert_eq!(eval.transitions[0].kind, TransitionKind::Exited);
        assert_eq!(eval.safety_score, 100);
    }

    #[test]
    fn test_no_event_when_unchanged_outside() {
        let zones = vec![hazard("z1", 0.0, 0.0, 1000.0, Severity::Low)];
        let eval = evaluator()
            .evaluate(&Position::new(1.0, 1.0), &[], &zones, &Membership::new())
            .unwrap();
        assert!(!eval.has_transitions());
        assert_eq!(eval.membership.hazards.get(&HazardId::from("z1")), Some(&false));
    }

    #[test]
    fn test_transition_order_destinations_then_hazards() {
        let dests = vec![destination("d1", 0.0, 0.0), destination("d2", 0.001, 0.0)];
        let zones = vec![
            hazard("z2", 0.0, 0.0, 100.0, Severity::Low),
            hazard("z1", 0.0, 0.0, 100.0, Severity::Low),
        ];
        let eval = evaluator()
            .evaluate(&Position::new(0.0, 0.0), &dests, &zones, &Membership::new())
            .unwrap();

        let ids: Vec<&str> = eval.transitions.iter().map(|t| t.zone.id()).collect();
        assert_eq!(ids, vec!["d1", "d2", "z2", "z1"]);
    }

    #[test]
    fn test_score_stacking_and_floor() {
        let pos = Position::new(0.0, 0.0);
        let zones = vec![
            hazard("a", 0.0, 0.0, 500.0, Severity::Medium),
            hazard("b", 0.0, 0.0, 500.0, Severity::Low),
        ];
        let eval = evaluator().evaluate(&pos, &[], &zones, &Membership::new()).unwrap();
        assert_eq!(eval.safety_score, 70);

        let many: Vec<HazardZone> = (0..4)
            .map(|i| hazard(&format!("h{i}"), 0.0, 0.0, 500.0, Severity::High))
            .collect();
        let eval = evaluator().evaluate(&pos, &[], &many, &Membership::new()).unwrap();
        assert_eq!(eval.safety_score, 0);
    }

    #[test]
    fn test_custom_penalties() {
        let config = EvaluatorConfig {
            penalties: SeverityPenalties { low: 5, medium: 15, high: 55 },
            ..EvaluatorConfig::default()
        };
        let zones = vec![hazard("z1", 0.0, 0.0, 500.0, Severity::High)];
        let eval = ProximityEvaluator::new(config)
            .unwrap()
            .evaluate(&Position::new(0.0, 0.0), &[], &zones, &Membership::new())
            .unwrap();
        assert_eq!(eval.safety_score, 45);
    }

    #[test]
    fn test_safety_policies_diverge_outside_destinations() {
        let pos = Position::new(0.0, 0.0);
        let dests = vec![destination("far", 5.0, 5.0)];

        let strict = evaluator().evaluate(&pos, &dests, &[], &Membership::new()).unwrap();
        assert!(!strict.aggregate_safe);

        let lenient = ProximityEvaluator::new(EvaluatorConfig {
            safety_policy: SafetyPolicy::HazardFree,
            ..EvaluatorConfig::default()
        })
        .unwrap()
        .evaluate(&pos, &dests, &[], &Membership::new())
        .unwrap();
        assert!(lenient.aggregate_safe);
    }

    #[test]
    fn test_require_destination_with_no_destinations_is_unsafe() {
        let eval = evaluator()
            .evaluate(&Position::new(0.0, 0.0), &[], &[], &Membership::new())
            .unwrap();
        assert!(!eval.aggregate_safe);
        assert_eq!(eval.safety_score, 100);
        assert!(eval.nearest_hazard.is_none());
    }

    #[test]
    fn test_nearest_hazard() {
        let zones = vec![
            hazard("far", 1.0, 1.0, 100.0, Severity::Low),
            hazard("near", 0.01, 0.0, 100.0, Severity::Low),
        ];
        let eval = evaluator()
            .evaluate(&Position::new(0.0, 0.0), &[], &zones, &Membership::new())
            .unwrap();
        let (id, distance) = eval.nearest_hazard.unwrap();
        assert_eq!(id, HazardId::from("near"));
        assert!(distance > 1_100.0 && distance < 1_120.0);
    }

    #[test]
    fn test_invalid_position_rejected() {
        let e = evaluator();
        for pos in [
            Position::new(f64::NAN, 0.0),
            Position::new(0.0, f64::INFINITY),
            Position::new(91.0, 0.0),
            Position::new(0.0, -181.0),
        ] {
            assert!(matches!(
                e.evaluate(&pos, &[], &[], &Membership::new()),
                Err(ProximityError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_invalid_zone_geometry_rejected() {
        let e = evaluator();
        let pos = Position::new(0.0, 0.0);
        for radius in [0.0, -5.0, f64::NAN] {
            let zones = vec![hazard("z1", 0.0, 0.0, radius, Severity::Low)];
            assert!(e.evaluate(&pos, &[], &zones, &Membership::new()).is_err());
        }
        let dests = vec![destination("d1", f64::NAN, 0.0)];
        assert!(e.evaluate(&pos, &dests, &[], &Membership::new()).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let e = evaluator();
        let pos = Position::new(0.0, 0.0);
        let dests = vec![destination("d1", 0.0, 0.0), destination("d1", 1.0, 1.0)];
        assert!(e.evaluate(&pos, &dests, &[], &Membership::new()).is_err());

        let zones = vec![
            hazard("z1", 0.0, 0.0, 10.0, Severity::Low),
            hazard("z1", 1.0, 1.0, 10.0, Severity::Low),
        ];
        assert!(e.evaluate(&pos, &[], &zones, &Membership::new()).is_err());
    }

    #[test]
    fn test_bad_geofence_radius_rejected() {
        for radius in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = EvaluatorConfig { geofence_radius_m: radius, ..EvaluatorConfig::default() };
            assert!(ProximityEvaluator::new(config).is_err());
        }
    }

    #[test]
    fn test_zero_penalty_rejected() {
        let penalties = SeverityPenalties { medium: 0, ..SeverityPenalties::default() };
        let config = EvaluatorConfig { penalties, ..EvaluatorConfig::default() };
        let err = ProximityEvaluator::new(config).unwrap_err();
        assert!(err.to_string().contains("medium"));
    }

    #[test]
    fn test_each_overlapping_zone_lowers_score_with_custom_penalties() {
        let penalties = SeverityPenalties { low: 1, medium: 2, high: 3 };
        let e = ProximityEvaluator::new(EvaluatorConfig { penalties, ..EvaluatorConfig::default() })
            .unwrap();
        let pos = Position::new(0.0, 0.0);
        let mut zones = Vec::new();
        let mut last = 100u8;
        let severities = [Severity::Low, Severity::Medium, Severity::High];
        for (i, severity) in severities.into_iter().enumerate() {
            zones.push(hazard(&format!("z{i}"), 0.0, 0.0, 100.0, severity));
            let eval = e.evaluate(&pos, &[], &zones, &Membership::new()).unwrap();
            assert!(eval.safety_score < last);
            last = eval.safety_score;
        }
        assert_eq!(last, 94);
    }

    #[test]
    fn test_removed_zone_dropped_without_event() {
        let mut previous = Membership::new();
        previous.hazards.insert(HazardId::from("gone"), true);

        let eval = evaluator()
            .evaluate(&Position::new(0.0, 0.0), &[], &[], &previous)
            .unwrap();
        assert!(!eval.has_transitions());
        assert!(eval.membership.hazards.is_empty());
    }

    #[test]
    fn test_state_apply_commits_and_reports_change() {
        let e = evaluator();
        let mut state = ProximityState::new();
        let zones = vec![hazard("z1", 0.0, 0.0, 1000.0, Severity::High)];

        let (eval, change) = state.apply(&e, &Position::new(0.0, 0.0), &[], &zones).unwrap();
        assert_eq!(eval.transitions.len(), 1);
        assert!(change.changed);
        assert_eq!(change.previous_safe, None);
        assert_eq!(state.last_score(), Some(60));

        let (eval, change) = state.apply(&e, &Position::new(0.0, 0.0), &[], &zones).unwrap();
        assert!(eval.transitions.is_empty());
        assert!(!change.changed);
    }

    #[test]
    fn test_state_untouched_on_invalid_input() {
        let e = evaluator();
        let mut state = ProximityState::new();
        let zones = vec![hazard("z1", 0.0, 0.0, 1000.0, Severity::High)];
        state.apply(&e, &Position::new(0.0, 0.0), &[], &zones).unwrap();
        let before = state.membership().clone();

        let result = state.apply(&e, &Position::new(f64::NAN, 0.0), &[], &zones);
        assert!(result.is_err());
        assert_eq!(state.membership(), &before);
        assert_eq!(state.last_position(), Some(&Position::new(0.0, 0.0)));
        assert_eq!(state.last_score(), Some(60));
    }
}
