//! Event handlers for the SafetyMonitor
//!
//! Each handler processes one event kind, updating per-user state and
//! emitting notifications and egress messages.

use super::SafetyMonitor;
use crate::domain::notification::{epoch_ms, Notification};
use crate::domain::types::{
    Destination, DestinationId, HazardZone, Position, TransitionKind, UserId, ZoneRef,
    ZoneTransition,
};
use crate::io::egress_channel::{DestinationsPayload, LocationPayload, SafetyStatusPayload};
use crate::services::proximity::{Evaluation, ProximityState, StatusChange};
use std::time::Instant;
use tracing::{debug, info, warn};

impl SafetyMonitor {
    /// Evaluate a position update for one user
    ///
    /// On invalid input the event is discarded and the user's carried
    /// state is left exactly as it was.
    pub(crate) fn handle_position(&mut self, user: UserId, position: Position) {
        let process_start = Instant::now();
        let hazards = self.hazards.snapshot();
        let destinations = self.destinations.snapshot(&user);

        let result = match self.users.get_mut(&user) {
            Some(state) => state.apply(&self.evaluator, &position, &destinations, &hazards),
            None => {
                let mut state = ProximityState::new();
                let result = state.apply(&self.evaluator, &position, &destinations, &hazards);
                if result.is_ok() {
                    self.users.insert(user.clone(), state);
                }
                result
            }
        };

        let (evaluation, change) = match result {
            Ok(r) => r,
            Err(e) => {
                self.metrics.record_invalid_input();
                warn!(
                    user = %user,
                    lat = %position.latitude,
                    lon = %position.longitude,
                    error = %e,
                    "position_rejected"
                );
                return;
            }
        };

        debug!(
            user = %user,
            safe = %evaluation.aggregate_safe,
            score = %evaluation.safety_score,
            transitions = %evaluation.transitions.len(),
            "position_evaluated"
        );

        for transition in &evaluation.transitions {
            self.emit_transition(&user, transition, &position, &destinations, &hazards, &evaluation);
        }

        if change.changed {
            self.emit_status(&user, &position, &evaluation, &change);
        }

        self.forward_location(&user, &position, &evaluation);

        if let Some((_, distance_m)) = evaluation.nearest_hazard {
            self.metrics.record_hazard_distance(distance_m);
        }
        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_position_evaluated(latency_us);
    }

    fn emit_transition(
        &self,
        user: &UserId,
        transition: &ZoneTransition,
        position: &Position,
        destinations: &[Destination],
        hazards: &[HazardZone],
        evaluation: &Evaluation,
    ) {
        self.metrics.record_transition(transition.zone_kind(), transition.kind);

        let notification = match &transition.zone {
            ZoneRef::Hazard(id) => {
                let Some(zone) = hazards.iter().find(|z| &z.id == id) else { return };
                match transition.kind {
                    TransitionKind::Entered => {
                        info!(
                            user = %user,
                            zone = %zone.id,
                            title = %zone.title,
                            severity = %zone.severity.as_str(),
                            score = %evaluation.safety_score,
                            "hazard_entered"
                        );
                        Notification::hazard_entered(user, zone, position)
                    }
                    TransitionKind::Exited => {
                        info!(
                            user = %user,
                            zone = %zone.id,
                            title = %zone.title,
                            score = %evaluation.safety_score,
                            "hazard_exited"
                        );
                        Notification::hazard_exited(user, zone, position)
                    }
                }
            }
            ZoneRef::Destination(id) => {
                let Some(dest) = destinations.iter().find(|d| &d.id == id) else { return };
                match transition.kind {
                    TransitionKind::Entered => {
                        info!(user = %user, destination = %dest.id, name = %dest.name, "destination_arrived");
                        Notification::destination_arrived(user, dest, position)
                    }
                    TransitionKind::Exited => {
                        info!(user = %user, destination = %dest.id, name = %dest.name, "destination_left");
                        Notification::destination_left(user, dest, position)
                    }
                }
            }
        };

        self.publish_notification(&notification.with_score(evaluation.safety_score));
    }

    fn emit_status(
        &self,
        user: &UserId,
        position: &Position,
        evaluation: &Evaluation,
        change: &StatusChange,
    ) {
        self.metrics.record_status_change();
        info!(
            user = %user,
            safe = %evaluation.aggregate_safe,
            score = %evaluation.safety_score,
            previous_safe = ?change.previous_safe,
            previous_score = ?change.previous_score,
            "safety_status_changed"
        );

        if let Some(ref sender) = self.egress_sender {
            let mut hazards: Vec<String> =
                evaluation.membership.occupied_hazards().map(|id| id.0.clone()).collect();
            hazards.sort_unstable();
            let mut destinations: Vec<String> = evaluation
                .membership
                .destinations
                .iter()
                .filter(|(_, inside)| **inside)
                .map(|(id, _)| id.0.clone())
                .collect();
            destinations.sort_unstable();

            let sent = sender.send_status(SafetyStatusPayload {
                site: None,
                user: user.clone(),
                safe: evaluation.aggregate_safe,
                score: evaluation.safety_score,
                hazards,
                destinations,
                ts: epoch_ms(),
            });
            if !sent {
                self.metrics.record_egress_dropped();
            }
        }

        // Only a flip of the verdict is worth a user-facing notification
        if change.previous_safe.is_some_and(|prev| prev != evaluation.aggregate_safe) {
            self.publish_notification(&Notification::safety_changed(
                user,
                evaluation.aggregate_safe,
                evaluation.safety_score,
                position,
            ));
        }
    }

    fn forward_location(&mut self, user: &UserId, position: &Position, evaluation: &Evaluation) {
        if !self.throttle.should_forward(user, position, Instant::now()) {
            return;
        }
        self.metrics.record_location_forwarded();

        if let Some(ref sender) = self.egress_sender {
            let sent = sender.send_location(LocationPayload {
                site: None,
                user: user.clone(),
                lat: position.latitude,
                lon: position.longitude,
                sample_ts: (position.timestamp_ms > 0).then_some(position.timestamp_ms),
                safe: evaluation.aggregate_safe,
                score: evaluation.safety_score,
                ts: epoch_ms(),
            });
            if !sent {
                self.metrics.record_egress_dropped();
            }
        }
    }

    /// Replace a user's destination set
    ///
    /// Carried membership for ids that are no longer present is dropped on
    /// the next evaluation without an exit notification.
    pub(crate) fn handle_destinations_replaced(
        &mut self,
        user: UserId,
        destinations: Vec<Destination>,
    ) {
        let received = destinations.len();
        let kept = self.destinations.replace(&user, destinations);
        if kept < received {
            self.metrics.record_invalid_input();
        }
        info!(user = %user, received = %received, kept = %kept, "destinations_replaced");
        self.publish_destinations(&user, "replaced");
    }

    pub(crate) fn handle_destination_added(
        &mut self,
        user: UserId,
        name: &str,
        latitude: f64,
        longitude: f64,
    ) {
        match self.destinations.add(&user, name, latitude, longitude) {
            Ok(dest) => {
                info!(user = %user, destination = %dest.id, name = %dest.name, "destination_added");
                self.publish_destinations(&user, "added");
            }
            Err(e) => {
                self.metrics.record_invalid_input();
                warn!(user = %user, error = %e, "destination_rejected");
            }
        }
    }

    pub(crate) fn handle_destination_removed(&mut self, user: UserId, id: DestinationId) {
        if self.destinations.remove(&user, &id) {
            info!(user = %user, destination = %id, "destination_removed");
            self.publish_destinations(&user, "removed");
        } else {
            debug!(user = %user, destination = %id, "destination_remove_unknown");
        }
    }

    fn publish_destinations(&self, user: &UserId, change: &str) {
        if let Some(ref sender) = self.egress_sender {
            let sent = sender.send_destinations(DestinationsPayload {
                site: None,
                user: user.clone(),
                t: change.to_string(),
                destinations: self.destinations.snapshot(user).to_vec(),
                ts: epoch_ms(),
            });
            if !sent {
                self.metrics.record_egress_dropped();
            }
        }
    }

    /// Raise a panic alert with the last known position, if any
    pub(crate) fn handle_panic(&mut self, user: UserId, message: Option<String>) {
        let state = self.users.get(&user);
        let position = state.and_then(|s| s.last_position()).copied();
        let score = state.and_then(|s| s.last_score());

        self.metrics.record_panic_alert();
        warn!(
            user = %user,
            lat = ?position.map(|p| p.latitude),
            lon = ?position.map(|p| p.longitude),
            score = ?score,
            "panic_alert"
        );

        let mut notification = Notification::panic(&user, message.as_deref(), position.as_ref());
        if let Some(score) = score {
            notification = notification.with_score(score);
        }
        self.publish_notification(&notification);
    }

    pub(crate) fn handle_user_signed_out(&mut self, user: UserId) {
        let had_state = self.forget_user(&user);
        info!(user = %user, had_state = %had_state, "user_signed_out");
    }

    /// Drop everything carried for a user; true if evaluation state existed
    pub(crate) fn forget_user(&mut self, user: &UserId) -> bool {
        self.last_activity.remove(user);
        self.throttle.forget(user);
        self.destinations.clear(user);
        self.users.remove(user).is_some()
    }

    /// Send a notification to the log and the MQTT egress
    pub(crate) fn publish_notification(&self, notification: &Notification) {
        self.metrics.record_notification();
        self.notification_log.write_notification(notification);

        if let Some(ref sender) = self.egress_sender {
            if !sender.send_notification(notification) {
                self.metrics.record_egress_dropped();
            }
        }
    }
}
