//! Per-user safety monitoring and event orchestration
//!
//! The SafetyMonitor is the central event processor that coordinates:
//! - Proximity evaluation (membership, transitions, safety score per user)
//! - Destination edits (per-user destination book)
//! - Notifications (JSONL log + MQTT egress)
//! - Panic alerts and last-seen location updates
//! - Idle eviction of users that stopped reporting without signing out

mod handlers;

use crate::domain::types::{MonitorEvent, UserId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress::NotificationLog;
use crate::io::EgressSender;
use crate::services::destinations::DestinationBook;
use crate::services::location_throttle::LocationThrottler;
use crate::services::proximity::{ProximityEvaluator, ProximityState};
use crate::services::zone_store::HazardStore;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::info;

/// Central event processor for per-user safety state
pub struct SafetyMonitor {
    /// Carried evaluation state by user
    pub(crate) users: FxHashMap<UserId, ProximityState>,
    /// Destinations by user
    pub(crate) destinations: DestinationBook,
    /// Shared hazard snapshot (refreshed by the feed poller)
    pub(crate) hazards: Arc<HazardStore>,
    pub(crate) evaluator: ProximityEvaluator,
    /// Last-seen location throttling
    pub(crate) throttle: LocationThrottler,
    /// Appends notifications to file
    pub(crate) notification_log: NotificationLog,
    pub(crate) metrics: Arc<Metrics>,
    /// MQTT egress sender (optional)
    pub(crate) egress_sender: Option<EgressSender>,
    /// Time of the last event seen per user
    pub(crate) last_activity: FxHashMap<UserId, Instant>,
    pub(crate) idle_timeout: Option<Duration>,
}

impl SafetyMonitor {
    /// Create a monitor; fails if the configured geofence radius is unusable
    pub fn new(
        config: &Config,
        hazards: Arc<HazardStore>,
        metrics: Arc<Metrics>,
        egress_sender: Option<EgressSender>,
    ) -> anyhow::Result<Self> {
        let evaluator = ProximityEvaluator::new(config.evaluator_config())?;
        info!(
            radius_m = %config.geofence_radius_m(),
            policy = %config.safety_policy().as_str(),
            "safety_monitor_created"
        );
        Ok(Self {
            users: FxHashMap::default(),
            destinations: DestinationBook::new(),
            hazards,
            evaluator,
            throttle: LocationThrottler::new(
                config.location_min_interval(),
                config.location_min_distance_m(),
            ),
            notification_log: NotificationLog::new(config.egress_file()),
            metrics,
            egress_sender,
            last_activity: FxHashMap::default(),
            idle_timeout: config.user_idle_timeout(),
        })
    }

    /// Start the monitor, consuming events until the channel closes
    pub async fn run(&mut self, mut event_rx: mpsc::Receiver<MonitorEvent>) {
        // Idle eviction and gauge refresh tick
        let mut tick_interval = interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(e) => self.process_event(e),
                        None => break,
                    }
                }
                _ = tick_interval.tick() => {
                    self.evict_idle(Instant::now());
                    self.refresh_gauges();
                }
            }
        }
        info!(users = %self.users.len(), "safety_monitor_stopped");
    }

    /// Process a single event, dispatching to the appropriate handler
    pub fn process_event(&mut self, event: MonitorEvent) {
        if !matches!(event, MonitorEvent::UserSignedOut { .. }) {
            self.last_activity.insert(event.user().clone(), Instant::now());
        }
        match event {
            MonitorEvent::Position { user, position } => {
                self.handle_position(user, position);
            }
            MonitorEvent::DestinationsReplaced { user, destinations } => {
                self.handle_destinations_replaced(user, destinations);
            }
            MonitorEvent::DestinationAdded { user, name, latitude, longitude } => {
                self.handle_destination_added(user, &name, latitude, longitude);
            }
            MonitorEvent::DestinationRemoved { user, id } => {
                self.handle_destination_removed(user, id);
            }
            MonitorEvent::Panic { user, message } => {
                self.handle_panic(user, message);
            }
            MonitorEvent::UserSignedOut { user } => {
                self.handle_user_signed_out(user);
            }
        }
    }

    /// Drop every user whose last event is older than the idle timeout
    pub(crate) fn evict_idle(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.idle_timeout else { return 0 };
        let idle: Vec<UserId> = self
            .last_activity
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) >= timeout)
            .map(|(user, _)| user.clone())
            .collect();

        for user in &idle {
            self.forget_user(user);
        }
        if !idle.is_empty() {
            info!(evicted = %idle.len(), remaining = %self.users.len(), "idle_users_evicted");
        }
        idle.len()
    }

    /// Push user and hazard counts to the metrics gauges
    pub fn refresh_gauges(&self) {
        let unsafe_users = self.users.values().filter(|s| s.last_safe() == Some(false)).count();
        self.metrics.set_user_counts(self.users.len() as u64, unsafe_users as u64);
        self.metrics.set_hazard_zones(self.hazards.len() as u64);
    }

    /// Carried state for a user, if any
    pub fn user_state(&self, user: &UserId) -> Option<&ProximityState> {
        self.users.get(user)
    }

    pub fn active_users(&self) -> usize {
        self.users.len()
    }
}
