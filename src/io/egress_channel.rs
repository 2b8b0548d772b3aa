//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to send events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::notification::{epoch_ms, Notification};
use crate::domain::types::{Destination, UserId};
use crate::infra::metrics::{MetricsSummary, METRICS_NUM_BUCKETS};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// User-facing notification (transition, status change, panic)
    Notification(NotificationPayload),
    /// Aggregate safety status after a change
    Status(SafetyStatusPayload),
    /// Throttled last-seen location
    Location(LocationPayload),
    /// Destination set after a user edit
    Destinations(DestinationsPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

impl EgressMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            EgressMessage::Notification(_) => "notification",
            EgressMessage::Status(_) => "status",
            EgressMessage::Location(_) => "location",
            EgressMessage::Destinations(_) => "destinations",
            EgressMessage::Metrics(_) => "metrics",
        }
    }
}

/// Pre-serialized notification
#[derive(Debug, Serialize)]
pub struct NotificationPayload {
    pub user: UserId,
    pub json: String,
}

/// Payload for safety status changes
#[derive(Debug, Clone, Serialize)]
pub struct SafetyStatusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub user: UserId,
    pub safe: bool,
    pub score: u8,
    /// Hazard zones currently containing the user
    pub hazards: Vec<String>,
    /// Destinations whose geofence currently contains the user
    pub destinations: Vec<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
}

/// Payload for last-seen location updates
#[derive(Debug, Clone, Serialize)]
pub struct LocationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub user: UserId,
    pub lat: f64,
    pub lon: f64,
    /// Device sample time (epoch ms), omitted when unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_ts: Option<u64>,
    pub safe: bool,
    pub score: u8,
    /// Timestamp (epoch ms)
    pub ts: u64,
}

/// Payload for destination set changes
#[derive(Debug, Clone, Serialize)]
pub struct DestinationsPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub user: UserId,
    /// Change type (replaced, added, removed)
    pub t: String,
    pub destinations: Vec<Destination>,
    pub ts: u64,
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    pub ts: u64,
    pub positions_total: u64,
    pub positions_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Evaluation latency histogram buckets (Prometheus-style exponential)
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p99_us: u64,
    pub active_users: u64,
    pub unsafe_users: u64,
    pub hazard_zones: u64,
    pub hazard_entries_total: u64,
    pub panic_alerts_total: u64,
    pub invalid_inputs_total: u64,
    pub mqtt_events_dropped: u64,
    pub egress_dropped: u64,
}

impl MetricsPayload {
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            positions_total: summary.positions_total,
            positions_per_sec: summary.positions_per_sec,
            avg_latency_us: summary.avg_eval_latency_us,
            max_latency_us: summary.max_eval_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p99_us: summary.lat_p99_us,
            active_users: summary.active_users,
            unsafe_users: summary.unsafe_users,
            hazard_zones: summary.hazard_zones,
            hazard_entries_total: summary.hazard_entries_total,
            panic_alerts_total: summary.panic_alerts_total,
            invalid_inputs_total: summary.invalid_inputs_total,
            mqtt_events_dropped: summary.mqtt_events_dropped,
            egress_dropped: summary.egress_dropped,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Queue a message; returns false if it was dropped
    fn offer(&self, msg: EgressMessage) -> bool {
        let kind = msg.as_str();
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!(kind = %kind, error = %e, "egress_dropped");
                false
            }
        }
    }

    /// Send a notification, with site_id added to the JSON
    pub fn send_notification(&self, notification: &Notification) -> bool {
        let json = notification.to_json_with_site(&self.site_id);
        self.offer(EgressMessage::Notification(NotificationPayload {
            user: notification.user.clone(),
            json,
        }))
    }

    pub fn send_status(&self, mut payload: SafetyStatusPayload) -> bool {
        payload.site = Some(self.site_id.clone());
        self.offer(EgressMessage::Status(payload))
    }

    pub fn send_location(&self, mut payload: LocationPayload) -> bool {
        payload.site = Some(self.site_id.clone());
        self.offer(EgressMessage::Location(payload))
    }

    pub fn send_destinations(&self, mut payload: DestinationsPayload) -> bool {
        payload.site = Some(self.site_id.clone());
        self.offer(EgressMessage::Destinations(payload))
    }

    pub fn send_metrics(&self, summary: MetricsSummary) -> bool {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        self.offer(EgressMessage::Metrics(payload))
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// site_id is stamped on every payload for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
