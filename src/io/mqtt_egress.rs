//! MQTT publisher for egress events
//!
//! Publishes monitor output to MQTT topics for downstream consumers:
//! - `<notifications>/<user>` - Notifications (QoS 1)
//! - `<status>/<user>` - Safety status, retained (QoS 1)
//! - `<locations>/<user>` - Last-seen location, retained (QoS 0)
//! - `<destinations>/<user>` - Destination set after edits, retained (QoS 1)
//! - `<metrics>` - Periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Topic roots, one per egress message kind
#[derive(Debug, Clone)]
pub struct EgressTopics {
    pub notifications: String,
    pub status: String,
    pub locations: String,
    pub destinations: String,
    pub metrics: String,
}

impl EgressTopics {
    pub fn from_config(config: &Config) -> Self {
        Self {
            notifications: config.mqtt_egress_notifications_topic().to_string(),
            status: config.mqtt_egress_status_topic().to_string(),
            locations: config.mqtt_egress_locations_topic().to_string(),
            destinations: config.mqtt_egress_destinations_topic().to_string(),
            metrics: config.mqtt_egress_metrics_topic().to_string(),
        }
    }
}

/// A message ready to hand to the MQTT client
#[derive(Debug)]
pub struct Outgoing {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

/// Map an egress message to its topic, QoS and serialized body
pub fn route(topics: &EgressTopics, msg: EgressMessage) -> Option<Outgoing> {
    let (topic, qos, retain, payload) = match msg {
        EgressMessage::Notification(p) => (
            format!("{}/{}", topics.notifications, p.user),
            QoS::AtLeastOnce,
            false,
            p.json.into_bytes(),
        ),
        EgressMessage::Status(p) => (
            format!("{}/{}", topics.status, p.user),
            QoS::AtLeastOnce,
            true,
            serde_json::to_vec(&p).ok()?,
        ),
        EgressMessage::Location(p) => (
            format!("{}/{}", topics.locations, p.user),
            QoS::AtMostOnce,
            true,
            serde_json::to_vec(&p).ok()?,
        ),
        EgressMessage::Destinations(p) => (
            format!("{}/{}", topics.destinations, p.user),
            QoS::AtLeastOnce,
            true,
            serde_json::to_vec(&p).ok()?,
        ),
        EgressMessage::Metrics(p) => {
            (topics.metrics.clone(), QoS::AtMostOnce, false, serde_json::to_vec(&p).ok()?)
        }
    };
    Some(Outgoing { topic, qos, retain, payload })
}

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    topics: EgressTopics,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("safetrail-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, rx, topics: EgressTopics::from_config(config) }
    }

    /// Run the publisher loop until shutdown, then drain what is queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            notifications = %self.topics.notifications,
            status = %self.topics.status,
            locations = %self.topics.locations,
            metrics = %self.topics.metrics,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        let kind = msg.as_str();
        let Some(out) = route(&self.topics, msg) else {
            warn!(kind = %kind, "mqtt_egress_serialize_failed");
            return;
        };
        if let Err(e) = self.client.publish(&out.topic, out.qos, out.retain, out.payload).await {
            if out.qos == QoS::AtLeastOnce {
                error!(kind = %kind, topic = %out.topic, error = %e, "mqtt_egress_publish_failed");
            } else {
                debug!(kind = %kind, error = %e, "mqtt_egress_publish_failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::UserId;
    use crate::infra::metrics::Metrics;
    use crate::io::egress_channel::{MetricsPayload, NotificationPayload, SafetyStatusPayload};

    fn topics() -> EgressTopics {
        EgressTopics::from_config(&Config::default())
    }

    #[test]
    fn test_notification_routed_per_user() {
        let msg = EgressMessage::Notification(NotificationPayload {
            user: UserId::from("alice"),
            json: "{}".to_string(),
        });
        let out = route(&topics(), msg).unwrap();
        assert_eq!(out.topic, "safetrail/notifications/alice");
        assert_eq!(out.qos, QoS::AtLeastOnce);
        assert!(!out.retain);
        assert_eq!(out.payload, b"{}");
    }

    #[test]
    fn test_status_retained() {
        let msg = EgressMessage::Status(SafetyStatusPayload {
            site: Some("goa".to_string()),
            user: UserId::from("bob"),
            safe: false,
            score: 60,
            hazards: vec!["h1".to_string()],
            destinations: Vec::new(),
            ts: 1,
        });
        let out = route(&topics(), msg).unwrap();
        assert_eq!(out.topic, "safetrail/status/bob");
        assert!(out.retain);
        let v: serde_json::Value = serde_json::from_slice(&out.payload).unwrap();
        assert_eq!(v["score"], 60);
        assert_eq!(v["hazards"][0], "h1");
    }

    #[test]
    fn test_metrics_flat_topic() {
        let summary = Metrics::new().report();
        let msg = EgressMessage::Metrics(MetricsPayload::from_summary(summary, "goa".to_string()));
        let out = route(&topics(), msg).unwrap();
        assert_eq!(out.topic, "safetrail/metrics");
        assert_eq!(out.qos, QoS::AtMostOnce);
    }
}
