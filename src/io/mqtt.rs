//! MQTT client for receiving device messages
//!
//! Devices publish JSON messages tagged by `type`:
//! - `position` - location sample (`latitude`/`longitude`, aliases `lat`/`lng`/`lon`)
//! - `panic` - panic button with optional message
//! - `destinations` - full replacement of the user's destination set
//! - `destination_add` / `destination_remove` - single edits
//! - `sign_out` - drop the user's carried state

use crate::domain::types::{
    deserialize_timestamp, Destination, DestinationId, MonitorEvent, Position, TimestampValue,
    UserId,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Wire format of inbound messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    Position {
        user: UserId,
        #[serde(alias = "lat")]
        latitude: f64,
        #[serde(alias = "lng", alias = "lon")]
        longitude: f64,
        #[serde(default, deserialize_with = "deserialize_timestamp")]
        ts: TimestampValue,
    },
    Panic {
        user: UserId,
        #[serde(default)]
        message: Option<String>,
    },
    Destinations {
        user: UserId,
        destinations: Vec<Destination>,
    },
    DestinationAdd {
        user: UserId,
        name: String,
        #[serde(alias = "lat")]
        latitude: f64,
        #[serde(alias = "lng", alias = "lon")]
        longitude: f64,
    },
    DestinationRemove {
        user: UserId,
        id: DestinationId,
    },
    SignOut {
        user: UserId,
    },
}

impl From<InboundMessage> for MonitorEvent {
    fn from(msg: InboundMessage) -> Self {
        match msg {
            InboundMessage::Position { user, latitude, longitude, ts } => MonitorEvent::Position {
                user,
                position: Position::at(latitude, longitude, timestamp_to_epoch_ms(&ts)),
            },
            InboundMessage::Panic { user, message } => MonitorEvent::Panic { user, message },
            InboundMessage::Destinations { user, destinations } => {
                MonitorEvent::DestinationsReplaced { user, destinations }
            }
            InboundMessage::DestinationAdd { user, name, latitude, longitude } => {
                MonitorEvent::DestinationAdded { user, name, latitude, longitude }
            }
            InboundMessage::DestinationRemove { user, id } => {
                MonitorEvent::DestinationRemoved { user, id }
            }
            InboundMessage::SignOut { user } => MonitorEvent::UserSignedOut { user },
        }
    }
}

/// Parse one inbound JSON payload
pub fn parse_inbound(json_str: &str) -> Result<MonitorEvent, serde_json::Error> {
    let msg: InboundMessage = serde_json::from_str(json_str)?;
    Ok(msg.into())
}

/// Parse ISO 8601 timestamp to epoch milliseconds
fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .and_then(|dt| u64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok())
}

/// Extract epoch milliseconds from TimestampValue (0 when unknown)
fn timestamp_to_epoch_ms(ts: &TimestampValue) -> u64 {
    match ts {
        TimestampValue::EpochMs(ms) => *ms,
        TimestampValue::IsoString(s) => parse_iso_time(s).unwrap_or(0),
        TimestampValue::None => 0,
    }
}

/// Start the MQTT client and send parsed events to the channel
///
/// Events are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped events are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    event_tx: mpsc::Sender<MonitorEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let client_id = format!("safetrail-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    let topic = config.mqtt_topic().to_string();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        metrics.record_mqtt_message();
                        let event = match std::str::from_utf8(&publish.payload) {
                            Ok(json_str) => match parse_inbound(json_str) {
                                Ok(event) => event,
                                Err(e) => {
                                    metrics.record_mqtt_message_invalid();
                                    debug!(topic = %publish.topic, error = %e, "mqtt_message_unparsed");
                                    continue;
                                }
                            },
                            Err(e) => {
                                metrics.record_mqtt_message_invalid();
                                warn!(topic = %publish.topic, error = %e, "mqtt_payload_not_utf8");
                                continue;
                            }
                        };

                        debug!(user = %event.user(), kind = %event.as_str(), "mqtt_event");
                        if let Err(e) = event_tx.try_send(event) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_mqtt_event_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("mqtt_event_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("event_channel_closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(session_present = %ack.session_present, "mqtt_connected");
                        // Clean sessions drop subscriptions, so subscribe on every connect
                        client.subscribe(topic.as_str(), QoS::AtLeastOnce).await?;
                        info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_subscribed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
