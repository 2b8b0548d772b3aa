//! Safetrail simulator - walks a user between two points over MQTT
//!
//! Publishes `position` messages along the great circle from `--from` to
//! `--to`, then optionally a `panic` message. Notifications and status
//! updates published back for the user are logged as they arrive.
//!
//! Usage:
//!   cargo run --bin safetrail-sim -- --from 15.4989,73.8278 --to 15.5560,73.7517 --steps 40

use clap::Parser;
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use safetrail::domain::geo::{haversine_m, interpolate, valid_latitude, valid_longitude};
use safetrail::domain::notification::epoch_ms;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "safetrail-sim")]
#[command(about = "Walk a simulated traveller between two points")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// Topic the monitor subscribes to
    #[arg(long, default_value = "safetrail/in/sim")]
    topic: String,

    /// Topic root for notifications coming back (empty to skip)
    #[arg(long, default_value = "safetrail/notifications")]
    notifications_topic: String,

    /// Topic root for status updates coming back (empty to skip)
    #[arg(long, default_value = "safetrail/status")]
    status_topic: String,

    /// Simulated user id
    #[arg(short, long, default_value = "sim-user")]
    user: String,

    /// Start point as "lat,lon"
    #[arg(long, value_parser = parse_point)]
    from: (f64, f64),

    /// End point as "lat,lon"
    #[arg(long, value_parser = parse_point)]
    to: (f64, f64),

    /// Number of segments between the two points
    #[arg(long, default_value = "20")]
    steps: u32,

    /// Delay between samples in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Send a panic alert after the last sample
    #[arg(long)]
    panic: bool,
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (lat, lon) = s.split_once(',').ok_or_else(|| format!("expected lat,lon, got {s:?}"))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude: {e}"))?;
    let lon: f64 = lon.trim().parse().map_err(|e| format!("bad longitude: {e}"))?;
    if !valid_latitude(lat) || !valid_longitude(lon) {
        return Err(format!("coordinates out of range: {lat},{lon}"));
    }
    Ok((lat, lon))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let steps = args.steps.max(1);

    let client_id = format!("safetrail-sim-{}", std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, &args.mqtt_host, args.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    for root in [&args.notifications_topic, &args.status_topic] {
        if !root.is_empty() {
            client.subscribe(format!("{root}/{}", args.user), QoS::AtLeastOnce).await?;
        }
    }

    // Eventloop drives both the publishes below and the subscriptions above
    let mqtt_handle = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => info!("mqtt_connected"),
                Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload);
                    info!(topic = %publish.topic, payload = %payload, "received");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let total_m = haversine_m(args.from.0, args.from.1, args.to.0, args.to.1);
    info!(
        user = %args.user,
        from = ?args.from,
        to = ?args.to,
        distance_m = %format!("{total_m:.0}"),
        steps = %steps,
        "walk_started"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    for step in 0..=steps {
        ticker.tick().await;
        let (lat, lon) = interpolate(args.from, args.to, f64::from(step) / f64::from(steps));
        let msg = json!({
            "type": "position",
            "user": args.user,
            "latitude": lat,
            "longitude": lon,
            "ts": epoch_ms(),
        });
        client.publish(&args.topic, QoS::AtMostOnce, false, msg.to_string()).await?;
        info!(step = %step, lat = %format!("{lat:.6}"), lon = %format!("{lon:.6}"), "position_sent");
    }

    if args.panic {
        let msg = json!({
            "type": "panic",
            "user": args.user,
            "message": "Simulated panic at end of walk",
        });
        client.publish(&args.topic, QoS::AtLeastOnce, false, msg.to_string()).await?;
        info!(user = %args.user, "panic_sent");
    }

    // Leave time for the last responses to arrive
    tokio::time::sleep(Duration::from_secs(2)).await;
    client.disconnect().await.ok();
    mqtt_handle.abort();
    info!("walk_finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("15.5, 73.8").unwrap(), (15.5, 73.8));
        assert!(parse_point("15.5").is_err());
        assert!(parse_point("95,0").is_err());
        assert!(parse_point("a,b").is_err());
    }
}
