//! Safetrail - tourist safety monitor
//!
//! Consumes position updates from the mobile app over MQTT, evaluates them
//! against destination geofences and threat zones, and publishes
//! notifications, safety status and last-seen locations.
//!
//! Module structure:
//! - `domain/` - Core types (Position, Destination, HazardZone, Notification)
//! - `io/` - External interfaces (MQTT, hazard feed, egress, Prometheus)
//! - `services/` - Business logic (ProximityEvaluator, SafetyMonitor)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use safetrail::infra::{Config, Metrics};
use safetrail::io::{create_egress_channel, HazardFeed, MqttPublisher};
use safetrail::services::{HazardStore, SafetyMonitor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Safetrail - geofence and threat zone monitor for travellers
#[derive(Parser, Debug)]
#[command(name = "safetrail", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-position events
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "safetrail starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        radius_m = %config.geofence_radius_m(),
        policy = %config.safety_policy().as_str(),
        static_hazards = %config.static_hazards().len(),
        hazard_feed = ?config.hazard_feed_url(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Hazard snapshot: static zones from config, feed zones layered on top
    let hazards = Arc::new(HazardStore::new(config.static_hazards().to_vec()));
    metrics.set_hazard_zones(hazards.len() as u64);

    if let Some(url) = config.hazard_feed_url() {
        let feed = HazardFeed::new(
            url,
            config.hazard_refresh_interval(),
            config.hazard_timeout(),
            hazards.clone(),
            metrics.clone(),
        )?;
        let feed_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            feed.run(feed_shutdown).await;
        });
    }

    // Create event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(1000);
    let queue_handle = event_tx.downgrade();

    // Start MQTT client; it owns the only strong sender, so the monitor
    // loop ends once the client shuts down
    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            safetrail::io::mqtt::start_mqtt_client(&mqtt_config, event_tx, mqtt_metrics, mqtt_shutdown)
                .await
        {
            tracing::error!(error = %e, "MQTT client error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = safetrail::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            if let Some(tx) = queue_handle.upgrade() {
                let depth = tx.max_capacity() - tx.capacity();
                metrics_clone.set_event_queue_depth(depth as u64);
            }
            metrics_clone.report().log();
        }
    });

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        // Metrics egress reads without resetting the reporter's window
        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                metrics_egress.send_metrics(metrics_for_egress.snapshot());
            }
        });

        Some(egress_sender)
    } else {
        None
    };

    let mut monitor = SafetyMonitor::new(&config, hazards, metrics, egress_sender)?;
    info!("safety_monitor_started");

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run monitor - consumes events until channel closes
    monitor.run(event_rx).await;

    info!("safetrail shutdown complete");
    Ok(())
}
