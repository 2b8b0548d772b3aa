//! Hazard feed poller - periodic HTTP pull of threat zones
//!
//! The feed returns a JSON array of zones. Each successful fetch replaces the
//! feed part of the hazard snapshot; a failed fetch leaves it untouched.

use crate::domain::types::{HazardId, HazardZone, Severity};
use crate::infra::metrics::Metrics;
use crate::services::zone_store::HazardStore;
use anyhow::Context;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Zone ids arrive as strings or integers depending on the publisher
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedId {
    Text(String),
    Number(i64),
}

impl FeedId {
    fn into_id(self) -> HazardId {
        match self {
            FeedId::Text(s) => HazardId(s),
            FeedId::Number(n) => HazardId(n.to_string()),
        }
    }
}

/// Lenient wire record for one feed zone
#[derive(Debug, Deserialize)]
struct FeedZone {
    id: FeedId,
    #[serde(alias = "name")]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    longitude: f64,
    #[serde(alias = "radius")]
    radius_m: f64,
    #[serde(default)]
    severity: Option<String>,
}

impl FeedZone {
    fn into_zone(self) -> HazardZone {
        let severity = match self.severity.as_deref() {
            None => Severity::Medium,
            Some(s) => s.parse().unwrap_or_else(|e| {
                warn!(error = %e, "hazard_severity_defaulted");
                Severity::Medium
            }),
        };
        HazardZone {
            id: self.id.into_id(),
            title: self.title,
            description: self.description,
            latitude: self.latitude,
            longitude: self.longitude,
            radius_m: self.radius_m,
            severity,
        }
    }
}

/// Parse a feed body into zones. Records that do not match the zone shape
/// are skipped; geometry is checked later by the store.
pub fn parse_feed(body: &str) -> anyhow::Result<Vec<HazardZone>> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(body).context("hazard feed is not a JSON array")?;

    let mut zones = Vec::with_capacity(raw.len());
    for (index, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<FeedZone>(value) {
            Ok(zone) => zones.push(zone.into_zone()),
            Err(e) => warn!(index = %index, error = %e, "hazard_record_skipped"),
        }
    }
    Ok(zones)
}

/// Periodic hazard feed poller
pub struct HazardFeed {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    store: Arc<HazardStore>,
    metrics: Arc<Metrics>,
}

impl HazardFeed {
    pub fn new(
        url: &str,
        interval: Duration,
        timeout: Duration,
        store: Arc<HazardStore>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build hazard feed HTTP client")?;
        Ok(Self { client, url: url.to_string(), interval, store, metrics })
    }

    async fn fetch(&self) -> anyhow::Result<Vec<HazardZone>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()
            .with_context(|| format!("GET {}", self.url))?;
        let body = response.text().await.context("Failed to read hazard feed body")?;
        parse_feed(&body)
    }

    /// Fetch once and replace the snapshot on success
    pub async fn refresh_once(&self) -> anyhow::Result<usize> {
        match self.fetch().await {
            Ok(zones) => {
                let fetched = zones.len();
                let count = self.store.replace(zones);
                self.metrics.record_hazard_feed_refresh(true);
                self.metrics.set_hazard_zones(count as u64);
                debug!(fetched = %fetched, zones = %count, "hazard_feed_refreshed");
                Ok(count)
            }
            Err(e) => {
                self.metrics.record_hazard_feed_refresh(false);
                Err(e)
            }
        }
    }

    /// Poll until shutdown; the first fetch happens immediately
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.url, interval_secs = %self.interval.as_secs(), "hazard_feed_started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("hazard_feed_shutdown");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        warn!(error = %format!("{e:#}"), zones = %self.store.len(), "hazard_feed_failed");
                    }
                }
            }
        }
    }
}
