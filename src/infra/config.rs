//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::HazardZone;
use crate::services::proximity::{
    EvaluatorConfig, SafetyPolicy, SeverityPenalties, DEFAULT_GEOFENCE_RADIUS_M,
};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Inbound topic filter (positions, panic, destination edits)
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_topic() -> String {
    "safetrail/in/#".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic: default_mqtt_topic(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceConfig {
    /// Radius shared by all destination geofences (meters)
    #[serde(default = "default_geofence_radius")]
    pub radius_m: f64,
    #[serde(default)]
    pub safety_policy: SafetyPolicy,
}

fn default_geofence_radius() -> f64 {
    DEFAULT_GEOFENCE_RADIUS_M
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self { radius_m: default_geofence_radius(), safety_policy: SafetyPolicy::default() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScoringConfig {
    #[serde(default)]
    pub penalties: SeverityPenalties,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HazardsConfig {
    /// HTTP endpoint returning a JSON array of zones (unset = static zones only)
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default = "default_hazard_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default = "default_hazard_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub zones: Vec<HazardZone>,
}

fn default_hazard_refresh_secs() -> u64 {
    300
}

fn default_hazard_timeout_ms() -> u64 {
    5000
}

impl Default for HazardsConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            refresh_secs: default_hazard_refresh_secs(),
            timeout_ms: default_hazard_timeout_ms(),
            zones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    /// Minimum time between forwarded last-seen updates per user
    #[serde(default = "default_location_interval_ms")]
    pub min_interval_ms: u64,
    /// Minimum displacement before a new update is forwarded (meters)
    #[serde(default = "default_location_distance_m")]
    pub min_distance_m: f64,
}

fn default_location_interval_ms() -> u64 {
    5000
}

fn default_location_distance_m() -> f64 {
    25.0
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_location_interval_ms(),
            min_distance_m: default_location_distance_m(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsersConfig {
    /// Drop carried state for users silent this long (0 disables)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    6 * 3600
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self { idle_timeout_secs: default_idle_timeout_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for the notification log (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { file: default_egress_file() }
    }
}

fn default_egress_file() -> String {
    "notifications.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Notifications, per user: `<topic>/<user>` (QoS 1)
    #[serde(default = "default_notifications_topic")]
    pub notifications_topic: String,
    /// Safety status changes, per user (QoS 1)
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    /// Throttled last-seen locations, per user (QoS 0)
    #[serde(default = "default_locations_topic")]
    pub locations_topic: String,
    /// Destination set after each user edit, per user (QoS 1)
    #[serde(default = "default_destinations_topic")]
    pub destinations_topic: String,
    /// Periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_notifications_topic() -> String {
    "safetrail/notifications".to_string()
}

fn default_status_topic() -> String {
    "safetrail/status".to_string()
}

fn default_locations_topic() -> String {
    "safetrail/locations".to_string()
}

fn default_destinations_topic() -> String {
    "safetrail/destinations".to_string()
}

fn default_metrics_topic() -> String {
    "safetrail/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            notifications_topic: default_notifications_topic(),
            status_topic: default_status_topic(),
            locations_topic: default_locations_topic(),
            destinations_topic: default_destinations_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier stamped on every egress payload
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "safetrail".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub hazards: HazardsConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub users: UsersConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    geofence_radius_m: f64,
    safety_policy: SafetyPolicy,
    penalties: SeverityPenalties,
    hazard_feed_url: Option<String>,
    hazard_refresh_secs: u64,
    hazard_timeout_ms: u64,
    static_hazards: Vec<HazardZone>,
    location_min_interval_ms: u64,
    location_min_distance_m: f64,
    user_idle_timeout_secs: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
    egress_file: String,
    // MQTT Egress config
    mqtt_egress_enabled: bool,
    mqtt_egress_notifications_topic: String,
    mqtt_egress_status_topic: String,
    mqtt_egress_locations_topic: String,
    mqtt_egress_destinations_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            geofence_radius_m: toml_config.geofence.radius_m,
            safety_policy: toml_config.geofence.safety_policy,
            penalties: toml_config.scoring.penalties,
            hazard_feed_url: toml_config.hazards.feed_url.filter(|url| !url.trim().is_empty()),
            hazard_refresh_secs: toml_config.hazards.refresh_secs.max(1),
            hazard_timeout_ms: toml_config.hazards.timeout_ms,
            static_hazards: toml_config.hazards.zones,
            location_min_interval_ms: toml_config.location.min_interval_ms,
            location_min_distance_m: toml_config.location.min_distance_m,
            user_idle_timeout_secs: toml_config.users.idle_timeout_secs,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
            egress_file: toml_config.egress.file,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_notifications_topic: toml_config.mqtt_egress.notifications_topic,
            mqtt_egress_status_topic: toml_config.mqtt_egress.status_topic,
            mqtt_egress_locations_topic: toml_config.mqtt_egress.locations_topic,
            mqtt_egress_destinations_topic: toml_config.mqtt_egress.destinations_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs
                .max(1),
        }
    }

    /// Config path when none was given on the command line
    pub fn default_path() -> String {
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config/dev.toml".to_string())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        toml_config
            .scoring
            .penalties
            .validate()
            .with_context(|| format!("Invalid [scoring.penalties] in {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Evaluator parameters from the geofence and scoring sections
    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            geofence_radius_m: self.geofence_radius_m,
            safety_policy: self.safety_policy,
            penalties: self.penalties,
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn geofence_radius_m(&self) -> f64 {
        self.geofence_radius_m
    }

    pub fn safety_policy(&self) -> SafetyPolicy {
        self.safety_policy
    }

    pub fn penalties(&self) -> &SeverityPenalties {
        &self.penalties
    }

    pub fn hazard_feed_url(&self) -> Option<&str> {
        self.hazard_feed_url.as_deref()
    }

    pub fn hazard_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.hazard_refresh_secs)
    }

    pub fn hazard_timeout(&self) -> Duration {
        Duration::from_millis(self.hazard_timeout_ms)
    }

    pub fn static_hazards(&self) -> &[HazardZone] {
        &self.static_hazards
    }

    pub fn location_min_interval(&self) -> Duration {
        Duration::from_millis(self.location_min_interval_ms)
    }

    pub fn location_min_distance_m(&self) -> f64 {
        self.location_min_distance_m
    }

    /// Idle time after which a user's carried state is dropped
    pub fn user_idle_timeout(&self) -> Option<Duration> {
        (self.user_idle_timeout_secs > 0).then(|| Duration::from_secs(self.user_idle_timeout_secs))
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    // MQTT Egress getters
    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_notifications_topic(&self) -> &str {
        &self.mqtt_egress_notifications_topic
    }

    pub fn mqtt_egress_status_topic(&self) -> &str {
        &self.mqtt_egress_status_topic
    }

    pub fn mqtt_egress_locations_topic(&self) -> &str {
        &self.mqtt_egress_locations_topic
    }

    pub fn mqtt_egress_destinations_topic(&self) -> &str {
        &self.mqtt_egress_destinations_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    /// Builder method for tests to set the geofence radius
    #[cfg(test)]
    pub fn with_user_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.user_idle_timeout_secs = secs;
        self
    }

    #[cfg(test)]
    pub fn with_mqtt_broker(mut self, host: &str, port: u16) -> Self {
        self.mqtt_host = host.to_string();
        self.mqtt_port = port;
        self
    }

    #[cfg(test)]
    pub fn with_geofence_radius_m(mut self, radius_m: f64) -> Self {
        self.geofence_radius_m = radius_m;
        self
    }

    /// Builder method for tests to set the safety policy
    #[cfg(test)]
    pub fn with_safety_policy(mut self, policy: SafetyPolicy) -> Self {
        self.safety_policy = policy;
        self
    }

    /// Builder method for tests to point the notification log elsewhere
    #[cfg(test)]
    pub fn with_egress_file(mut self, file: &str) -> Self {
        self.egress_file = file.to_string();
        self
    }

    /// Builder method for tests to set location throttling
    #[cfg(test)]
    pub fn with_location_throttle(mut self, min_interval_ms: u64, min_distance_m: f64) -> Self {
        self.location_min_interval_ms = min_interval_ms;
        self.location_min_distance_m = min_distance_m;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Severity;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.mqtt_topic(), "safetrail/in/#");
        assert_eq!(config.geofence_radius_m(), 3000.0);
        assert_eq!(config.safety_policy(), SafetyPolicy::RequireDestination);
        assert_eq!(config.penalties().high, 40);
        assert!(config.hazard_feed_url().is_none());
        assert_eq!(config.metrics_interval_secs(), 10);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_evaluator_config_from_sections() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[geofence]
radius_m = 500.0
safety_policy = "hazard_free"

[scoring.penalties]
high = 60
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        let eval = config.evaluator_config();
        assert_eq!(eval.geofence_radius_m, 500.0);
        assert_eq!(eval.safety_policy, SafetyPolicy::HazardFree);
        assert_eq!(eval.penalties.high, 60);
        assert_eq!(eval.penalties.low, 10);
    }

    #[test]
    fn test_static_hazard_zones() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[[hazards.zones]]
id = "market"
title = "Crowded market"
latitude = 15.5
longitude = 73.8
radius_m = 250.0
severity = "low"
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.static_hazards().len(), 1);
        assert_eq!(config.static_hazards()[0].severity, Severity::Low);
    }

    #[test]
    fn test_blank_feed_url_disabled() {
        let toml_config: TomlConfig = toml::from_str("[hazards]\nfeed_url = \"  \"\n").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert!(config.hazard_feed_url().is_none());
    }

    #[test]
    fn test_egress_file_default() {
        let egress = EgressConfig::default();
        assert_eq!(egress.file, "notifications.jsonl");

        let config = Config::default();
        assert_eq!(config.egress_file(), "notifications.jsonl");
    }
}
