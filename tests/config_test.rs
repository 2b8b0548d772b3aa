//! Integration tests for configuration loading

use safetrail::domain::types::{HazardId, Severity};
use safetrail::infra::Config;
use safetrail::services::SafetyPolicy;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "goa-north"

[mqtt]
host = "test-host"
port = 1884
topic = "test/in/#"

[geofence]
radius_m = 1500.0
safety_policy = "hazard_free"

[scoring.penalties]
high = 55

[hazards]
feed_url = "http://hazards.local/zones"
refresh_secs = 120
timeout_ms = 2500

[[hazards.zones]]
id = "cliff-1"
title = "Cliff edge"
latitude = 15.60
longitude = 73.73
radius_m = 250.0
severity = "high"

[location]
min_interval_ms = 10000
min_distance_m = 50.0

[users]
idle_timeout_secs = 900

[metrics]
interval_secs = 15
prometheus_port = 9091

[egress]
file = "/tmp/safetrail-test.jsonl"

[mqtt_egress]
enabled = false
status_topic = "test/status"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "goa-north");
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic(), "test/in/#");
    assert_eq!(config.geofence_radius_m(), 1500.0);
    assert_eq!(config.safety_policy(), SafetyPolicy::HazardFree);
    assert_eq!(config.penalties().high, 55);
    assert_eq!(config.penalties().medium, 20);
    assert_eq!(config.hazard_feed_url(), Some("http://hazards.local/zones"));
    assert_eq!(config.hazard_refresh_interval(), Duration::from_secs(120));
    assert_eq!(config.hazard_timeout(), Duration::from_millis(2500));
    assert_eq!(config.static_hazards().len(), 1);
    assert_eq!(config.static_hazards()[0].id, HazardId::from("cliff-1"));
    assert_eq!(config.static_hazards()[0].severity, Severity::High);
    assert_eq!(config.location_min_interval(), Duration::from_millis(10000));
    assert_eq!(config.location_min_distance_m(), 50.0);
    assert_eq!(config.user_idle_timeout(), Some(Duration::from_secs(900)));
    assert_eq!(config.prometheus_port(), 9091);
    assert_eq!(config.egress_file(), "/tmp/safetrail-test.jsonl");
    assert!(!config.mqtt_egress_enabled());
    assert_eq!(config.mqtt_egress_status_topic(), "test/status");
    assert_eq!(config.mqtt_egress_notifications_topic(), "safetrail/notifications");

    let evaluator = config.evaluator_config();
    assert_eq!(evaluator.geofence_radius_m, 1500.0);
    assert_eq!(evaluator.safety_policy, SafetyPolicy::HazardFree);
}

#[test]
fn test_partial_config_uses_section_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[geofence]\nradius_m = 800.0\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.geofence_radius_m(), 800.0);
    assert_eq!(config.safety_policy(), SafetyPolicy::RequireDestination);
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.hazard_feed_url(), None);
    assert!(config.static_hazards().is_empty());
    assert_eq!(config.user_idle_timeout(), Some(Duration::from_secs(6 * 3600)));
}

#[test]
fn test_blank_feed_url_disables_feed() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[hazards]\nfeed_url = \"  \"\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.hazard_feed_url(), None);
}

#[test]
fn test_malformed_config_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[geofence]\nradius_m = \"wide\"\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_zero_penalty_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[scoring.penalties]\nlow = 0\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("Invalid [scoring.penalties]"));
    assert!(message.contains("low severity penalty must be positive"));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.geofence_radius_m(), 3000.0);
    assert_eq!(config.safety_policy(), SafetyPolicy::RequireDestination);
    assert_eq!(config.config_file(), "default");
}
