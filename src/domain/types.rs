//! Shared types for the safety service

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Newtype wrapper for user IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for destination IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub String);

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DestinationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for hazard zone IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HazardId(pub String);

impl fmt::Display for HazardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HazardId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A location sample from a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Sample time (epoch ms), 0 when the source did not provide one
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl Position {
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, timestamp_ms: 0 }
    }

    #[inline]
    pub fn at(latitude: f64, longitude: f64, timestamp_ms: u64) -> Self {
        Self { latitude, longitude, timestamp_ms }
    }
}

/// A user-owned point of interest with a circular geofence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestinationId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Hazard zone severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// A circular threat area with its own radius and severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardZone {
    pub id: HazardId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
    pub severity: Severity,
}

/// Which kind of zone a transition refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    Destination,
    Hazard,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::Destination => "destination",
            ZoneKind::Hazard => "hazard",
        }
    }
}

/// Membership flip direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Entered,
    Exited,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Entered => "entered",
            TransitionKind::Exited => "exited",
        }
    }
}

/// Zone reference carried by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneRef {
    Destination(DestinationId),
    Hazard(HazardId),
}

impl ZoneRef {
    pub fn kind(&self) -> ZoneKind {
        match self {
            ZoneRef::Destination(_) => ZoneKind::Destination,
            ZoneRef::Hazard(_) => ZoneKind::Hazard,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ZoneRef::Destination(id) => &id.0,
            ZoneRef::Hazard(id) => &id.0,
        }
    }
}

/// A single entered/exited event produced by an evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneTransition {
    pub kind: TransitionKind,
    pub zone: ZoneRef,
}

impl ZoneTransition {
    pub fn entered(zone: ZoneRef) -> Self {
        Self { kind: TransitionKind::Entered, zone }
    }

    pub fn exited(zone: ZoneRef) -> Self {
        Self { kind: TransitionKind::Exited, zone }
    }

    #[inline]
    pub fn zone_kind(&self) -> ZoneKind {
        self.zone.kind()
    }
}

/// Input to the safety monitor
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Position { user: UserId, position: Position },
    DestinationsReplaced { user: UserId, destinations: Vec<Destination> },
    DestinationAdded { user: UserId, name: String, latitude: f64, longitude: f64 },
    DestinationRemoved { user: UserId, id: DestinationId },
    Panic { user: UserId, message: Option<String> },
    UserSignedOut { user: UserId },
}

impl MonitorEvent {
    pub fn user(&self) -> &UserId {
        match self {
            MonitorEvent::Position { user, .. }
            | MonitorEvent::DestinationsReplaced { user, .. }
            | MonitorEvent::DestinationAdded { user, .. }
            | MonitorEvent::DestinationRemoved { user, .. }
            | MonitorEvent::Panic { user, .. }
            | MonitorEvent::UserSignedOut { user } => user,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorEvent::Position { .. } => "position",
            MonitorEvent::DestinationsReplaced { .. } => "destinations_replaced",
            MonitorEvent::DestinationAdded { .. } => "destination_added",
            MonitorEvent::DestinationRemoved { .. } => "destination_removed",
            MonitorEvent::Panic { .. } => "panic",
            MonitorEvent::UserSignedOut { .. } => "user_signed_out",
        }
    }
}

/// Timestamp that can be either ISO 8601 string or epoch milliseconds
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

/// Accept either an RFC 3339 string or an integer epoch-ms timestamp
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            // Negative epochs are treated as missing
            Ok(TimestampValue::EpochMs(u64::try_from(value).unwrap_or(0)))
        }

        fn visit_f64<E>(self, value: f64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            // Browsers report fractional milliseconds
            if value.is_finite() && value >= 0.0 {
                Ok(TimestampValue::EpochMs(value as u64))
            } else {
                Ok(TimestampValue::None)
            }
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_str() {
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!("Medium".parse::<Severity>().unwrap(), Severity::Medium);
        assert_eq!("LOW".parse::<Severity>().unwrap(), Severity::Low);
        assert!("extreme".parse::<Severity>().is_err());
    }

    #[test]
    fn test_hazard_zone_deserialize() {
        let json = r#"{
            "id": "z1",
            "title": "Flood area",
            "latitude": 12.5,
            "longitude": 77.1,
            "radius_m": 800,
            "severity": "medium"
        }"#;
        let zone: HazardZone = serde_json::from_str(json).unwrap();
        assert_eq!(zone.id, HazardId::from("z1"));
        assert_eq!(zone.severity, Severity::Medium);
        assert_eq!(zone.radius_m, 800.0);
        assert!(zone.description.is_empty());
    }

    #[test]
    fn test_zone_ref_accessors() {
        let d = ZoneRef::Destination(DestinationId::from("d1"));
        let h = ZoneRef::Hazard(HazardId::from("h1"));
        assert_eq!(d.kind(), ZoneKind::Destination);
        assert_eq!(h.kind(), ZoneKind::Hazard);
        assert_eq!(d.id(), "d1");
        assert_eq!(h.id(), "h1");
    }

    #[test]
    fn test_timestamp_variants() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "deserialize_timestamp")]
            ts: TimestampValue,
        }

        let w: Wrapper = serde_json::from_str(r#"{"ts": 1767617600000}"#).unwrap();
        assert_eq!(w.ts, TimestampValue::EpochMs(1767617600000));

        let w: Wrapper = serde_json::from_str(r#"{"ts": "2026-01-05T16:41:30.048+00:00"}"#).unwrap();
        assert!(matches!(w.ts, TimestampValue::IsoString(_)));

        let w: Wrapper = serde_json::from_str(r#"{"ts": 1767617600000.5}"#).unwrap();
        assert_eq!(w.ts, TimestampValue::EpochMs(1767617600000));
    }
}
