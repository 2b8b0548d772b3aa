//! User-facing notification model
//!
//! Notifications are what the monitor hands to the notification sink:
//! zone transitions, safety status changes and panic alerts.

use crate::domain::types::{Destination, HazardZone, Position, Severity, UserId};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Notification classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    HazardEntered,
    HazardExited,
    DestinationArrived,
    DestinationLeft,
    SafetyChanged,
    Panic,
}

impl NotificationKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::HazardEntered => "hazard_entered",
            NotificationKind::HazardExited => "hazard_exited",
            NotificationKind::DestinationArrived => "destination_arrived",
            NotificationKind::DestinationLeft => "destination_left",
            NotificationKind::SafetyChanged => "safety_changed",
            NotificationKind::Panic => "panic",
        }
    }
}

/// A notification for one user
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// UUIDv7 notification ID
    pub nid: String,
    pub user: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// Zone the notification refers to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Safety score at the time of the notification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_score: Option<u8>,
    /// Epoch ms
    pub ts: u64,
    /// RFC 3339 creation time
    pub created_at: String,
}

impl Notification {
    pub fn new(user: &UserId, kind: NotificationKind, title: &str, body: &str) -> Self {
        Self {
            nid: new_uuid_v7(),
            user: user.clone(),
            kind,
            title: title.to_string(),
            body: body.to_string(),
            zone_id: None,
            severity: None,
            latitude: None,
            longitude: None,
            safety_score: None,
            ts: epoch_ms(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn with_zone(mut self, zone_id: &str) -> Self {
        self.zone_id = Some(zone_id.to_string());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_position(mut self, position: Option<&Position>) -> Self {
        if let Some(p) = position {
            self.latitude = Some(p.latitude);
            self.longitude = Some(p.longitude);
        }
        self
    }

    pub fn with_score(mut self, score: u8) -> Self {
        self.safety_score = Some(score);
        self
    }

    /// Threat zone entry
    pub fn hazard_entered(user: &UserId, zone: &HazardZone, position: &Position) -> Self {
        let body = if zone.description.is_empty() {
            format!("{} risk area. Stay alert and avoid the area if possible.", capitalize(zone.severity.as_str()))
        } else {
            zone.description.clone()
        };
        Self::new(user, NotificationKind::HazardEntered, &format!("Entered threat zone: {}", zone.title), &body)
            .with_zone(&zone.id.0)
            .with_severity(zone.severity)
            .with_position(Some(position))
    }

    /// Threat zone exit
    pub fn hazard_exited(user: &UserId, zone: &HazardZone, position: &Position) -> Self {
        Self::new(
            user,
            NotificationKind::HazardExited,
            &format!("Left threat zone: {}", zone.title),
            "You are no longer inside this threat zone.",
        )
        .with_zone(&zone.id.0)
        .with_severity(zone.severity)
        .with_position(Some(position))
    }

    pub fn destination_arrived(user: &UserId, dest: &Destination, position: &Position) -> Self {
        Self::new(
            user,
            NotificationKind::DestinationArrived,
            &format!("Arrived near {}", dest.name),
            "You are inside the safe area around this destination.",
        )
        .with_zone(&dest.id.0)
        .with_position(Some(position))
    }

    pub fn destination_left(user: &UserId, dest: &Destination, position: &Position) -> Self {
        Self::new(
            user,
            NotificationKind::DestinationLeft,
            &format!("Left {}", dest.name),
            "You have moved outside the safe area around this destination.",
        )
        .with_zone(&dest.id.0)
        .with_position(Some(position))
    }

    /// Aggregate verdict flipped
    pub fn safety_changed(user: &UserId, safe: bool, score: u8, position: &Position) -> Self {
        let (title, body) = if safe {
            ("You are in a safe area", "No active threats around your location.")
        } else {
            ("You are in an unsafe area", "Stay alert and head towards one of your destinations.")
        };
        Self::new(user, NotificationKind::SafetyChanged, title, body)
            .with_score(score)
            .with_position(Some(position))
    }

    /// Panic alert, with the last known position when there is one
    pub fn panic(user: &UserId, message: Option<&str>, position: Option<&Position>) -> Self {
        let body = match message.map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => "User triggered a panic alert.".to_string(),
        };
        Self::new(user, NotificationKind::Panic, "Panic alert", &body).with_position(position)
    }

    /// Serialize to a single-line JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Serialize with a site identifier added at the top level
    pub fn to_json_with_site(&self, site: &str) -> String {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut obj)) => {
                obj.insert("site".to_string(), serde_json::Value::String(site.to_string()));
                serde_json::Value::Object(obj).to_string()
            }
            _ => self.to_json(),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::HazardId;

    fn zone(description: &str) -> HazardZone {
        HazardZone {
            id: HazardId::from("z1"),
            title: "Old harbour".to_string(),
            description: description.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            radius_m: 500.0,
            severity: Severity::High,
        }
    }

    #[test]
    fn test_uuid_v7_unique() {
        assert_ne!(new_uuid_v7(), new_uuid_v7());
    }

    #[test]
    fn test_hazard_entered_fields() {
        let user = UserId::from("u1");
        let n = Notification::hazard_entered(&user, &zone(""), &Position::new(1.0, 2.0));
        assert_eq!(n.kind, NotificationKind::HazardEntered);
        assert_eq!(n.title, "Entered threat zone: Old harbour");
        assert!(n.body.starts_with("High risk area"));
        assert_eq!(n.zone_id.as_deref(), Some("z1"));
        assert_eq!(n.latitude, Some(1.0));
        assert_eq!(n.longitude, Some(2.0));
    }

    #[test]
    fn test_hazard_entered_uses_description() {
        let user = UserId::from("u1");
        let n = Notification::hazard_entered(&user, &zone("Pickpockets reported"), &Position::new(0.0, 0.0));
        assert_eq!(n.body, "Pickpockets reported");
    }

    #[test]
    fn test_panic_without_position() {
        let user = UserId::from("u1");
        let n = Notification::panic(&user, Some("  "), None);
        assert_eq!(n.kind, NotificationKind::Panic);
        assert_eq!(n.body, "User triggered a panic alert.");
        assert!(n.latitude.is_none());

        let n = Notification::panic(&user, Some("lost near the pier"), Some(&Position::new(3.0, 4.0)));
        assert_eq!(n.body, "lost near the pier");
        assert_eq!(n.longitude, Some(4.0));
    }

    #[test]
    fn test_safety_changed_titles() {
        let user = UserId::from("u1");
        let p = Position::new(0.0, 0.0);
        assert_eq!(Notification::safety_changed(&user, true, 100, &p).title, "You are in a safe area");
        let unsafe_n = Notification::safety_changed(&user, false, 60, &p);
        assert_eq!(unsafe_n.title, "You are in an unsafe area");
        assert_eq!(unsafe_n.safety_score, Some(60));
    }

    #[test]
    fn test_json_shape() {
        let user = UserId::from("u1");
        let n = Notification::new(&user, NotificationKind::Panic, "Panic", "help").with_score(60);
        let parsed: serde_json::Value = serde_json::from_str(&n.to_json()).unwrap();
        assert_eq!(parsed["kind"], "panic");
        assert_eq!(parsed["user"], "u1");
        assert_eq!(parsed["safety_score"], 60);
        assert!(parsed.get("zone_id").is_none());
        assert!(parsed.get("latitude").is_none());

        let with_site: serde_json::Value =
            serde_json::from_str(&n.to_json_with_site("lisbon")).unwrap();
        assert_eq!(with_site["site"], "lisbon");
        assert_eq!(with_site["nid"], n.nid);
    }
}
