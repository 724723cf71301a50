use serde::Serialize;

use crate::rule::AlertLevel;

/// An alert produced by an `alert` action (spec C8) once it has cleared
/// its throttle window.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    /// Deterministic composite key: `"{rule_id}|{device_id}/{key}|{fired_at}"`.
    pub alert_id: String,
    pub rule_id: String,
    pub level: AlertLevel,
    /// Rendered message (placeholders already substituted).
    pub message: String,
    /// Channel names the action named, e.g. `["console", "mqtt_alerts"]`.
    pub channels: Vec<String>,
    pub device_id: String,
    pub key: String,
    /// ISO 8601 UTC timestamp.
    pub fired_at: String,
}

impl AlertRecord {
    pub fn new(
        rule_id: impl Into<String>,
        level: AlertLevel,
        message: impl Into<String>,
        channels: Vec<String>,
        device_id: impl Into<String>,
        key: impl Into<String>,
        fired_at: impl Into<String>,
    ) -> Self {
        let rule_id = rule_id.into();
        let device_id = device_id.into();
        let key = key.into();
        let fired_at = fired_at.into();
        let alert_id = format!("{rule_id}|{device_id}/{key}|{fired_at}");
        Self { alert_id, rule_id, level, message: message.into(), channels, device_id, key, fired_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_id_is_deterministic_composite_key() {
        let a = AlertRecord::new("r1", AlertLevel::Warning, "hot", vec!["console".into()], "dev1", "temp", "2026-01-01T00:00:00Z");
        assert_eq!(a.alert_id, "r1|dev1/temp|2026-01-01T00:00:00Z");
    }

    #[test]
    fn serializes_with_level_as_lowercase() {
        let a = AlertRecord::new("r1", AlertLevel::Critical, "m", vec![], "d", "k", "t");
        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"level\":\"critical\""));
    }
}
