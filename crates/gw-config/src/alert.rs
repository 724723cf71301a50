use serde::{Deserialize, Serialize};

/// Fallback alert destinations used when an `alert` action in a rule file
/// doesn't name its own channel (spec C8).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertConfig {
    /// Alert output destinations (URI list, e.g. `"console://"`, `"file:///var/log/gw-alerts.jsonl"`).
    pub sinks: Vec<String>,
}
