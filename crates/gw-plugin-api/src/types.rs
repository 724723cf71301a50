//! Shared plugin-facing types, duplicated locally rather than shared via
//! a cross-crate dependency on `gw-config` (spec §9's explicit note that
//! adapters/sinks only see their own resolved `params`, not the rest of
//! the gateway config).

/// A plugin's raw, type-erased configuration block — the `params` table
/// from its `.toml` definition file (spec C2).
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

/// Health as reported by a running adapter or sink instance (spec C3/C10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

/// Point-in-time counters a plugin instance exposes to the runtime's
/// metrics layer; the runtime decides how to render/export them.
#[derive(Debug, Clone, Default)]
pub struct PluginMetrics {
    pub messages_total: u64,
    pub errors_total: u64,
    pub last_activity_ms: Option<i64>,
}
