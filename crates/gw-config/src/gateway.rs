use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::alert::AlertConfig;
use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::runtime::RuntimeConfig;
use crate::server::ServerConfig;
use crate::types::HumanDuration;
use crate::validate;

// ---------------------------------------------------------------------------
// BusConfig
// ---------------------------------------------------------------------------

/// Fan-out bus behaviour when a subscriber falls behind (spec C5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusPolicy {
    Block,
    DropNewest,
    DropOldest,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
    #[serde(default = "default_bus_policy")]
    pub policy: BusPolicy,
    #[serde(default = "default_admission_timeout")]
    pub admission_timeout: HumanDuration,
}

fn default_bus_capacity() -> usize {
    1024
}
fn default_bus_policy() -> BusPolicy {
    BusPolicy::DropOldest
}
fn default_admission_timeout() -> HumanDuration {
    "2s".parse().expect("hardcoded duration must parse")
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
            policy: default_bus_policy(),
            admission_timeout: default_admission_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// RulesConfig
// ---------------------------------------------------------------------------

/// Rule store configuration (spec C6): directory of rule files plus
/// hot-reload watch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RulesConfig {
    pub dir: String,
    #[serde(default = "default_true")]
    pub hot_reload: bool,
    #[serde(default = "default_debounce")]
    pub debounce: HumanDuration,
}

fn default_true() -> bool {
    true
}
fn default_debounce() -> HumanDuration {
    "500ms".parse().expect("hardcoded duration must parse")
}

// ---------------------------------------------------------------------------
// GatewayConfigRaw — as deserialized straight from TOML
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GatewayConfigRaw {
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub bus: BusConfig,
    pub rules: RulesConfig,
    pub adapters: String,
    pub sinks: String,
    pub runtime: RuntimeConfig,
    pub alert: Option<AlertConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// GatewayConfig — resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved gateway configuration, as produced by [`GatewayConfig::load`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server: Option<ServerConfig>,
    pub bus: BusConfig,
    pub rules: RulesConfig,
    pub adapters_dir: String,
    pub sinks_dir: String,
    pub runtime: RuntimeConfig,
    pub alert: Option<AlertConfig>,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub vars: HashMap<String, String>,
}

impl FromStr for GatewayConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let raw: GatewayConfigRaw = toml::from_str(s)?;

        let config = GatewayConfig {
            server: raw.server,
            bus: raw.bus,
            rules: raw.rules,
            adapters_dir: raw.adapters,
            sinks_dir: raw.sinks,
            runtime: raw.runtime,
            alert: raw.alert,
            logging: raw.logging,
            metrics: raw.metrics,
            vars: raw.vars,
        };

        validate::validate(&config)?;
        Ok(config)
    }
}

impl GatewayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        content.parse()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_TOML: &str = r#"
[server]
listen = "127.0.0.1:9800"

[bus]
capacity = 2048
policy = "drop_oldest"
admission_timeout = "1s"

[rules]
dir = "rules.d"
hot_reload = true
debounce = "500ms"

adapters = "adapters.d"
sinks = "sinks.d"

[runtime]
executor_parallelism = 8
rule_exec_timeout = "5s"

[alert]
sinks = ["console://"]

[logging]
level = "info"

[metrics]
enabled = true
"#;

    #[test]
    fn parses_full_config() {
        let cfg: GatewayConfig = FULL_TOML.parse().unwrap();
        assert_eq!(cfg.bus.capacity, 2048);
        assert_eq!(cfg.bus.policy, BusPolicy::DropOldest);
        assert_eq!(cfg.adapters_dir, "adapters.d");
        assert_eq!(cfg.sinks_dir, "sinks.d");
        assert!(cfg.rules.hot_reload);
        assert!(cfg.metrics.enabled);
    }

    #[test]
    fn rejects_zero_parallelism() {
        let bad = FULL_TOML.replace("executor_parallelism = 8", "executor_parallelism = 0");
        assert!(bad.parse::<GatewayConfig>().is_err());
    }

    #[test]
    fn rejects_empty_rules_dir() {
        let bad = FULL_TOML.replace(r#"dir = "rules.d""#, r#"dir = """#);
        assert!(bad.parse::<GatewayConfig>().is_err());
    }

    #[test]
    fn rejects_invalid_var_name() {
        let bad = format!("{FULL_TOML}\n[vars]\n\"1bad\" = \"x\"\n");
        assert!(bad.parse::<GatewayConfig>().is_err());
    }

    #[test]
    fn defaults_without_optional_sections() {
        let minimal = r#"
[rules]
dir = "rules.d"

adapters = "adapters.d"
sinks = "sinks.d"

[runtime]
executor_parallelism = 4
rule_exec_timeout = "5s"
"#;
        let cfg: GatewayConfig = minimal.parse().unwrap();
        assert_eq!(cfg.bus.capacity, 1024);
        assert!(!cfg.metrics.enabled);
        assert!(cfg.server.is_none());
    }
}
