//! Adapter/sink plugin envelopes: one `.toml` file per directory entry,
//! loaded the way `wf-config`'s connector loader loads sink connectors,
//! generalized here to cover both southbound adapters and northbound sinks.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::types::{HumanDuration, ParamMap};

/// Which half of the pipeline a [`PluginDef`] configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginScope {
    Adapter,
    Sink,
}

/// A resolved adapter or sink definition: which built-in plugin `kind` to
/// instantiate, and the JSON parameter blob passed to its factory.
#[derive(Debug, Clone)]
pub struct PluginDef {
    pub id: String,
    pub kind: String,
    pub scope: PluginScope,
    pub enabled: bool,
    pub params: ParamMap,
    pub origin: Option<String>,
    /// Sink output batching (spec C10's `SinkBuffer`): flush once the
    /// buffer reaches this many points. Unused by adapters.
    pub batch_size: usize,
    /// Sink output batching: flush whatever is buffered once this much
    /// time has passed since the last flush, even short of `batch_size`.
    pub flush_timeout: HumanDuration,
}

/// A `.toml` file containing one or more plugin definitions.
///
/// ```toml
/// [[plugins]]
/// id = "plc_line1"
/// type = "modbus_tcp"
///
/// [plugins.params]
/// host = "10.0.4.12"
/// port = 502
/// ```
#[derive(Debug, Deserialize)]
pub struct PluginTomlFile {
    pub plugins: Vec<PluginDefRaw>,
}

#[derive(Debug, Deserialize)]
pub struct PluginDefRaw {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub params: Option<toml::value::Table>,
    /// Sink-only (spec C10); ignored for adapters.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout: HumanDuration,
}

fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    1
}
fn default_flush_timeout() -> HumanDuration {
    "1s".parse().expect("hardcoded duration must parse")
}

impl PluginDefRaw {
    pub fn into_plugin_def(self, scope: PluginScope, origin: Option<String>) -> PluginDef {
        let params = self
            .params
            .map(table_to_param_map)
            .unwrap_or_default();

        PluginDef {
            id: self.id,
            kind: self.kind,
            scope,
            enabled: self.enabled,
            params,
            origin,
            batch_size: self.batch_size.max(1),
            flush_timeout: self.flush_timeout,
        }
    }
}

fn table_to_param_map(table: toml::value::Table) -> ParamMap {
    let json = serde_json::to_value(table).unwrap_or(serde_json::Value::Null);
    match json {
        serde_json::Value::Object(map) => map,
        _ => ParamMap::new(),
    }
}

/// Load all plugin definitions from `*.toml` files in `dir`.
///
/// Returns an empty map (not an error) if `dir` doesn't exist, so an
/// adapters-only or sinks-only deployment need not create the other
/// directory. Returns an error if any plugin ID within `scope` repeats.
pub fn load_plugin_defs(dir: &Path, scope: PluginScope) -> anyhow::Result<BTreeMap<String, PluginDef>> {
    let mut result = BTreeMap::new();

    if !dir.is_dir() {
        return Ok(result);
    }

    let pattern = dir.join("*.toml");
    let pattern_str = pattern.to_string_lossy();

    for entry in glob::glob(&pattern_str)? {
        let path = entry?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let file: PluginTomlFile = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;

        let origin = path.display().to_string();
        for raw in file.plugins {
            let id = raw.id.clone();
            let def = raw.into_plugin_def(scope, Some(origin.clone()));
            if result.insert(id.clone(), def).is_some() {
                anyhow::bail!("duplicate plugin id {:?} in {}", id, path.display());
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plugin_toml() {
        let toml_str = r#"
[[plugins]]
id = "plc_line1"
type = "modbus_tcp"

[plugins.params]
host = "10.0.4.12"
port = 502
"#;
        let file: PluginTomlFile = toml::from_str(toml_str).unwrap();
        assert_eq!(file.plugins.len(), 1);
        assert_eq!(file.plugins[0].id, "plc_line1");
        assert_eq!(file.plugins[0].kind, "modbus_tcp");

        let def = file.plugins.into_iter().next().unwrap().into_plugin_def(PluginScope::Adapter, None);
        assert_eq!(def.id, "plc_line1");
        assert!(def.enabled);
        assert_eq!(
            def.params.get("host"),
            Some(&serde_json::Value::String("10.0.4.12".into()))
        );
    }

    #[test]
    fn disabled_plugin_is_parsed_but_flagged() {
        let toml_str = r#"
[[plugins]]
id = "spare"
type = "mqtt_subscribe"
enabled = false
"#;
        let file: PluginTomlFile = toml::from_str(toml_str).unwrap();
        assert!(!file.plugins[0].enabled);
    }

    #[test]
    fn load_from_missing_dir_is_empty() {
        let result = load_plugin_defs(Path::new("/nonexistent_dir_abc123"), PluginScope::Sink);
        assert!(result.is_ok());
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn duplicate_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.toml"),
            r#"[[plugins]]
id = "dup"
type = "console"
"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.toml"),
            r#"[[plugins]]
id = "dup"
type = "console"
"#,
        )
        .unwrap();
        assert!(load_plugin_defs(dir.path(), PluginScope::Sink).is_err());
    }
}
