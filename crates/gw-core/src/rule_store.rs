//! Rule store (spec C6): loads rule files from a directory, validates them,
//! and publishes an atomically-swapped, priority-sorted snapshot.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use orion_error::StructError;

use crate::error::{CoreError, CoreReason};
use crate::rule::{Rule, RuleFile};

/// A requested mutation to the rule set (spec C6 `apply(change)`).
#[derive(Debug, Clone)]
pub enum Change {
    Create(Rule),
    Update { id: String, version: u64, rule: Rule },
    Delete { id: String },
    Enable { id: String },
    Disable { id: String },
}

/// Holds the live, atomically-swappable set of rules. Readers call
/// [`RuleStore::snapshot`] once per evaluated Point and evaluate against
/// that `Arc` clone, so a concurrent reload never produces a torn read.
pub struct RuleStore {
    snapshot: ArcSwap<Vec<Arc<Rule>>>,
    dir: PathBuf,
}

impl RuleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
            dir: dir.into(),
        }
    }

    /// Glob `*.json` under `dir`, parse + validate each file, assign ids,
    /// sort by `priority` descending, and install as the new snapshot.
    /// A single bad file fails the whole load (the caller decides whether
    /// to keep serving a prior snapshot — see [`RuleStore::reload`]).
    pub fn load(&self) -> Result<(), CoreError> {
        let rules = load_rules_from_dir(&self.dir)?;
        self.snapshot.store(Arc::new(rules));
        Ok(())
    }

    /// Re-validate every file in `dir`; on success, swap the snapshot and
    /// return the set of rule ids that disappeared (for aggregation-state
    /// teardown). On failure, the previous snapshot remains in effect and
    /// the error is returned for the caller to log as `RuleLoadError`.
    pub fn reload(&self) -> Result<HashSet<String>, CoreError> {
        let new_rules = load_rules_from_dir(&self.dir)?;
        let old_ids: HashSet<String> = self.snapshot.load().iter().map(|r| r.id.clone()).collect();
        let new_ids: HashSet<String> = new_rules.iter().map(|r| r.id.clone()).collect();
        let removed: HashSet<String> = old_ids.difference(&new_ids).cloned().collect();

        self.snapshot.store(Arc::new(new_rules));
        Ok(removed)
    }

    /// Cheap `Arc` clone of the current, priority-sorted rule set.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Rule>>> {
        self.snapshot.load_full()
    }

    pub fn apply(&self, change: Change) -> Result<(), CoreError> {
        let current = self.snapshot.load_full();
        let mut rules: Vec<Arc<Rule>> = (*current).clone();

        match change {
            Change::Create(rule) => {
                rules.push(Arc::new(rule));
            }
            Change::Update { id, version, rule } => {
                let slot = rules
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or_else(|| rule_invalid(format!("unknown rule id {id:?}")))?;
                if slot.version != version {
                    return Err(StructError::from(CoreReason::VersionConflict(format!(
                        "rule {id:?}: expected version {}, got {version}",
                        slot.version
                    ))));
                }
                let mut updated = rule;
                updated.version = slot.version + 1;
                *slot = Arc::new(updated);
            }
            Change::Delete { id } => {
                rules.retain(|r| r.id != id);
            }
            Change::Enable { id } => set_enabled(&mut rules, &id, true)?,
            Change::Disable { id } => set_enabled(&mut rules, &id, false)?,
        }

        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.snapshot.store(Arc::new(rules));
        Ok(())
    }
}

fn set_enabled(rules: &mut [Arc<Rule>], id: &str, enabled: bool) -> Result<(), CoreError> {
    let slot = rules
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| rule_invalid(format!("unknown rule id {id:?}")))?;
    let mut updated = (**slot).clone();
    updated.enabled = enabled;
    *slot = Arc::new(updated);
    Ok(())
}

fn load_rules_from_dir(dir: &Path) -> Result<Vec<Arc<Rule>>, CoreError> {
    let mut rules = Vec::new();
    if !dir.is_dir() {
        return Ok(rules);
    }

    let pattern = dir.join("*.json");
    let pattern_str = pattern.to_string_lossy();
    let entries = glob::glob(&pattern_str)
        .map_err(|e| rule_invalid(format!("bad glob pattern {pattern_str:?}: {e}")))?;

    for entry in entries {
        let path = entry.map_err(|e| rule_invalid(e.to_string()))?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| rule_invalid(format!("failed to read {}: {e}", path.display())))?;
        let file: RuleFile = serde_json::from_str(&content)
            .map_err(|e| rule_invalid(format!("failed to parse {}: {e}", path.display())))?;

        let id = file
            .id
            .clone()
            .unwrap_or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default());

        let condition = file.condition.into_condition()?;
        condition
            .reject_lua()
            .map_err(|msg| rule_invalid(format!("{}: {msg}", path.display())))?;
        condition
            .validate_expressions()
            .map_err(|msg| rule_invalid(format!("{}: {msg}", path.display())))?;

        let actions = file
            .actions
            .into_iter()
            .map(|a| a.into_action())
            .collect::<Result<Vec<_>, _>>()?;

        let now = chrono::Utc::now().to_rfc3339();
        rules.push(Arc::new(Rule {
            id,
            name: file.name,
            description: file.description,
            enabled: file.enabled,
            priority: file.priority,
            version: 0,
            tags: file.tags,
            created_at: file.created_at.unwrap_or_else(|| now.clone()),
            updated_at: file.updated_at.unwrap_or(now),
            condition,
            actions,
            stats: crate::rule::RuleStats::default(),
        }));
    }

    rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    Ok(rules)
}

fn rule_invalid(msg: impl Into<String>) -> CoreError {
    StructError::from(CoreReason::RuleInvalid(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Action, ActionConfig, ActionKind, AlertActionConfig, AlertLevel};
    use gw_expr::condition::{Condition, ConditionValue, SimpleOp};

    fn write_rule(dir: &Path, filename: &str, priority: i32, condition_field: &str) {
        let json = format!(
            r#"{{
                "name": "rule_{filename}",
                "priority": {priority},
                "condition": {{"kind": "simple", "field": "{condition_field}", "op": "gt", "value": 10}},
                "actions": [
                    {{"type": "alert", "config": {{"message": "hi", "channels": ["console"]}}}}
                ]
            }}"#
        );
        std::fs::write(dir.join(filename), json).unwrap();
    }

    #[test]
    fn loads_and_sorts_by_priority() {
        let dir = tempfile::tempdir().unwrap();
        write_rule(dir.path(), "low.json", 1, "value");
        write_rule(dir.path(), "high.json", 10, "value");

        let store = RuleStore::new(dir.path());
        store.load().unwrap();
        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap[0].priority >= snap[1].priority);
    }

    #[test]
    fn rejects_lua_condition_at_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.json"),
            r#"{
                "name": "bad",
                "condition": {"kind": "lua", "source": "return true"},
                "actions": []
            }"#,
        )
        .unwrap();

        let store = RuleStore::new(dir.path());
        assert!(store.load().is_err());
    }

    #[test]
    fn reload_reports_removed_ids() {
        let dir = tempfile::tempdir().unwrap();
        write_rule(dir.path(), "a.json", 0, "value");
        write_rule(dir.path(), "b.json", 0, "value");

        let store = RuleStore::new(dir.path());
        store.load().unwrap();
        std::fs::remove_file(dir.path().join("b.json")).unwrap();

        let removed = store.reload().unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed.contains("b"));
    }

    #[test]
    fn update_rejects_version_mismatch() {
        let rule = Rule {
            id: "r1".into(),
            name: "r1".into(),
            description: None,
            enabled: true,
            priority: 0,
            version: 0,
            tags: vec![],
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
            condition: Condition::simple("value", SimpleOp::Gt, ConditionValue::Number(1.0)),
            stats: crate::rule::RuleStats::default(),
            actions: vec![Action {
                kind: ActionKind::Alert,
                config: ActionConfig::Alert(AlertActionConfig {
                    level: AlertLevel::Info,
                    message: "hi".into(),
                    channels: vec!["console".into()],
                    throttle_window: std::time::Duration::from_secs(60),
                    throttle_max_count: 1,
                }),
                is_async: false,
                timeout: std::time::Duration::from_secs(5),
                retry: 0,
            }],
        };

        let store = RuleStore::new(std::env::temp_dir());
        store.apply(Change::Create(rule.clone())).unwrap();

        let stale_update = Change::Update { id: "r1".into(), version: 5, rule };
        assert!(store.apply(stale_update).is_err());
    }
}
