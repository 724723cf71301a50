//! Rule/action types (spec C6/C8): the shape of a parsed `.json` rule file
//! once validated, before it's wrapped in an `Arc` and published by the
//! rule store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use gw_expr::condition::{Condition, ConditionValue, SimpleOp};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreReason};

pub type RuleId = String;

/// Maximum number of distinct `EvalError` texts a rule's [`RuleStats`]
/// keeps before it stops recording new ones (spec §7's "first N distinct
/// error texts").
pub const MAX_TRACKED_ERROR_TEXTS: usize = 5;

#[derive(Debug, Default)]
struct RuleStatsInner {
    matches_total: AtomicU64,
    errors_total: AtomicU64,
    error_texts: Mutex<Vec<String>>,
}

/// Per-rule match/error counters (spec §3's `stats` field, §4.5/§7's
/// `EvalError` reporting). Shared via `Arc` so cloning a `Rule` (e.g.
/// `RuleStore::apply`'s enable/disable path) keeps counting against the
/// same counters rather than resetting them.
#[derive(Debug, Clone, Default)]
pub struct RuleStats(Arc<RuleStatsInner>);

impl RuleStats {
    pub fn record_match(&self) {
        self.0.matches_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an `EvalError`, keeping at most `MAX_TRACKED_ERROR_TEXTS`
    /// distinct texts.
    pub fn record_error(&self, text: impl Into<String>) {
        self.0.errors_total.fetch_add(1, Ordering::Relaxed);
        let mut texts = self.0.error_texts.lock().expect("rule stats lock poisoned");
        let text = text.into();
        if texts.len() < MAX_TRACKED_ERROR_TEXTS && !texts.contains(&text) {
            texts.push(text);
        }
    }

    pub fn matches_total(&self) -> u64 {
        self.0.matches_total.load(Ordering::Relaxed)
    }

    pub fn errors_total(&self) -> u64 {
        self.0.errors_total.load(Ordering::Relaxed)
    }

    pub fn error_texts(&self) -> Vec<String> {
        self.0.error_texts.lock().expect("rule stats lock poisoned").clone()
    }
}

/// A fully parsed and validated rule (spec C6).
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub priority: i32,
    pub version: u64,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub condition: Condition,
    pub actions: Vec<Action>,
    pub stats: RuleStats,
}

/// A single action step within a rule's pipeline (spec C8).
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub config: ActionConfig,
    pub is_async: bool,
    pub timeout: std::time::Duration,
    pub retry: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Filter,
    Transform,
    Aggregate,
    Alert,
    Forward,
}

#[derive(Debug, Clone)]
pub enum ActionConfig {
    Filter(FilterConfig),
    Transform(TransformConfig),
    Aggregate(AggregateConfig),
    Alert(AlertActionConfig),
    Forward(ForwardConfig),
}

// ---------------------------------------------------------------------------
// filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum FilterConfig {
    Range { min: Option<f64>, max: Option<f64>, drop_on_match: bool },
    Quality { min: u8, drop_on_match: bool },
    Duplicate { window_size: usize, tolerance: f64 },
    RateLimit { rate: f64 },
    NullFilter,
}

// ---------------------------------------------------------------------------
// transform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum TransformConfig {
    Scale { factor: f64 },
    Offset { offset: f64 },
    UnitConvert { expression: String },
    Expression { expression: String },
    Lookup { field: String, table: HashMap<String, serde_json::Value> },
    Round { precision: i32 },
    AddTags { tags: HashMap<String, String> },
    RemoveTags { tags: Vec<String> },
}

// ---------------------------------------------------------------------------
// aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFn {
    Count,
    Sum,
    Avg,
    Variance,
    Stddev,
    Min,
    Max,
    Median,
    First,
    Last,
}

#[derive(Debug, Clone)]
pub struct AggregateConfig {
    pub window_size: usize,
    pub functions: Vec<AggFn>,
    pub group_by: Vec<String>,
    pub ttl: std::time::Duration,
    pub key_template: String,
}

// ---------------------------------------------------------------------------
// alert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct AlertActionConfig {
    pub level: AlertLevel,
    pub message: String,
    pub channels: Vec<String>,
    pub throttle_window: std::time::Duration,
    pub throttle_max_count: u32,
}

// ---------------------------------------------------------------------------
// forward
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ForwardConfig {
    pub targets: Vec<String>,
    pub template: Option<String>,
    pub batch_size: Option<usize>,
    pub batch_timeout: Option<std::time::Duration>,
}

// ---------------------------------------------------------------------------
// Rule file JSON shape + validation
// ---------------------------------------------------------------------------

/// Raw JSON shape of a rule file on disk, before validation.
#[derive(Debug, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    pub condition: ConditionJson,
    pub actions: Vec<ActionJson>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionJson {
    Simple { field: String, op: String, value: serde_json::Value },
    Expression { source: String },
    Lua { source: String },
    And { nodes: Vec<ConditionJson> },
    Or { nodes: Vec<ConditionJson> },
    Not { node: Box<ConditionJson> },
}

#[derive(Debug, Deserialize)]
pub struct ActionJson {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: u32,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl ConditionJson {
    pub fn into_condition(self) -> Result<Condition, CoreError> {
        Ok(match self {
            ConditionJson::Simple { field, op, value } => {
                let op = parse_simple_op(&op)?;
                let value = json_to_condition_value(&value)?;
                Condition::simple(&field, op, value)
            }
            ConditionJson::Expression { source } => Condition::expression(source),
            ConditionJson::Lua { source } => Condition::Lua { source },
            ConditionJson::And { nodes } => {
                let children = nodes.into_iter().map(ConditionJson::into_condition).collect::<Result<_, _>>()?;
                Condition::And(children)
            }
            ConditionJson::Or { nodes } => {
                let children = nodes.into_iter().map(ConditionJson::into_condition).collect::<Result<_, _>>()?;
                Condition::Or(children)
            }
            ConditionJson::Not { node } => Condition::Not(Box::new(node.into_condition()?)),
        })
    }
}

fn parse_simple_op(op: &str) -> Result<SimpleOp, CoreError> {
    Ok(match op {
        "eq" => SimpleOp::Eq,
        "ne" => SimpleOp::Ne,
        "gt" => SimpleOp::Gt,
        "gte" => SimpleOp::Gte,
        "lt" => SimpleOp::Lt,
        "lte" => SimpleOp::Lte,
        "contains" => SimpleOp::Contains,
        "startswith" => SimpleOp::StartsWith,
        "endswith" => SimpleOp::EndsWith,
        "regex" => SimpleOp::Regex,
        other => return Err(rule_invalid(format!("unknown simple operator {other:?}"))),
    })
}

fn json_to_condition_value(v: &serde_json::Value) -> Result<ConditionValue, CoreError> {
    Ok(match v {
        serde_json::Value::String(s) => ConditionValue::Str(s.clone()),
        serde_json::Value::Number(n) => ConditionValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::Bool(b) => ConditionValue::Bool(*b),
        other => return Err(rule_invalid(format!("unsupported condition value {other:?}"))),
    })
}

impl ActionJson {
    pub fn into_action(self) -> Result<Action, CoreError> {
        let (kind, config) = parse_action_config(&self.kind, &self.config)?;
        Ok(Action {
            kind,
            config,
            is_async: self.is_async,
            timeout: std::time::Duration::from_millis(self.timeout_ms),
            retry: self.retry,
        })
    }
}

fn parse_action_config(action_type: &str, config: &serde_json::Value) -> Result<(ActionKind, ActionConfig), CoreError> {
    match action_type {
        "filter" => Ok((ActionKind::Filter, ActionConfig::Filter(parse_filter_config(config)?))),
        "transform" => Ok((ActionKind::Transform, ActionConfig::Transform(parse_transform_config(config)?))),
        "aggregate" => Ok((ActionKind::Aggregate, ActionConfig::Aggregate(parse_aggregate_config(config)?))),
        "alert" => Ok((ActionKind::Alert, ActionConfig::Alert(parse_alert_config(config)?))),
        "forward" => Ok((ActionKind::Forward, ActionConfig::Forward(parse_forward_config(config)?))),
        other => Err(rule_invalid(format!("unknown action type {other:?}"))),
    }
}

fn parse_filter_config(c: &serde_json::Value) -> Result<FilterConfig, CoreError> {
    let sub_type = c.get("type").and_then(|v| v.as_str()).ok_or_else(|| rule_invalid("filter.type required"))?;
    Ok(match sub_type {
        "range" => FilterConfig::Range {
            min: c.get("min").and_then(|v| v.as_f64()),
            max: c.get("max").and_then(|v| v.as_f64()),
            drop_on_match: c.get("drop_on_match").and_then(|v| v.as_bool()).unwrap_or(false),
        },
        "quality" => FilterConfig::Quality {
            min: c.get("min").and_then(|v| v.as_u64()).unwrap_or(0) as u8,
            drop_on_match: c.get("drop_on_match").and_then(|v| v.as_bool()).unwrap_or(true),
        },
        "duplicate" => FilterConfig::Duplicate {
            window_size: c.get("window_size").and_then(|v| v.as_u64()).unwrap_or(1) as usize,
            tolerance: c.get("tolerance").and_then(|v| v.as_f64()).unwrap_or(0.0),
        },
        "rate_limit" => FilterConfig::RateLimit {
            rate: c.get("rate").and_then(|v| v.as_f64()).ok_or_else(|| rule_invalid("rate_limit.rate required"))?,
        },
        "null_filter" => FilterConfig::NullFilter,
        other => return Err(rule_invalid(format!("unknown filter type {other:?}"))),
    })
}

fn parse_transform_config(c: &serde_json::Value) -> Result<TransformConfig, CoreError> {
    let sub_type = c.get("type").and_then(|v| v.as_str()).ok_or_else(|| rule_invalid("transform.type required"))?;
    Ok(match sub_type {
        "scale" => TransformConfig::Scale {
            factor: c.get("factor").and_then(|v| v.as_f64()).ok_or_else(|| rule_invalid("scale.factor required"))?,
        },
        "offset" => TransformConfig::Offset {
            offset: c.get("offset").and_then(|v| v.as_f64()).ok_or_else(|| rule_invalid("offset.offset required"))?,
        },
        "unit_convert" => TransformConfig::UnitConvert {
            expression: require_str(c, "expression")?,
        },
        "expression" => TransformConfig::Expression {
            expression: require_str(c, "expression")?,
        },
        "lookup" => TransformConfig::Lookup {
            field: require_str(c, "field")?,
            table: c
                .get("table")
                .and_then(|v| v.as_object())
                .map(|o| o.clone().into_iter().collect())
                .unwrap_or_default(),
        },
        "round" => TransformConfig::Round {
            precision: c.get("precision").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
        },
        "add_tags" => TransformConfig::AddTags {
            tags: c
                .get("add_tags")
                .and_then(|v| v.as_object())
                .map(|o| o.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
                .unwrap_or_default(),
        },
        "remove_tags" => TransformConfig::RemoveTags {
            tags: c
                .get("remove_tags")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default(),
        },
        other => return Err(rule_invalid(format!("unknown transform type {other:?}"))),
    })
}

fn parse_aggregate_config(c: &serde_json::Value) -> Result<AggregateConfig, CoreError> {
    let functions = c
        .get("functions")
        .and_then(|v| v.as_array())
        .ok_or_else(|| rule_invalid("aggregate.functions required"))?
        .iter()
        .map(|v| {
            let s = v.as_str().ok_or_else(|| rule_invalid("aggregate.functions entries must be strings"))?;
            serde_json::from_value::<AggFn>(serde_json::Value::String(s.to_string()))
                .map_err(|_| rule_invalid(format!("unknown aggregate function {s:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AggregateConfig {
        window_size: c.get("window_size").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
        functions,
        group_by: c
            .get("group_by")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        ttl: std::time::Duration::from_millis(c.get("ttl_ms").and_then(|v| v.as_u64()).unwrap_or(60_000)),
        key_template: c.get("key_template").and_then(|v| v.as_str()).unwrap_or("{{key}}_stats").to_string(),
    })
}

fn parse_alert_config(c: &serde_json::Value) -> Result<AlertActionConfig, CoreError> {
    let level = c.get("level").and_then(|v| v.as_str()).unwrap_or("info");
    let level = serde_json::from_value::<AlertLevel>(serde_json::Value::String(level.to_string()))
        .map_err(|_| rule_invalid(format!("unknown alert level {level:?}")))?;

    let throttle = c.get("throttle").cloned().unwrap_or_default();
    Ok(AlertActionConfig {
        level,
        message: require_str(c, "message")?,
        channels: c
            .get("channels")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        throttle_window: std::time::Duration::from_millis(
            throttle.get("window_ms").and_then(|v| v.as_u64()).unwrap_or(60_000),
        ),
        throttle_max_count: throttle.get("max_count").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
    })
}

fn parse_forward_config(c: &serde_json::Value) -> Result<ForwardConfig, CoreError> {
    let targets = c
        .get("targets")
        .and_then(|v| v.as_array())
        .ok_or_else(|| rule_invalid("forward.targets required"))?
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();

    let batch = c.get("batch");
    Ok(ForwardConfig {
        targets,
        template: c.get("template").and_then(|v| v.as_str()).map(String::from),
        batch_size: batch.and_then(|b| b.get("size")).and_then(|v| v.as_u64()).map(|v| v as usize),
        batch_timeout: batch
            .and_then(|b| b.get("timeout_ms"))
            .and_then(|v| v.as_u64())
            .map(std::time::Duration::from_millis),
    })
}

fn require_str(c: &serde_json::Value, field: &str) -> Result<String, CoreError> {
    c.get(field)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| rule_invalid(format!("{field} required")))
}

fn rule_invalid(msg: impl Into<String>) -> CoreError {
    orion_error::StructError::from(CoreReason::RuleInvalid(msg.into()))
}

/// Renders `{{field}}` placeholders against a flat key/value context —
/// the teacher's manual template substitution idiom (spec C8/C9), not a
/// templating crate.
pub fn render_template(template: &str, ctx: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        if let Some(end) = after.find("}}") {
            let name = after[..end].trim();
            if let Some(value) = ctx.get(name) {
                out.push_str(value);
            } else {
                out.push_str("{{");
                out.push_str(name);
                out.push_str("}}");
            }
            rest = &after[end + 2..];
        } else {
            out.push_str("{{");
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_condition_rule() {
        let json = r#"
        {
            "name": "high_temp",
            "condition": {"kind": "simple", "field": "value", "op": "gt", "value": 90},
            "actions": [
                {"type": "alert", "config": {"message": "hot", "channels": ["console"]}}
            ]
        }
        "#;
        let file: RuleFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.name, "high_temp");
        let cond = file.condition.into_condition().unwrap();
        assert!(matches!(cond, Condition::Simple { .. }));
        assert_eq!(file.actions.len(), 1);
        let action = ActionJson {
            kind: "alert".into(),
            config: file.actions.into_iter().next().unwrap().config,
            is_async: false,
            timeout_ms: 5000,
            retry: 0,
        }
        .into_action()
        .unwrap();
        assert_eq!(action.kind, ActionKind::Alert);
    }

    #[test]
    fn rejects_unknown_action_type() {
        let json = serde_json::json!({"message": "x"});
        let err = parse_action_config("nonsense", &json);
        assert!(err.is_err());
    }

    #[test]
    fn template_renders_known_and_leaves_unknown_placeholders() {
        let mut ctx = HashMap::new();
        ctx.insert("key".to_string(), "temp".to_string());
        let out = render_template("{{key}}_stats [{{missing}}]", &ctx);
        assert_eq!(out, "temp_stats [{{missing}}]");
    }

    #[test]
    fn aggregate_config_parses_function_list() {
        let c = serde_json::json!({
            "window_size": 5,
            "functions": ["avg", "max", "min", "stddev"],
            "group_by": ["device_id"],
            "ttl_ms": 60000
        });
        let cfg = parse_aggregate_config(&c).unwrap();
        assert_eq!(cfg.window_size, 5);
        assert_eq!(cfg.functions, vec![AggFn::Avg, AggFn::Max, AggFn::Min, AggFn::Stddev]);
    }
}
