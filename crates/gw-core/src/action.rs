//! Action pipeline (spec C8): pure decision logic for the five action
//! kinds. Each function takes a `&Point` (and any action-local state) and
//! returns a decision; `gw-runtime`'s task loop is the only place that
//! actually drives the sequence and dispatches alerts/forwards to sinks.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use gw_expr::{eval_expr, parse_expr_str, FieldSource};

use crate::aggregate::{group_key, AggregateStore};
use crate::point::{Point, TagMap, Value};
use crate::rule::{
    render_template, AggregateConfig, AlertActionConfig, FilterConfig, ForwardConfig, TransformConfig,
};

/// What happened to a Point after running one pipeline action.
#[derive(Debug)]
pub enum StepOutcome {
    /// Keep running the pipeline with (possibly replaced) `Point`.
    Continue(Point),
    /// A filter matched; stop the pipeline for this Point.
    Dropped,
}

/// Evaluates `cfg` against `point`, consulting/mutating per-(rule,key)
/// dedupe and rate-limit state held in `state`.
pub fn apply_filter(state: &FilterState, scope_key: &str, cfg: &FilterConfig, point: &Point) -> StepOutcome {
    let should_drop = match cfg {
        FilterConfig::Range { min, max, drop_on_match } => {
            match point.value.as_eval().as_f64() {
                Some(v) => {
                    let below = min.is_some_and(|m| v < m);
                    let above = max.is_some_and(|m| v > m);
                    let inside = !below && !above;
                    if *drop_on_match {
                        inside
                    } else {
                        !inside
                    }
                }
                // Non-numeric value: the range has nothing to say, keep it.
                None => false,
            }
        }
        FilterConfig::Quality { min, drop_on_match } => {
            let bad = point.quality < *min;
            if *drop_on_match {
                bad
            } else {
                !bad
            }
        }
        FilterConfig::Duplicate { window_size, tolerance } => state.is_duplicate(scope_key, point, *window_size, *tolerance),
        FilterConfig::RateLimit { rate } => state.rate_limited(scope_key, *rate),
        FilterConfig::NullFilter => is_null_value(&point.value),
    };

    if should_drop {
        StepOutcome::Dropped
    } else {
        StepOutcome::Continue(point.clone())
    }
}

fn is_null_value(value: &Value) -> bool {
    match value {
        Value::Float(f) => f.is_nan(),
        Value::Str(s) => s.is_empty(),
        _ => false,
    }
}

/// Per-rule dedupe/rate-limit state, keyed by a caller-chosen scope (e.g.
/// `"{rule_id}:{device_id}:{key}"`) so independent devices never share a
/// dedupe window or token bucket.
#[derive(Default)]
pub struct FilterState {
    dedup: RwLock<HashMap<String, VecDeque<f64>>>,
    rate: RwLock<HashMap<String, Instant>>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_duplicate(&self, scope_key: &str, point: &Point, window_size: usize, tolerance: f64) -> bool {
        let Some(v) = point.value.as_eval().as_f64() else {
            return false;
        };
        let mut map = self.dedup.write().expect("filter dedup lock poisoned");
        let buf = map.entry(scope_key.to_string()).or_default();
        let is_dup = buf.iter().any(|&prior| (prior - v).abs() <= tolerance);
        buf.push_back(v);
        while buf.len() > window_size.max(1) {
            buf.pop_front();
        }
        is_dup
    }

    fn rate_limited(&self, scope_key: &str, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let min_interval = Duration::from_secs_f64(1.0 / rate);
        let mut map = self.rate.write().expect("filter rate lock poisoned");
        let now = Instant::now();
        match map.get(scope_key) {
            Some(&last) if now.duration_since(last) < min_interval => true,
            _ => {
                map.insert(scope_key.to_string(), now);
                false
            }
        }
    }
}

/// Applies `cfg` to `point`, producing a replacement `Point`. Expression
/// text is parsed fresh each call rather than cached; transform configs
/// are plain owned data behind a shared `Arc<Rule>`, not a place to hang
/// a `OnceLock`.
pub fn apply_transform(cfg: &TransformConfig, point: &Point) -> Point {
    match cfg {
        TransformConfig::Scale { factor } => with_numeric(point, |v| v * factor),
        TransformConfig::Offset { offset } => with_numeric(point, |v| v + offset),
        TransformConfig::UnitConvert { expression } | TransformConfig::Expression { expression } => {
            match parse_expr_str(expression).ok().and_then(|ast| eval_expr(&ast, point).ok()) {
                Some(result) => match result.as_f64() {
                    Some(v) => {
                        let mut p = point.clone();
                        p.value = Value::Float(v);
                        p
                    }
                    None => point.clone(),
                },
                None => point.clone(),
            }
        }
        TransformConfig::Lookup { field, table } => {
            let key = match field.as_str() {
                "device_id" => Some(point.device_id.clone()),
                "key" => Some(point.key.clone()),
                other => point.tag(other),
            };
            match key.and_then(|k| table.get(&k)) {
                Some(json) => {
                    let mut p = point.clone();
                    if let Ok(v) = Value::from_json(infer_tag(json), json) {
                        p.value = v;
                    }
                    p
                }
                None => point.clone(),
            }
        }
        TransformConfig::Round { precision } => with_numeric(point, |v| {
            let factor = 10f64.powi(*precision);
            (v * factor).round() / factor
        }),
        TransformConfig::AddTags { tags } => {
            let mut p = point.clone();
            let mut snap = p.tags.snapshot();
            snap.extend(tags.clone());
            p.tags = TagMap::new(snap);
            p
        }
        TransformConfig::RemoveTags { tags } => {
            let mut p = point.clone();
            let mut snap = p.tags.snapshot();
            for t in tags {
                snap.remove(t);
            }
            p.tags = TagMap::new(snap);
            p
        }
    }
}

fn infer_tag(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(n) if n.is_i64() => "int",
        serde_json::Value::Number(_) => "float",
        _ => "string",
    }
}

fn with_numeric(point: &Point, f: impl FnOnce(f64) -> f64) -> Point {
    match point.value.as_eval().as_f64() {
        Some(v) => {
            let mut p = point.clone();
            p.value = Value::Float(f(v));
            p
        }
        None => point.clone(),
    }
}

/// Feeds `point` into `store`'s accumulator for this rule+group, and, once
/// the window has at least one sample, returns a derived Point carrying
/// the requested functions as a [`Value::Record`] (spec C9). The derived
/// Point's key comes from `key_template`, rendered against a context of
/// `key` (the triggering Point's key) plus the group-by field values.
pub fn apply_aggregate(store: &AggregateStore, rule_id: &str, cfg: &AggregateConfig, point: &Point) -> Option<Point> {
    let value = point.value.as_eval().as_f64()?;
    let group_values: Vec<Option<String>> = cfg
        .group_by
        .iter()
        .map(|field| match field.as_str() {
            "device_id" => Some(point.device_id.clone()),
            "key" => Some(point.key.clone()),
            other => point.tag(other),
        })
        .collect();
    let group = group_key(&group_values);
    let agg_key = (rule_id.to_string(), group.clone());

    store.update(agg_key.clone(), cfg.window_size, value);
    let results = store.results(&agg_key, &cfg.functions)?;

    let mut ctx = HashMap::new();
    ctx.insert("key".to_string(), point.key.clone());
    ctx.insert("device_id".to_string(), point.device_id.clone());
    ctx.insert("group".to_string(), group);
    let derived_key = render_template(&cfg.key_template, &ctx);

    Some(Point::new(point.device_id.clone(), derived_key, Value::Record(results), point.timestamp).with_tags(point.tags.snapshot()))
}

/// Decides whether an alert should actually fire, honoring the action's
/// throttle window/count, and renders its message template.
pub struct AlertThrottle {
    windows: RwLock<HashMap<String, VecDeque<Instant>>>,
}

impl Default for AlertThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertThrottle {
    pub fn new() -> Self {
        Self { windows: RwLock::new(HashMap::new()) }
    }

    /// `scope_key` should uniquely identify the rule+action (e.g.
    /// `"{rule_id}:{action_index}"`) so independent alert actions never
    /// share a throttle counter.
    pub fn should_fire(&self, scope_key: &str, cfg: &AlertActionConfig) -> bool {
        let now = Instant::now();
        let mut map = self.windows.write().expect("alert throttle lock poisoned");
        let history = map.entry(scope_key.to_string()).or_default();
        while let Some(&front) = history.front() {
            if now.duration_since(front) > cfg.throttle_window {
                history.pop_front();
            } else {
                break;
            }
        }
        if history.len() as u32 >= cfg.throttle_max_count {
            return false;
        }
        history.push_back(now);
        true
    }
}

/// Renders an alert's message template against the triggering Point.
pub fn render_alert_message(cfg: &AlertActionConfig, point: &Point) -> String {
    let mut ctx = HashMap::new();
    ctx.insert("device_id".to_string(), point.device_id.clone());
    ctx.insert("key".to_string(), point.key.clone());
    ctx.insert("value".to_string(), format!("{:?}", point.value));
    ctx.insert("timestamp".to_string(), point.timestamp.to_string());
    render_template(&cfg.message, &ctx)
}

/// Resolves a forward action's target sink ids and, if a template is
/// configured, the rendered payload string to send instead of the raw
/// Point JSON.
pub fn resolve_forward(cfg: &ForwardConfig, point: &Point) -> (Vec<String>, Option<String>) {
    let rendered = cfg.template.as_ref().map(|t| {
        let mut ctx = HashMap::new();
        ctx.insert("device_id".to_string(), point.device_id.clone());
        ctx.insert("key".to_string(), point.key.clone());
        ctx.insert("value".to_string(), format!("{:?}", point.value));
        render_template(t, &ctx)
    });
    (cfg.targets.clone(), rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::AlertLevel;

    fn pt(v: f64) -> Point {
        Point::new("dev1", "temp", Value::Float(v), 0)
    }

    #[test]
    fn range_filter_drops_outside_bounds() {
        let state = FilterState::new();
        let cfg = FilterConfig::Range { min: Some(0.0), max: Some(100.0), drop_on_match: false };
        assert!(matches!(apply_filter(&state, "k", &cfg, &pt(150.0)), StepOutcome::Dropped));
        assert!(matches!(apply_filter(&state, "k", &cfg, &pt(50.0)), StepOutcome::Continue(_)));
    }

    #[test]
    fn quality_filter_drops_bad_quality() {
        let state = FilterState::new();
        let cfg = FilterConfig::Quality { min: 100, drop_on_match: true };
        let mut p = pt(1.0);
        p.quality = 10;
        assert!(matches!(apply_filter(&state, "k", &cfg, &p), StepOutcome::Dropped));
    }

    #[test]
    fn duplicate_filter_catches_repeats_within_tolerance() {
        let state = FilterState::new();
        let cfg = FilterConfig::Duplicate { window_size: 3, tolerance: 0.01 };
        assert!(matches!(apply_filter(&state, "k", &cfg, &pt(10.0)), StepOutcome::Continue(_)));
        assert!(matches!(apply_filter(&state, "k", &cfg, &pt(10.005)), StepOutcome::Dropped));
        assert!(matches!(apply_filter(&state, "k", &cfg, &pt(20.0)), StepOutcome::Continue(_)));
    }

    #[test]
    fn rate_limit_drops_second_call_immediately_after_first() {
        let state = FilterState::new();
        let cfg = FilterConfig::RateLimit { rate: 1.0 };
        assert!(matches!(apply_filter(&state, "k", &cfg, &pt(1.0)), StepOutcome::Continue(_)));
        assert!(matches!(apply_filter(&state, "k", &cfg, &pt(1.0)), StepOutcome::Dropped));
    }

    #[test]
    fn scale_transform_multiplies_value() {
        let out = apply_transform(&TransformConfig::Scale { factor: 2.0 }, &pt(10.0));
        assert_eq!(out.value, Value::Float(20.0));
    }

    #[test]
    fn add_tags_transform_merges_into_existing() {
        let p = pt(1.0).with_tags(HashMap::from([("site".to_string(), "hq".to_string())]));
        let mut tags = HashMap::new();
        tags.insert("unit".to_string(), "celsius".to_string());
        let out = apply_transform(&TransformConfig::AddTags { tags }, &p);
        assert_eq!(out.tag("site"), Some("hq".to_string()));
        assert_eq!(out.tag("unit"), Some("celsius".to_string()));
    }

    #[test]
    fn aggregate_emits_record_value_with_requested_functions() {
        let store = AggregateStore::new();
        let cfg = AggregateConfig {
            window_size: 0,
            functions: vec![crate::rule::AggFn::Avg, crate::rule::AggFn::Count],
            group_by: vec!["device_id".to_string()],
            ttl: Duration::from_secs(60),
            key_template: "{{key}}_stats".to_string(),
        };
        let derived = apply_aggregate(&store, "r1", &cfg, &pt(10.0)).unwrap();
        assert_eq!(derived.key, "temp_stats");
        match derived.value {
            Value::Record(map) => {
                assert_eq!(map["avg"], 10.0);
                assert_eq!(map["count"], 1.0);
            }
            other => panic!("expected Record, got {other:?}"),
        }
    }

    #[test]
    fn alert_throttle_blocks_after_max_count() {
        let throttle = AlertThrottle::new();
        let cfg = AlertActionConfig {
            level: AlertLevel::Warning,
            message: "over {{value}}".to_string(),
            channels: vec!["console".to_string()],
            throttle_window: Duration::from_secs(60),
            throttle_max_count: 2,
        };
        assert!(throttle.should_fire("r1:0", &cfg));
        assert!(throttle.should_fire("r1:0", &cfg));
        assert!(!throttle.should_fire("r1:0", &cfg));
    }

    #[test]
    fn render_alert_message_substitutes_context() {
        let cfg = AlertActionConfig {
            level: AlertLevel::Info,
            message: "{{device_id}}/{{key}} = {{value}}".to_string(),
            channels: vec![],
            throttle_window: Duration::from_secs(1),
            throttle_max_count: 1,
        };
        let msg = render_alert_message(&cfg, &pt(42.0));
        assert!(msg.starts_with("dev1/temp"));
    }

    #[test]
    fn forward_resolves_targets_and_optional_template() {
        let cfg = ForwardConfig {
            targets: vec!["mqtt1".to_string()],
            template: Some("{{device_id}}".to_string()),
            batch_size: None,
            batch_timeout: None,
        };
        let (targets, rendered) = resolve_forward(&cfg, &pt(1.0));
        assert_eq!(targets, vec!["mqtt1".to_string()]);
        assert_eq!(rendered, Some("dev1".to_string()));
    }
}
