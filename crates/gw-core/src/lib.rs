pub mod action;
pub mod aggregate;
pub mod alert;
pub mod error;
pub mod point;
pub mod rule;
pub mod rule_store;

pub use action::{apply_aggregate, apply_filter, apply_transform, resolve_forward, render_alert_message, AlertThrottle, FilterState, StepOutcome};
pub use aggregate::{group_key, AggKey, AggregateStore, AggregationState};
pub use alert::{AlertRecord, AlertSink, ConsoleAlertSink, FileAlertSink};
pub use error::{CoreError, CoreReason, CoreResult};
pub use point::{Point, TagMap, TimestampNanos, Value};
pub use rule::{
    Action, ActionConfig, ActionJson, ActionKind, AggFn, AggregateConfig, AlertActionConfig, AlertLevel,
    ConditionJson, FilterConfig, ForwardConfig, Rule, RuleFile, RuleId, TransformConfig, render_template,
};
pub use rule_store::{Change, RuleStore};
