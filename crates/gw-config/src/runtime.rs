use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// Action-pipeline execution settings (spec C8).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Rule/action execution parallelism (bounds the executor semaphore).
    pub executor_parallelism: usize,
    /// Per-rule execution timeout before the action is abandoned and logged.
    pub rule_exec_timeout: HumanDuration,
    /// How often the aggregate store's TTL sweep runs (spec C9).
    #[serde(default = "default_aggregate_sweep_interval")]
    pub aggregate_sweep_interval: HumanDuration,
    /// Bound on concurrently in-flight `is_async` actions (spec C8's
    /// `JoinSet`-backed worker pool); async Alert/Forward dispatch queues
    /// behind this instead of the per-Point `executor_parallelism` cap.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

fn default_aggregate_sweep_interval() -> HumanDuration {
    "60s".parse().expect("hardcoded duration must parse")
}

fn default_worker_pool_size() -> usize {
    16
}
