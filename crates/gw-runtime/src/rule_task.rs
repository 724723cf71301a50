//! Rule engine task (spec C6/C7/C8): drains the bus, evaluates every
//! enabled rule's condition against each Point in priority order, and runs
//! the matching rule's action pipeline. Grounded on the teacher's
//! `engine_task/rule_task.rs` shape (one task owning its own execution
//! loop, `tokio::select!`-driven shutdown) though the CEP-specific state
//! machine/window plumbing has no counterpart here — a Point-oriented
//! pipeline has nothing to join or window over.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use gw_config::RuntimeConfig;
use gw_core::{
    alert::AlertRecord, apply_aggregate, apply_filter, apply_transform, render_alert_message, resolve_forward,
    AggregateStore, AlertThrottle, FilterState, Point, Rule, RuleStore, StepOutcome, Value,
};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bus::BusSubscriber;
use crate::metrics::RuntimeMetrics;
use crate::sink_task::SinkRuntime;

pub struct RuleEngine {
    rule_store: Arc<RuleStore>,
    bus: BusSubscriber,
    aggregates: Arc<AggregateStore>,
    filters: Arc<FilterState>,
    throttle: Arc<AlertThrottle>,
    sinks: Arc<SinkRuntime>,
    alert_tx: mpsc::Sender<AlertRecord>,
    metrics: Arc<RuntimeMetrics>,
    executor: Arc<Semaphore>,
    exec_timeout: Duration,
    /// Bounds actions dispatched with `is_async: true` (spec C8's worker
    /// pool), independent of `executor`'s per-Point concurrency cap.
    async_permits: Arc<Semaphore>,
    async_tasks: Mutex<JoinSet<()>>,
}

impl RuleEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule_store: Arc<RuleStore>,
        bus: BusSubscriber,
        aggregates: Arc<AggregateStore>,
        filters: Arc<FilterState>,
        throttle: Arc<AlertThrottle>,
        sinks: Arc<SinkRuntime>,
        alert_tx: mpsc::Sender<AlertRecord>,
        metrics: Arc<RuntimeMetrics>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            rule_store,
            bus,
            aggregates,
            filters,
            throttle,
            sinks,
            alert_tx,
            metrics,
            executor: Arc::new(Semaphore::new(config.executor_parallelism.max(1))),
            exec_timeout: config.rule_exec_timeout.into(),
            async_permits: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            async_tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Drains the bus until it closes or `cancel` fires, spawning one
    /// bounded task per Point so a slow rule's actions never stall intake
    /// of the next one (spec C8's `executor_parallelism`).
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let point = tokio::select! {
                point = self.bus.recv() => point,
                _ = cancel.cancelled() => None,
            };

            let Some(point) = point else { break };

            let permit = match Arc::clone(&self.executor).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                match tokio::time::timeout(engine.exec_timeout, engine.process_point(point)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        engine.metrics.inc_rule_action_error();
                        gw_warn!(pipe, error = %e, "rule execution error");
                    }
                    Err(_) => {
                        engine.metrics.inc_rule_exec_timeout();
                        gw_warn!(pipe, "rule execution timed out");
                    }
                }
            });
        }

        self.drain_async_jobs().await;
        gw_info!(sys, "rule engine loop exited");
    }

    /// Waits for every in-flight `is_async` action job to finish, so
    /// shutdown doesn't drop alerts/forwards that were already accepted
    /// into the worker pool.
    async fn drain_async_jobs(&self) {
        loop {
            let next = {
                let mut tasks = self.async_tasks.lock().expect("async task set lock poisoned");
                if tasks.is_empty() {
                    break;
                }
                tasks.join_next()
            };
            if let Some(fut) = next {
                let _ = fut.await;
            }
        }
    }

    async fn process_point(self: &Arc<Self>, point: Point) -> anyhow::Result<()> {
        self.metrics.inc_rule_evaluation();
        for rule in self.rule_store.snapshot().iter() {
            if !rule.enabled {
                continue;
            }
            match rule.condition.evaluate(&point) {
                Ok(true) => {
                    self.metrics.inc_rule_match(&rule.id);
                    rule.stats.record_match();
                    self.run_pipeline(rule, point.clone()).await?;
                }
                Ok(false) => {}
                Err(e) => {
                    rule.stats.record_error(e.to_string());
                    gw_warn!(pipe, rule = %rule.id, error = %e, "condition evaluation error");
                }
            }
        }
        Ok(())
    }

    async fn run_pipeline(self: &Arc<Self>, rule: &Arc<Rule>, point: Point) -> anyhow::Result<()> {
        let mut current = point;

        for (idx, action) in rule.actions.iter().enumerate() {
            let scope_key = format!("{}:{idx}", rule.id);

            match &action.config {
                gw_core::ActionConfig::Filter(cfg) => {
                    match apply_filter(&self.filters, &scope_key, cfg, &current) {
                        StepOutcome::Continue(p) => current = p,
                        StepOutcome::Dropped => return Ok(()),
                    }
                }
                gw_core::ActionConfig::Transform(cfg) => {
                    current = apply_transform(cfg, &current);
                }
                gw_core::ActionConfig::Aggregate(cfg) => {
                    if let Some(derived) = apply_aggregate(&self.aggregates, &rule.id, cfg, &current) {
                        current = derived;
                    }
                }
                gw_core::ActionConfig::Alert(cfg) => {
                    if self.throttle.should_fire(&scope_key, cfg) {
                        let message = render_alert_message(cfg, &current);
                        let fired_at = chrono::Utc::now().to_rfc3339();
                        let record = AlertRecord::new(rule.id.clone(), cfg.level, message, cfg.channels.clone(), current.device_id.clone(), current.key.clone(), fired_at);
                        self.metrics.inc_alert_emitted(&rule.id);

                        let alert_tx = self.alert_tx.clone();
                        let job = move || {
                            let alert_tx = alert_tx.clone();
                            let record = record.clone();
                            Box::pin(async move {
                                alert_tx.send(record).await.map_err(|_| anyhow::anyhow!("alert dispatcher channel closed"))
                            }) as BoxFuture<'static, anyhow::Result<()>>
                        };
                        self.dispatch_action(rule, idx, action, "alert", job).await;
                    }
                }
                gw_core::ActionConfig::Forward(cfg) => {
                    let (targets, rendered) = resolve_forward(cfg, &current);
                    let payload = match rendered {
                        Some(text) => {
                            let mut p = Point::new(current.device_id.clone(), current.key.clone(), Value::Str(text), current.timestamp);
                            p.tags = current.tags.clone();
                            p
                        }
                        None => current.clone(),
                    };
                    for target in &targets {
                        self.metrics.inc_forward_dispatch();
                        let sinks = Arc::clone(&self.sinks);
                        let target = target.clone();
                        let payload = payload.clone();
                        let job = move || {
                            let sinks = Arc::clone(&sinks);
                            let target = target.clone();
                            let payload = payload.clone();
                            Box::pin(async move { sinks.dispatch(&target, &payload).await.map_err(|e| anyhow::anyhow!(e.to_string())) })
                                as BoxFuture<'static, anyhow::Result<()>>
                        };
                        self.dispatch_action(rule, idx, action, "forward", job).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs a single action's job with its own `timeout`/`retry` (spec §7:
    /// a failed action only fails itself, the rule continues to its next
    /// action). When `action.is_async`, the job is handed to the bounded
    /// worker pool instead of being awaited inline so the pipeline moves
    /// on to the next action immediately.
    async fn dispatch_action<F>(self: &Arc<Self>, rule: &Arc<Rule>, idx: usize, action: &gw_core::Action, label: &'static str, job: F)
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let timeout = action.timeout;
        let retries = action.retry;
        let rule_id = rule.id.clone();

        if action.is_async {
            let permit = match Arc::clone(&self.async_permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let metrics = Arc::clone(&self.metrics);
            let rule = Arc::clone(rule);
            let mut tasks = self.async_tasks.lock().expect("async task set lock poisoned");
            while tasks.try_join_next().is_some() {}
            tasks.spawn(async move {
                let _permit = permit;
                if let Err(e) = run_with_retry(timeout, retries, &job).await {
                    metrics.inc_rule_action_error();
                    rule.stats.record_error(e.to_string());
                    gw_warn!(pipe, rule = %rule_id, action = idx, kind = label, error = %e, "async action failed");
                }
            });
        } else if let Err(e) = run_with_retry(timeout, retries, &job).await {
            self.metrics.inc_rule_action_error();
            rule.stats.record_error(e.to_string());
            if label == "alert" {
                self.metrics.inc_alert_dispatch_failed();
            } else {
                self.metrics.inc_forward_dispatch_failed();
            }
            gw_warn!(pipe, rule = %rule_id, action = idx, kind = label, error = %e, "action failed");
        }
    }
}

/// Runs `job` up to `retries + 1` times, enforcing `timeout` on each
/// attempt independently. Returns the last error once every attempt is
/// exhausted.
async fn run_with_retry<F>(timeout: Duration, retries: u32, job: &F) -> anyhow::Result<()>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<()>>,
{
    let attempts = retries.saturating_add(1);
    let mut last_err = anyhow::anyhow!("action never attempted");
    for attempt in 0..attempts {
        match tokio::time::timeout(timeout, job()).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => last_err = e,
            Err(_) => last_err = anyhow::anyhow!("action timed out after {timeout:?}"),
        }
        if attempt + 1 < attempts {
            gw_debug!(pipe, attempt, "action attempt failed, retrying");
        }
    }
    Err(last_err)
}
