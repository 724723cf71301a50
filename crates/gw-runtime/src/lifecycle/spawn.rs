use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use orion_error::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gw_config::{GatewayConfig, RulesConfig, ServerConfig};
use gw_core::alert::AlertRecord;
use gw_core::{AggregateStore, RuleStore};

use crate::adapter_task::spawn_adapters;
use crate::alert_task::{self, ALERT_CHANNEL_CAPACITY};
use crate::error::RuntimeResult;
use crate::evictor_task;
use crate::rule_task::RuleEngine;
use crate::sidecar::SidecarListener;
use crate::sink_task::SinkRuntime;

use super::types::{BootstrapData, TaskGroup};

/// Build every configured sink instance. Fails the whole bootstrap if any
/// sink definition can't be built (spec §7's fail-fast startup discipline).
pub(super) async fn spawn_sinks(data: &BootstrapData, work_root: &Path) -> RuntimeResult<Arc<SinkRuntime>> {
    let runtime = SinkRuntime::build(&data.sink_registry, data.sink_defs.clone(), work_root).await?;
    Ok(Arc::new(runtime))
}

/// Spawn one task per enabled adapter plugin definition, forwarding onto
/// the shared bus.
pub(super) fn spawn_adapter_group(data: &BootstrapData, work_root: &Path, cancel: CancellationToken) -> TaskGroup {
    let mut group = TaskGroup::new("adapters");
    for handle in spawn_adapters(Arc::clone(&data.adapter_registry), data.adapter_defs.clone(), work_root, Arc::clone(&data.bus), cancel) {
        group.push_unit(handle);
    }
    group
}

/// Bind and spawn the ISP sidecar listener, if a `[server]` section is
/// configured. Absent server config means no sidecar adapters are in use.
pub(super) async fn spawn_sidecar_group(
    server: Option<&ServerConfig>,
    bus: Arc<crate::bus::Bus>,
    cancel: CancellationToken,
) -> RuntimeResult<(Option<SocketAddr>, TaskGroup)> {
    let mut group = TaskGroup::new("sidecar");
    let Some(server) = server else {
        return Ok((None, group));
    };

    let listener = SidecarListener::bind(server, bus).await.owe_sys()?;
    let listen_addr = listener.local_addr().owe_sys()?;
    let listener_cancel = listener.cancel_token();
    tokio::spawn(async move {
        cancel.cancelled().await;
        listener_cancel.cancel();
    });
    group.push(tokio::spawn(async move { listener.run().await }));
    Ok((Some(listen_addr), group))
}

/// Spawn the alert dispatcher, draining `AlertRecord`s into built-in
/// console/file sinks or the shared `SinkRuntime`. Takes `data.alert_sinks`
/// (consumed once at startup).
pub(super) fn spawn_alert_group(data: &mut BootstrapData, sinks: Arc<SinkRuntime>) -> (mpsc::Sender<AlertRecord>, TaskGroup) {
    let (alert_tx, alert_rx) = mpsc::channel(ALERT_CHANNEL_CAPACITY);
    let alert_sinks = data.alert_sinks.take().unwrap_or_default();
    let mut group = TaskGroup::new("alert");
    group.push(tokio::spawn(async move {
        alert_task::run_alert_dispatcher(alert_rx, alert_sinks, sinks).await;
        Ok(())
    }));
    (alert_tx, group)
}

/// Spawn the rule engine task.
pub(super) fn spawn_rule_engine_group(
    data: &BootstrapData,
    sinks: Arc<SinkRuntime>,
    alert_tx: mpsc::Sender<AlertRecord>,
    config: &GatewayConfig,
    cancel: CancellationToken,
) -> TaskGroup {
    let engine = Arc::new(RuleEngine::new(
        Arc::clone(&data.rule_store),
        data.bus.subscribe("rule_engine"),
        Arc::clone(&data.aggregates),
        Arc::clone(&data.filters),
        Arc::clone(&data.throttle),
        sinks,
        alert_tx,
        Arc::clone(&data.metrics),
        &config.runtime,
    ));
    let mut group = TaskGroup::new("rules");
    group.push(tokio::spawn(async move {
        engine.run(cancel).await;
        Ok(())
    }));
    group
}

/// Spawn the aggregate TTL evictor task.
pub(super) fn spawn_aggregate_evictor_group(data: &BootstrapData, config: &GatewayConfig, cancel: CancellationToken) -> TaskGroup {
    let interval = config.runtime.aggregate_sweep_interval.as_duration();
    let store = Arc::clone(&data.aggregates);
    let rule_store = Arc::clone(&data.rule_store);
    let metrics = Arc::clone(&data.metrics);
    let mut group = TaskGroup::new("evictor");
    group.push(tokio::spawn(async move {
        evictor_task::run_aggregate_evictor(store, rule_store, metrics, interval, cancel).await;
        Ok(())
    }));
    group
}

/// Spawn the Prometheus metrics exporter, if enabled.
pub(super) fn spawn_metrics_group(data: &BootstrapData, config: &GatewayConfig, cancel: CancellationToken) -> TaskGroup {
    let mut group = TaskGroup::new("metrics");
    if !config.metrics.enabled {
        return group;
    }
    let metrics = Arc::clone(&data.metrics);
    let metrics_config = config.metrics.clone();
    group.push(tokio::spawn(async move { crate::metrics::run_metrics_task(metrics, metrics_config, cancel).await }));
    group
}

/// Spawn the rule directory watcher, if `hot_reload` is enabled (spec C6).
/// The `notify` watcher itself is blocking, so it runs on a dedicated
/// blocking thread; file events are debounced by draining the channel
/// until it's been quiet for `debounce` before calling `reload()`.
pub(super) fn spawn_rule_watch_group(
    rule_store: Arc<RuleStore>,
    aggregates: Arc<AggregateStore>,
    rules: &RulesConfig,
    base_dir: &Path,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("rule_watch");
    if !rules.hot_reload {
        return group;
    }

    let dir = base_dir.join(&rules.dir);
    let debounce = rules.debounce.as_duration();
    group.push(tokio::task::spawn_blocking(move || run_rule_watch(rule_store, aggregates, dir, debounce, cancel)));
    group
}

fn run_rule_watch(rule_store: Arc<RuleStore>, aggregates: Arc<AggregateStore>, dir: PathBuf, debounce: Duration, cancel: CancellationToken) -> anyhow::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    gw_info!(sys, dir = %dir.display(), "rule hot-reload watcher started");

    loop {
        if cancel.is_cancelled() {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(_)) => {
                // Drain any further events arriving within the debounce
                // window so a burst of writes triggers one reload.
                while rx.recv_timeout(debounce).is_ok() {}
                match rule_store.reload() {
                    Ok(removed) => {
                        for rule_id in &removed {
                            aggregates.remove_rule(rule_id);
                        }
                        gw_info!(sys, removed = removed.len(), "rule directory reloaded");
                    }
                    Err(e) => gw_warn!(sys, error = %e, "rule directory reload failed"),
                }
            }
            Ok(Err(e)) => gw_warn!(sys, error = %e, "rule watcher error"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}
