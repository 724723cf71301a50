mod bootstrap;
mod signal;
mod spawn;
mod types;

use std::path::Path;

use orion_error::op_context;
use orion_error::prelude::*;
use tokio_util::sync::CancellationToken;

use gw_config::GatewayConfig;

use crate::error::RuntimeResult;

pub use signal::wait_for_signal;

use bootstrap::load_and_compile;
use spawn::{
    spawn_adapter_group, spawn_aggregate_evictor_group, spawn_alert_group, spawn_metrics_group, spawn_rule_engine_group, spawn_rule_watch_group,
    spawn_sidecar_group, spawn_sinks,
};
use types::TaskGroup;

/// Manages the full lifecycle of the gateway: bootstrap, run, and graceful
/// shutdown.
///
/// Task groups are stored in start order and joined in reverse (LIFO)
/// during [`wait`](Self::wait): southbound intake (adapters, sidecar
/// listener, rule watcher) stops first so no new Point enters the
/// pipeline, then the rule engine and alert dispatcher drain whatever is
/// in flight, and sinks are stopped last so nothing produced during drain
/// is lost.
pub struct Reactor {
    cancel: CancellationToken,
    groups: Vec<TaskGroup>,
    sidecar_listen_addr: Option<std::net::SocketAddr>,
}

impl Reactor {
    /// Bootstrap the entire gateway from a [`GatewayConfig`] and a base
    /// directory (for resolving relative rule/adapter/sink directory paths).
    #[tracing::instrument(name = "gateway.start", skip_all)]
    pub async fn start(config: GatewayConfig, base_dir: &Path) -> RuntimeResult<Self> {
        let mut op = op_context!("gateway-bootstrap").with_auto_log();
        op.record("base_dir", base_dir.display().to_string().as_str());

        let cancel = CancellationToken::new();

        let mut data = load_and_compile(&config, base_dir)?;
        gw_info!(
            sys,
            rules = data.rule_store.snapshot().len(),
            adapters = data.adapter_defs.len(),
            sinks = data.sink_defs.len(),
            "gateway bootstrap complete"
        );

        let mut groups: Vec<TaskGroup> = Vec::with_capacity(8);

        // Start order: sinks must exist before anything can forward to
        // them, then the rule engine and alert dispatcher that address
        // sinks by id, and finally the intake side (adapters/sidecar/rule
        // watcher) that feeds the bus the rule engine drains.
        let sinks = spawn_sinks(&data, base_dir).await?;

        let (alert_tx, alert_group) = spawn_alert_group(&mut data, std::sync::Arc::clone(&sinks));
        groups.push(alert_group);

        groups.push(spawn_rule_engine_group(&data, std::sync::Arc::clone(&sinks), alert_tx, &config, cancel.child_token()));

        groups.push(spawn_aggregate_evictor_group(&data, &config, cancel.child_token()));

        groups.push(spawn_metrics_group(&data, &config, cancel.child_token()));

        groups.push(spawn_rule_watch_group(
            std::sync::Arc::clone(&data.rule_store),
            std::sync::Arc::clone(&data.aggregates),
            &config.rules,
            base_dir,
            cancel.child_token(),
        ));

        groups.push(spawn_adapter_group(&data, base_dir, cancel.child_token()));

        let (sidecar_listen_addr, sidecar_group) = spawn_sidecar_group(config.server.as_ref(), std::sync::Arc::clone(&data.bus), cancel.child_token()).await?;
        groups.push(sidecar_group);

        op.mark_suc();
        Ok(Self { cancel, groups, sidecar_listen_addr })
    }

    /// Returns the sidecar listener's bound address, if `[server]` is configured.
    pub fn sidecar_listen_addr(&self) -> Option<std::net::SocketAddr> {
        self.sidecar_listen_addr
    }

    /// Request graceful shutdown of all tasks.
    pub fn shutdown(&self) {
        gw_info!(sys, "initiating graceful shutdown");
        self.cancel.cancel();
    }

    /// Wait for all task groups to complete after shutdown, joining in
    /// LIFO order (reverse of start order): sidecar → adapters →
    /// rule_watch → metrics → evictor → rules → alert → sinks.
    pub async fn wait(mut self) -> RuntimeResult<()> {
        while let Some(group) = self.groups.pop() {
            let name = group.name;
            gw_debug!(sys, task_group = name, "waiting for task group to finish");
            group.wait().await?;
            gw_debug!(sys, task_group = name, "task group finished");
        }
        Ok(())
    }

    /// Returns a clone of the root cancellation token (for signal integration).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
