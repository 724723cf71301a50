use std::path::Path;
use std::sync::Arc;

use orion_error::prelude::*;

use gw_config::{GatewayConfig, PluginScope, load_plugin_defs};
use gw_core::{AggregateStore, AlertThrottle, FilterState, RuleStore};
use gw_plugin_api::{AdapterRegistry, SinkRegistry};

use crate::alert_task::build_alert_sinks;
use crate::bus::Bus;
use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::RuntimeMetrics;

use super::types::BootstrapData;

/// Load rule files, plugin definitions, and every shared runtime
/// component, resolving relative directories against `base_dir`.
pub(super) fn load_and_compile(config: &GatewayConfig, base_dir: &Path) -> RuntimeResult<BootstrapData> {
    let rules_dir = base_dir.join(&config.rules.dir);
    let rule_store = Arc::new(RuleStore::new(rules_dir));
    rule_store.load().err_conv()?;
    gw_info!(sys, rules = rule_store.snapshot().len(), dir = %config.rules.dir, "rule store loaded");

    let adapters_dir = base_dir.join(&config.adapters_dir);
    let adapter_defs: Vec<_> = load_plugin_defs(&adapters_dir, PluginScope::Adapter)
        .owe(RuntimeReason::Bootstrap)?
        .into_values()
        .collect();

    let sinks_dir = base_dir.join(&config.sinks_dir);
    let sink_defs: Vec<_> = load_plugin_defs(&sinks_dir, PluginScope::Sink)
        .owe(RuntimeReason::Bootstrap)?
        .into_values()
        .collect();

    let mut adapter_registry = AdapterRegistry::new();
    gw_adapters::register_all(&mut adapter_registry);

    let mut sink_registry = SinkRegistry::new();
    gw_sinks::register_all(&mut sink_registry);

    let bus = Arc::new(Bus::new(&config.bus));
    let metrics = Arc::new(RuntimeMetrics::new(Arc::clone(&bus)));

    let alert_sinks = match &config.alert {
        Some(alert_config) => build_alert_sinks(alert_config).owe(RuntimeReason::Bootstrap)?,
        None => Default::default(),
    };

    Ok(BootstrapData {
        rule_store,
        bus,
        aggregates: Arc::new(AggregateStore::new()),
        filters: Arc::new(FilterState::new()),
        throttle: Arc::new(AlertThrottle::new()),
        metrics,
        adapter_registry: Arc::new(adapter_registry),
        sink_registry: Arc::new(sink_registry),
        adapter_defs,
        sink_defs,
        alert_sinks: Some(alert_sinks),
    })
}
