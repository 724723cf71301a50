use std::sync::Arc;

use tokio::task::JoinHandle;

use orion_error::prelude::*;

use gw_config::PluginDef;
use gw_core::alert::AlertSink;
use gw_core::{AggregateStore, AlertThrottle, FilterState, RuleStore};
use gw_plugin_api::{AdapterRegistry, SinkRegistry};

use crate::bus::Bus;
use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::RuntimeMetrics;

// ---------------------------------------------------------------------------
// TaskGroup — named collection of async tasks for ordered shutdown
// ---------------------------------------------------------------------------

/// A named group of async tasks that are shut down together.
///
/// Groups are assembled in *start order* and joined in *reverse order*
/// (LIFO) during shutdown:
///
///   start:  sinks → rules → alert → adapters/sidecar → evictor/metrics
///   join:   evictor/metrics → adapters/sidecar → alert → rules → sinks
///
/// mirroring the gateway's dependency graph — southbound intake stops
/// first so nothing new enters the pipeline, then the rule engine and
/// alert dispatcher drain, and sinks are the last thing torn down.
pub(crate) struct TaskGroup {
    pub(super) name: &'static str,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl TaskGroup {
    pub(super) fn new(name: &'static str) -> Self {
        Self { name, handles: Vec::new() }
    }

    pub(super) fn push(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }

    pub(super) fn push_unit(&mut self, handle: JoinHandle<()>) {
        self.handles.push(tokio::spawn(async move {
            handle.await.map_err(|e| anyhow::anyhow!("task join error: {e}"))
        }));
    }

    /// Join all tasks in this group, returning the first error.
    pub(super) async fn wait(self) -> RuntimeResult<()> {
        for handle in self.handles {
            handle
                .await
                .map_err(|e| StructError::from(RuntimeReason::Shutdown(format!("task join error: {e}"))))?
                .map_err(|e| StructError::from(RuntimeReason::Shutdown(e.to_string())))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BootstrapData — compiled artifacts from the config-loading phase
// ---------------------------------------------------------------------------

/// Every long-lived shared component built before any task is spawned.
pub(super) struct BootstrapData {
    pub rule_store: Arc<RuleStore>,
    pub bus: Arc<Bus>,
    pub aggregates: Arc<AggregateStore>,
    pub filters: Arc<FilterState>,
    pub throttle: Arc<AlertThrottle>,
    pub metrics: Arc<RuntimeMetrics>,
    pub adapter_registry: Arc<AdapterRegistry>,
    pub sink_registry: Arc<SinkRegistry>,
    pub adapter_defs: Vec<PluginDef>,
    pub sink_defs: Vec<PluginDef>,
    /// Taken by `spawn_alert_group`; `None` afterward.
    pub alert_sinks: Option<std::collections::HashMap<String, Box<dyn AlertSink>>>,
}
