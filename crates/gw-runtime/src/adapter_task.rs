//! Adapter orchestration (spec C3): spawns one task per configured,
//! enabled `PluginDef` of scope `Adapter`, builds the matching
//! `AdapterHandle` from the registry, and forwards everything the handle
//! emits onto the shared [`crate::bus::Bus`].

use std::path::Path;
use std::sync::Arc;

use gw_config::PluginDef;
use gw_plugin_api::AdapterRegistry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::Bus;

/// Outbound channel depth between an adapter's own protocol loop and the
/// forwarding task that pushes into the bus; independent of the bus's own
/// capacity/policy so one slow adapter can't starve another's channel.
const ADAPTER_CHANNEL_CAPACITY: usize = 256;

/// Spawns one task per enabled adapter definition. Each task owns the
/// built `AdapterHandle`'s `run()` loop plus a short forwarding loop that
/// drains its `mpsc` channel into `bus`; the adapter's own reconnect/
/// backoff policy lives inside `run()` (spec C3), not here.
pub fn spawn_adapters(
    registry: Arc<AdapterRegistry>,
    defs: Vec<PluginDef>,
    work_root: impl AsRef<Path>,
    bus: Arc<Bus>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let work_root = work_root.as_ref().to_path_buf();

    defs.into_iter()
        .filter(|def| def.enabled)
        .map(|def| {
            let registry = Arc::clone(&registry);
            let bus = Arc::clone(&bus);
            let cancel = cancel.clone();
            let work_root = work_root.clone();

            tokio::spawn(async move {
                run_adapter(registry, def, work_root, bus, cancel).await;
            })
        })
        .collect()
}

async fn run_adapter(registry: Arc<AdapterRegistry>, def: PluginDef, work_root: std::path::PathBuf, bus: Arc<Bus>, cancel: CancellationToken) {
    let mut handle = match registry.build(&def.kind, &def.id, &work_root, def.params.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            gw_error!(sys, adapter = %def.id, kind = %def.kind, error = %e, "adapter failed to build, skipping");
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel(ADAPTER_CHANNEL_CAPACITY);
    let run_cancel = cancel.clone();

    let forward_id = def.id.clone();
    let forward_bus = Arc::clone(&bus);
    let forward = tokio::spawn(async move {
        while let Some(point) = rx.recv().await {
            if let Err(e) = forward_bus.publish(point).await {
                gw_warn!(bus, adapter = %forward_id, error = %e, "point dropped at bus admission");
            }
        }
    });

    if let Err(e) = handle.run(tx, run_cancel).await {
        gw_error!(sys, adapter = %def.id, error = %e, "adapter run loop exited with error");
    }

    let _ = forward.await;
}
