//! Southbound adapter plugin trait (spec C2/C3): a running adapter owns
//! its own protocol loop and pushes `Point`s into the bus via a bounded
//! channel, cooperatively stopping on a `CancellationToken`.

use std::path::PathBuf;

use async_trait::async_trait;
use gw_core::Point;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PluginResult;
use crate::types::{HealthStatus, ParamMap, PluginMetrics};

/// Static description of an adapter type, analogous to the teacher's
/// `SinkDefProvider::sink_def()`.
#[derive(Debug, Clone)]
pub struct AdapterDef {
    pub id: String,
    pub kind: String,
    pub default_params: ParamMap,
}

/// Context passed to `AdapterFactory::build`: resolved instance id,
/// on-disk working directory for any local state (e.g. a Modbus RTU
/// device lock file), and the instance's own `params`.
pub struct AdapterBuildCtx {
    pub instance_id: String,
    pub work_root: PathBuf,
    pub params: ParamMap,
}

/// One running adapter instance.
#[async_trait]
pub trait AdapterHandle: Send {
    /// Drives the adapter's protocol loop, pushing `Point`s to `tx` until
    /// `cancel` fires or an unrecoverable error occurs. Implementations
    /// own their own reconnect/backoff policy internally (spec C3).
    async fn run(&mut self, tx: mpsc::Sender<Point>, cancel: CancellationToken) -> PluginResult<()>;

    fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    fn metrics(&self) -> PluginMetrics {
        PluginMetrics::default()
    }
}

/// Builds adapter instances of one `kind` (e.g. `"modbus_tcp"`).
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    fn kind(&self) -> &'static str;

    fn adapter_def(&self) -> AdapterDef;

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()>;

    async fn build(&self, ctx: &AdapterBuildCtx) -> PluginResult<Box<dyn AdapterHandle>>;
}
