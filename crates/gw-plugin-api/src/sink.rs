//! Northbound sink plugin trait (spec C2/C10), shaped directly on the
//! teacher's `SinkFactory`/`SinkDefProvider`/`AsyncCtrl`/`AsyncRawDataSink`
//! trio (`wf-runtime/src/sink_factory/file.rs`), retargeted from
//! `DataRecord`/Arrow batches to `gw-core::Point`.

use std::path::PathBuf;

use async_trait::async_trait;
use gw_core::Point;

use crate::error::PluginResult;
use crate::types::{HealthStatus, ParamMap, PluginMetrics};

#[derive(Debug, Clone)]
pub struct SinkDef {
    pub id: String,
    pub kind: String,
    pub default_params: ParamMap,
}

pub struct SinkBuildCtx {
    pub instance_id: String,
    pub work_root: PathBuf,
    pub params: ParamMap,
}

/// Lifecycle control shared by every sink instance.
#[async_trait]
pub trait AsyncCtrl: Send {
    async fn stop(&mut self) -> PluginResult<()>;
    async fn reconnect(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

/// Point delivery surface. `sink_points` defaults to a per-item loop over
/// `sink_point` so a sink only has to implement the single-item path
/// unless it has a genuine batch API (e.g. Redis pipelining).
#[async_trait]
pub trait AsyncPointSink: AsyncCtrl {
    async fn sink_point(&mut self, point: &Point) -> PluginResult<()>;

    async fn sink_points(&mut self, points: &[Point]) -> PluginResult<()> {
        for p in points {
            self.sink_point(p).await?;
        }
        Ok(())
    }

    fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    fn metrics(&self) -> PluginMetrics {
        PluginMetrics::default()
    }
}

pub type SinkHandle = Box<dyn AsyncPointSink>;

#[async_trait]
pub trait SinkFactory: Send + Sync {
    fn kind(&self) -> &'static str;

    fn sink_def(&self) -> SinkDef;

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()>;

    async fn build(&self, ctx: &SinkBuildCtx) -> PluginResult<SinkHandle>;
}
