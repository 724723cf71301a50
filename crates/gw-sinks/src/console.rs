//! Console sink (spec C10): prints each point as one JSON line to stdout.
//! The default northbound destination in examples and local testing.

use async_trait::async_trait;
use gw_core::Point;
use gw_plugin_api::{AsyncCtrl, AsyncPointSink, ParamMap, PluginResult, SinkBuildCtx, SinkDef, SinkFactory, SinkHandle};

pub struct ConsoleSinkFactory;

#[async_trait]
impl SinkFactory for ConsoleSinkFactory {
    fn kind(&self) -> &'static str {
        "console"
    }

    fn sink_def(&self) -> SinkDef {
        SinkDef { id: "console".into(), kind: "console".into(), default_params: ParamMap::new() }
    }

    fn validate_params(&self, _params: &ParamMap) -> PluginResult<()> {
        Ok(())
    }

    async fn build(&self, _ctx: &SinkBuildCtx) -> PluginResult<SinkHandle> {
        Ok(Box::new(ConsoleSink))
    }
}

struct ConsoleSink;

#[async_trait]
impl AsyncCtrl for ConsoleSink {
    async fn stop(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AsyncPointSink for ConsoleSink {
    async fn sink_point(&mut self, point: &Point) -> PluginResult<()> {
        match serde_json::to_string(point) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(domain = "pipe", error = %e, "console sink failed to serialize point"),
        }
        Ok(())
    }
}
