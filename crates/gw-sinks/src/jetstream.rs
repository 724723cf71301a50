//! JetStream replay-log sink (spec C10/C11): every point accepted here is
//! durably appended to the gateway's own replay log, the northbound
//! destination `gw-recovery` later drains back out to any other sink.

use async_trait::async_trait;
use gw_core::Point;
use gw_plugin_api::{
    AsyncCtrl, AsyncPointSink, ParamMap, PluginReason, PluginResult, SinkBuildCtx, SinkDef, SinkFactory, SinkHandle,
};
use gw_replay::ReplayLog;
use orion_error::StructError;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct JetStreamParams {
    nats_url: String,
    #[serde(default = "default_stream")]
    stream: String,
    #[serde(default = "default_subject_prefix")]
    subject_prefix: String,
}

fn default_stream() -> String {
    "gw_replay".to_string()
}

fn default_subject_prefix() -> String {
    "gw.points".to_string()
}

pub struct JetStreamSinkFactory;

#[async_trait]
impl SinkFactory for JetStreamSinkFactory {
    fn kind(&self) -> &'static str {
        "jetstream"
    }

    fn sink_def(&self) -> SinkDef {
        SinkDef { id: "jetstream".into(), kind: "jetstream".into(), default_params: ParamMap::new() }
    }

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()> {
        parse_params(params).map(|_| ())
    }

    async fn build(&self, ctx: &SinkBuildCtx) -> PluginResult<SinkHandle> {
        let params = parse_params(&ctx.params)?;
        let log = ReplayLog::connect(&params.nats_url, &params.stream, &params.subject_prefix)
            .await
            .map_err(|e| StructError::from(PluginReason::Sink(format!("jetstream connect: {e}"))))?;
        Ok(Box::new(JetStreamSink { log }))
    }
}

fn parse_params(params: &ParamMap) -> PluginResult<JetStreamParams> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| StructError::from(PluginReason::Sink(format!("invalid jetstream params: {e}"))))
}

struct JetStreamSink {
    log: ReplayLog,
}

#[async_trait]
impl AsyncCtrl for JetStreamSink {
    async fn stop(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AsyncPointSink for JetStreamSink {
    async fn sink_point(&mut self, point: &Point) -> PluginResult<()> {
        self.log
            .publish(point)
            .await
            .map_err(|e| StructError::from(PluginReason::Sink(format!("jetstream publish: {e}"))))?;
        Ok(())
    }
}
