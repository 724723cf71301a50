//! Redis sink (spec C10): writes each point as a JSON string via `SET` (or
//! `PUBLISH` when `mode = "pubsub"`), keyed/topic'd from a template.

use async_trait::async_trait;
use gw_core::Point;
use gw_plugin_api::{
    AsyncCtrl, AsyncPointSink, ParamMap, PluginReason, PluginResult, SinkBuildCtx, SinkDef, SinkFactory, SinkHandle,
};
use orion_error::StructError;
use redis::AsyncCommands;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum RedisMode {
    Set,
    Pubsub,
}

impl Default for RedisMode {
    fn default() -> Self {
        Self::Set
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RedisParams {
    url: String,
    #[serde(default = "default_key_template")]
    key_template: String,
    #[serde(default)]
    mode: RedisMode,
    #[serde(default)]
    ttl_secs: Option<u64>,
}

fn default_key_template() -> String {
    "gw:{device_id}:{key}".to_string()
}

pub struct RedisSinkFactory;

#[async_trait]
impl SinkFactory for RedisSinkFactory {
    fn kind(&self) -> &'static str {
        "redis"
    }

    fn sink_def(&self) -> SinkDef {
        SinkDef { id: "redis".into(), kind: "redis".into(), default_params: ParamMap::new() }
    }

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()> {
        parse_params(params).map(|_| ())
    }

    async fn build(&self, ctx: &SinkBuildCtx) -> PluginResult<SinkHandle> {
        let params = parse_params(&ctx.params)?;
        let client = redis::Client::open(params.url.as_str())
            .map_err(|e| StructError::from(PluginReason::Sink(format!("invalid redis url: {e}"))))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| StructError::from(PluginReason::Sink(format!("redis connect: {e}"))))?;
        Ok(Box::new(RedisSink { params, conn }))
    }
}

fn parse_params(params: &ParamMap) -> PluginResult<RedisParams> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| StructError::from(PluginReason::Sink(format!("invalid redis params: {e}"))))
}

struct RedisSink {
    params: RedisParams,
    conn: redis::aio::MultiplexedConnection,
}

impl RedisSink {
    fn key_for(&self, point: &Point) -> String {
        self.params.key_template.replace("{device_id}", &point.device_id).replace("{key}", &point.key)
    }
}

#[async_trait]
impl AsyncCtrl for RedisSink {
    async fn stop(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AsyncPointSink for RedisSink {
    async fn sink_point(&mut self, point: &Point) -> PluginResult<()> {
        let key = self.key_for(point);
        let payload = serde_json::to_string(point)
            .map_err(|e| StructError::from(PluginReason::Sink(format!("serialize: {e}"))))?;

        match self.params.mode {
            RedisMode::Pubsub => {
                let _: i64 = self
                    .conn
                    .publish(&key, payload)
                    .await
                    .map_err(|e| StructError::from(PluginReason::Sink(format!("redis publish: {e}"))))?;
            }
            RedisMode::Set => {
                if let Some(ttl) = self.params.ttl_secs {
                    let _: () = self
                        .conn
                        .set_ex(&key, payload, ttl)
                        .await
                        .map_err(|e| StructError::from(PluginReason::Sink(format!("redis setex: {e}"))))?;
                } else {
                    let _: () = self
                        .conn
                        .set(&key, payload)
                        .await
                        .map_err(|e| StructError::from(PluginReason::Sink(format!("redis set: {e}"))))?;
                }
            }
        }
        Ok(())
    }
}
