//! Synthetic adapter used for demos and integration tests: emits an
//! incrementing counter value on a fixed interval. Grounded on the shape of
//! every other adapter in this crate (interval loop + `tokio::select!`
//! against the cancellation token) with no southbound protocol underneath.

use async_trait::async_trait;
use gw_core::{Point, Value};
use gw_plugin_api::{AdapterBuildCtx, AdapterDef, AdapterFactory, AdapterHandle, ParamMap, PluginReason, PluginResult};
use orion_error::StructError;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
struct MockParams {
    #[serde(default = "default_device_id")]
    device_id: String,
    #[serde(default = "default_key")]
    key: String,
    #[serde(default = "default_interval_ms")]
    interval_ms: u64,
    #[serde(default)]
    start: i64,
}

fn default_device_id() -> String {
    "mock-1".to_string()
}
fn default_key() -> String {
    "counter".to_string()
}
fn default_interval_ms() -> u64 {
    1000
}

pub struct MockAdapterFactory;

#[async_trait]
impl AdapterFactory for MockAdapterFactory {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn adapter_def(&self) -> AdapterDef {
        AdapterDef { id: "mock".into(), kind: "mock".into(), default_params: ParamMap::new() }
    }

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()> {
        parse_params(params).map(|_| ())
    }

    async fn build(&self, ctx: &AdapterBuildCtx) -> PluginResult<Box<dyn AdapterHandle>> {
        let params = parse_params(&ctx.params)?;
        Ok(Box::new(MockAdapterHandle { params }))
    }
}

fn parse_params(params: &ParamMap) -> PluginResult<MockParams> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| StructError::from(PluginReason::Adapter(format!("invalid mock params: {e}"))))
}

struct MockAdapterHandle {
    params: MockParams,
}

#[async_trait]
impl AdapterHandle for MockAdapterHandle {
    async fn run(&mut self, tx: mpsc::Sender<Point>, cancel: CancellationToken) -> PluginResult<()> {
        let mut counter = self.params.start;
        let mut tick = tokio::time::interval(std::time::Duration::from_millis(self.params.interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    let now = now_nanos();
                    let point = Point::new(self.params.device_id.clone(), self.params.key.clone(), Value::Int(counter), now);
                    counter += 1;
                    if tx.send(point).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn emits_incrementing_counter_until_cancelled() {
        let factory = MockAdapterFactory;
        let mut params = ParamMap::new();
        params.insert("interval_ms".into(), serde_json::json!(5));
        let ctx = AdapterBuildCtx { instance_id: "m1".into(), work_root: PathBuf::from("/tmp"), params };
        let mut handle = factory.build(&ctx).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let task = tokio::spawn(async move { handle.run(tx, cancel_clone).await });

        let p1 = rx.recv().await.unwrap();
        let p2 = rx.recv().await.unwrap();
        assert_eq!(p1.value, Value::Int(0));
        assert_eq!(p2.value, Value::Int(1));

        cancel.cancel();
        let _ = task.await;
    }
}
