//! HTTP polling adapter (spec C3): GETs a JSON endpoint on a fixed interval
//! and extracts one field via a JSON Pointer (RFC 6901) path.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use gw_core::{Point, Value};
use gw_plugin_api::{AdapterBuildCtx, AdapterDef, AdapterFactory, AdapterHandle, ParamMap, PluginReason, PluginResult};
use orion_error::StructError;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
struct HttpPollParams {
    url: String,
    device_id: String,
    key: String,
    #[serde(default)]
    json_pointer: String,
    #[serde(default = "default_interval_ms")]
    interval_ms: u64,
    #[serde(default)]
    headers: HashMap<String, String>,
}

fn default_interval_ms() -> u64 {
    5000
}

pub struct HttpPollFactory;

#[async_trait]
impl AdapterFactory for HttpPollFactory {
    fn kind(&self) -> &'static str {
        "http_poll"
    }

    fn adapter_def(&self) -> AdapterDef {
        AdapterDef { id: "http_poll".into(), kind: "http_poll".into(), default_params: ParamMap::new() }
    }

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()> {
        parse_params(params).map(|_| ())
    }

    async fn build(&self, ctx: &AdapterBuildCtx) -> PluginResult<Box<dyn AdapterHandle>> {
        let params = parse_params(&ctx.params)?;
        let client = reqwest::Client::new();
        Ok(Box::new(HttpPollHandle { params, client }))
    }
}

fn parse_params(params: &ParamMap) -> PluginResult<HttpPollParams> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| StructError::from(PluginReason::Adapter(format!("invalid http_poll params: {e}"))))
}

struct HttpPollHandle {
    params: HttpPollParams,
    client: reqwest::Client,
}

#[async_trait]
impl AdapterHandle for HttpPollHandle {
    async fn run(&mut self, tx: mpsc::Sender<Point>, cancel: CancellationToken) -> PluginResult<()> {
        let mut tick = tokio::time::interval(Duration::from_millis(self.params.interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    if let Some(point) = self.poll_once().await {
                        if tx.send(point).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

impl HttpPollHandle {
    async fn poll_once(&self) -> Option<Point> {
        let mut req = self.client.get(&self.params.url);
        for (name, value) in &self.params.headers {
            req = req.header(name, value);
        }

        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(domain = "conn", error = %e, url = %self.params.url, "http_poll request failed");
                return None;
            }
        };

        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(domain = "conn", error = %e, "http_poll response was not JSON");
                return None;
            }
        };

        let pointer = if self.params.json_pointer.is_empty() { "" } else { &self.params.json_pointer };
        let field = if pointer.is_empty() { Some(&body) } else { body.pointer(pointer) };

        let value = match field {
            Some(v) => json_to_value(v)?,
            None => {
                tracing::warn!(domain = "conf", pointer = %self.params.json_pointer, "http_poll pointer missed");
                return None;
            }
        };

        Some(Point::new(self.params.device_id.clone(), self.params.key.clone(), value, now_nanos()))
    }
}

fn json_to_value(v: &serde_json::Value) -> Option<Value> {
    match v {
        serde_json::Value::Number(n) if n.is_i64() => Some(Value::Int(n.as_i64()?)),
        serde_json::Value::Number(n) => Some(Value::Float(n.as_f64()?)),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::String(s) => Some(Value::Str(s.clone())),
        _ => None,
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

    #[test]
    fn extracts_nested_field_via_json_pointer() {
        let body = serde_json::json!({"sensors": {"temp": 21.5}});
        let field = body.pointer("/sensors/temp").unwrap();
        assert_eq!(json_to_value(field), Some(Value::Float(21.5)));
    }

    #[test]
    fn missing_pointer_path_yields_none() {
        let body = serde_json::json!({"sensors": {}});
        assert!(body.pointer("/sensors/temp").is_none());
    }

    #[test]
    fn json_to_value_converts_each_scalar_kind() {
        assert_eq!(json_to_value(&serde_json::json!(42)), Some(Value::Int(42)));
        assert_eq!(json_to_value(&serde_json::json!(1.5)), Some(Value::Float(1.5)));
        assert_eq!(json_to_value(&serde_json::json!(true)), Some(Value::Bool(true)));
        assert_eq!(json_to_value(&serde_json::json!("ok")), Some(Value::Str("ok".into())));
        assert_eq!(json_to_value(&serde_json::json!([1, 2])), None);
    }

    #[test]
    fn rejects_params_missing_required_fields() {
        let params = ParamMap::new();
        assert!(parse_params(&params).is_err());
    }
}
