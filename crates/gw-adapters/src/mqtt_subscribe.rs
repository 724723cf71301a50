//! MQTT subscribe adapter (spec C3): subscribes to one or more topic
//! filters and turns incoming payloads into [`Point`]s. A payload that is a
//! JSON object with `device_id`/`key`/`value` fields is taken as-is;
//! otherwise the topic is used as the point key and the raw payload as its
//! value.

use async_trait::async_trait;
use gw_core::{Point, Value};
use gw_plugin_api::{AdapterBuildCtx, AdapterDef, AdapterFactory, AdapterHandle, ParamMap, PluginReason, PluginResult};
use orion_error::StructError;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
struct MqttSubscribeParams {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    client_id: String,
    topics: Vec<String>,
    #[serde(default = "default_device_id")]
    device_id: String,
    #[serde(default = "default_keep_alive_secs")]
    keep_alive_secs: u64,
}

fn default_port() -> u16 {
    1883
}
fn default_device_id() -> String {
    "mqtt".to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}

pub struct MqttSubscribeFactory;

#[async_trait]
impl AdapterFactory for MqttSubscribeFactory {
    fn kind(&self) -> &'static str {
        "mqtt_subscribe"
    }

    fn adapter_def(&self) -> AdapterDef {
        AdapterDef { id: "mqtt_subscribe".into(), kind: "mqtt_subscribe".into(), default_params: ParamMap::new() }
    }

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()> {
        parse_params(params).map(|_| ())
    }

    async fn build(&self, ctx: &AdapterBuildCtx) -> PluginResult<Box<dyn AdapterHandle>> {
        let params = parse_params(&ctx.params)?;
        Ok(Box::new(MqttSubscribeHandle { params }))
    }
}

fn parse_params(params: &ParamMap) -> PluginResult<MqttSubscribeParams> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| StructError::from(PluginReason::Adapter(format!("invalid mqtt_subscribe params: {e}"))))
}

struct MqttSubscribeHandle {
    params: MqttSubscribeParams,
}

#[derive(Debug, Deserialize)]
struct PointPayload {
    device_id: Option<String>,
    key: Option<String>,
    value: serde_json::Value,
}

#[async_trait]
impl AdapterHandle for MqttSubscribeHandle {
    async fn run(&mut self, tx: mpsc::Sender<Point>, cancel: CancellationToken) -> PluginResult<()> {
        let mut options = MqttOptions::new(&self.params.client_id, &self.params.host, self.params.port);
        options.set_keep_alive(std::time::Duration::from_secs(self.params.keep_alive_secs));
        let (client, mut eventloop) = AsyncClient::new(options, 64);

        for topic in &self.params.topics {
            if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                tracing::warn!(domain = "conn", topic = %topic, error = %e, "mqtt subscribe failed");
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            // rumqttc sessions are non-persistent by default, so a
                            // reconnect after a broker-side disconnect drops every
                            // prior subscription unless we re-issue them here.
                            for topic in &self.params.topics {
                                if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                                    tracing::warn!(domain = "conn", topic = %topic, error = %e, "mqtt re-subscribe failed");
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            if let Some(point) = self.decode(&publish.topic, &publish.payload) {
                                if tx.send(point).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(domain = "conn", error = %e, "mqtt eventloop error, reconnecting");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }
}

impl MqttSubscribeHandle {
    fn decode(&self, topic: &str, payload: &[u8]) -> Option<Point> {
        let now = now_nanos();

        if let Ok(parsed) = serde_json::from_slice::<PointPayload>(payload) {
            let value = json_to_value(&parsed.value)?;
            return Some(Point::new(
                parsed.device_id.unwrap_or_else(|| self.params.device_id.clone()),
                parsed.key.unwrap_or_else(|| topic.to_string()),
                value,
                now,
            ));
        }

        let text = std::str::from_utf8(payload).ok()?;
        let value = text
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or_else(|_| Value::Str(text.to_string()));
        Some(Point::new(self.params.device_id.clone(), topic.to_string(), value, now))
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
