//! MQTT publish sink (spec C10): publishes each point as a JSON payload to
//! a configurable topic template.

use async_trait::async_trait;
use gw_core::Point;
use gw_plugin_api::{
    AsyncCtrl, AsyncPointSink, ParamMap, PluginReason, PluginResult, SinkBuildCtx, SinkDef, SinkFactory, SinkHandle,
};
use orion_error::StructError;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct MqttPublishParams {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    client_id: String,
    #[serde(default = "default_topic_template")]
    topic_template: String,
    #[serde(default = "default_qos")]
    qos: u8,
}

fn default_port() -> u16 {
    1883
}
fn default_topic_template() -> String {
    "gw/{device_id}/{key}".to_string()
}
fn default_qos() -> u8 {
    1
}

pub struct MqttPublishFactory;

#[async_trait]
impl SinkFactory for MqttPublishFactory {
    fn kind(&self) -> &'static str {
        "mqtt_publish"
    }

    fn sink_def(&self) -> SinkDef {
        SinkDef { id: "mqtt_publish".into(), kind: "mqtt_publish".into(), default_params: ParamMap::new() }
    }

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()> {
        parse_params(params).map(|_| ())
    }

    async fn build(&self, ctx: &SinkBuildCtx) -> PluginResult<SinkHandle> {
        let params = parse_params(&ctx.params)?;
        let mut options = MqttOptions::new(&params.client_id, &params.host, params.port);
        options.set_keep_alive(std::time::Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(options, 64);

        // rumqttc only makes progress (reconnects, sends acks) while its
        // eventloop is being polled; drive it on a background task for the
        // lifetime of this sink instance.
        tokio::spawn(async move {
            loop {
                if let Err(e) = eventloop.poll().await {
                    tracing::warn!(domain = "conn", error = %e, "mqtt eventloop error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        });

        Ok(Box::new(MqttPublishSink { params, client }))
    }
}

fn parse_params(params: &ParamMap) -> PluginResult<MqttPublishParams> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| StructError::from(PluginReason::Sink(format!("invalid mqtt_publish params: {e}"))))
}

struct MqttPublishSink {
    params: MqttPublishParams,
    client: AsyncClient,
}

impl MqttPublishSink {
    fn topic_for(&self, point: &Point) -> String {
        self.params
            .topic_template
            .replace("{device_id}", &point.device_id)
            .replace("{key}", &point.key)
    }

    fn qos(&self) -> QoS {
        match self.params.qos {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        }
    }
}

#[async_trait]
impl AsyncCtrl for MqttPublishSink {
    async fn stop(&mut self) -> PluginResult<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| StructError::from(PluginReason::Sink(format!("mqtt disconnect: {e}"))))
    }
}

#[async_trait]
impl AsyncPointSink for MqttPublishSink {
    async fn sink_point(&mut self, point: &Point) -> PluginResult<()> {
        let topic = self.topic_for(point);
        let payload = serde_json::to_vec(point)
            .map_err(|e| StructError::from(PluginReason::Sink(format!("serialize: {e}"))))?;
        let qos = self.qos();
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| StructError::from(PluginReason::Sink(format!("publish: {e}"))))?;
        Ok(())
    }
}
