//! InfluxDB sink (spec C10): writes points as InfluxDB line protocol via
//! the `/api/v2/write` HTTP API. `sink_points` batches everything into a
//! single request body instead of the default per-item loop.

use async_trait::async_trait;
use gw_core::{Point, Value};
use gw_plugin_api::{
    AsyncCtrl, AsyncPointSink, ParamMap, PluginReason, PluginResult, SinkBuildCtx, SinkDef, SinkFactory, SinkHandle,
};
use orion_error::StructError;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct InfluxParams {
    url: String,
    org: String,
    bucket: String,
    token: String,
}

pub struct InfluxSinkFactory;

#[async_trait]
impl SinkFactory for InfluxSinkFactory {
    fn kind(&self) -> &'static str {
        "influxdb"
    }

    fn sink_def(&self) -> SinkDef {
        SinkDef { id: "influxdb".into(), kind: "influxdb".into(), default_params: ParamMap::new() }
    }

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()> {
        parse_params(params).map(|_| ())
    }

    async fn build(&self, ctx: &SinkBuildCtx) -> PluginResult<SinkHandle> {
        let params = parse_params(&ctx.params)?;
        let client = reqwest::Client::new();
        Ok(Box::new(InfluxSink { params, client }))
    }
}

fn parse_params(params: &ParamMap) -> PluginResult<InfluxParams> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| StructError::from(PluginReason::Sink(format!("invalid influxdb params: {e}"))))
}

struct InfluxSink {
    params: InfluxParams,
    client: reqwest::Client,
}

#[async_trait]
impl AsyncCtrl for InfluxSink {
    async fn stop(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AsyncPointSink for InfluxSink {
    async fn sink_point(&mut self, point: &Point) -> PluginResult<()> {
        self.sink_points(std::slice::from_ref(point)).await
    }

    async fn sink_points(&mut self, points: &[Point]) -> PluginResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = points.iter().map(to_line_protocol).collect::<Vec<_>>().join("\n");
        let url = format!("{}/api/v2/write?org={}&bucket={}&precision=ns", self.params.url, self.params.org, self.params.bucket);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.params.token))
            .body(body)
            .send()
            .await
            .map_err(|e| StructError::from(PluginReason::Sink(format!("influx write: {e}"))))?;

        if !response.status().is_success() {
            return Err(StructError::from(PluginReason::Sink(format!(
                "influx write returned {}",
                response.status()
            ))));
        }
        Ok(())
    }
}

fn to_line_protocol(point: &Point) -> String {
    let measurement = escape_measurement(&point.key);
    let mut line = measurement;

    line.push_str(",device_id=");
    line.push_str(&escape_tag(&point.device_id));
    for (name, value) in point.tags.snapshot() {
        line.push(',');
        line.push_str(&escape_tag(&name));
        line.push('=');
        line.push_str(&escape_tag(&value));
    }

    line.push(' ');
    line.push_str(&field_literal(&point.value));
    line.push_str(",quality=");
    line.push_str(&point.quality.to_string());
    line.push('i');

    line.push(' ');
    line.push_str(&point.timestamp.to_string());
    line
}

fn field_literal(value: &Value) -> String {
    match value {
        Value::Int(n) => format!("value={n}i"),
        Value::Float(f) => format!("value={f}"),
        Value::Bool(b) => format!("value={b}"),
        Value::Str(s) => format!("value=\"{}\"", s.replace('"', "\\\"")),
        other => format!("value=\"{}\"", escape_field_str(&serde_json::to_string(other).unwrap_or_default())),
    }
}

fn escape_field_str(s: &str) -> String {
    s.replace('"', "\\\"")
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ").replace('=', "\\=")
}
