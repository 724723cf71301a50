//! WebSocket sink (spec C10): pushes each point as a JSON text frame to a
//! connected client, reconnecting the outbound link with backoff on drop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::SinkExt;
use gw_core::Point;
use gw_plugin_api::{
    AsyncCtrl, AsyncPointSink, ParamMap, PluginReason, PluginResult, SinkBuildCtx, SinkDef, SinkFactory, SinkHandle,
};
use orion_error::StructError;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

const RECONNECT_MIN: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
struct WebSocketParams {
    url: String,
}

pub struct WebSocketSinkFactory;

#[async_trait]
impl SinkFactory for WebSocketSinkFactory {
    fn kind(&self) -> &'static str {
        "websocket"
    }

    fn sink_def(&self) -> SinkDef {
        SinkDef { id: "websocket".into(), kind: "websocket".into(), default_params: ParamMap::new() }
    }

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()> {
        parse_params(params).map(|_| ())
    }

    async fn build(&self, ctx: &SinkBuildCtx) -> PluginResult<SinkHandle> {
        let params = parse_params(&ctx.params)?;
        Ok(Box::new(WebSocketSink { params, conn: Arc::new(Mutex::new(None)) }))
    }
}

fn parse_params(params: &ParamMap) -> PluginResult<WebSocketParams> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| StructError::from(PluginReason::Sink(format!("invalid websocket params: {e}"))))
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct WebSocketSink {
    params: WebSocketParams,
    conn: Arc<Mutex<Option<WsStream>>>,
}

impl WebSocketSink {
    async fn ensure_connected(&self) -> PluginResult<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut delay = RECONNECT_MIN;
        loop {
            match tokio_tungstenite::connect_async(&self.params.url).await {
                Ok((stream, _response)) => {
                    *guard = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(domain = "conn", error = %e, delay_ms = delay.as_millis() as u64, "websocket sink reconnect failed");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RECONNECT_MAX);
                }
            }
        }
    }
}

#[async_trait]
impl AsyncCtrl for WebSocketSink {
    async fn stop(&mut self) -> PluginResult<()> {
        if let Some(mut stream) = self.conn.lock().await.take() {
            let _ = stream.close(None).await;
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncPointSink for WebSocketSink {
    async fn sink_point(&mut self, point: &Point) -> PluginResult<()> {
        self.ensure_connected().await?;
        let payload = serde_json::to_string(point)
            .map_err(|e| StructError::from(PluginReason::Sink(format!("serialize: {e}"))))?;

        let mut guard = self.conn.lock().await;
        let result = match guard.as_mut() {
            Some(stream) => stream.send(Message::Text(payload.into())).await,
            None => return Err(StructError::from(PluginReason::Sink("websocket not connected".to_string()))),
        };

        if let Err(e) = result {
            tracing::warn!(domain = "conn", error = %e, "websocket send failed, dropping connection for reconnect");
            *guard = None;
            return Err(StructError::from(PluginReason::Sink(format!("websocket send: {e}"))));
        }
        Ok(())
    }
}
