pub mod console;
pub mod influxdb;
pub mod jetstream;
pub mod mqtt_publish;
pub mod redis;
pub mod websocket;

use std::sync::Arc;

use gw_plugin_api::SinkRegistry;

/// Register every built-in sink kind. Explicit, compile-time
/// registration only — see spec §9, no dynamic `.so` loading.
pub fn register_all(registry: &mut SinkRegistry) {
    registry.register(Arc::new(console::ConsoleSinkFactory));
    registry.register(Arc::new(mqtt_publish::MqttPublishFactory));
    registry.register(Arc::new(influxdb::InfluxSinkFactory));
    registry.register(Arc::new(redis::RedisSinkFactory));
    registry.register(Arc::new(websocket::WebSocketSinkFactory));
    registry.register(Arc::new(jetstream::JetStreamSinkFactory));
}
