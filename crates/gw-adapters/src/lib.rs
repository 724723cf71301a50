pub mod http_poll;
pub mod mock;
pub mod modbus_rtu;
pub mod modbus_tcp;
pub mod mqtt_subscribe;

use std::sync::Arc;

use gw_plugin_api::AdapterRegistry;

/// Register every built-in adapter kind. Explicit, compile-time
/// registration only — see spec §9, no dynamic `.so` loading.
pub fn register_all(registry: &mut AdapterRegistry) {
    registry.register(Arc::new(mock::MockAdapterFactory));
    registry.register(Arc::new(modbus_tcp::ModbusTcpFactory));
    registry.register(Arc::new(modbus_rtu::ModbusRtuFactory));
    registry.register(Arc::new(http_poll::HttpPollFactory));
    registry.register(Arc::new(mqtt_subscribe::MqttSubscribeFactory));
}
