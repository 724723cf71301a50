//! Modbus RTU adapter (spec C3): same register-polling shape as
//! [`crate::modbus_tcp`], dialed over a serial line instead of TCP.

use std::time::Duration;

use async_trait::async_trait;
use gw_core::{Point, Value};
use gw_plugin_api::{AdapterBuildCtx, AdapterDef, AdapterFactory, AdapterHandle, ParamMap, PluginReason, PluginResult};
use orion_error::StructError;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_modbus::client::{rtu, Reader};
use tokio_modbus::slave::Slave;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum RegisterType {
    Holding,
    Input,
}

/// Word order for multi-register quantities (spec §4.2: "Float/int
/// parsing honors a configurable byte order").
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ByteOrder {
    BigEndian,
    LittleEndian,
}

fn default_byte_order() -> ByteOrder {
    ByteOrder::BigEndian
}

/// How many 16-bit registers a value occupies.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Width {
    Word16,
    Word32,
}

fn default_width() -> Width {
    Width::Word16
}

#[derive(Debug, Clone, Deserialize)]
struct RegisterMap {
    address: u16,
    device_id: String,
    key: String,
    #[serde(default = "default_register_type")]
    register_type: RegisterType,
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default = "default_byte_order")]
    byte_order: ByteOrder,
    #[serde(default = "default_width")]
    width: Width,
}

fn default_register_type() -> RegisterType {
    RegisterType::Holding
}
fn default_scale() -> f64 {
    1.0
}

/// Decodes 1 or 2 16-bit Modbus registers into an integer per `byte_order`
/// and `width` (spec §4.2's 32-bit-quantity-occupies-two-registers rule).
fn decode_words(words: &[u16], byte_order: ByteOrder, width: Width) -> Option<u32> {
    match width {
        Width::Word16 => words.first().map(|&w| w as u32),
        Width::Word32 => {
            let (&hi, &lo) = match (words.first(), words.get(1)) {
                (Some(a), Some(b)) => (a, b),
                _ => return None,
            };
            Some(match byte_order {
                ByteOrder::BigEndian => ((hi as u32) << 16) | (lo as u32),
                ByteOrder::LittleEndian => ((lo as u32) << 16) | (hi as u32),
            })
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ModbusRtuParams {
    device: String,
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
    #[serde(default = "default_unit_id")]
    unit_id: u8,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
    registers: Vec<RegisterMap>,
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_unit_id() -> u8 {
    1
}
fn default_poll_interval_ms() -> u64 {
    1000
}

pub struct ModbusRtuFactory;

#[async_trait]
impl AdapterFactory for ModbusRtuFactory {
    fn kind(&self) -> &'static str {
        "modbus_rtu"
    }

    fn adapter_def(&self) -> AdapterDef {
        AdapterDef { id: "modbus_rtu".into(), kind: "modbus_rtu".into(), default_params: ParamMap::new() }
    }

    fn validate_params(&self, params: &ParamMap) -> PluginResult<()> {
        parse_params(params).map(|_| ())
    }

    async fn build(&self, ctx: &AdapterBuildCtx) -> PluginResult<Box<dyn AdapterHandle>> {
        let params = parse_params(&ctx.params)?;
        Ok(Box::new(ModbusRtuHandle { params }))
    }
}

fn parse_params(params: &ParamMap) -> PluginResult<ModbusRtuParams> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| StructError::from(PluginReason::Adapter(format!("invalid modbus_rtu params: {e}"))))
}

struct ModbusRtuHandle {
    params: ModbusRtuParams,
}

#[async_trait]
impl AdapterHandle for ModbusRtuHandle {
    async fn run(&mut self, tx: mpsc::Sender<Point>, cancel: CancellationToken) -> PluginResult<()> {
        let mut backoff = Duration::from_millis(500);
        const MAX_BACKOFF: Duration = Duration::from_secs(30);

        loop {
            let port = tokio_serial::new(&self.params.device, self.params.baud_rate).open_native_async();
            let serial = match port {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(domain = "conn", error = %e, device = %self.params.device, "failed to open serial port");
                    if tokio::time::timeout(backoff, cancel.cancelled()).await.is_ok() {
                        return Ok(());
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };
            let mut ctx = rtu::attach_slave(serial, Slave(self.params.unit_id));
            backoff = Duration::from_millis(500);

            let mut tick = tokio::time::interval(Duration::from_millis(self.params.poll_interval_ms));
            'poll: loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tick.tick() => {
                        for reg in &self.params.registers {
                            let count = match reg.width {
                                Width::Word16 => 1,
                                Width::Word32 => 2,
                            };
                            let read = match reg.register_type {
                                RegisterType::Holding => ctx.read_holding_registers(reg.address, count).await,
                                RegisterType::Input => ctx.read_input_registers(reg.address, count).await,
                            };
                            let words = match read {
                                Ok(Ok(words)) => words,
                                _ => {
                                    tracing::warn!(domain = "conn", address = reg.address, "modbus rtu read failed, reopening port");
                                    break 'poll;
                                }
                            };
                            let Some(raw) = decode_words(&words, reg.byte_order, reg.width) else { continue };
                            let scaled = raw as f64 * reg.scale;
                            let point = Point::new(reg.device_id.clone(), reg.key.clone(), Value::Float(scaled), now_nanos());
                            if tx.send(point).await.is_err() {
                                return Ok(());
                            }
                        }
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
