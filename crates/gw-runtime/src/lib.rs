#[macro_use]
mod log_macros;

pub mod error;
pub mod lifecycle;
pub mod tracing_init;

pub mod bus;
pub mod metrics;
pub mod sidecar;
pub mod sink_task;
pub(crate) mod adapter_task;
pub(crate) mod alert_task;
pub(crate) mod evictor_task;
pub(crate) mod rule_task;
