pub mod adapter;
pub mod error;
pub mod registry;
pub mod sink;
pub mod types;

pub use adapter::{AdapterBuildCtx, AdapterDef, AdapterFactory, AdapterHandle};
pub use error::{PluginError, PluginReason, PluginResult};
pub use registry::{AdapterRegistry, SinkRegistry};
pub use sink::{AsyncCtrl, AsyncPointSink, SinkBuildCtx, SinkDef, SinkFactory, SinkHandle};
pub use types::{HealthStatus, ParamMap, PluginMetrics};
