pub mod alert;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod plugin_def;
pub mod runtime;
pub mod server;
pub mod types;
mod validate;

pub use alert::AlertConfig;
pub use error::{ConfigError, ConfigReason, ConfigResult};
pub use gateway::{BusConfig, BusPolicy, GatewayConfig, GatewayConfigRaw, RulesConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use metrics::{MetricsConfig, MetricsTopNConfig};
pub use plugin_def::{load_plugin_defs, PluginDef, PluginDefRaw, PluginScope, PluginTomlFile};
pub use runtime::RuntimeConfig;
pub use server::{ServerConfig, SidecarProcessConfig};
pub use types::{ByteSize, HumanDuration, ParamMap, StringOrArray, WildArray};
