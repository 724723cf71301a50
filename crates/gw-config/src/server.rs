use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// Control-plane listen address for out-of-process ISP sidecars to dial
/// back into, plus the child-process supervision settings for the sidecar
/// binary itself (spec C4). Absent when no sidecar adapters are in use.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `"127.0.0.1:9800"`.
    pub listen: String,
    /// Sidecar child process to spawn and supervise. `None` means the
    /// listener accepts connections from an externally-managed process.
    #[serde(default)]
    pub process: Option<SidecarProcessConfig>,
    /// How long to wait between HEARTBEAT frames before marking the
    /// sidecar unhealthy.
    #[serde(default = "default_isp_timeout")]
    pub isp_timeout: HumanDuration,
    /// Restart the child process automatically once it exits or goes
    /// unhealthy.
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,
    /// Upper bound on consecutive restart attempts before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_isp_timeout() -> HumanDuration {
    "30s".parse().expect("hardcoded duration must parse")
}
fn default_auto_restart() -> bool {
    true
}
fn default_max_retries() -> u32 {
    5
}

/// Command line used to spawn the sidecar binary via `tokio::process::Command`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SidecarProcessConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}
