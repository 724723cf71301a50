use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, thiserror::Error, From)]
pub enum PluginReason {
    #[error("adapter error: {0}")]
    Adapter(String),
    #[error("sink error: {0}")]
    Sink(String),
    #[error("plugin build error: {0}")]
    Build(String),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for PluginReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Adapter(_) => 3001,
            Self::Sink(_) => 3002,
            Self::Build(_) => 3003,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type PluginError = StructError<PluginReason>;
pub type PluginResult<T> = Result<T, PluginError>;
