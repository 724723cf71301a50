use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, thiserror::Error, From)]
pub enum ConfigReason {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("rule load error: {0}")]
    RuleLoadError(String),
    #[error("version conflict: {0}")]
    VersionConflict(String),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for ConfigReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::ConfigInvalid(_) => 1001,
            Self::RuleLoadError(_) => 1002,
            Self::VersionConflict(_) => 1003,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type ConfigError = StructError<ConfigReason>;
pub type ConfigResult<T> = Result<T, ConfigError>;
