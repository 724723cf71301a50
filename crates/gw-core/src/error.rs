use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, thiserror::Error, From)]
pub enum CoreReason {
    #[error("rule invalid: {0}")]
    RuleInvalid(String),
    #[error("rule version conflict: {0}")]
    VersionConflict(String),
    #[error("condition evaluation error: {0}")]
    ConditionEval(String),
    #[error("action failed: {0}")]
    ActionFailed(String),
    #[error("aggregation error: {0}")]
    Aggregate(String),
    #[error("alert sink error: {0}")]
    AlertSink(String),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::RuleInvalid(_) => 4001,
            Self::VersionConflict(_) => 4002,
            Self::ConditionEval(_) => 4003,
            Self::ActionFailed(_) => 4004,
            Self::Aggregate(_) => 4005,
            Self::AlertSink(_) => 4006,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
