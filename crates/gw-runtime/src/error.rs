use derive_more::From;
use gw_core::error::CoreReason;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum RuntimeReason {
    #[error("bootstrap error: {0}")]
    Bootstrap(String),
    #[error("shutdown error: {0}")]
    Shutdown(String),
    #[error("adapter error: {0}")]
    Adapter(String),
    #[error("sidecar error: {0}")]
    Sidecar(String),
    #[error("bus admission error: {0}")]
    BusAdmission(String),
    #[error("sink error: {0}")]
    Sink(String),
    #[error("{0}")]
    Core(CoreReason),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for RuntimeReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Bootstrap(_) => 5001,
            Self::Shutdown(_) => 5002,
            Self::Adapter(_) => 5003,
            Self::Sidecar(_) => 5004,
            Self::BusAdmission(_) => 5005,
            Self::Sink(_) => 5006,
            Self::Core(c) => c.error_code(),
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type RuntimeError = StructError<RuntimeReason>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
