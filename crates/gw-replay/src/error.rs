use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, thiserror::Error, From)]
pub enum ReplayReason {
    #[error("jetstream connect error: {0}")]
    Connect(String),
    #[error("jetstream publish error: {0}")]
    Publish(String),
    #[error("jetstream consume error: {0}")]
    Consume(String),
    #[error("point decode error: {0}")]
    Decode(String),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for ReplayReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Connect(_) => 6001,
            Self::Publish(_) => 6002,
            Self::Consume(_) => 6003,
            Self::Decode(_) => 6004,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type ReplayError = StructError<ReplayReason>;
pub type ReplayResult<T> = Result<T, ReplayError>;
