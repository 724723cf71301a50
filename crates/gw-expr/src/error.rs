use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum ExprReason {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("evaluation error: {0}")]
    Eval(String),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for ExprReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Parse(_) => 2001,
            Self::Eval(_) => 2002,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type ExprError = StructError<ExprReason>;
pub type ExprResult<T> = Result<T, ExprError>;
