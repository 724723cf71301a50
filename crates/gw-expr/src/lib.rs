pub mod ast;
pub mod condition;
pub mod error;
pub mod eval;
mod parse_utils;
mod parser;

pub use ast::{BinOp, CmpOp, Expr, FieldRef};
pub use condition::{Condition, ConditionValue, SimpleField, SimpleOp};
pub use error::{ExprError, ExprReason, ExprResult};
pub use eval::{eval as eval_expr, EvalValue, FieldSource};
pub use parser::parse_expr_str;
