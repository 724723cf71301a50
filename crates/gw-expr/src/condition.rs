//! Condition tree (spec C7): simple comparisons, boolean composition, and
//! parsed expressions, evaluated against a [`FieldSource`].

use std::sync::OnceLock;

use regex::Regex;

use crate::ast::Expr;
use crate::error::{ExprReason, ExprResult};
use crate::eval::{self, EvalValue, FieldSource};
use crate::parser::parse_expr_str;
use orion_error::StructError;

/// Operators available to a `simple` condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

/// A field reference used by `simple` conditions: one of the Point's own
/// attributes, or `tags.<name>`.
#[derive(Debug, Clone, PartialEq)]
pub enum SimpleField {
    Attr(String),
    Tag(String),
}

impl SimpleField {
    pub fn parse(path: &str) -> Self {
        match path.strip_prefix("tags.") {
            Some(name) => SimpleField::Tag(name.to_string()),
            None => SimpleField::Attr(path.to_string()),
        }
    }

    fn resolve(&self, src: &dyn FieldSource) -> EvalValue {
        match self {
            SimpleField::Attr(name) => src.attr(name).unwrap_or(EvalValue::Absent),
            SimpleField::Tag(name) => src.tag(name).map(EvalValue::Str).unwrap_or(EvalValue::Absent),
        }
    }
}

/// A condition tree node. `Expression`/`Simple` cache their compiled form
/// behind a [`OnceLock`] so parsing/regex-compilation happens once per
/// rule-version, not once per evaluated Point.
#[derive(Debug, Clone)]
pub enum Condition {
    Simple {
        field: SimpleField,
        op: SimpleOp,
        value: ConditionValue,
        compiled_regex: OnceLock<Option<Regex>>,
    },
    Expression {
        source: String,
        ast: OnceLock<Result<Expr, String>>,
    },
    /// Lua conditions are rejected at rule-validation time (see
    /// DESIGN.md's Open Question decision); this variant only exists so
    /// the rule-file deserializer can recognize and reject it by name.
    Lua {
        source: String,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    Str(String),
    Number(f64),
    Bool(bool),
}

impl Condition {
    pub fn simple(field: &str, op: SimpleOp, value: ConditionValue) -> Self {
        Condition::Simple {
            field: SimpleField::parse(field),
            op,
            value,
            compiled_regex: OnceLock::new(),
        }
    }

    pub fn expression(source: impl Into<String>) -> Self {
        Condition::Expression {
            source: source.into(),
            ast: OnceLock::new(),
        }
    }

    /// Returns an error naming any `Lua` node found anywhere in the tree;
    /// called once at rule-load validation time.
    pub fn reject_lua(&self) -> Result<(), String> {
        match self {
            Condition::Lua { .. } => Err("lua conditions are not supported".to_string()),
            Condition::And(children) | Condition::Or(children) => {
                children.iter().try_for_each(Condition::reject_lua)
            }
            Condition::Not(inner) => inner.reject_lua(),
            Condition::Simple { .. } | Condition::Expression { .. } => Ok(()),
        }
    }

    /// Eagerly parses every `Expression` node in the tree, returning the
    /// first parse error found. Called once at rule-load time so a typo in
    /// an expression rejects the rule instead of silently never matching.
    pub fn validate_expressions(&self) -> Result<(), String> {
        match self {
            Condition::Expression { source, ast } => {
                let parsed = ast.get_or_init(|| parse_expr_str(source).map_err(|e| e.to_string()));
                parsed.as_ref().map(|_| ()).map_err(|e| e.clone())
            }
            Condition::And(children) | Condition::Or(children) => {
                children.iter().try_for_each(Condition::validate_expressions)
            }
            Condition::Not(inner) => inner.validate_expressions(),
            Condition::Simple { .. } | Condition::Lua { .. } => Ok(()),
        }
    }

    pub fn evaluate(&self, src: &dyn FieldSource) -> ExprResult<bool> {
        match self {
            Condition::Simple {
                field,
                op,
                value,
                compiled_regex,
            } => eval_simple(field, *op, value, compiled_regex, src),
            Condition::Expression { source, ast } => {
                let parsed = ast.get_or_init(|| parse_expr_str(source).map_err(|e| e.to_string()));
                let expr = parsed
                    .as_ref()
                    .map_err(|e| StructError::from(ExprReason::Eval(format!("expression {source:?} failed to parse: {e}"))))?;
                Ok(eval::eval(expr, src)?.is_truthy())
            }
            Condition::Lua { .. } => Err(StructError::from(ExprReason::Eval(
                "lua conditions are rejected at validation time".into(),
            ))),
            Condition::And(children) => {
                for c in children {
                    if !c.evaluate(src)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or(children) => {
                for c in children {
                    if c.evaluate(src)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(inner) => Ok(!inner.evaluate(src)?),
        }
    }
}

fn eval_simple(
    field: &SimpleField,
    op: SimpleOp,
    value: &ConditionValue,
    compiled_regex: &OnceLock<Option<Regex>>,
    src: &dyn FieldSource,
) -> ExprResult<bool> {
    let lhs = field.resolve(src);
    if matches!(lhs, EvalValue::Absent) {
        // Missing tag: every comparison (including `contains`) is false.
        return Ok(false);
    }

    match op {
        SimpleOp::Regex => {
            let pattern = match value {
                ConditionValue::Str(s) => s.as_str(),
                _ => return Err(StructError::from(ExprReason::Eval("regex requires a string pattern".into()))),
            };
            let re = compiled_regex
                .get_or_init(|| Regex::new(pattern).ok())
                .as_ref();
            let text = lhs_text(&lhs)?;
            Ok(re.is_some_and(|re| re.is_match(&text)))
        }
        SimpleOp::Contains | SimpleOp::StartsWith | SimpleOp::EndsWith => {
            let text = lhs_text(&lhs)?;
            let needle = match value {
                ConditionValue::Str(s) => s.clone(),
                ConditionValue::Number(n) => n.to_string(),
                ConditionValue::Bool(b) => b.to_string(),
            };
            Ok(match op {
                SimpleOp::Contains => text.contains(&needle),
                SimpleOp::StartsWith => text.starts_with(&needle),
                SimpleOp::EndsWith => text.ends_with(&needle),
                _ => unreachable!(),
            })
        }
        SimpleOp::Eq | SimpleOp::Ne => {
            let eq = values_match(&lhs, value);
            Ok(if op == SimpleOp::Eq { eq } else { !eq })
        }
        SimpleOp::Gt | SimpleOp::Gte | SimpleOp::Lt | SimpleOp::Lte => {
            let l = lhs
                .as_f64()
                .ok_or_else(|| StructError::from(ExprReason::Eval("ordered comparison on non-numeric field".into())))?;
            let r = match value {
                ConditionValue::Number(n) => *n,
                _ => return Err(StructError::from(ExprReason::Eval("ordered comparison against non-numeric literal".into()))),
            };
            Ok(match op {
                SimpleOp::Gt => l > r,
                SimpleOp::Gte => l >= r,
                SimpleOp::Lt => l < r,
                SimpleOp::Lte => l <= r,
                _ => unreachable!(),
            })
        }
    }
}

fn lhs_text(v: &EvalValue) -> ExprResult<String> {
    match v {
        EvalValue::Str(s) => Ok(s.clone()),
        EvalValue::Int(i) => Ok(i.to_string()),
        EvalValue::Float(f) => Ok(f.to_string()),
        EvalValue::Bool(b) => Ok(b.to_string()),
        EvalValue::Absent => Ok(String::new()),
    }
}

fn values_match(lhs: &EvalValue, rhs: &ConditionValue) -> bool {
    match (lhs, rhs) {
        (EvalValue::Str(s), ConditionValue::Str(r)) => s == r,
        (EvalValue::Bool(b), ConditionValue::Bool(r)) => b == r,
        (_, ConditionValue::Number(r)) => lhs.as_f64().is_some_and(|l| l == *r),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeSource(HashMap<&'static str, EvalValue>);
    impl FieldSource for FakeSource {
        fn attr(&self, name: &str) -> Option<EvalValue> {
            self.0.get(name).cloned()
        }
        fn tag(&self, _name: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn simple_eq_matches() {
        let mut m = HashMap::new();
        m.insert("key", EvalValue::Str("temp".into()));
        let src = FakeSource(m);
        let c = Condition::simple("key", SimpleOp::Eq, ConditionValue::Str("temp".into()));
        assert!(c.evaluate(&src).unwrap());
    }

    #[test]
    fn and_short_circuits() {
        let mut m = HashMap::new();
        m.insert("value", EvalValue::Float(10.0));
        let src = FakeSource(m);
        let c = Condition::And(vec![
            Condition::simple("value", SimpleOp::Gt, ConditionValue::Number(100.0)),
            Condition::Expression {
                source: "1/0".into(),
                ast: OnceLock::new(),
            },
        ]);
        // short-circuits on the first false without evaluating the failing expr
        assert!(!c.evaluate(&src).unwrap());
    }

    #[test]
    fn rejects_lua() {
        let c = Condition::And(vec![Condition::Lua {
            source: "return true".into(),
        }]);
        assert!(c.reject_lua().is_err());
    }
}
