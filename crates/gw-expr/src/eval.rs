//! Expression evaluation against a field source (a Point, in `gw-core`).

use orion_error::StructError;
use regex::Regex;

use crate::ast::{BinOp, Expr, FieldRef};
use crate::error::{ExprReason, ExprResult};

/// Runtime value produced by evaluating an [`Expr`].
///
/// `Absent` is the explicit sentinel for a missing `tags.<name>` lookup
/// (spec §4.5): comparisons against it are always `false`.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Absent,
}

impl EvalValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EvalValue::Int(i) => Some(*i as f64),
            EvalValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EvalValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            EvalValue::Bool(b) => *b,
            EvalValue::Int(i) => *i != 0,
            EvalValue::Float(f) => *f != 0.0,
            EvalValue::Str(s) => !s.is_empty(),
            EvalValue::Absent => false,
        }
    }
}

/// Resolves Point attributes and `tags.<name>` lookups for the evaluator.
/// Implemented by `gw-core::Point` so this crate never depends on it.
pub trait FieldSource {
    /// One of `device_id`, `key`, `value`, `type`, `timestamp`.
    fn attr(&self, name: &str) -> Option<EvalValue>;
    /// A tag lookup; `None` means absent.
    fn tag(&self, name: &str) -> Option<String>;
}

fn eval_err(msg: impl Into<String>) -> StructError<ExprReason> {
    StructError::from(ExprReason::Eval(msg.into()))
}

/// Evaluate `expr` against `src`, never suspending on I/O (spec §5).
pub fn eval(expr: &Expr, src: &dyn FieldSource) -> ExprResult<EvalValue> {
    match expr {
        Expr::Number(n) => Ok(numeric_value(*n)),
        Expr::StringLit(s) => Ok(EvalValue::Str(s.clone())),
        Expr::Bool(b) => Ok(EvalValue::Bool(*b)),
        Expr::Field(field_ref) => Ok(resolve_field(field_ref, src)),
        Expr::Neg(inner) => {
            let v = eval(inner, src)?;
            let n = v
                .as_f64()
                .ok_or_else(|| eval_err("cannot negate non-numeric value"))?;
            Ok(numeric_value(-n))
        }
        Expr::BinOp { op, left, right } => eval_binop(*op, left, right, src),
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let v = eval(expr, src)?;
            let mut found = false;
            for item in list {
                let iv = eval(item, src)?;
                if values_equal(&v, &iv) {
                    found = true;
                    break;
                }
            }
            Ok(EvalValue::Bool(found != *negated))
        }
        Expr::IfThenElse {
            cond,
            then_expr,
            else_expr,
        } => {
            let c = eval(cond, src)?;
            if c.is_truthy() {
                eval(then_expr, src)
            } else {
                eval(else_expr, src)
            }
        }
        Expr::FuncCall {
            qualifier: _,
            name,
            args,
        } => eval_func(name, args, src),
    }
}

fn numeric_value(n: f64) -> EvalValue {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        EvalValue::Int(n as i64)
    } else {
        EvalValue::Float(n)
    }
}

fn resolve_field(field_ref: &FieldRef, src: &dyn FieldSource) -> EvalValue {
    match field_ref {
        FieldRef::Simple(name) => src.attr(name).unwrap_or(EvalValue::Absent),
        FieldRef::Qualified(qualifier, name) | FieldRef::Bracketed(qualifier, name) => {
            if qualifier == "tags" {
                src.tag(name).map(EvalValue::Str).unwrap_or(EvalValue::Absent)
            } else {
                EvalValue::Absent
            }
        }
    }
}

/// Promotes int to float whenever either operand is a float; strings are
/// never coerced to numeric (Open Question decision, see DESIGN.md).
fn eval_binop(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    src: &dyn FieldSource,
) -> ExprResult<EvalValue> {
    match op {
        BinOp::And => {
            let l = eval(left, src)?;
            if !l.is_truthy() {
                return Ok(EvalValue::Bool(false));
            }
            Ok(EvalValue::Bool(eval(right, src)?.is_truthy()))
        }
        BinOp::Or => {
            let l = eval(left, src)?;
            if l.is_truthy() {
                return Ok(EvalValue::Bool(true));
            }
            Ok(EvalValue::Bool(eval(right, src)?.is_truthy()))
        }
        BinOp::Eq | BinOp::Ne => {
            let l = eval(left, src)?;
            let r = eval(right, src)?;
            let eq = values_equal(&l, &r);
            Ok(EvalValue::Bool(if op == BinOp::Eq { eq } else { !eq }))
        }
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let l = eval(left, src)?;
            let r = eval(right, src)?;
            if matches!(l, EvalValue::Absent) || matches!(r, EvalValue::Absent) {
                return Ok(EvalValue::Bool(false));
            }
            let (lf, rf) = match (l.as_f64(), r.as_f64()) {
                (Some(lf), Some(rf)) => (lf, rf),
                _ => match (l.as_str(), r.as_str()) {
                    (Some(ls), Some(rs)) => {
                        let c = ls.cmp(rs);
                        let b = match op {
                            BinOp::Lt => c.is_lt(),
                            BinOp::Gt => c.is_gt(),
                            BinOp::Le => c.is_le(),
                            BinOp::Ge => c.is_ge(),
                            _ => unreachable!(),
                        };
                        return Ok(EvalValue::Bool(b));
                    }
                    _ => return Err(eval_err("ordered comparison on incompatible types")),
                },
            };
            let b = match op {
                BinOp::Lt => lf < rf,
                BinOp::Gt => lf > rf,
                BinOp::Le => lf <= rf,
                BinOp::Ge => lf >= rf,
                _ => unreachable!(),
            };
            Ok(EvalValue::Bool(b))
        }
        BinOp::Add => {
            let l = eval(left, src)?;
            let r = eval(right, src)?;
            if let (Some(ls), Some(rs)) = (string_operand(&l), string_operand(&r)) {
                if matches!(l, EvalValue::Str(_)) || matches!(r, EvalValue::Str(_)) {
                    return Ok(EvalValue::Str(format!("{ls}{rs}")));
                }
            }
            arith(l, r, src, |a, b| Ok(a + b))
        }
        BinOp::Sub => {
            let l = eval(left, src)?;
            let r = eval(right, src)?;
            arith(l, r, src, |a, b| Ok(a - b))
        }
        BinOp::Mul => {
            let l = eval(left, src)?;
            let r = eval(right, src)?;
            arith(l, r, src, |a, b| Ok(a * b))
        }
        BinOp::Div => {
            let l = eval(left, src)?;
            let r = eval(right, src)?;
            arith(l, r, src, |a, b| {
                if b == 0.0 {
                    Err(eval_err("division by zero"))
                } else {
                    Ok(a / b)
                }
            })
        }
        BinOp::Mod => {
            let l = eval(left, src)?;
            let r = eval(right, src)?;
            arith(l, r, src, |a, b| {
                if b == 0.0 {
                    Err(eval_err("modulo by zero"))
                } else {
                    Ok(a % b)
                }
            })
        }
    }
}

fn string_operand(v: &EvalValue) -> Option<String> {
    match v {
        EvalValue::Str(s) => Some(s.clone()),
        EvalValue::Int(i) => Some(i.to_string()),
        EvalValue::Float(f) => Some(f.to_string()),
        EvalValue::Bool(b) => Some(b.to_string()),
        EvalValue::Absent => None,
    }
}

fn arith(
    l: EvalValue,
    r: EvalValue,
    _src: &dyn FieldSource,
    f: impl Fn(f64, f64) -> ExprResult<f64>,
) -> ExprResult<EvalValue> {
    let lf = l.as_f64().ok_or_else(|| eval_err("non-numeric operand"))?;
    let rf = r.as_f64().ok_or_else(|| eval_err("non-numeric operand"))?;
    Ok(numeric_value(f(lf, rf)?))
}

fn values_equal(a: &EvalValue, b: &EvalValue) -> bool {
    if matches!(a, EvalValue::Absent) || matches!(b, EvalValue::Absent) {
        return false;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(af), Some(bf)) => af == bf,
        _ => match (a, b) {
            (EvalValue::Str(x), EvalValue::Str(y)) => x == y,
            (EvalValue::Bool(x), EvalValue::Bool(y)) => x == y,
            _ => false,
        },
    }
}

// ---------------------------------------------------------------------------
// Built-in function catalog (spec §4.5)
// ---------------------------------------------------------------------------

fn eval_func(name: &str, args: &[Expr], src: &dyn FieldSource) -> ExprResult<EvalValue> {
    let argv = |i: usize| -> ExprResult<EvalValue> {
        args.get(i)
            .ok_or_else(|| eval_err(format!("{name}: missing argument {i}")))
            .and_then(|e| eval(e, src))
    };
    let num = |v: &EvalValue| v.as_f64().ok_or_else(|| eval_err(format!("{name}: expected number")));
    let text = |v: &EvalValue| -> ExprResult<String> {
        string_operand(v).ok_or_else(|| eval_err(format!("{name}: expected string")))
    };

    match name {
        "abs" => Ok(numeric_value(num(&argv(0)?)?.abs())),
        "sqrt" => {
            let n = num(&argv(0)?)?;
            if n < 0.0 {
                return Err(eval_err("sqrt of negative number"));
            }
            Ok(numeric_value(n.sqrt()))
        }
        "pow" => Ok(numeric_value(num(&argv(0)?)?.powf(num(&argv(1)?)?))),
        "floor" => Ok(numeric_value(num(&argv(0)?)?.floor())),
        "ceil" => Ok(numeric_value(num(&argv(0)?)?.ceil())),
        "max" => Ok(numeric_value(num(&argv(0)?)?.max(num(&argv(1)?)?))),
        "min" => Ok(numeric_value(num(&argv(0)?)?.min(num(&argv(1)?)?))),
        "len" => Ok(EvalValue::Int(text(&argv(0)?)?.chars().count() as i64)),
        "upper" => Ok(EvalValue::Str(text(&argv(0)?)?.to_uppercase())),
        "lower" => Ok(EvalValue::Str(text(&argv(0)?)?.to_lowercase())),
        "contains" => {
            let hay = text(&argv(0)?)?;
            let needle = text(&argv(1)?)?;
            Ok(EvalValue::Bool(hay.contains(&needle)))
        }
        "startsWith" => {
            let hay = text(&argv(0)?)?;
            let needle = text(&argv(1)?)?;
            Ok(EvalValue::Bool(hay.starts_with(&needle)))
        }
        "endsWith" => {
            let hay = text(&argv(0)?)?;
            let needle = text(&argv(1)?)?;
            Ok(EvalValue::Bool(hay.ends_with(&needle)))
        }
        "now" => Ok(EvalValue::Int(chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0))),
        "timeFormat" => {
            let ts = num(&argv(0)?)? as i64;
            let fmt = text(&argv(1)?)?;
            let dt = chrono::DateTime::from_timestamp_nanos(ts);
            Ok(EvalValue::Str(dt.format(&fmt).to_string()))
        }
        "timeDiff" => {
            let a = num(&argv(0)?)? as i64;
            let b = num(&argv(1)?)? as i64;
            Ok(EvalValue::Int(a - b))
        }
        "toString" => Ok(EvalValue::Str(
            string_operand(&argv(0)?).ok_or_else(|| eval_err("toString: absent value"))?,
        )),
        "toNumber" => {
            let v = argv(0)?;
            match v {
                EvalValue::Int(_) | EvalValue::Float(_) => Ok(v),
                EvalValue::Str(s) => s
                    .parse::<f64>()
                    .map(numeric_value)
                    .map_err(|_| eval_err(format!("toNumber: cannot parse '{s}'"))),
                EvalValue::Bool(b) => Ok(EvalValue::Int(b as i64)),
                EvalValue::Absent => Err(eval_err("toNumber: absent value")),
            }
        }
        "toBool" => Ok(EvalValue::Bool(argv(0)?.is_truthy())),
        "regex" => {
            let hay = text(&argv(0)?)?;
            let pattern = text(&argv(1)?)?;
            let re = Regex::new(&pattern).map_err(|e| eval_err(format!("bad regex: {e}")))?;
            Ok(EvalValue::Bool(re.is_match(&hay)))
        }
        "time_range" => {
            let h1 = num(&argv(0)?)? as u32;
            let h2 = num(&argv(1)?)? as u32;
            let now_hour = chrono::Utc::now().format("%H").to_string().parse::<u32>().unwrap_or(0);
            let in_range = if h1 <= h2 {
                now_hour >= h1 && now_hour < h2
            } else {
                now_hour >= h1 || now_hour < h2
            };
            Ok(EvalValue::Bool(in_range))
        }
        other => Err(eval_err(format!("unknown function '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr_str;
    use std::collections::HashMap;

    struct FakeSource {
        attrs: HashMap<&'static str, EvalValue>,
        tags: HashMap<&'static str, &'static str>,
    }

    impl FieldSource for FakeSource {
        fn attr(&self, name: &str) -> Option<EvalValue> {
            self.attrs.get(name).cloned()
        }
        fn tag(&self, name: &str) -> Option<String> {
            self.tags.get(name).map(|s| s.to_string())
        }
    }

    fn src() -> FakeSource {
        let mut attrs = HashMap::new();
        attrs.insert("value", EvalValue::Float(85.0));
        attrs.insert("device_id", EvalValue::Str("sensor_1".into()));
        let mut tags = HashMap::new();
        tags.insert("unit", "f");
        FakeSource { attrs, tags }
    }

    #[test]
    fn evaluates_comparison() {
        let e = parse_expr_str("value > 80").unwrap();
        assert_eq!(eval(&e, &src()).unwrap(), EvalValue::Bool(true));
    }

    #[test]
    fn missing_tag_is_absent_and_false() {
        let e = parse_expr_str("tags.missing == \"x\"").unwrap();
        assert_eq!(eval(&e, &src()).unwrap(), EvalValue::Bool(false));
    }

    #[test]
    fn is_idempotent() {
        let e = parse_expr_str("upper(tags.unit) == \"F\" && value > 50").unwrap();
        let s = src();
        let a = eval(&e, &s).unwrap();
        let b = eval(&e, &s).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn division_by_zero_is_eval_error() {
        let e = parse_expr_str("value / 0").unwrap();
        assert!(eval(&e, &src()).is_err());
    }

    #[test]
    fn int_promotes_to_float_against_float() {
        let e = parse_expr_str("1 + value").unwrap();
        assert_eq!(eval(&e, &src()).unwrap(), EvalValue::Float(86.0));
    }
}
