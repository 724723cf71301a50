//! Precedence-climbing expression parser over condition/transform source.
//!
//! `or_expr -> and_expr -> cmp_expr -> add_expr -> mul_expr -> unary_expr -> primary`

use winnow::combinator::{alt, cut_err, opt, separated};
use winnow::error::{StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::literal;

use crate::ast::*;
use crate::parse_utils::{ident, kw, number_literal, quoted_string, ws_skip};

/// Parse a full expression from source text.
pub fn parse_expr_str(input: &str) -> Result<Expr, String> {
    let mut rest = input;
    ws_skip.parse_next(&mut rest).map_err(|e| e.to_string())?;
    let expr = parse_expr.parse_next(&mut rest).map_err(|e| e.to_string())?;
    ws_skip.parse_next(&mut rest).map_err(|e| e.to_string())?;
    if !rest.is_empty() {
        return Err(format!("unexpected trailing input: {rest:?}"));
    }
    Ok(expr)
}

pub(crate) fn parse_expr(input: &mut &str) -> ModalResult<Expr> {
    if_then_else.parse_next(input)
}

fn if_then_else(input: &mut &str) -> ModalResult<Expr> {
    if opt(kw("if")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let cond = cut_err(or_expr).parse_next(input)?;
        ws_skip.parse_next(input)?;
        cut_err(kw("then")).parse_next(input)?;
        ws_skip.parse_next(input)?;
        let then_expr = cut_err(or_expr).parse_next(input)?;
        ws_skip.parse_next(input)?;
        cut_err(kw("else")).parse_next(input)?;
        ws_skip.parse_next(input)?;
        let else_expr = cut_err(or_expr).parse_next(input)?;
        return Ok(Expr::IfThenElse {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        });
    }
    or_expr.parse_next(input)
}

/// `or_expr = and_expr { "||" and_expr }`
fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = and_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        if opt(literal("||")).parse_next(input)?.is_some() {
            ws_skip.parse_next(input)?;
            let right = cut_err(and_expr).parse_next(input)?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `and_expr = cmp_expr { "&&" cmp_expr }`
fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = cmp_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        if opt(literal("&&")).parse_next(input)?.is_some() {
            ws_skip.parse_next(input)?;
            let right = cut_err(cmp_expr).parse_next(input)?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `cmp_expr = add_expr [cmp_op add_expr | "in" "(" list ")" | "not" "in" "(" list ")"]`
fn cmp_expr(input: &mut &str) -> ModalResult<Expr> {
    let left = add_expr.parse_next(input)?;
    ws_skip.parse_next(input)?;

    if opt((kw("not"), ws_skip, kw("in")))
        .parse_next(input)?
        .is_some()
    {
        ws_skip.parse_next(input)?;
        let list = in_list.parse_next(input)?;
        return Ok(Expr::InList {
            expr: Box::new(left),
            list,
            negated: true,
        });
    }

    if opt(kw("in")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let list = in_list.parse_next(input)?;
        return Ok(Expr::InList {
            expr: Box::new(left),
            list,
            negated: false,
        });
    }

    if let Some(op) = opt(cmp_op).parse_next(input)? {
        ws_skip.parse_next(input)?;
        let right = cut_err(add_expr).parse_next(input)?;
        return Ok(Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        });
    }

    Ok(left)
}

fn in_list(input: &mut &str) -> ModalResult<Vec<Expr>> {
    cut_err(literal("(")).parse_next(input)?;
    ws_skip.parse_next(input)?;
    let list: Vec<Expr> =
        separated(1.., (ws_skip, parse_expr).map(|(_, e)| e), literal(",")).parse_next(input)?;
    ws_skip.parse_next(input)?;
    cut_err(literal(")")).parse_next(input)?;
    Ok(list)
}

fn cmp_op(input: &mut &str) -> ModalResult<BinOp> {
    alt((
        literal("==").value(BinOp::Eq),
        literal("!=").value(BinOp::Ne),
        literal("<=").value(BinOp::Le),
        literal(">=").value(BinOp::Ge),
        literal("<").value(BinOp::Lt),
        literal(">").value(BinOp::Gt),
    ))
    .parse_next(input)
}

/// `add_expr = mul_expr { ("+" | "-") mul_expr }`
fn add_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = mul_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("+").value(BinOp::Add),
            literal("-").value(BinOp::Sub),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(mul_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `mul_expr = unary_expr { ("*" | "/" | "%") unary_expr }`
fn mul_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = unary_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("*").value(BinOp::Mul),
            literal("/").value(BinOp::Div),
            literal("%").value(BinOp::Mod),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(unary_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `unary_expr = ["-" | "!"] primary`
fn unary_expr(input: &mut &str) -> ModalResult<Expr> {
    if opt(literal("-")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let inner = unary_expr.parse_next(input)?;
        return Ok(Expr::Neg(Box::new(inner)));
    }
    if opt(literal("!")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let inner = unary_expr.parse_next(input)?;
        return Ok(Expr::BinOp {
            op: BinOp::Eq,
            left: Box::new(inner),
            right: Box::new(Expr::Bool(false)),
        });
    }
    primary.parse_next(input)
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    alt((
        number_literal.map(Expr::Number),
        quoted_string.map(Expr::StringLit),
        kw("true").map(|_| Expr::Bool(true)),
        kw("false").map(|_| Expr::Bool(false)),
        paren_expr,
        ident_primary,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn paren_expr(input: &mut &str) -> ModalResult<Expr> {
    literal("(").parse_next(input)?;
    ws_skip.parse_next(input)?;
    let inner = cut_err(parse_expr).parse_next(input)?;
    ws_skip.parse_next(input)?;
    cut_err(literal(")")).parse_next(input)?;
    Ok(inner)
}

/// Parse an ident-based primary: function call or field reference.
fn ident_primary(input: &mut &str) -> ModalResult<Expr> {
    let first = ident.parse_next(input)?;
    ws_skip.parse_next(input)?;

    if opt(literal("(")).parse_next(input)?.is_some() {
        return parse_func_call_args(None, first.to_string(), input);
    }

    if opt(literal(".")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let second = cut_err(ident).parse_next(input)?;
        ws_skip.parse_next(input)?;

        if opt(literal("(")).parse_next(input)?.is_some() {
            return parse_func_call_args(Some(first.to_string()), second.to_string(), input);
        }

        return Ok(Expr::Field(FieldRef::Qualified(
            first.to_string(),
            second.to_string(),
        )));
    }

    if opt(literal("[")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let key = cut_err(quoted_string).parse_next(input)?;
        ws_skip.parse_next(input)?;
        cut_err(literal("]")).parse_next(input)?;
        return Ok(Expr::Field(FieldRef::Bracketed(first.to_string(), key)));
    }

    Ok(Expr::Field(FieldRef::Simple(first.to_string())))
}

fn parse_func_call_args(
    qualifier: Option<String>,
    name: String,
    input: &mut &str,
) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;

    if opt(literal(")")).parse_next(input)?.is_some() {
        return Ok(Expr::FuncCall {
            qualifier,
            name,
            args: vec![],
        });
    }

    let args: Vec<Expr> =
        separated(1.., (ws_skip, parse_expr).map(|(_, e)| e), literal(",")).parse_next(input)?;
    ws_skip.parse_next(input)?;
    cut_err(literal(")")).parse_next(input)?;

    Ok(Expr::FuncCall {
        qualifier,
        name,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comparison() {
        let e = parse_expr_str("value > 80").unwrap();
        assert_eq!(
            e,
            Expr::BinOp {
                op: BinOp::Gt,
                left: Box::new(Expr::Field(FieldRef::Simple("value".into()))),
                right: Box::new(Expr::Number(80.0)),
            }
        );
    }

    #[test]
    fn parses_tag_access_and_call() {
        let e = parse_expr_str(r#"upper(tags.unit) == "F""#).unwrap();
        assert_eq!(
            e,
            Expr::BinOp {
                op: BinOp::Eq,
                left: Box::new(Expr::FuncCall {
                    qualifier: None,
                    name: "upper".into(),
                    args: vec![Expr::Field(FieldRef::Qualified(
                        "tags".into(),
                        "unit".into()
                    ))],
                }),
                right: Box::new(Expr::StringLit("F".into())),
            }
        );
    }

    #[test]
    fn parses_if_then_else() {
        let e = parse_expr_str("if value > 0 then 1 else -1").unwrap();
        match e {
            Expr::IfThenElse { .. } => {}
            other => panic!("expected IfThenElse, got {other:?}"),
        }
    }

    #[test]
    fn parses_in_list() {
        let e = parse_expr_str(r#"key in ("a", "b")"#).unwrap();
        match e {
            Expr::InList { negated, list, .. } => {
                assert!(!negated);
                assert_eq!(list.len(), 2);
            }
            other => panic!("expected InList, got {other:?}"),
        }
    }
}
