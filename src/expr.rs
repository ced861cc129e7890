//! The restricted expression language used inside directives and `${..}`
//! substitutions: boolean connectives, comparisons, integer arithmetic,
//! membership in literal sets, tuple indexing and helper predicate calls.

use std::collections::{BTreeMap, BTreeSet};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{eof, map, map_res, not, opt, recognize, value, verify},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
    Finish, IResult,
};
use thiserror::Error;

use crate::error::EvalError;
use crate::value::{Env, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Set(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Index { base: Box<Expr>, index: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// A helper predicate registered by a definition directive.
#[derive(Debug, Clone, PartialEq)]
pub struct Def {
    pub params: Vec<String>,
    pub body: Expr,
}

pub type Defs = BTreeMap<String, Def>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid expression '{expr}' (near offset {offset})")]
pub struct ParseError {
    pub expr: String,
    pub offset: usize,
}

/// Parses a complete expression, consuming all of `source`.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    match terminated(ws(expr), eof)(source).finish() {
        Ok((_, parsed)) => Ok(parsed),
        Err(error) => Err(ParseError {
            expr: source.trim().to_owned(),
            offset: source.len() - error.input.len(),
        }),
    }
}

impl Expr {
    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary(op, Box::new(operand))
    }

    /// Adds every identifier not bound by `bound` to `out`.
    pub fn free_variables(&self, bound: &[String], out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ident(name) => {
                if !bound.contains(name) {
                    out.insert(name.clone());
                }
            }
            Expr::Set(elements) => {
                for element in elements {
                    element.free_variables(bound, out);
                }
            }
            Expr::Unary(_, operand) => operand.free_variables(bound, out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.free_variables(bound, out);
                rhs.free_variables(bound, out);
            }
            Expr::Index { base, index } => {
                base.free_variables(bound, out);
                index.free_variables(bound, out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.free_variables(bound, out);
                }
            }
        }
    }
}

// identifiers may not collide with operator words or boolean literals
const RESERVED: &[&str] = &["and", "or", "not", "in", "true", "false", "True", "False"];

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input| terminated(tag(word), not(satisfy(is_ident_char)))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_char)))(input)
}

fn expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(keyword("or")), and_expr))(input)?;
    let folded = rest
        .into_iter()
        .fold(first, |lhs, rhs| Expr::binary(BinaryOp::Or, lhs, rhs));
    Ok((input, folded))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(preceded(ws(keyword("and")), not_expr))(input)?;
    let folded = rest
        .into_iter()
        .fold(first, |lhs, rhs| Expr::binary(BinaryOp::And, lhs, rhs));
    Ok((input, folded))
}

fn not_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(preceded(multispace0, keyword("not")), not_expr),
            |operand| Expr::unary(UnaryOp::Not, operand),
        ),
        comparison,
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    let (input, lhs) = sum(input)?;
    let (input, tail) = opt(pair(ws(comparison_op), sum))(input)?;
    let node = match tail {
        Some((op, rhs)) => Expr::binary(op, lhs, rhs),
        None => lhs,
    };
    Ok((input, node))
}

fn comparison_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Lt, char('<')),
        value(BinaryOp::Gt, char('>')),
        value(
            BinaryOp::NotIn,
            pair(keyword("not"), preceded(multispace0, keyword("in"))),
        ),
        value(BinaryOp::In, keyword("in")),
    ))(input)
}

fn sum(input: &str) -> IResult<&str, Expr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(ws(sum_op), term))(input)?;
    let folded = rest
        .into_iter()
        .fold(first, |lhs, (op, rhs)| Expr::binary(op, lhs, rhs));
    Ok((input, folded))
}

fn sum_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    ))(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(pair(ws(term_op), factor))(input)?;
    let folded = rest
        .into_iter()
        .fold(first, |lhs, (op, rhs)| Expr::binary(op, lhs, rhs));
    Ok((input, folded))
}

fn term_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
        value(BinaryOp::Mod, char('%')),
    ))(input)
}

fn factor(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(preceded(multispace0, char('-')), factor),
            |operand| Expr::unary(UnaryOp::Neg, operand),
        ),
        postfix,
    ))(input)
}

fn postfix(input: &str) -> IResult<&str, Expr> {
    let (input, base) = atom(input)?;
    let (input, indexes) = many0(preceded(
        multispace0,
        delimited(char('['), ws(expr), char(']')),
    ))(input)?;
    let folded = indexes.into_iter().fold(base, |base, index| Expr::Index {
        base: Box::new(base),
        index: Box::new(index),
    });
    Ok((input, folded))
}

fn atom(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            map(integer, |int| Expr::Literal(Value::Int(int))),
            map(string_literal, |text| Expr::Literal(Value::Str(text))),
            boolean,
            set_literal,
            call_or_ident,
            parens,
        )),
    )(input)
}

fn integer(input: &str) -> IResult<&str, i64> {
    map_res(digit1, str::parse)(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(
                char('"'),
                take_while(|c: char| c != '"' && c != '\n'),
                char('"'),
            ),
            delimited(
                char('\''),
                take_while(|c: char| c != '\'' && c != '\n'),
                char('\''),
            ),
        )),
        str::to_owned,
    )(input)
}

fn boolean(input: &str) -> IResult<&str, Expr> {
    alt((
        value(
            Expr::Literal(Value::Bool(true)),
            alt((keyword("true"), keyword("True"))),
        ),
        value(
            Expr::Literal(Value::Bool(false)),
            alt((keyword("false"), keyword("False"))),
        ),
    ))(input)
}

fn set_literal(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            char('{'),
            separated_list0(ws(char(',')), expr),
            preceded(multispace0, char('}')),
        ),
        Expr::Set,
    )(input)
}

fn call_or_ident(input: &str) -> IResult<&str, Expr> {
    let (input, name) = verify(identifier, |name: &&str| !RESERVED.contains(name))(input)?;
    let (input, args) = opt(preceded(
        multispace0,
        delimited(
            char('('),
            separated_list0(ws(char(',')), expr),
            preceded(multispace0, char(')')),
        ),
    ))(input)?;
    let node = match args {
        Some(args) => Expr::Call {
            name: name.to_owned(),
            args,
        },
        None => Expr::Ident(name.to_owned()),
    };
    Ok((input, node))
}

fn parens(input: &str) -> IResult<&str, Expr> {
    delimited(char('('), ws(expr), char(')'))(input)
}

const MAX_CALL_DEPTH: usize = 64;

/// Evaluates `expr` against an environment and a set of helper predicates.
///
/// Evaluation never mutates the environment. Predicate bodies see only
/// their own parameters, never the caller's variables.
pub fn eval(expr: &Expr, env: &Env, defs: &Defs) -> Result<Value, EvalError> {
    eval_at(expr, env, defs, 0)
}

fn eval_at(expr: &Expr, env: &Env, defs: &Defs, depth: usize) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownIdentifier(name.clone())),
        Expr::Set(elements) => {
            let elements = elements
                .iter()
                .map(|element| eval_at(element, env, defs, depth))
                .collect::<Result<_, _>>()?;
            Ok(Value::Tuple(elements))
        }
        Expr::Unary(UnaryOp::Not, operand) => {
            let operand = as_bool(eval_at(operand, env, defs, depth)?)?;
            Ok(Value::Bool(!operand))
        }
        Expr::Unary(UnaryOp::Neg, operand) => match eval_at(operand, env, defs, depth)? {
            Value::Int(int) => int.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
            other => Err(EvalError::TypeMismatch {
                expected: "integer",
                actual: other.kind(),
            }),
        },
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !as_bool(eval_at(lhs, env, defs, depth)?)? {
                return Ok(Value::Bool(false));
            }
            let rhs = as_bool(eval_at(rhs, env, defs, depth)?)?;
            Ok(Value::Bool(rhs))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if as_bool(eval_at(lhs, env, defs, depth)?)? {
                return Ok(Value::Bool(true));
            }
            let rhs = as_bool(eval_at(rhs, env, defs, depth)?)?;
            Ok(Value::Bool(rhs))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval_at(lhs, env, defs, depth)?;
            let rhs = eval_at(rhs, env, defs, depth)?;
            binary(*op, lhs, rhs)
        }
        Expr::Index { base, index } => {
            let base = eval_at(base, env, defs, depth)?;
            let index = eval_at(index, env, defs, depth)?;
            match (base, index) {
                (Value::Tuple(items), Value::Int(index)) => {
                    let len = items.len();
                    let resolved = if index < 0 { index + len as i64 } else { index };
                    usize::try_from(resolved)
                        .ok()
                        .and_then(|at| items.get(at).cloned())
                        .ok_or(EvalError::IndexOutOfBounds { index, len })
                }
                (Value::Tuple(_), other) => Err(EvalError::TypeMismatch {
                    expected: "integer",
                    actual: other.kind(),
                }),
                (other, _) => Err(EvalError::TypeMismatch {
                    expected: "tuple",
                    actual: other.kind(),
                }),
            }
        }
        Expr::Call { name, args } => {
            if depth >= MAX_CALL_DEPTH {
                return Err(EvalError::RecursionLimit(MAX_CALL_DEPTH));
            }
            if let Some(def) = defs.get(name) {
                if def.params.len() != args.len() {
                    return Err(EvalError::ArityMismatch {
                        name: name.clone(),
                        expected: def.params.len(),
                        actual: args.len(),
                    });
                }
                let mut local = Env::new();
                for (param, arg) in def.params.iter().zip(args) {
                    local.insert(param.clone(), eval_at(arg, env, defs, depth)?);
                }
                eval_at(&def.body, &local, defs, depth + 1)
            } else if name == "range" {
                match args.as_slice() {
                    [length] => match eval_at(length, env, defs, depth)? {
                        Value::Int(length) if length < 0 => Err(EvalError::NegativeRange(length)),
                        Value::Int(length) => Ok(Value::Tuple((0..length).map(Value::Int).collect())),
                        other => Err(EvalError::TypeMismatch {
                            expected: "integer",
                            actual: other.kind(),
                        }),
                    },
                    _ => Err(EvalError::ArityMismatch {
                        name: name.clone(),
                        expected: 1,
                        actual: args.len(),
                    }),
                }
            } else {
                Err(EvalError::UnknownFunction(name.clone()))
            }
        }
    }
}

fn as_bool(value: Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(flag) => Ok(flag),
        other => Err(EvalError::TypeMismatch {
            expected: "boolean",
            actual: other.kind(),
        }),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Or | BinaryOp::And => {
            // short-circuiting happens in the caller
            let lhs = as_bool(lhs)?;
            let rhs = as_bool(rhs)?;
            let flag = match op {
                BinaryOp::Or => lhs || rhs,
                _ => lhs && rhs,
            };
            Ok(Value::Bool(flag))
        }
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => {
                    return Err(EvalError::InvalidOperands {
                        op: symbol(op),
                        lhs: lhs.kind(),
                        rhs: rhs.kind(),
                    })
                }
            };
            let holds = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(holds))
        }
        BinaryOp::In | BinaryOp::NotIn => {
            let contained = match &rhs {
                Value::Tuple(items) => items.contains(&lhs),
                _ => {
                    return Err(EvalError::InvalidOperands {
                        op: symbol(op),
                        lhs: lhs.kind(),
                        rhs: rhs.kind(),
                    })
                }
            };
            let holds = match op {
                BinaryOp::In => contained,
                _ => !contained,
            };
            Ok(Value::Bool(holds))
        }
        BinaryOp::Add => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                a.checked_add(b).map(Value::Int).ok_or(EvalError::Overflow)
            }
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (Value::Tuple(mut a), Value::Tuple(b)) => {
                a.extend(b);
                Ok(Value::Tuple(a))
            }
            (lhs, rhs) => Err(EvalError::InvalidOperands {
                op: "+",
                lhs: lhs.kind(),
                rhs: rhs.kind(),
            }),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (a, b) = match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => (*a, *b),
                _ => {
                    return Err(EvalError::InvalidOperands {
                        op: symbol(op),
                        lhs: lhs.kind(),
                        rhs: rhs.kind(),
                    })
                }
            };
            let result = match op {
                BinaryOp::Sub => a.checked_sub(b).ok_or(EvalError::Overflow)?,
                BinaryOp::Mul => a.checked_mul(b).ok_or(EvalError::Overflow)?,
                BinaryOp::Div if b == 0 => return Err(EvalError::DivisionByZero),
                BinaryOp::Div => a.checked_div(b).ok_or(EvalError::Overflow)?,
                BinaryOp::Mod if b == 0 => return Err(EvalError::DivisionByZero),
                _ => a.checked_rem(b).ok_or(EvalError::Overflow)?,
            };
            Ok(Value::Int(result))
        }
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "or",
        BinaryOp::And => "and",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::In => "in",
        BinaryOp::NotIn => "not in",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, Value)]) -> Env {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn eval_str(source: &str, env: &Env) -> Result<Value, EvalError> {
        eval(&parse(source).unwrap(), env, &Defs::new())
    }

    #[test]
    fn arithmetic_precedence() {
        let empty = Env::new();
        assert_eq!(eval_str("1 + 2 * 3", &empty), Ok(Value::Int(7)));
        assert_eq!(eval_str("(1 + 2) * 3", &empty), Ok(Value::Int(9)));
        assert_eq!(eval_str("-2 * 3", &empty), Ok(Value::Int(-6)));
        assert_eq!(eval_str("10 / 3", &empty), Ok(Value::Int(3)));
        assert_eq!(eval_str("10 % 3", &empty), Ok(Value::Int(1)));
        assert_eq!(eval_str("1 / 0", &empty), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn comparisons_and_connectives() {
        let empty = Env::new();
        assert_eq!(eval_str("2 < 3", &empty), Ok(Value::Bool(true)));
        assert_eq!(eval_str("'a' < 'b'", &empty), Ok(Value::Bool(true)));
        assert_eq!(eval_str("1 == 'a'", &empty), Ok(Value::Bool(false)));
        assert_eq!(eval_str("true and not false", &empty), Ok(Value::Bool(true)));
        assert_eq!(eval_str("True or False", &empty), Ok(Value::Bool(true)));
        assert_eq!(eval_str("not 2 == 3", &empty), Ok(Value::Bool(true)));
    }

    #[test]
    fn connectives_short_circuit() {
        let empty = Env::new();
        assert_eq!(eval_str("false and 1 / 0 == 0", &empty), Ok(Value::Bool(false)));
        assert_eq!(eval_str("true or 1 / 0 == 0", &empty), Ok(Value::Bool(true)));
    }

    #[test]
    fn membership() {
        let bindings = env(&[("DTYPE", Value::Str("int8".into()))]);
        assert_eq!(
            eval_str("DTYPE in {\"int\", \"int32\", \"int8\"}", &bindings),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            eval_str("DTYPE not in {\"uint\", \"uint8\"}", &bindings),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            eval_str("1 in 2", &bindings),
            Err(EvalError::InvalidOperands {
                op: "in",
                lhs: "integer",
                rhs: "integer",
            })
        );
    }

    #[test]
    fn tuple_indexing() {
        let bindings = env(&[(
            "ITER",
            Value::Tuple(vec![Value::Int(3), Value::Int(5)]),
        )]);
        assert_eq!(eval_str("ITER[0]", &bindings), Ok(Value::Int(3)));
        assert_eq!(eval_str("ITER[1]", &bindings), Ok(Value::Int(5)));
        assert_eq!(eval_str("ITER[-1]", &bindings), Ok(Value::Int(5)));
        assert_eq!(
            eval_str("ITER[2]", &bindings),
            Err(EvalError::IndexOutOfBounds { index: 2, len: 2 })
        );
    }

    #[test]
    fn range_builtin() {
        let empty = Env::new();
        assert_eq!(
            eval_str("range(3)", &empty),
            Ok(Value::Tuple(vec![Value::Int(0), Value::Int(1), Value::Int(2)]))
        );
        assert_eq!(eval_str("range(0)", &empty), Ok(Value::Tuple(Vec::new())));
        assert_eq!(eval_str("range(0 - 1)", &empty), Err(EvalError::NegativeRange(-1)));
    }

    #[test]
    fn concatenation() {
        let empty = Env::new();
        assert_eq!(eval_str("'rgba' + '16f'", &empty), Ok(Value::Str("rgba16f".into())));
        assert_eq!(
            eval_str("1 + 'a'", &empty),
            Err(EvalError::InvalidOperands {
                op: "+",
                lhs: "integer",
                rhs: "string",
            })
        );
    }

    #[test]
    fn predicate_calls() {
        let mut defs = Defs::new();
        defs.insert(
            "is_int".to_owned(),
            Def {
                params: vec!["dtype".to_owned()],
                body: parse("dtype in {\"int\", \"int32\", \"int8\"}").unwrap(),
            },
        );

        let bindings = env(&[("DTYPE", Value::Str("int32".into()))]);
        let call = parse("is_int(DTYPE)").unwrap();
        assert_eq!(eval(&call, &bindings, &defs), Ok(Value::Bool(true)));

        let wrong_arity = parse("is_int()").unwrap();
        assert_eq!(
            eval(&wrong_arity, &bindings, &defs),
            Err(EvalError::ArityMismatch {
                name: "is_int".into(),
                expected: 1,
                actual: 0,
            })
        );
    }

    #[test]
    fn predicate_bodies_see_only_their_parameters() {
        let mut defs = Defs::new();
        defs.insert(
            "leaky".to_owned(),
            Def {
                params: vec!["x".to_owned()],
                body: parse("x == DTYPE").unwrap(),
            },
        );

        let bindings = env(&[("DTYPE", Value::Str("float".into()))]);
        let call = parse("leaky(DTYPE)").unwrap();
        assert_eq!(
            eval(&call, &bindings, &defs),
            Err(EvalError::UnknownIdentifier("DTYPE".into()))
        );
    }

    #[test]
    fn recursion_is_bounded() {
        let mut defs = Defs::new();
        defs.insert(
            "forever".to_owned(),
            Def {
                params: Vec::new(),
                body: parse("forever()").unwrap(),
            },
        );

        let call = parse("forever()").unwrap();
        assert_eq!(
            eval(&call, &Env::new(), &defs),
            Err(EvalError::RecursionLimit(MAX_CALL_DEPTH))
        );
    }

    #[test]
    fn unknown_names() {
        let empty = Env::new();
        assert_eq!(
            eval_str("MISSING", &empty),
            Err(EvalError::UnknownIdentifier("MISSING".into()))
        );
        assert_eq!(
            eval_str("missing(1)", &empty),
            Err(EvalError::UnknownFunction("missing".into()))
        );
    }

    #[test]
    fn parse_failures() {
        assert!(parse("").is_err());
        assert!(parse("1 +").is_err());
        assert!(parse("(1").is_err());
        assert!(parse("in x").is_err());
        assert!(parse("1 2").is_err());
    }

    #[test]
    fn free_variable_collection() {
        let parsed = parse("not INPLACE and is_int(DTYPE) or ITER[0] > n").unwrap();
        let mut out = BTreeSet::new();
        parsed.free_variables(&["n".to_owned()], &mut out);

        let names: Vec<&str> = out.iter().map(String::as_str).collect();
        assert_eq!(names, ["DTYPE", "INPLACE", "ITER"]);
    }
}
