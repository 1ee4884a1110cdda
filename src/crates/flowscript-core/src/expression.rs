//! Restricted expression evaluator for control nodes
//!
//! Parses and evaluates the condition mini-language used by the built-in
//! control nodes: boolean/arithmetic/comparison operators, numeric and string
//! literals, state path references, and the whitelisted functions `exists`,
//! `isEmpty`, and `length`. Everything else — assignment, arbitrary calls,
//! unknown syntactic forms — is rejected at parse time. Expressions are
//! untrusted input; evaluation only ever reads the state document.
//!
//! ```text
//! count < 3
//! user.role == 'admin' && exists(user.email)
//! length(cart.items) > 0 || retries % 2 == 0
//! ```

use crate::error::{FlowError, Result};
use crate::state::StateStore;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, opt, recognize},
    error::ErrorKind,
    multi::{fold_many0, many0_count},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use serde_json::{Number, Value};

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// State path reference, resolved at evaluation time
    Path(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Func,
        arg: Box<Expr>,
    },
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
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// The function whitelist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Exists,
    IsEmpty,
    Length,
}

/// Parse an expression against the restricted grammar
pub fn parse(input: &str) -> Result<Expr> {
    match all_consuming(ws(or_expr))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(_) => Err(FlowError::Expression(format!(
            "invalid expression: '{}'",
            input
        ))),
    }
}

/// Parse and evaluate an expression against the state document
pub fn evaluate(input: &str, state: &StateStore) -> Result<Value> {
    eval(&parse(input)?, state)
}

/// Evaluate an expression and collapse the result to its truthiness
pub fn evaluate_bool(input: &str, state: &StateStore) -> Result<bool> {
    Ok(truthy(&evaluate(input, state)?))
}

/// Truthiness used by conditions: false, null, 0, empty string, and empty
/// collections are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Parser combinators
// ---------------------------------------------------------------------------

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, init) = and_expr(input)?;
    fold_many0(
        preceded(ws(tag("||")), and_expr),
        move || init.clone(),
        |lhs, rhs| binary(BinaryOp::Or, lhs, rhs),
    )(input)
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, init) = equality(input)?;
    fold_many0(
        preceded(ws(tag("&&")), equality),
        move || init.clone(),
        |lhs, rhs| binary(BinaryOp::And, lhs, rhs),
    )(input)
}

fn equality(input: &str) -> IResult<&str, Expr> {
    let (input, init) = comparison(input)?;
    fold_many0(
        pair(ws(alt((tag("=="), tag("!=")))), comparison),
        move || init.clone(),
        |lhs, (op, rhs)| {
            let op = if op == "==" { BinaryOp::Eq } else { BinaryOp::Ne };
            binary(op, lhs, rhs)
        },
    )(input)
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    let (input, init) = additive(input)?;
    fold_many0(
        pair(ws(alt((tag("<="), tag(">="), tag("<"), tag(">")))), additive),
        move || init.clone(),
        |lhs, (op, rhs)| {
            let op = match op {
                "<=" => BinaryOp::Le,
                ">=" => BinaryOp::Ge,
                "<" => BinaryOp::Lt,
                _ => BinaryOp::Gt,
            };
            binary(op, lhs, rhs)
        },
    )(input)
}

fn additive(input: &str) -> IResult<&str, Expr> {
    let (input, init) = multiplicative(input)?;
    fold_many0(
        pair(ws(alt((char('+'), char('-')))), multiplicative),
        move || init.clone(),
        |lhs, (op, rhs)| {
            let op = if op == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            binary(op, lhs, rhs)
        },
    )(input)
}

fn multiplicative(input: &str) -> IResult<&str, Expr> {
    let (input, init) = unary(input)?;
    fold_many0(
        pair(ws(alt((char('*'), char('/'), char('%')))), unary),
        move || init.clone(),
        |lhs, (op, rhs)| {
            let op = match op {
                '*' => BinaryOp::Mul,
                '/' => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            binary(op, lhs, rhs)
        },
    )(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('!')), unary), |expr| Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        }),
        map(preceded(ws(char('-')), unary), |expr| Expr::Unary {
            op: UnaryOp::Neg,
            expr: Box::new(expr),
        }),
        primary,
    ))(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    alt((
        number_literal,
        string_literal,
        delimited(ws(char('(')), or_expr, ws(char(')'))),
        keyword_call_or_path,
    ))(input)
}

fn number_literal(input: &str) -> IResult<&str, Expr> {
    let (rest, raw) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)?;
    let expr = if raw.contains('.') {
        let f: f64 = raw
            .parse()
            .map_err(|_| nom::Err::Error(nom::error::Error::new(input, ErrorKind::Float)))?;
        Expr::Literal(number_value(f))
    } else {
        let n: i64 = raw
            .parse()
            .map_err(|_| nom::Err::Error(nom::error::Error::new(input, ErrorKind::Digit)))?;
        Expr::Literal(Value::Number(Number::from(n)))
    };
    Ok((rest, expr))
}

fn string_literal(input: &str) -> IResult<&str, Expr> {
    let single = delimited(char('\''), take_till(|c| c == '\''), char('\''));
    let double = delimited(char('"'), take_till(|c| c == '"'), char('"'));
    map(alt((single, double)), |s: &str| {
        Expr::Literal(Value::String(s.to_string()))
    })(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn state_path(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(alt((tag("$."), tag("state.")))),
        identifier,
        many0_count(alt((
            recognize(preceded(char('.'), identifier)),
            recognize(delimited(char('['), digit1, char(']'))),
        ))),
    )))(input)
}

/// Keywords, whitelisted calls, and state paths all start with an identifier;
/// disambiguate after reading the full path token.
fn keyword_call_or_path(input: &str) -> IResult<&str, Expr> {
    let (rest, raw) = state_path(input)?;

    match raw {
        "true" => return Ok((rest, Expr::Literal(Value::Bool(true)))),
        "false" => return Ok((rest, Expr::Literal(Value::Bool(false)))),
        "null" => return Ok((rest, Expr::Literal(Value::Null))),
        _ => {}
    }

    // An identifier followed by '(' must be a whitelisted function; anything
    // else is a hard rejection, not a fallthrough.
    let (after_ws, _) = multispace0(rest)?;
    if after_ws.starts_with('(') {
        let func = match raw {
            "exists" => Func::Exists,
            "isEmpty" => Func::IsEmpty,
            "length" => Func::Length,
            _ => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    input,
                    ErrorKind::Tag,
                )))
            }
        };
        let (rest, arg) = delimited(ws(char('(')), call_argument(func), ws(char(')')))(rest)?;
        return Ok((rest, Expr::Call { func, arg: Box::new(arg) }));
    }

    Ok((rest, Expr::Path(raw.to_string())))
}

fn call_argument(func: Func) -> impl FnMut(&str) -> IResult<&str, Expr> {
    move |input| match func {
        // `exists` asks about presence, so its argument is a path, not a value.
        Func::Exists => map(ws(state_path), |p: &str| Expr::Path(p.to_string()))(input),
        Func::IsEmpty | Func::Length => or_expr(input),
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, state: &StateStore) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => Ok(state.get(path)?.unwrap_or(Value::Null)),
        Expr::Unary { op, expr } => {
            let value = eval(expr, state)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => {
                    let n = as_number(&value).ok_or_else(|| {
                        FlowError::Expression("unary '-' requires a number".to_string())
                    })?;
                    Ok(number_value(-n))
                }
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, state),
        Expr::Call { func, arg } => match func {
            Func::Exists => {
                let path = match arg.as_ref() {
                    Expr::Path(p) => p,
                    _ => {
                        return Err(FlowError::Expression(
                            "exists() requires a state path".to_string(),
                        ))
                    }
                };
                Ok(Value::Bool(state.get(path)?.is_some()))
            }
            Func::IsEmpty => {
                let value = eval(arg, state)?;
                let empty = match &value {
                    Value::Null => true,
                    Value::String(s) => s.is_empty(),
                    Value::Array(items) => items.is_empty(),
                    Value::Object(map) => map.is_empty(),
                    _ => false,
                };
                Ok(Value::Bool(empty))
            }
            Func::Length => {
                let value = eval(arg, state)?;
                let len = match &value {
                    Value::Null => 0,
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    other => {
                        return Err(FlowError::Expression(format!(
                            "length() is not defined for {}",
                            type_name(other)
                        )))
                    }
                };
                Ok(Value::Number(Number::from(len as i64)))
            }
        },
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, state: &StateStore) -> Result<Value> {
    // Short-circuit the logical operators.
    match op {
        BinaryOp::Or => {
            let left = eval(lhs, state)?;
            if truthy(&left) {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(truthy(&eval(rhs, state)?)));
        }
        BinaryOp::And => {
            let left = eval(lhs, state)?;
            if !truthy(&left) {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(truthy(&eval(rhs, state)?)));
        }
        _ => {}
    }

    let left = eval(lhs, state)?;
    let right = eval(rhs, state)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right)?;
            let result = match op {
                BinaryOp::Lt => ordering == std::cmp::Ordering::Less,
                BinaryOp::Le => ordering != std::cmp::Ordering::Greater,
                BinaryOp::Gt => ordering == std::cmp::Ordering::Greater,
                _ => ordering != std::cmp::Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (&left, &right) {
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, stringify(b)))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", stringify(a), b))),
            _ => arithmetic(op, &left, &right),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, &left, &right)
        }
        BinaryOp::Or | BinaryOp::And => unreachable!("handled above"),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let (a, b) = match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(FlowError::Expression(format!(
                "arithmetic requires numbers, got {} and {}",
                type_name(left),
                type_name(right)
            )))
        }
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(FlowError::Expression("division by zero".to_string()));
            }
            a / b
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                return Err(FlowError::Expression("modulo by zero".to_string()));
            }
            a % b
        }
        _ => unreachable!("not an arithmetic operator"),
    };
    Ok(number_value(result))
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| {
                FlowError::Expression("comparison is undefined for NaN".to_string())
            }),
            _ => Err(FlowError::Expression(format!(
                "cannot compare {} with {}",
                type_name(left),
                type_name(right)
            ))),
        },
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::Number(Number::from(f as i64))
    } else {
        Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
