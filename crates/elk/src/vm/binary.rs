//! Operator dispatch over runtime value tag pairs.
//!
//! Every operator is defined for a closed set of tag combinations; anything
//! else fails with `InvalidOperation` naming the operator and the operand
//! tags.

use std::rc::Rc;

use crate::{
    errors::{RunResult, RuntimeError},
    value::{DictKey, Value},
};

/// The arithmetic and comparison operators the VM dispatches here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEqual,
}

fn undefined(op: impl std::fmt::Display, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::invalid_operation(op, format_args!("{} and {}", left.type_tag(), right.type_tag()))
}

/// Applies an arithmetic or ordering operator.
pub fn apply(op: BinOp, left: Value, right: Value) -> RunResult<Value> {
    match op {
        BinOp::Add => add(left, right),
        BinOp::Sub => numeric(op, left, right, |a, b| a.checked_sub(b), |a, b| a - b),
        BinOp::Mul => mul(left, right),
        BinOp::Div => div(left, right),
        BinOp::Mod => rem(left, right),
        BinOp::Greater => compare(op, left, right, |o| o == std::cmp::Ordering::Greater),
        BinOp::GreaterEqual => compare(op, left, right, |o| o != std::cmp::Ordering::Less),
        BinOp::Less => compare(op, left, right, |o| o == std::cmp::Ordering::Less),
        BinOp::LessEqual => compare(op, left, right, |o| o != std::cmp::Ordering::Greater),
    }
}

fn add(left: Value, right: Value) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::runtime("integer overflow in +")),
        (Value::Str(a), Value::Str(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::Str(Rc::from(s.as_str())))
        }
        (Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        _ => float_pair(&left, &right)
            .map(|(a, b)| Value::Float(a + b))
            .ok_or_else(|| undefined("+", &left, &right)),
    }
}

fn mul(left: Value, right: Value) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_mul(*b)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::runtime("integer overflow in *")),
        (Value::Str(s), Value::Int(n)) => {
            let count = usize::try_from(*n).unwrap_or(0);
            Ok(Value::string(s.repeat(count)))
        }
        _ => float_pair(&left, &right)
            .map(|(a, b)| Value::Float(a * b))
            .ok_or_else(|| undefined("*", &left, &right)),
    }
}

fn div(left: Value, right: Value) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Int(_), Value::Int(0)) => Err(RuntimeError::invalid_operation("/", "division by zero")),
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a / b)),
        _ => float_pair(&left, &right)
            .map(|(a, b)| Value::Float(a / b))
            .ok_or_else(|| undefined("/", &left, &right)),
    }
}

fn rem(left: Value, right: Value) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Int(_), Value::Int(0)) => Err(RuntimeError::invalid_operation("%", "division by zero")),
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.rem_euclid(*b))),
        _ => float_pair(&left, &right)
            .map(|(a, b)| Value::Float(a % b))
            .ok_or_else(|| undefined("%", &left, &right)),
    }
}

fn numeric(
    op: BinOp,
    left: Value,
    right: Value,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> RunResult<Value> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::runtime(format!("integer overflow in {op}"))),
        _ => float_pair(&left, &right)
            .map(|(a, b)| Value::Float(float_op(a, b)))
            .ok_or_else(|| undefined(op, &left, &right)),
    }
}

fn compare(op: BinOp, left: Value, right: Value, test: impl Fn(std::cmp::Ordering) -> bool) -> RunResult<Value> {
    let ordering = match (&left, &right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        _ => float_pair(&left, &right).and_then(|(a, b)| a.partial_cmp(&b)),
    };
    match ordering {
        Some(ordering) => Ok(Value::Bool(test(ordering))),
        None => Err(undefined(op, &left, &right)),
    }
}

/// Coerces an int/float pair to floats; `None` for non-numeric operands.
fn float_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    let as_float = |value: &Value| match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    };
    Some((as_float(left)?, as_float(right)?))
}

/// The `in` operator: membership over containers, substring over strings.
pub fn contains(container: &Value, item: &Value) -> RunResult<Value> {
    let found = match container {
        Value::List(items) => items.borrow().iter().any(|v| v.equals(item)),
        Value::Tuple(items) => items.iter().any(|v| v.equals(item)),
        Value::Dict(map) => match DictKey::from_value(item.clone()) {
            Ok(key) => map.borrow().contains_key(&key),
            Err(_) => false,
        },
        Value::Set(set) => match DictKey::from_value(item.clone()) {
            Ok(key) => set.borrow().contains(&key),
            Err(_) => false,
        },
        Value::Str(s) => match item {
            Value::Str(needle) => s.contains(&**needle),
            _ => return Err(undefined("in", item, container)),
        },
        Value::Range { start, end } => match item {
            Value::Int(i) => *start <= *i && *i < *end,
            _ => false,
        },
        _ => return Err(undefined("in", item, container)),
    };
    Ok(Value::Bool(found))
}

/// Unary minus.
pub fn negate(value: Value) -> RunResult<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(-i)),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(RuntimeError::invalid_operation("-", other.type_tag())),
    }
}
