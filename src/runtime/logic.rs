/// Minimal JSON-logic predicate evaluator
///
/// Supports `{"var": name}` leaves and the operators `==`, `>`, `>=`, `<`,
/// `<=`, `and`, `or`. Operands that cannot be compared make the comparison
/// false; unknown operators evaluate to false.

use crate::runtime::template::resolve_path;
use serde_json::{json, Value};
use std::cmp::Ordering;

/// Evaluate `logic` against `{ "value": subject }` and report truthiness
pub fn evaluate_predicate(logic: &Value, subject: &Value) -> bool {
    if logic.is_null() {
        return false;
    }
    let context = json!({ "value": subject });
    is_truthy(&evaluate(logic, &context))
}

/// Evaluate a logic expression against a data context
pub fn evaluate(logic: &Value, data: &Value) -> Value {
    let map = match logic {
        Value::Object(map) if map.len() == 1 => map,
        Value::Array(items) => return Value::Array(items.iter().map(|v| evaluate(v, data)).collect()),
        other => return other.clone(),
    };

    let Some((op, raw_args)) = map.iter().next() else {
        return Value::Bool(false);
    };

    if op == "var" {
        return lookup_var(raw_args, data);
    }

    let args: Vec<Value> = match raw_args {
        Value::Array(items) => items.iter().map(|v| evaluate(v, data)).collect(),
        single => vec![evaluate(single, data)],
    };

    let result = match op.as_str() {
        "==" => args.len() == 2 && loose_eq(&args[0], &args[1]),
        ">" => binary(&args, |o| o == Ordering::Greater),
        ">=" => binary(&args, |o| o != Ordering::Less),
        "<" => chained(&args, |o| o == Ordering::Less),
        "<=" => chained(&args, |o| o != Ordering::Greater),
        "and" => !args.is_empty() && args.iter().all(is_truthy),
        "or" => args.iter().any(is_truthy),
        other => {
            tracing::debug!("Unknown logic operator '{}' evaluates to false", other);
            false
        }
    };

    Value::Bool(result)
}

fn lookup_var(args: &Value, data: &Value) -> Value {
    let (name, default) = match args {
        Value::Array(items) => (
            items.first().cloned().unwrap_or(Value::Null),
            items.get(1).cloned().unwrap_or(Value::Null),
        ),
        other => (other.clone(), Value::Null),
    };

    let path = match &name {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };

    if path.is_empty() {
        return data.clone();
    }

    resolve_path(data, &path).cloned().unwrap_or(default)
}

fn binary(args: &[Value], accept: impl Fn(Ordering) -> bool) -> bool {
    args.len() == 2 && compare(&args[0], &args[1]).is_some_and(accept)
}

/// Two operands, or three for a between check (`a < b < c`)
fn chained(args: &[Value], accept: impl Fn(Ordering) -> bool) -> bool {
    match args.len() {
        2 | 3 => args
            .windows(2)
            .all(|pair| compare(&pair[0], &pair[1]).is_some_and(&accept)),
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => a == b,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}
