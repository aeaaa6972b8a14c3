// src/expression.rs
// Aggregation expressions: field paths, literals and operators

use chrono::Datelike;
use serde_json::{Map, Value};

use crate::document::{self, get_value_path};
use crate::error::{Result, TinyDocError};

#[derive(Debug, Clone)]
pub enum Expression {
    Literal(Value),
    /// `"$a.b"` - path without the leading `$`
    Field(String),
    Object(Vec<(String, Expression)>),
    Array(Vec<Expression>),
    Size(Box<Expression>),
    Month(Box<Expression>),
    Year(Box<Expression>),
    DayOfMonth(Box<Expression>),
    Add(Vec<Expression>),
    Multiply(Vec<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Divide(Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn parse(spec: &Value) -> Result<Self> {
        match spec {
            Value::String(s) if s.starts_with('$') => {
                let path = s.trim_start_matches('$');
                if path.is_empty() {
                    return Err(TinyDocError::AggregationError("empty field path".into()));
                }
                Ok(Expression::Field(path.to_string()))
            }
            Value::Array(items) => Ok(Expression::Array(
                items.iter().map(Expression::parse).collect::<Result<_>>()?,
            )),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some((op, arg)) = map.iter().next().filter(|(k, _)| k.starts_with('$')) {
                        return Self::parse_operator(op, arg, spec);
                    }
                }
                if map.keys().any(|k| k.starts_with('$')) {
                    return Err(TinyDocError::AggregationError(format!(
                        "expression object cannot mix operators and fields: {}",
                        spec
                    )));
                }
                let mut fields = Vec::with_capacity(map.len());
                for (name, value) in map {
                    fields.push((name.clone(), Expression::parse(value)?));
                }
                Ok(Expression::Object(fields))
            }
            _ => Ok(Expression::Literal(spec.clone())),
        }
    }

    fn parse_operator(op: &str, arg: &Value, whole: &Value) -> Result<Self> {
        let unary = |arg: &Value| -> Result<Box<Expression>> {
            // Operators accept either `expr` or `[expr]`
            match arg {
                Value::Array(items) if items.len() == 1 => Ok(Box::new(Expression::parse(&items[0])?)),
                Value::Array(_) => Err(TinyDocError::AggregationError(format!("{} takes one argument", op))),
                other => Ok(Box::new(Expression::parse(other)?)),
            }
        };
        let binary = |arg: &Value| -> Result<(Box<Expression>, Box<Expression>)> {
            match arg {
                Value::Array(items) if items.len() == 2 => Ok((
                    Box::new(Expression::parse(&items[0])?),
                    Box::new(Expression::parse(&items[1])?),
                )),
                _ => Err(TinyDocError::AggregationError(format!("{} takes two arguments", op))),
            }
        };
        let variadic = |arg: &Value| -> Result<Vec<Expression>> {
            match arg {
                Value::Array(items) => items.iter().map(Expression::parse).collect(),
                other => Ok(vec![Expression::parse(other)?]),
            }
        };

        match op {
            "$literal" => Ok(Expression::Literal(arg.clone())),
            "$size" => Ok(Expression::Size(unary(arg)?)),
            "$month" => Ok(Expression::Month(unary(arg)?)),
            "$year" => Ok(Expression::Year(unary(arg)?)),
            "$dayOfMonth" => Ok(Expression::DayOfMonth(unary(arg)?)),
            "$add" => Ok(Expression::Add(variadic(arg)?)),
            "$multiply" => Ok(Expression::Multiply(variadic(arg)?)),
            "$subtract" => {
                let (a, b) = binary(arg)?;
                Ok(Expression::Subtract(a, b))
            }
            "$divide" => {
                let (a, b) = binary(arg)?;
                Ok(Expression::Divide(a, b))
            }
            // Extended-JSON values are literals
            "$date" | "$oid" => Ok(Expression::Literal(whole.clone())),
            _ => Err(TinyDocError::AggregationError(format!("Unknown expression operator: {}", op))),
        }
    }

    /// Evaluate against one document. Missing fields evaluate to null.
    pub fn evaluate(&self, doc: &Value) -> Result<Value> {
        match self {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Field(path) => Ok(get_value_path(doc, path).cloned().unwrap_or(Value::Null)),
            Expression::Object(fields) => {
                let mut out = Map::new();
                for (name, expr) in fields {
                    out.insert(name.clone(), expr.evaluate(doc)?);
                }
                Ok(Value::Object(out))
            }
            Expression::Array(items) => Ok(Value::Array(
                items.iter().map(|e| e.evaluate(doc)).collect::<Result<_>>()?,
            )),
            Expression::Size(inner) => match inner.evaluate(doc)? {
                Value::Array(items) => Ok(Value::from(items.len() as i64)),
                other => Err(TinyDocError::AggregationError(format!(
                    "The argument to $size must be an array, got {}",
                    other
                ))),
            },
            Expression::Month(inner) => date_part(inner, doc, "$month", |d| d.month() as i64),
            Expression::Year(inner) => date_part(inner, doc, "$year", |d| d.year() as i64),
            Expression::DayOfMonth(inner) => date_part(inner, doc, "$dayOfMonth", |d| d.day() as i64),
            Expression::Add(items) => fold_numbers(items, doc, "$add", 0, |a, b| a.checked_add(b), |a, b| a + b),
            Expression::Multiply(items) => {
                fold_numbers(items, doc, "$multiply", 1, |a, b| a.checked_mul(b), |a, b| a * b)
            }
            Expression::Subtract(a, b) => {
                let (a, b) = (a.evaluate(doc)?, b.evaluate(doc)?);
                if a.is_null() || b.is_null() {
                    return Ok(Value::Null);
                }
                if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                    if let Some(diff) = x.checked_sub(y) {
                        return Ok(Value::from(diff));
                    }
                }
                Ok(Value::from(as_number(&a, "$subtract")? - as_number(&b, "$subtract")?))
            }
            Expression::Divide(a, b) => {
                let (a, b) = (a.evaluate(doc)?, b.evaluate(doc)?);
                if a.is_null() || b.is_null() {
                    return Ok(Value::Null);
                }
                let divisor = as_number(&b, "$divide")?;
                if divisor == 0.0 {
                    return Err(TinyDocError::AggregationError("can't $divide by zero".into()));
                }
                Ok(Value::from(as_number(&a, "$divide")? / divisor))
            }
        }
    }
}

fn date_part(
    inner: &Expression,
    doc: &Value,
    op: &str,
    part: impl Fn(&chrono::DateTime<chrono::Utc>) -> i64,
) -> Result<Value> {
    let value = inner.evaluate(doc)?;
    if value.is_null() {
        return Ok(Value::Null);
    }
    document::as_date(&value)
        .map(|d| Value::from(part(&d)))
        .ok_or_else(|| TinyDocError::AggregationError(format!("{} requires a date, got {}", op, value)))
}

fn as_number(value: &Value, op: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| TinyDocError::AggregationError(format!("{} only supports numeric types, got {}", op, value)))
}

fn fold_numbers(
    items: &[Expression],
    doc: &Value,
    op: &str,
    identity: i64,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    let mut int_acc = Some(identity);
    let mut float_acc = identity as f64;
    for item in items {
        let value = item.evaluate(doc)?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        let n = as_number(&value, op)?;
        int_acc = match (int_acc, value.as_i64()) {
            (Some(acc), Some(i)) => int_op(acc, i),
            _ => None,
        };
        float_acc = float_op(float_acc, n);
    }
    Ok(int_acc.map(Value::from).unwrap_or_else(|| Value::from(float_acc)))
}
