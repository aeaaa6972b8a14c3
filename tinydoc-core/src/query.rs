// src/query.rs
use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use crate::document::{self, Document};
use crate::error::{Result, TinyDocError};

/// Filter operators
#[derive(Debug, Clone)]
pub enum QueryOperator {
    // Comparison
    Eq(Value),           // implicit or $eq
    Ne(Value),           // $ne
    Gt(Value),           // $gt
    Gte(Value),          // $gte
    Lt(Value),           // $lt
    Lte(Value),          // $lte
    In(Vec<Value>),      // $in
    Nin(Vec<Value>),     // $nin

    // Element / array
    Exists(bool),        // $exists
    Size(usize),         // $size
    All(Vec<Value>),     // $all
    Regex(Regex),        // $regex + $options

    // Field-level negation of an operator document
    Not(Vec<QueryOperator>),

    // Logical (top level only)
    And(Vec<Query>),     // $and
    Or(Vec<Query>),      // $or
    Nor(Vec<Query>),     // $nor
}

/// Parsed filter. Conditions are ANDed; a field may appear more than once
/// (e.g. `{"stock": {"$gt": 5, "$lt": 20}}` yields two entries).
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub conditions: Vec<(String, QueryOperator)>,
}

impl Query {
    /// Empty query, matches everything
    pub fn new() -> Self {
        Query { conditions: Vec::new() }
    }

    /// Parse a filter document
    pub fn from_json(json: &Value) -> Result<Self> {
        let map = match json {
            Value::Object(map) => map,
            Value::Null => return Ok(Query::new()),
            other => {
                return Err(TinyDocError::InvalidQuery(format!("filter must be an object, got {}", other)))
            }
        };

        let mut query = Query::new();
        for (field, condition) in map {
            if field.starts_with('$') {
                let operator = Self::parse_logical_operator(field, condition)?;
                query.conditions.push((field.clone(), operator));
            } else {
                for operator in Self::parse_field_condition(condition)? {
                    query.conditions.push((field.clone(), operator));
                }
            }
        }

        Ok(query)
    }

    /// Parse $and / $or / $nor
    fn parse_logical_operator(op: &str, value: &Value) -> Result<QueryOperator> {
        let parse_branches = |value: &Value| -> Result<Vec<Query>> {
            match value {
                Value::Array(arr) if !arr.is_empty() => arr.iter().map(Self::from_json).collect(),
                _ => Err(TinyDocError::InvalidQuery(format!("{} requires a non-empty array", op))),
            }
        };

        match op {
            "$and" => Ok(QueryOperator::And(parse_branches(value)?)),
            "$or" => Ok(QueryOperator::Or(parse_branches(value)?)),
            "$nor" => Ok(QueryOperator::Nor(parse_branches(value)?)),
            _ => Err(TinyDocError::UnsupportedPredicate(format!("unknown top-level operator {}", op))),
        }
    }

    /// Parse the value side of `{field: condition}`
    fn parse_field_condition(condition: &Value) -> Result<Vec<QueryOperator>> {
        match condition {
            Value::Object(map) if is_operator_document(map) => Self::parse_operator_document(map),
            Value::Object(map) if map.keys().any(|k| k.starts_with('$')) && !is_extended_literal(map) => {
                Err(TinyDocError::InvalidQuery(
                    "cannot mix operators and plain fields in one condition".to_string(),
                ))
            }
            // Plain value or embedded document: equality
            _ => Ok(vec![QueryOperator::Eq(condition.clone())]),
        }
    }

    fn parse_operator_document(map: &Map<String, Value>) -> Result<Vec<QueryOperator>> {
        let mut operators = Vec::new();

        if map.contains_key("$options") && !map.contains_key("$regex") {
            return Err(TinyDocError::InvalidQuery("$options requires $regex".to_string()));
        }

        for (op, val) in map {
            let operator = match op.as_str() {
                "$eq" => QueryOperator::Eq(val.clone()),
                "$ne" => QueryOperator::Ne(val.clone()),
                "$gt" => QueryOperator::Gt(val.clone()),
                "$gte" => QueryOperator::Gte(val.clone()),
                "$lt" => QueryOperator::Lt(val.clone()),
                "$lte" => QueryOperator::Lte(val.clone()),
                "$in" => QueryOperator::In(expect_array(op, val)?),
                "$nin" => QueryOperator::Nin(expect_array(op, val)?),
                "$all" => QueryOperator::All(expect_array(op, val)?),
                "$exists" => match val {
                    Value::Bool(b) => QueryOperator::Exists(*b),
                    Value::Number(n) => QueryOperator::Exists(n.as_f64() != Some(0.0)),
                    _ => return Err(TinyDocError::InvalidQuery("$exists requires bool".into())),
                },
                "$size" => match val.as_u64() {
                    Some(n) => QueryOperator::Size(n as usize),
                    None => {
                        return Err(TinyDocError::InvalidQuery(
                            "$size requires a non-negative integer".into(),
                        ))
                    }
                },
                "$regex" => {
                    let pattern = val
                        .as_str()
                        .ok_or_else(|| TinyDocError::InvalidQuery("$regex requires string".into()))?;
                    let options = match map.get("$options") {
                        Some(Value::String(s)) => s.as_str(),
                        Some(_) => return Err(TinyDocError::InvalidQuery("$options requires string".into())),
                        None => "",
                    };
                    QueryOperator::Regex(compile_regex(pattern, options)?)
                }
                "$options" => continue, // consumed by $regex
                "$not" => match val {
                    Value::Object(inner) if is_operator_document(inner) => {
                        QueryOperator::Not(Self::parse_operator_document(inner)?)
                    }
                    _ => {
                        return Err(TinyDocError::InvalidQuery(
                            "$not requires an operator document".into(),
                        ))
                    }
                },
                _ => return Err(TinyDocError::UnsupportedPredicate(op.clone())),
            };
            operators.push(operator);
        }

        Ok(operators)
    }

    /// Does the document match this query
    pub fn matches(&self, document: &Document) -> bool {
        self.matches_map(document.fields())
    }

    /// Match a raw JSON value (aggregation intermediates have no typed id)
    pub fn matches_value(&self, value: &Value) -> bool {
        match value {
            Value::Object(map) => self.matches_map(map),
            _ => self.conditions.is_empty(),
        }
    }

    pub fn matches_map(&self, fields: &Map<String, Value>) -> bool {
        self.conditions.iter().all(|(field, operator)| match operator {
            QueryOperator::And(queries) => queries.iter().all(|q| q.matches_map(fields)),
            QueryOperator::Or(queries) => queries.iter().any(|q| q.matches_map(fields)),
            QueryOperator::Nor(queries) => !queries.iter().any(|q| q.matches_map(fields)),
            _ => Self::matches_operator(document::get_path(fields, field), operator),
        })
    }

    /// Fields referenced at the top level with equality or range operators,
    /// in filter order. Used by the planner.
    pub fn indexable_fields(&self) -> Vec<(&str, &QueryOperator)> {
        self.conditions
            .iter()
            .filter(|(_, op)| {
                matches!(
                    op,
                    QueryOperator::Eq(_)
                        | QueryOperator::Gt(_)
                        | QueryOperator::Gte(_)
                        | QueryOperator::Lt(_)
                        | QueryOperator::Lte(_)
                        | QueryOperator::In(_)
                )
            })
            .map(|(field, op)| (field.as_str(), op))
            .collect()
    }

    fn matches_operator(value: Option<&Value>, operator: &QueryOperator) -> bool {
        match operator {
            QueryOperator::Eq(target) => matches_eq(value, target),

            QueryOperator::Ne(target) => !matches_eq(value, target),

            QueryOperator::Gt(target) => matches_cmp(value, target, |o| o == Ordering::Greater),

            QueryOperator::Gte(target) => matches_cmp(value, target, |o| o != Ordering::Less),

            QueryOperator::Lt(target) => matches_cmp(value, target, |o| o == Ordering::Less),

            QueryOperator::Lte(target) => matches_cmp(value, target, |o| o != Ordering::Greater),

            QueryOperator::In(targets) => targets.iter().any(|t| matches_eq(value, t)),

            QueryOperator::Nin(targets) => !targets.iter().any(|t| matches_eq(value, t)),

            QueryOperator::Exists(should_exist) => value.is_some() == *should_exist,

            QueryOperator::Size(n) => matches!(value, Some(Value::Array(items)) if items.len() == *n),

            QueryOperator::All(targets) => {
                !targets.is_empty() && targets.iter().all(|t| matches_eq(value, t))
            }

            QueryOperator::Regex(re) => match value {
                Some(Value::String(s)) => re.is_match(s),
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| item.as_str().map_or(false, |s| re.is_match(s))),
                _ => false,
            },

            // A missing field fails every inner operator, so $not matches it
            QueryOperator::Not(inner) => !inner.iter().all(|op| Self::matches_operator(value, op)),

            QueryOperator::And(_) | QueryOperator::Or(_) | QueryOperator::Nor(_) => false,
        }
    }
}

/// `{"$date": ..}` and `{"$oid": ..}` are values, not operators
fn is_extended_literal(map: &Map<String, Value>) -> bool {
    map.len() == 1 && (map.contains_key("$date") || map.contains_key("$oid"))
}

fn is_operator_document(map: &Map<String, Value>) -> bool {
    !map.is_empty() && !is_extended_literal(map) && map.keys().all(|k| k.starts_with('$'))
}

fn expect_array(op: &str, value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(arr) => Ok(arr.clone()),
        _ => Err(TinyDocError::InvalidQuery(format!("{} requires array", op))),
    }
}

/// Build a regex honoring MongoDB-style option letters
pub fn compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(TinyDocError::InvalidQuery(format!("unknown $regex option '{}'", other)))
            }
        };
    }
    builder
        .build()
        .map_err(|e| TinyDocError::InvalidQuery(format!("invalid $regex '{}': {}", pattern, e)))
}

/// Equality with implicit array membership: `{tags: "natural"}` matches
/// `tags: ["natural", "orgánico"]`. A missing field equals null.
fn matches_eq(value: Option<&Value>, target: &Value) -> bool {
    match value {
        None => target.is_null(),
        Some(v) => {
            values_equal(v, target)
                || matches!(v, Value::Array(items) if items.iter().any(|item| values_equal(item, target)))
        }
    }
}

fn matches_cmp(value: Option<&Value>, target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Value::Array(items)) if !target.is_array() => items
            .iter()
            .any(|item| compare_values(item, target).map_or(false, &accept)),
        Some(v) => compare_values(v, target).map_or(false, accept),
    }
}

/// Equality where `5` and `5.0` are the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => match (n1.as_i64(), n2.as_i64()) {
            (Some(i1), Some(i2)) => i1 == i2,
            _ => n1.as_f64() == n2.as_f64(),
        },
        _ => a == b,
    }
}

/// Comparison between values of the same kind (numbers, strings, dates,
/// booleans). Mixed kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => match (n1.as_i64(), n2.as_i64()) {
            (Some(i1), Some(i2)) => Some(i1.cmp(&i2)),
            _ => n1.as_f64()?.partial_cmp(&n2.as_f64()?),
        },
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        (Value::Object(_), Value::Object(_)) if document::is_date(a) && document::is_date(b) => {
            Some(document::as_date(a)?.cmp(&document::as_date(b)?))
        }
        _ => None,
    }
}
