// src/update.rs
// Update operators applied to a matched document

use serde_json::{Map, Value};

use crate::document::Document;
use crate::error::{Result, TinyDocError};
use crate::query::values_equal;

/// A single update operation on one field path
#[derive(Debug, Clone)]
pub enum UpdateOperator {
    Set(String, Value),
    Unset(String),
    Inc(String, Value),
    Push(String, Vec<Value>),
    AddToSet(String, Vec<Value>),
    Pull(String, Value),
}

/// Parsed update document: either a list of operators or a full replacement
#[derive(Debug, Clone)]
pub enum UpdateSpec {
    Operators(Vec<UpdateOperator>),
    Replacement(Map<String, Value>),
}

impl UpdateSpec {
    pub fn from_json(update: &Value) -> Result<Self> {
        let map = match update {
            Value::Object(map) if !map.is_empty() => map,
            _ => return Err(TinyDocError::InvalidUpdate("update must be a non-empty object".into())),
        };

        let has_operators = map.keys().any(|k| k.starts_with('$'));
        if !has_operators {
            // A replacement may repeat the _id but not change it; checked in apply
            return Ok(UpdateSpec::Replacement(map.clone()));
        }
        if map.keys().any(|k| !k.starts_with('$')) {
            return Err(TinyDocError::InvalidUpdate(
                "cannot mix update operators and replacement fields".into(),
            ));
        }

        let mut operators = Vec::new();
        for (op, fields) in map {
            let fields = match fields {
                Value::Object(fields) => fields,
                _ => return Err(TinyDocError::InvalidUpdate(format!("{} requires an object", op))),
            };

            for (field, value) in fields {
                if field == "_id" || field.starts_with("_id.") {
                    return Err(TinyDocError::InvalidUpdate("_id is immutable".into()));
                }
                let operator = match op.as_str() {
                    "$set" => UpdateOperator::Set(field.clone(), value.clone()),
                    "$unset" => UpdateOperator::Unset(field.clone()),
                    "$inc" => {
                        if !value.is_number() {
                            return Err(TinyDocError::TypeMismatch(format!(
                                "$inc on '{}' requires a numeric delta, got {}",
                                field, value
                            )));
                        }
                        UpdateOperator::Inc(field.clone(), value.clone())
                    }
                    "$push" => UpdateOperator::Push(field.clone(), each_values(value)),
                    "$addToSet" => UpdateOperator::AddToSet(field.clone(), each_values(value)),
                    "$pull" => UpdateOperator::Pull(field.clone(), value.clone()),
                    _ => return Err(TinyDocError::InvalidUpdate(format!("Unsupported update operator: {}", op))),
                };
                operators.push(operator);
            }
        }

        Ok(UpdateSpec::Operators(operators))
    }

    /// Apply to a copy of `document`; the original is untouched on failure.
    /// Returns `None` when the update changes nothing.
    pub fn apply(&self, document: &Document) -> Result<Option<Document>> {
        let mut updated = document.clone();

        match self {
            UpdateSpec::Replacement(fields) => {
                if let Some(id) = fields.get("_id") {
                    if !values_equal(id, &document.id.to_value()) {
                        return Err(TinyDocError::InvalidUpdate("_id is immutable".into()));
                    }
                }
                updated = Document::new(document.id.clone(), fields.clone());
            }
            UpdateSpec::Operators(operators) => {
                for operator in operators {
                    apply_operator(&mut updated, operator)?;
                }
            }
        }

        if updated == *document {
            Ok(None)
        } else {
            Ok(Some(updated))
        }
    }
}

/// `{"$push": {"tags": {"$each": [..]}}}` or a single value
fn each_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Object(map) if map.len() == 1 => match map.get("$each") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        _ => vec![value.clone()],
    }
}

fn apply_operator(document: &mut Document, operator: &UpdateOperator) -> Result<()> {
    match operator {
        UpdateOperator::Set(field, value) => document.set(field, value.clone()),

        UpdateOperator::Unset(field) => {
            document.remove(field);
            Ok(())
        }

        UpdateOperator::Inc(field, delta) => {
            let next = match document.get_path(field) {
                None => delta.clone(),
                Some(current) => add_numbers(current, delta).ok_or_else(|| {
                    TinyDocError::TypeMismatch(format!(
                        "cannot apply $inc to non-numeric field '{}' (value {})",
                        field, current
                    ))
                })?,
            };
            document.set(field, next)
        }

        UpdateOperator::Push(field, values) => {
            let mut items = existing_array(document, field, "$push")?;
            items.extend(values.iter().cloned());
            document.set(field, Value::Array(items))
        }

        UpdateOperator::AddToSet(field, values) => {
            let mut items = existing_array(document, field, "$addToSet")?;
            for value in values {
                if !items.iter().any(|item| values_equal(item, value)) {
                    items.push(value.clone());
                }
            }
            document.set(field, Value::Array(items))
        }

        UpdateOperator::Pull(field, value) => match document.get_path(field) {
            None => Ok(()),
            Some(Value::Array(items)) => {
                let kept: Vec<Value> = items
                    .iter()
                    .filter(|item| !values_equal(item, value))
                    .cloned()
                    .collect();
                document.set(field, Value::Array(kept))
            }
            Some(other) => Err(TinyDocError::TypeMismatch(format!(
                "cannot apply $pull to non-array field '{}' (value {})",
                field, other
            ))),
        },
    }
}

fn existing_array(document: &Document, field: &str, op: &str) -> Result<Vec<Value>> {
    match document.get_path(field) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(TinyDocError::TypeMismatch(format!(
            "cannot apply {} to non-array field '{}' (value {})",
            op, field, other
        ))),
    }
}

/// Integer + integer stays integer; anything else widens to f64
fn add_numbers(current: &Value, delta: &Value) -> Option<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Some(Value::from(sum));
        }
    }
    let (a, b) = (current.as_f64()?, delta.as_f64()?);
    Some(Value::from(a + b))
}
