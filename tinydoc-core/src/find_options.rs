// src/find_options.rs
// Find query options: projection, sort, limit, skip

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::document::{self, get_value_path};
use crate::error::{Result, TinyDocError};
use crate::query::compare_values;

/// Field projection. `_id` is shown unless explicitly excluded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    fields: Vec<(String, bool)>,
}

impl Projection {
    /// Parse `{"nombre": 1, "_id": 0}`. Accepts 0/1 and booleans.
    /// Mixing inclusions and exclusions (other than `_id`) is rejected.
    pub fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| TinyDocError::InvalidQuery("projection must be an object".to_string()))?;

        let mut fields = Vec::with_capacity(obj.len());
        for (field, value) in obj {
            let include = match value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
                other => {
                    return Err(TinyDocError::InvalidQuery(format!(
                        "projection value for '{}' must be 0 or 1, got {}",
                        field, other
                    )))
                }
            };
            fields.push((field.clone(), include));
        }

        let projection = Projection { fields };
        if projection.has_inclusions() && projection.fields.iter().any(|(f, inc)| !inc && f != "_id") {
            return Err(TinyDocError::InvalidQuery(
                "projection cannot mix inclusion and exclusion".to_string(),
            ));
        }
        Ok(projection)
    }

    pub fn include<S: Into<String>>(mut self, field: S) -> Self {
        self.fields.push((field.into(), true));
        self
    }

    pub fn exclude<S: Into<String>>(mut self, field: S) -> Self {
        self.fields.push((field.into(), false));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn has_inclusions(&self) -> bool {
        self.fields.iter().any(|(_, include)| *include)
    }

    fn excludes(&self, field: &str) -> bool {
        self.fields.iter().any(|(f, include)| !include && f == field)
    }

    /// True when a parent path of `field` is included, so the whole
    /// subtree is already projected
    fn includes_ancestor_of(&self, field: &str) -> bool {
        self.fields.iter().any(|(f, include)| {
            *include && field.len() > f.len() && field.starts_with(f.as_str()) && field.as_bytes()[f.len()] == b'.'
        })
    }
}

/// Options for find queries
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Projection>,

    /// Sort: [(field, direction)], direction: 1 (asc) or -1 (desc)
    pub sort: Option<Vec<(String, i32)>>,

    /// Limit: maximum number of documents to return
    pub limit: Option<usize>,

    /// Skip: number of documents to skip (for pagination)
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{"projection": {...}, "sort": {...}, "limit": n, "skip": n}`
    pub fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| TinyDocError::InvalidQuery("find options must be an object".to_string()))?;

        let mut options = FindOptions::new();
        for (key, value) in obj {
            match key.as_str() {
                "projection" => options.projection = Some(Projection::from_json(value)?),
                "sort" => options.sort = Some(parse_sort(value)?),
                "limit" => options.limit = Some(parse_count(key, value)?),
                "skip" => options.skip = Some(parse_count(key, value)?),
                other => {
                    return Err(TinyDocError::InvalidQuery(format!("Unknown find option: {}", other)))
                }
            }
        }
        Ok(options)
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Vec<(String, i32)>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sort, then skip/limit, then project
    pub fn apply(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        if let Some(sort) = &self.sort {
            apply_sort(&mut docs, sort);
        }
        let docs = apply_limit_skip(docs, self.limit, self.skip);
        match &self.projection {
            Some(projection) => docs.iter().map(|d| apply_projection(d, projection)).collect(),
            None => Ok(docs),
        }
    }
}

/// Parse `{"precio": -1, "nombre": 1}` into sort keys
pub fn parse_sort(spec: &Value) -> Result<Vec<(String, i32)>> {
    let obj = spec
        .as_object()
        .ok_or_else(|| TinyDocError::InvalidQuery("sort must be an object".to_string()))?;
    obj.iter()
        .map(|(field, value)| match value.as_i64() {
            Some(1) => Ok((field.clone(), 1)),
            Some(-1) => Ok((field.clone(), -1)),
            _ => Err(TinyDocError::InvalidQuery(format!(
                "Sort direction for '{}' must be 1 or -1",
                field
            ))),
        })
        .collect()
}

fn parse_count(key: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| TinyDocError::InvalidQuery(format!("{} must be a non-negative integer", key)))
}

/// Apply projection to a document
pub fn apply_projection(doc: &Value, projection: &Projection) -> Result<Value> {
    let Value::Object(obj) = doc else {
        return Ok(doc.clone());
    };
    if projection.is_empty() {
        return Ok(doc.clone());
    }

    let mut result = Map::new();
    if projection.has_inclusions() {
        if !projection.excludes("_id") {
            if let Some(id) = obj.get("_id") {
                result.insert("_id".to_string(), id.clone());
            }
        }
        for (field, include) in &projection.fields {
            if !include || field == "_id" || projection.includes_ancestor_of(field) {
                continue;
            }
            if let Some(value) = document::get_path(obj, field) {
                document::set_path(&mut result, field, value.clone())?;
            }
        }
    } else {
        result = obj.clone();
        for (field, _) in &projection.fields {
            document::remove_path(&mut result, field);
        }
    }
    Ok(Value::Object(result))
}

/// Apply sort to documents. Stable: ties keep their input order.
pub fn apply_sort(docs: &mut [Value], sort: &[(String, i32)]) {
    if sort.is_empty() {
        return;
    }

    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let cmp = sort_order(get_value_path(a, field), get_value_path(b, field));
            if cmp != Ordering::Equal {
                return if *direction == 1 { cmp } else { cmp.reverse() };
            }
        }
        Ordering::Equal
    });
}

/// Total order used for sorting. Missing sorts like null.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);

    match type_priority(a).cmp(&type_priority(b)) {
        Ordering::Equal => {}
        other => return other,
    }
    if let Some(ordering) = compare_values(a, b) {
        return ordering;
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| sort_order(Some(l), Some(r)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Type priority for mixed-type sorting:
/// null < number < string < object < array < bool < date
fn type_priority(val: &Value) -> u8 {
    match val {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) if document::is_date(val) => 6,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Apply limit and skip to documents
pub fn apply_limit_skip(docs: Vec<Value>, limit: Option<usize>, skip: Option<usize>) -> Vec<Value> {
    let skip_count = skip.unwrap_or(0);
    let iter = docs.into_iter().skip(skip_count);
    match limit {
        Some(limit_count) => iter.take(limit_count).collect(),
        None => iter.collect(),
    }
}
