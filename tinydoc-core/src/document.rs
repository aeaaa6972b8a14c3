// src/document.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, TinyDocError};

/// Document ID types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    String(String),
    ObjectId(String),  // UUID string, written as {"$oid": ...}
}

impl DocumentId {
    /// New ObjectId (UUID v4)
    pub fn new_object_id() -> Self {
        DocumentId::ObjectId(Uuid::new_v4().to_string())
    }

    /// Read an `_id` value. Integral floats collapse to `Int` so that
    /// `11` and `11.0` name the same document.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(DocumentId::Int(i))
                } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64) {
                    Ok(DocumentId::Int(f as i64))
                } else {
                    Err(TinyDocError::TypeMismatch(format!("_id must be an integer, got {}", n)))
                }
            }
            Value::String(s) => Ok(DocumentId::String(s.clone())),
            Value::Object(map) if map.len() == 1 => match map.get("$oid") {
                Some(Value::String(oid)) => Ok(DocumentId::ObjectId(oid.clone())),
                _ => Err(TinyDocError::TypeMismatch(format!("unsupported _id value: {}", value))),
            },
            other => Err(TinyDocError::TypeMismatch(format!("unsupported _id value: {}", other))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(i) => Value::from(*i),
            DocumentId::String(s) => Value::String(s.clone()),
            DocumentId::ObjectId(oid) => {
                let mut map = Map::new();
                map.insert("$oid".to_string(), Value::String(oid.clone()));
                Value::Object(map)
            }
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(i) => write!(f, "{}", i),
            DocumentId::String(s) => write!(f, "\"{}\"", s),
            DocumentId::ObjectId(oid) => write!(f, "ObjectId(\"{}\")", oid),
        }
    }
}

/// Schema-free document. `fields` always carries `_id` as its first entry,
/// mirroring `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    fields: Map<String, Value>,
}

impl Document {
    /// New document from an id and the remaining fields (any `_id` in
    /// `fields` is replaced)
    pub fn new(id: DocumentId, fields: Map<String, Value>) -> Self {
        let mut all = Map::new();
        all.insert("_id".to_string(), id.to_value());
        for (k, v) in fields {
            if k != "_id" {
                all.insert(k, v);
            }
        }
        Document { id, fields: all }
    }

    /// Document from a JSON object; a missing `_id` gets a fresh ObjectId
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(mut map) => {
                let id = match map.get("_id") {
                    Some(id_value) => DocumentId::from_value(id_value)?,
                    None => DocumentId::new_object_id(),
                };
                map.shift_remove("_id");
                Ok(Document::new(id, map))
            }
            other => Err(TinyDocError::TypeMismatch(format!("document must be an object, got {}", other))),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Document::from_value(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// All fields including `_id`
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Top-level field lookup (`_id` included)
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Dotted-path lookup, e.g. `contacto.email` or `tags.0`
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        get_path(&self.fields, path)
    }

    /// Set a (possibly dotted) field. `_id` cannot be changed this way.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        if path == "_id" || path.starts_with("_id.") {
            return Err(TinyDocError::InvalidUpdate("_id is immutable".to_string()));
        }
        set_path(&mut self.fields, path, value)
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        if path == "_id" {
            return None;
        }
        remove_path(&mut self.fields, path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get_path(path).is_some()
    }

    /// Number of fields, `_id` excluded
    pub fn len(&self) -> usize {
        self.fields.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.fields)
    }
}

/// Resolve a dotted path inside an object. Numeric segments index arrays.
pub fn get_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(inner) => inner.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Same as [`get_path`] for an arbitrary value (non-objects resolve nothing)
pub fn get_value_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => get_path(map, path),
        _ => None,
    }
}

/// Set a dotted path, creating intermediate objects as needed
pub fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) -> Result<()> {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match child {
                Value::Object(inner) => set_path(inner, rest, value),
                other => Err(TinyDocError::TypeMismatch(format!(
                    "cannot create field '{}' inside non-object value {}",
                    rest, other
                ))),
            }
        }
    }
}

pub fn remove_path(map: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => map.shift_remove(path),
        Some((head, rest)) => match map.get_mut(head)? {
            Value::Object(inner) => remove_path(inner, rest),
            _ => None,
        },
    }
}

/// Extended-JSON date value: `{"$date": "<RFC 3339>"}`
pub fn date_value(date: DateTime<Utc>) -> Value {
    let mut map = Map::new();
    map.insert("$date".to_string(), Value::String(date.to_rfc3339()));
    Value::Object(map)
}

/// Read a date written by [`date_value`] (or a bare RFC 3339 string)
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    let raw = match value {
        Value::Object(map) if map.len() == 1 => map.get("$date")?.as_str()?,
        Value::String(s) => s.as_str(),
        _ => return None,
    };
    DateTime::parse_from_rfc3339(raw).ok().map(|d| d.with_timezone(&Utc))
}

pub fn is_date(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1 && map.contains_key("$date"))
}
