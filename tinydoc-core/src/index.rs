// src/index.rs
// Secondary indexes: ordered compound keys -> document ids

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::document::{self, Document, DocumentId};
use crate::error::{Result, TinyDocError};

/// Name of the implicit primary-key index
pub const ID_INDEX_NAME: &str = "_id_";

/// Index key - one component per indexed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat),
    String(String),
    Date(i64),          // milliseconds since epoch
    Composite(String),  // arrays and embedded documents, compared as canonical JSON
}

/// OrderedFloat wrapper for f64 to enable Ord
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        use IndexKey::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.cmp(b),
            // Numbers compare by value across representations
            (Int(a), Float(b)) => OrderedFloat(*a as f64).cmp(b).then(Ordering::Less),
            (Float(a), Int(b)) => a.cmp(&OrderedFloat(*b as f64)).then(Ordering::Greater),
            (String(a), String(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Composite(a), Composite(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl IndexKey {
    fn rank(&self) -> u8 {
        match self {
            IndexKey::Null => 0,
            IndexKey::Int(_) | IndexKey::Float(_) => 1,
            IndexKey::String(_) => 2,
            IndexKey::Composite(_) => 3,
            IndexKey::Bool(_) => 4,
            IndexKey::Date(_) => 5,
        }
    }
}

/// Convert serde_json::Value to IndexKey. Integral floats become `Int`
/// so that `5` and `5.0` collide in unique indexes.
impl From<&Value> for IndexKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => IndexKey::Null,
            Value::Bool(b) => IndexKey::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    IndexKey::Int(i)
                } else {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                        IndexKey::Int(f as i64)
                    } else {
                        IndexKey::Float(OrderedFloat(f))
                    }
                }
            }
            Value::String(s) => IndexKey::String(s.clone()),
            _ if document::is_date(value) => match document::as_date(value) {
                Some(date) => IndexKey::Date(date.timestamp_millis()),
                None => IndexKey::Composite(value.to_string()),
            },
            _ => IndexKey::Composite(value.to_string()),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Null => write!(f, "null"),
            IndexKey::Bool(b) => write!(f, "{}", b),
            IndexKey::Int(i) => write!(f, "{}", i),
            IndexKey::Float(x) => write!(f, "{}", x.0),
            IndexKey::String(s) => write!(f, "\"{}\"", s),
            IndexKey::Date(ms) => write!(f, "Date({})", ms),
            IndexKey::Composite(s) => write!(f, "{}", s),
        }
    }
}

/// Options accepted by `create_index`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexOptions {
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default)]
    pub name: Option<String>,
}

impl IndexOptions {
    pub fn unique() -> Self {
        IndexOptions { unique: true, ..Default::default() }
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    /// (field, direction) in key order; direction is 1 or -1
    pub keys: Vec<(String, i32)>,
    pub unique: bool,
    pub sparse: bool,
}

impl IndexDefinition {
    /// Parse a key spec such as `{"categoria": 1, "precio": 1}`
    pub fn from_json(keys: &Value, options: IndexOptions) -> Result<Self> {
        let map = match keys {
            Value::Object(map) if !map.is_empty() => map,
            _ => return Err(TinyDocError::IndexError("index keys must be a non-empty object".into())),
        };

        let mut parsed = Vec::with_capacity(map.len());
        for (field, direction) in map {
            match direction.as_i64() {
                Some(d @ (1 | -1)) => parsed.push((field.clone(), d as i32)),
                _ => {
                    return Err(TinyDocError::IndexError(format!(
                        "index direction for '{}' must be 1 or -1",
                        field
                    )))
                }
            }
        }

        let name = options.name.unwrap_or_else(|| default_index_name(&parsed));
        Ok(IndexDefinition { name, keys: parsed, unique: options.unique, sparse: options.sparse })
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(field, _)| field.as_str())
    }

    /// `{v: 2, key: {...}, name: ..., unique: true}` as reported by getIndexes
    pub fn describe(&self) -> Value {
        let mut key = Map::new();
        for (field, direction) in &self.keys {
            key.insert(field.clone(), json!(direction));
        }
        let mut out = Map::new();
        out.insert("v".to_string(), json!(2));
        out.insert("key".to_string(), Value::Object(key));
        out.insert("name".to_string(), json!(self.name));
        if self.unique && self.name != ID_INDEX_NAME {
            out.insert("unique".to_string(), json!(true));
        }
        if self.sparse {
            out.insert("sparse".to_string(), json!(true));
        }
        Value::Object(out)
    }
}

/// `field_1_other_-1`
pub fn default_index_name(keys: &[(String, i32)]) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{}_{}", field, direction))
        .collect::<Vec<_>>()
        .join("_")
}

/// One index: compound key -> ids having that key
#[derive(Debug, Clone)]
pub struct Index {
    pub definition: IndexDefinition,
    entries: BTreeMap<Vec<IndexKey>, BTreeSet<DocumentId>>,
}

impl Index {
    pub fn new(definition: IndexDefinition) -> Self {
        Index { definition, entries: BTreeMap::new() }
    }

    /// Key for a document; `None` for sparse indexes missing every field
    pub fn key_for(&self, doc: &Document) -> Option<Vec<IndexKey>> {
        let values: Vec<Option<&Value>> = self.definition.fields().map(|f| doc.get_path(f)).collect();
        if self.definition.sparse && values.iter().all(Option::is_none) {
            return None;
        }
        Some(
            values
                .into_iter()
                .map(|v| v.map_or(IndexKey::Null, IndexKey::from))
                .collect(),
        )
    }

    pub fn insert(&mut self, key: Vec<IndexKey>, doc_id: DocumentId) -> Result<()> {
        if self.definition.unique {
            if let Some(ids) = self.entries.get(&key) {
                if ids.iter().any(|id| *id != doc_id) {
                    return Err(self.violation_for(&key));
                }
            }
        }
        self.entries.entry(key).or_default().insert(doc_id);
        Ok(())
    }

    pub fn remove(&mut self, key: &[IndexKey], doc_id: &DocumentId) {
        if let Some(ids) = self.entries.get_mut(key) {
            ids.remove(doc_id);
            if ids.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    /// Ids stored under exactly `key`
    pub fn lookup(&self, key: &[IndexKey]) -> Vec<DocumentId> {
        self.entries
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of index entries (document ids, duplicates included) whose
    /// key starts with `prefix`
    pub fn count_prefix(&self, prefix: &[IndexKey]) -> usize {
        self.entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, ids)| ids.len())
            .sum()
    }

    /// Number of distinct keys
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    fn violation_for(&self, key: &[IndexKey]) -> TinyDocError {
        let rendered = self
            .definition
            .fields()
            .zip(key)
            .map(|(field, k)| format!("{}: {}", field, k))
            .collect::<Vec<_>>()
            .join(", ");
        TinyDocError::ConstraintViolation {
            index: self.definition.name.clone(),
            key: format!("{{ {} }}", rendered),
        }
    }
}

/// Index Manager - manages all indexes for a collection
#[derive(Debug, Clone)]
pub struct IndexManager {
    indexes: IndexMap<String, Index>,
}

impl IndexManager {
    /// New manager holding the unique `_id_` index
    pub fn new() -> Self {
        let id_index = Index::new(IndexDefinition {
            name: ID_INDEX_NAME.to_string(),
            keys: vec![("_id".to_string(), 1)],
            unique: true,
            sparse: false,
        });
        let mut indexes = IndexMap::new();
        indexes.insert(ID_INDEX_NAME.to_string(), id_index);
        IndexManager { indexes }
    }

    /// Build an index over `docs` and register it. Fails without
    /// registering anything when a unique build finds a duplicate.
    pub fn create_index<'a>(
        &mut self,
        definition: IndexDefinition,
        docs: impl IntoIterator<Item = &'a Document>,
    ) -> Result<String> {
        if let Some(existing) = self.indexes.get(&definition.name) {
            if existing.definition == definition {
                return Ok(definition.name);
            }
            return Err(TinyDocError::IndexError(format!(
                "an index named '{}' already exists with different options",
                definition.name
            )));
        }
        if let Some(existing) = self.indexes.values().find(|i| i.definition.keys == definition.keys) {
            if existing.definition.unique != definition.unique || existing.definition.sparse != definition.sparse {
                return Err(TinyDocError::IndexError(format!(
                    "index '{}' already covers these keys with different options",
                    existing.definition.name
                )));
            }
        }

        let mut index = Index::new(definition);
        for doc in docs {
            if let Some(key) = index.key_for(doc) {
                index.insert(key, doc.id.clone())?;
            }
        }

        let name = index.definition.name.clone();
        log::debug!("built index '{}' with {} keys", name, index.size());
        self.indexes.insert(name.clone(), index);
        Ok(name)
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        if name == ID_INDEX_NAME {
            return Err(TinyDocError::IndexError("cannot drop the _id_ index".into()));
        }
        self.indexes
            .shift_remove(name)
            .map(|_| ())
            .ok_or_else(|| TinyDocError::IndexError(format!("Index not found: {}", name)))
    }

    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.values()
    }

    /// Index names in creation order
    pub fn list_indexes(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    /// getIndexes-style descriptions
    pub fn describe(&self) -> Vec<Value> {
        self.indexes.values().map(|i| i.definition.describe()).collect()
    }

    /// Verify that replacing each `old` with its `new` (insert: no old,
    /// delete: no new) keeps every unique index unique, considering the
    /// whole batch at once. Nothing is modified.
    pub fn check_batch(&self, changes: &[(Option<&Document>, Option<&Document>)]) -> Result<()> {
        let leaving: BTreeSet<&DocumentId> = changes
            .iter()
            .filter_map(|(old, _)| old.map(|d| &d.id))
            .collect();

        for index in self.indexes.values().filter(|i| i.definition.unique) {
            let mut claimed: BTreeMap<Vec<IndexKey>, &DocumentId> = BTreeMap::new();
            for new in changes.iter().filter_map(|(_, new)| *new) {
                let Some(key) = index.key_for(new) else { continue };

                let taken = index
                    .entries
                    .get(&key)
                    .map_or(false, |ids| ids.iter().any(|id| *id != new.id && !leaving.contains(id)));
                let twice = claimed.get(&key).map_or(false, |id| **id != new.id);
                if taken || twice {
                    return Err(index.violation_for(&key));
                }
                claimed.insert(key, &new.id);
            }
        }
        Ok(())
    }

    /// Apply a batch already accepted by [`check_batch`]
    pub fn apply_batch(&mut self, changes: &[(Option<&Document>, Option<&Document>)]) {
        for index in self.indexes.values_mut() {
            for (old, _) in changes {
                if let Some(old) = old {
                    if let Some(key) = index.key_for(old) {
                        index.remove(&key, &old.id);
                    }
                }
            }
            for (_, new) in changes {
                if let Some(new) = new {
                    if let Some(key) = index.key_for(new) {
                        index.entries.entry(key).or_default().insert(new.id.clone());
                    }
                }
            }
        }
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}
