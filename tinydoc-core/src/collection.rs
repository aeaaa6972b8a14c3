// src/collection.rs
// In-memory collection: documents in insertion order plus their indexes

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::aggregation::Pipeline;
use crate::document::{Document, DocumentId};
use crate::error::{Result, TinyDocError};
use crate::find_options::{apply_projection, FindOptions, Projection};
use crate::index::{IndexDefinition, IndexManager, IndexOptions};
use crate::query::{values_equal, Query};
use crate::query_planner::{QueryPlan, QueryPlanner};
use crate::update::UpdateSpec;

/// Result of `update_one` / `update_many`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Result of `delete_one` / `delete_many`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// One resolved document change: `(before, after)`.
/// Insert has no `before`, delete has no `after`.
pub type DocumentChange = (Option<Document>, Option<Document>);

#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    documents: IndexMap<DocumentId, Document>,
    indexes: IndexManager,
}

impl Collection {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Collection {
            name: name.into(),
            documents: IndexMap::new(),
            indexes: IndexManager::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Documents in insertion order. Borrowed, never copied.
    pub fn iter(&self) -> impl Iterator<Item = &Document> + '_ {
        self.documents.values()
    }

    pub fn find_by_id(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    // ========== WRITES ==========

    /// Insert a document. On `DuplicateKey` or `ConstraintViolation` the
    /// collection is unchanged.
    pub fn insert(&mut self, doc: Document) -> Result<DocumentId> {
        if self.documents.contains_key(&doc.id) {
            return Err(TinyDocError::DuplicateKey {
                collection: self.name.clone(),
                id: doc.id.to_string(),
            });
        }
        self.indexes.check_batch(&[(None, Some(&doc))])?;
        self.indexes.apply_batch(&[(None, Some(&doc))]);

        let id = doc.id.clone();
        log::debug!("{}: inserted {}", self.name, id);
        self.documents.insert(id.clone(), doc);
        Ok(id)
    }

    pub fn insert_one(&mut self, value: Value) -> Result<DocumentId> {
        self.insert(Document::from_value(value)?)
    }

    /// Ordered insert: stops at the first failure. Documents before the
    /// failing one stay inserted.
    pub fn insert_many(&mut self, values: Vec<Value>) -> Result<Vec<DocumentId>> {
        let mut ids = Vec::with_capacity(values.len());
        for (position, value) in values.into_iter().enumerate() {
            match self.insert_one(value) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    log::debug!("{}: insert_many stopped at position {}: {}", self.name, position, e);
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    /// Replace the stored document with the same `_id`
    pub fn replace_by_id(&mut self, doc: Document) -> Result<Document> {
        let old = self
            .documents
            .get(&doc.id)
            .cloned()
            .ok_or(TinyDocError::DocumentNotFound)?;
        self.indexes.check_batch(&[(Some(&old), Some(&doc))])?;
        self.indexes.apply_batch(&[(Some(&old), Some(&doc))]);
        self.documents.insert(doc.id.clone(), doc);
        Ok(old)
    }

    pub fn delete_by_id(&mut self, id: &DocumentId) -> Option<Document> {
        let old = self.documents.shift_remove(id)?;
        self.indexes.apply_batch(&[(Some(&old), None)]);
        log::debug!("{}: deleted {}", self.name, id);
        Some(old)
    }

    pub fn update_one(&mut self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        let (result, _) = self.update_matching(filter, update, true)?;
        Ok(result)
    }

    pub fn update_many(&mut self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        let (result, _) = self.update_matching(filter, update, false)?;
        Ok(result)
    }

    /// Apply an update to the first (or every) match and return the
    /// resolved changes. Either every change is written or none is.
    pub fn update_matching(
        &mut self,
        filter: &Value,
        update: &Value,
        only_first: bool,
    ) -> Result<(UpdateResult, Vec<DocumentChange>)> {
        let query = Query::from_json(filter)?;
        let spec = UpdateSpec::from_json(update)?;

        let mut matched_count = 0u64;
        let mut updated = Vec::new();
        for doc in self.documents.values().filter(|d| query.matches(d)) {
            matched_count += 1;
            if let Some(new_doc) = spec.apply(doc)? {
                updated.push(new_doc);
            }
            if only_first {
                break;
            }
        }

        let pairs: Vec<(Option<&Document>, Option<&Document>)> = updated
            .iter()
            .map(|new_doc| (self.documents.get(&new_doc.id), Some(new_doc)))
            .collect();
        self.indexes.check_batch(&pairs)?;
        self.indexes.apply_batch(&pairs);
        let changes: Vec<DocumentChange> = pairs
            .into_iter()
            .map(|(old, new)| (old.cloned(), new.cloned()))
            .collect();

        let modified_count = updated.len() as u64;
        for new_doc in updated {
            // Existing key: position is kept
            self.documents.insert(new_doc.id.clone(), new_doc);
        }

        log::debug!(
            "{}: update matched {} modified {}",
            self.name,
            matched_count,
            modified_count
        );
        Ok((UpdateResult { matched_count, modified_count }, changes))
    }

    pub fn delete_one(&mut self, filter: &Value) -> Result<DeleteResult> {
        let (result, _) = self.delete_matching(filter, true)?;
        Ok(result)
    }

    pub fn delete_many(&mut self, filter: &Value) -> Result<DeleteResult> {
        let (result, _) = self.delete_matching(filter, false)?;
        Ok(result)
    }

    /// Delete the first (or every) match and return the removed documents
    pub fn delete_matching(&mut self, filter: &Value, only_first: bool) -> Result<(DeleteResult, Vec<Document>)> {
        let query = Query::from_json(filter)?;
        let ids: Vec<DocumentId> = self
            .documents
            .values()
            .filter(|d| query.matches(d))
            .take(if only_first { 1 } else { usize::MAX })
            .map(|d| d.id.clone())
            .collect();

        let removed: Vec<Document> = ids.iter().filter_map(|id| self.delete_by_id(id)).collect();
        Ok((DeleteResult { deleted_count: removed.len() as u64 }, removed))
    }

    // ========== READS ==========

    /// Matching documents, borrowed, in insertion order
    pub fn matching<'a>(&'a self, query: &'a Query) -> impl Iterator<Item = &'a Document> + 'a {
        self.documents.values().filter(move |d| query.matches(d))
    }

    /// Find with an optional projection (`{"nombre": 1, "_id": 0}`)
    pub fn find(&self, filter: &Value, projection: Option<&Value>) -> Result<Vec<Value>> {
        let query = Query::from_json(filter)?;
        let projection = projection.map(Projection::from_json).transpose()?;

        self.matching(&query)
            .map(|d| match &projection {
                Some(p) => apply_projection(&d.to_value(), p),
                None => Ok(d.to_value()),
            })
            .collect()
    }

    /// Find documents with options (projection, sort, limit, skip)
    pub fn find_with_options(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Value>> {
        let query = Query::from_json(filter)?;
        let docs = self.matching(&query).map(Document::to_value).collect();
        options.apply(docs)
    }

    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        let query = Query::from_json(filter)?;
        let first = self.matching(&query).next().map(Document::to_value);
        Ok(first)
    }

    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        let query = Query::from_json(filter)?;
        Ok(self.matching(&query).count() as u64)
    }

    /// Distinct values of `field` among matches. Array values contribute
    /// their elements. First-seen order.
    pub fn distinct(&self, field: &str, filter: &Value) -> Result<Vec<Value>> {
        let query = Query::from_json(filter)?;
        let mut values: Vec<Value> = Vec::new();

        let mut push = |value: &Value| {
            if !values.iter().any(|v| values_equal(v, value)) {
                values.push(value.clone());
            }
        };
        for doc in self.matching(&query) {
            match doc.get_path(field) {
                Some(Value::Array(items)) => items.iter().for_each(&mut push),
                Some(value) => push(value),
                None => {}
            }
        }
        Ok(values)
    }

    pub fn aggregate(&self, pipeline: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(pipeline)?;
        let docs = self.documents.values().map(Document::to_value).collect();
        pipeline.execute(docs)
    }

    // ========== INDEXES ==========

    /// Create an index over `keys` (`{"nombre": 1}`), returning its name
    pub fn create_index(&mut self, keys: &Value, options: IndexOptions) -> Result<String> {
        let definition = IndexDefinition::from_json(keys, options)?;
        self.indexes.create_index(definition, self.documents.values())
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.indexes.drop_index(name)?;
        log::debug!("{}: dropped index '{}'", self.name, name);
        Ok(())
    }

    /// getIndexes-style listing
    pub fn get_indexes(&self) -> Vec<Value> {
        self.indexes.describe()
    }

    /// Report how `filter` would be answered. Results are unaffected.
    pub fn explain(&self, filter: &Value) -> Result<Value> {
        let query = Query::from_json(filter)?;
        let plan = QueryPlanner::plan(&query, &self.indexes);
        let returned = self.matching(&query).count();

        let (keys_examined, docs_examined) = match &plan {
            QueryPlan::CollectionScan => (0, self.documents.len()),
            QueryPlan::IndexScan { index_name, equality_prefix, .. } => {
                let keys = match (equality_prefix, self.indexes.get(index_name)) {
                    (Some(prefix), Some(index)) => index.count_prefix(prefix),
                    _ => {
                        let bounds = QueryPlanner::index_bounds(&query, &plan);
                        self.matching(&bounds).count()
                    }
                };
                (keys, keys)
            }
        };

        log::debug!("{}: explain chose {:?}", self.name, plan.index_name());
        Ok(QueryPlanner::explain(
            &self.name,
            filter,
            &plan,
            &self.indexes,
            keys_examined,
            docs_examined,
            returned,
        ))
    }

    pub fn stats(&self) -> Value {
        let index_sizes: serde_json::Map<String, Value> = self
            .indexes
            .iter()
            .map(|i| (i.definition.name.clone(), json!(i.size())))
            .collect();
        json!({
            "ns": self.name,
            "count": self.documents.len(),
            "nindexes": index_sizes.len(),
            "indexSizes": index_sizes,
        })
    }
}
