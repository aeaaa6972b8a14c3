// src/database.rs
// Database context: collection registry, procedures and the writer slot

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use crate::collection::{Collection, DeleteResult, UpdateResult};
use crate::document::{Document, DocumentId};
use crate::error::{Result, TinyDocError};
use crate::find_options::FindOptions;
use crate::index::IndexOptions;
use crate::options::DatabaseOptions;
use crate::procedures::ProcedureRegistry;
use crate::session::{Session, SessionId};
use crate::transaction::{Operation, TransactionId};

struct DatabaseInner {
    options: DatabaseOptions,
    collections: RwLock<IndexMap<String, Collection>>,
    procedures: ProcedureRegistry,
    /// Session holding the single transaction slot
    writer: Mutex<Option<SessionId>>,
    next_session_id: AtomicU64,
    next_tx_id: AtomicU64,
}

/// In-memory database. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.options.name)
            .field("collections", &self.list_collections())
            .finish()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Database with default options
    pub fn new() -> Self {
        Self::build(DatabaseOptions::default())
    }

    pub fn with_options(options: DatabaseOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::build(options))
    }

    fn build(options: DatabaseOptions) -> Self {
        log::info!("opening in-memory database '{}'", options.name);
        Database {
            inner: Arc::new(DatabaseInner {
                options,
                collections: RwLock::new(IndexMap::new()),
                procedures: ProcedureRegistry::new(),
                writer: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    // ========== COLLECTIONS ==========

    /// Handle to a collection. With `auto_create_collections` the
    /// collection comes into existence on its first write.
    pub fn collection(&self, name: &str) -> Result<CollectionHandle> {
        if name.is_empty() {
            return Err(TinyDocError::InvalidQuery("collection name cannot be empty".to_string()));
        }
        if !self.inner.options.auto_create_collections && !self.inner.collections.read().contains_key(name) {
            return Err(TinyDocError::CollectionNotFound(name.to_string()));
        }
        Ok(CollectionHandle {
            db: self.clone(),
            name: name.to_string(),
        })
    }

    pub fn create_collection(&self, name: &str) -> Result<CollectionHandle> {
        if name.is_empty() {
            return Err(TinyDocError::InvalidQuery("collection name cannot be empty".to_string()));
        }
        {
            let mut collections = self.inner.collections.write();
            if collections.contains_key(name) {
                return Err(TinyDocError::CollectionExists(name.to_string()));
            }
            collections.insert(name.to_string(), Collection::new(name));
        }
        log::debug!("created collection '{}'", name);
        Ok(CollectionHandle {
            db: self.clone(),
            name: name.to_string(),
        })
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        match self.inner.collections.write().shift_remove(name) {
            Some(_) => {
                log::debug!("dropped collection '{}'", name);
                Ok(())
            }
            None => Err(TinyDocError::CollectionNotFound(name.to_string())),
        }
    }

    /// Collection names in creation order
    pub fn list_collections(&self) -> Vec<String> {
        self.inner.collections.read().keys().cloned().collect()
    }

    /// Run `f` against the committed collection. A missing collection
    /// reads as empty when auto-creation is on.
    pub(crate) fn read_collection<R>(&self, name: &str, f: impl FnOnce(&Collection) -> Result<R>) -> Result<R> {
        let collections = self.inner.collections.read();
        match collections.get(name) {
            Some(collection) => f(collection),
            None if self.inner.options.auto_create_collections => f(&Collection::new(name)),
            None => Err(TinyDocError::CollectionNotFound(name.to_string())),
        }
    }

    /// Run a write against the committed collection. A missing collection
    /// is registered once it holds documents, even when `f` fails part way
    /// (ordered `insert_many` keeps its prefix).
    pub(crate) fn write_collection<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection) -> Result<R>,
    ) -> Result<R> {
        let mut collections = self.inner.collections.write();
        if let Some(collection) = collections.get_mut(name) {
            return f(collection);
        }
        if !self.inner.options.auto_create_collections {
            return Err(TinyDocError::CollectionNotFound(name.to_string()));
        }
        let mut collection = Collection::new(name);
        let result = f(&mut collection);
        if result.is_ok() || !collection.is_empty() {
            collections.insert(name.to_string(), collection);
        }
        result
    }

    /// Private copy of the committed collection for a transaction
    pub(crate) fn snapshot(&self, name: &str) -> Result<Collection> {
        self.read_collection(name, |collection| Ok(collection.clone()))
    }

    /// Replay `operations` on copies of the committed collections and
    /// swap the copies in only if every operation succeeds
    pub(crate) fn commit_operations(&self, operations: &[Operation]) -> Result<()> {
        let mut collections = self.inner.collections.write();
        let mut working: IndexMap<String, Collection> = IndexMap::new();

        for op in operations {
            let name = op.collection();
            if !working.contains_key(name) {
                let base = match collections.get(name) {
                    Some(committed) => committed.clone(),
                    None if self.inner.options.auto_create_collections => Collection::new(name),
                    None => return Err(TinyDocError::CollectionNotFound(name.to_string())),
                };
                working.insert(name.to_string(), base);
            }
            if let Some(target) = working.get_mut(name) {
                op.replay(target)?;
            }
        }

        for (name, collection) in working {
            collections.insert(name, collection);
        }
        Ok(())
    }

    // ========== SESSIONS & TRANSACTIONS ==========

    pub fn start_session(&self) -> Session {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        log::debug!("session {} started", id);
        Session::new(id, self.clone())
    }

    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        self.inner.next_tx_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Claim the single writer slot for `session`
    pub(crate) fn acquire_writer(&self, session: SessionId) -> Result<()> {
        let mut writer = self.inner.writer.lock();
        match *writer {
            Some(holder) if holder != session => Err(TinyDocError::TransactionInProgress(holder)),
            _ => {
                *writer = Some(session);
                Ok(())
            }
        }
    }

    pub(crate) fn release_writer(&self, session: SessionId) {
        let mut writer = self.inner.writer.lock();
        if *writer == Some(session) {
            *writer = None;
        }
    }

    /// Session currently holding the transaction slot
    pub fn active_session(&self) -> Option<SessionId> {
        *self.inner.writer.lock()
    }

    /// Run `f` inside a transaction: start, commit on success, abort on
    /// error, and always end the session
    pub fn with_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> Result<R>,
    {
        let mut session = self.start_session();
        session.start_transaction()?;

        let outcome = match f(&mut session) {
            Ok(value) => session.commit_transaction().map(|_| value),
            Err(e) => {
                log::warn!("transaction in session {} failed: {}", session.id(), e);
                if session.in_transaction() {
                    session.abort_transaction()?;
                }
                Err(e)
            }
        };

        session.end_session();
        outcome
    }

    // ========== STORED PROCEDURES ==========

    pub fn procedures(&self) -> &ProcedureRegistry {
        &self.inner.procedures
    }

    pub fn define<S, F>(&self, name: S, procedure: F)
    where
        S: Into<String>,
        F: Fn(&Database, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.inner.procedures.define(name, procedure);
    }

    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.inner.procedures.invoke(self, name, args)
    }

    pub fn stats(&self) -> Value {
        let collections = self.inner.collections.read();
        let objects: usize = collections.values().map(Collection::len).sum();
        let indexes: usize = collections.values().map(|c| c.indexes().iter().count()).sum();
        json!({
            "db": self.inner.options.name,
            "collections": collections.len(),
            "objects": objects,
            "indexes": indexes,
            "procedures": self.inner.procedures.names(),
            "activeSession": self.active_session(),
        })
    }
}

/// Handle forwarding the query surface to one collection's committed state
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    db: Database,
    name: String,
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert_one(&self, document: Value) -> Result<DocumentId> {
        let doc = Document::from_value(document)?;
        self.db.write_collection(&self.name, |c| c.insert(doc))
    }

    pub fn insert_many(&self, documents: Vec<Value>) -> Result<Vec<DocumentId>> {
        self.db.write_collection(&self.name, |c| c.insert_many(documents))
    }

    pub fn find(&self, filter: &Value, projection: Option<&Value>) -> Result<Vec<Value>> {
        self.db.read_collection(&self.name, |c| c.find(filter, projection))
    }

    pub fn find_with_options(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Value>> {
        self.db.read_collection(&self.name, |c| c.find_with_options(filter, options))
    }

    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        self.db.read_collection(&self.name, |c| c.find_one(filter))
    }

    pub fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>> {
        self.db.read_collection(&self.name, |c| Ok(c.find_by_id(id).cloned()))
    }

    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        self.db.read_collection(&self.name, |c| c.count_documents(filter))
    }

    pub fn distinct(&self, field: &str, filter: &Value) -> Result<Vec<Value>> {
        self.db.read_collection(&self.name, |c| c.distinct(field, filter))
    }

    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.db.write_collection(&self.name, |c| c.update_one(filter, update))
    }

    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.db.write_collection(&self.name, |c| c.update_many(filter, update))
    }

    pub fn delete_one(&self, filter: &Value) -> Result<DeleteResult> {
        self.db.write_collection(&self.name, |c| c.delete_one(filter))
    }

    pub fn delete_many(&self, filter: &Value) -> Result<DeleteResult> {
        self.db.write_collection(&self.name, |c| c.delete_many(filter))
    }

    pub fn aggregate(&self, pipeline: &Value) -> Result<Vec<Value>> {
        self.db.read_collection(&self.name, |c| c.aggregate(pipeline))
    }

    pub fn create_index(&self, keys: &Value, options: IndexOptions) -> Result<String> {
        self.db.write_collection(&self.name, |c| c.create_index(keys, options))
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.db.write_collection(&self.name, |c| c.drop_index(name))
    }

    pub fn get_indexes(&self) -> Result<Vec<Value>> {
        self.db.read_collection(&self.name, |c| Ok(c.get_indexes()))
    }

    /// Explain with a `db.collection` namespace
    pub fn explain(&self, filter: &Value) -> Result<Value> {
        let mut plan = self.db.read_collection(&self.name, |c| c.explain(filter))?;
        plan["namespace"] = json!(format!("{}.{}", self.db.name(), self.name));
        Ok(plan)
    }

    /// Snapshot of every document in insertion order
    pub fn documents(&self) -> Result<Vec<Document>> {
        self.db.read_collection(&self.name, |c| Ok(c.iter().cloned().collect()))
    }

    pub fn len(&self) -> Result<usize> {
        self.db.read_collection(&self.name, |c| Ok(c.len()))
    }

    pub fn stats(&self) -> Result<Value> {
        self.db.read_collection(&self.name, |c| Ok(c.stats()))
    }
}
