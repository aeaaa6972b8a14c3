// src/session.rs
// Client session: owns at most one transaction at a time

use indexmap::map::Entry;
use indexmap::IndexMap;
use serde_json::Value;

use crate::collection::{Collection, DeleteResult, UpdateResult};
use crate::database::Database;
use crate::document::{Document, DocumentId};
use crate::error::{Result, TinyDocError};
use crate::transaction::{Operation, Transaction};

/// Unique session identifier
pub type SessionId = u64;

/// Session state machine: `Idle -> Active -> {Committed, Aborted}`.
/// A finished session can start another transaction until it is `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Committed,
    Aborted,
    Ended,
}

/// Writes issued while a transaction is active are applied to private
/// copies of the touched collections and buffered as operations. Outside
/// a transaction they go straight to the committed state.
pub struct Session {
    id: SessionId,
    db: Database,
    state: SessionState,
    transaction: Option<Transaction>,
    /// Collections as this session's transaction sees them
    staged: IndexMap<String, Collection>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("buffered", &self.transaction.as_ref().map(Transaction::operation_count))
            .finish()
    }
}

fn stage<'a>(
    staged: &'a mut IndexMap<String, Collection>,
    db: &Database,
    name: &str,
) -> Result<&'a mut Collection> {
    match staged.entry(name.to_string()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => Ok(entry.insert(db.snapshot(name)?)),
    }
}

impl Session {
    pub(crate) fn new(id: SessionId, db: Database) -> Self {
        Session {
            id,
            db,
            state: SessionState::Idle,
            transaction: None,
            staged: IndexMap::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn in_transaction(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Operations buffered by the active transaction
    pub fn buffered_operations(&self) -> usize {
        self.transaction.as_ref().map_or(0, Transaction::operation_count)
    }

    // ========== STATE MACHINE ==========

    pub fn start_transaction(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ended => return Err(TinyDocError::SessionEnded(self.id)),
            SessionState::Active => return Err(TinyDocError::TransactionInProgress(self.id)),
            _ => {}
        }
        self.db.acquire_writer(self.id)?;

        let tx_id = self.db.next_transaction_id();
        self.transaction = Some(Transaction::new(tx_id, self.db.options().max_transaction_operations));
        self.staged.clear();
        self.state = SessionState::Active;
        log::info!("session {}: transaction {} started", self.id, tx_id);
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Idle => Err(TinyDocError::NoTransaction),
            SessionState::Committed | SessionState::Aborted => Err(TinyDocError::TransactionCommitted),
            SessionState::Ended => Err(TinyDocError::SessionEnded(self.id)),
        }
    }

    /// Re-validate and apply every buffered operation in order. Any
    /// failure aborts the transaction with nothing applied.
    pub fn commit_transaction(&mut self) -> Result<()> {
        self.ensure_active()?;
        let mut tx = self.transaction.take().ok_or(TinyDocError::NoTransaction)?;
        self.staged.clear();

        let result = self.db.commit_operations(tx.operations());
        self.db.release_writer(self.id);

        match result {
            Ok(()) => {
                tx.mark_committed()?;
                self.state = SessionState::Committed;
                log::info!(
                    "session {}: transaction {} committed ({} operations)",
                    self.id,
                    tx.id,
                    tx.operation_count()
                );
                Ok(())
            }
            Err(e) => {
                log::error!("session {}: transaction {} failed validation at commit: {}", self.id, tx.id, e);
                tx.rollback();
                self.state = SessionState::Aborted;
                Err(match e {
                    TinyDocError::TransactionAborted(_) => e,
                    other => TinyDocError::TransactionAborted(other.to_string()),
                })
            }
        }
    }

    /// Discard the buffer unconditionally
    pub fn abort_transaction(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.discard();
        Ok(())
    }

    fn discard(&mut self) {
        if let Some(mut tx) = self.transaction.take() {
            log::warn!(
                "session {}: transaction {} aborted, {} buffered operations discarded",
                self.id,
                tx.id,
                tx.operation_count()
            );
            tx.rollback();
        }
        self.staged.clear();
        self.db.release_writer(self.id);
        self.state = SessionState::Aborted;
    }

    /// Terminal step. Aborts an active transaction and releases the
    /// buffer. Always succeeds; calling it again is a no-op.
    pub fn end_session(&mut self) {
        if self.state == SessionState::Ended {
            return;
        }
        if self.state == SessionState::Active {
            self.discard();
        }
        self.state = SessionState::Ended;
        log::debug!("session {} ended", self.id);
    }

    // ========== WRITES ==========

    /// Run a write. Inside a transaction it goes to the staged copy and
    /// its resolved operations are buffered; a failure aborts the
    /// transaction and surfaces the original error.
    fn write<R>(
        &mut self,
        collection: &str,
        f: impl FnOnce(&mut Collection) -> Result<(R, Vec<Operation>)>,
    ) -> Result<R> {
        match self.state {
            SessionState::Ended => Err(TinyDocError::SessionEnded(self.id)),
            SessionState::Active => {
                let outcome = stage(&mut self.staged, &self.db, collection)
                    .and_then(f)
                    .and_then(|(result, operations)| {
                        let tx = self.transaction.as_mut().ok_or(TinyDocError::NoTransaction)?;
                        for op in operations {
                            tx.add_operation(op)?;
                        }
                        Ok(result)
                    });

                if let Err(e) = &outcome {
                    if e.aborts_transaction() {
                        log::warn!("session {}: write on '{}' failed: {}", self.id, collection, e);
                        self.discard();
                    }
                }
                outcome
            }
            _ => self.db.write_collection(collection, |c| f(c).map(|(result, _)| result)),
        }
    }

    pub fn insert_one(&mut self, collection: &str, document: Value) -> Result<DocumentId> {
        let name = collection.to_string();
        self.write(collection, move |c| {
            let doc = Document::from_value(document)?;
            let op = Operation::Insert { collection: name, doc: doc.clone() };
            let id = c.insert(doc)?;
            Ok((id, vec![op]))
        })
    }

    /// Ordered insert. Inside a transaction any failure aborts it.
    pub fn insert_many(&mut self, collection: &str, documents: Vec<Value>) -> Result<Vec<DocumentId>> {
        let name = collection.to_string();
        self.write(collection, move |c| {
            let mut ids = Vec::with_capacity(documents.len());
            let mut operations = Vec::with_capacity(documents.len());
            for value in documents {
                let doc = Document::from_value(value)?;
                operations.push(Operation::Insert { collection: name.clone(), doc: doc.clone() });
                ids.push(c.insert(doc)?);
            }
            Ok((ids, operations))
        })
    }

    fn update(&mut self, collection: &str, filter: &Value, update: &Value, only_first: bool) -> Result<UpdateResult> {
        let name = collection.to_string();
        self.write(collection, move |c| {
            let (result, changes) = c.update_matching(filter, update, only_first)?;
            let operations = changes
                .into_iter()
                .filter_map(|change| match change {
                    (Some(old_doc), Some(new_doc)) => Some(Operation::Update {
                        collection: name.clone(),
                        old_doc,
                        new_doc,
                    }),
                    _ => None,
                })
                .collect();
            Ok((result, operations))
        })
    }

    pub fn update_one(&mut self, collection: &str, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.update(collection, filter, update, true)
    }

    pub fn update_many(&mut self, collection: &str, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.update(collection, filter, update, false)
    }

    fn delete(&mut self, collection: &str, filter: &Value, only_first: bool) -> Result<DeleteResult> {
        let name = collection.to_string();
        self.write(collection, move |c| {
            let (result, removed) = c.delete_matching(filter, only_first)?;
            let operations = removed
                .into_iter()
                .map(|old_doc| Operation::Delete { collection: name.clone(), old_doc })
                .collect();
            Ok((result, operations))
        })
    }

    pub fn delete_one(&mut self, collection: &str, filter: &Value) -> Result<DeleteResult> {
        self.delete(collection, filter, true)
    }

    pub fn delete_many(&mut self, collection: &str, filter: &Value) -> Result<DeleteResult> {
        self.delete(collection, filter, false)
    }

    // ========== READS ==========

    /// Reads see this session's own uncommitted writes
    fn read<R>(&self, collection: &str, f: impl FnOnce(&Collection) -> Result<R>) -> Result<R> {
        if self.state == SessionState::Ended {
            return Err(TinyDocError::SessionEnded(self.id));
        }
        match self.staged.get(collection) {
            Some(staged) => f(staged),
            None => self.db.read_collection(collection, f),
        }
    }

    pub fn find(&self, collection: &str, filter: &Value, projection: Option<&Value>) -> Result<Vec<Value>> {
        self.read(collection, |c| c.find(filter, projection))
    }

    pub fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Value>> {
        self.read(collection, |c| c.find_one(filter))
    }

    pub fn count_documents(&self, collection: &str, filter: &Value) -> Result<u64> {
        self.read(collection, |c| c.count_documents(filter))
    }

    pub fn aggregate(&self, collection: &str, pipeline: &Value) -> Result<Vec<Value>> {
        self.read(collection, |c| c.aggregate(pipeline))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            log::warn!("session {} dropped with an active transaction", self.id);
        }
        self.end_session();
    }
}
