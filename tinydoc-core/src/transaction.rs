// src/transaction.rs
// Transaction buffer: resolved writes replayed atomically on commit

use crate::collection::Collection;
use crate::document::Document;
use crate::error::{Result, TinyDocError};

/// Unique transaction identifier
pub type TransactionId = u64;

/// Transaction state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and accepting operations
    Active,
    /// Transaction has been successfully committed
    Committed,
    /// Transaction has been rolled back
    Aborted,
}

/// A single resolved write within a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        collection: String,
        doc: Document,
    },
    /// `old_doc` is the version the session read; commit fails if the
    /// committed document no longer equals it
    Update {
        collection: String,
        old_doc: Document,
        new_doc: Document,
    },
    Delete {
        collection: String,
        old_doc: Document,
    },
}

impl Operation {
    pub fn collection(&self) -> &str {
        match self {
            Operation::Insert { collection, .. }
            | Operation::Update { collection, .. }
            | Operation::Delete { collection, .. } => collection,
        }
    }

    /// Re-validate against `target` and apply. On error `target` is
    /// unchanged.
    pub fn replay(&self, target: &mut Collection) -> Result<()> {
        match self {
            Operation::Insert { doc, .. } => {
                target.insert(doc.clone())?;
            }
            Operation::Update { old_doc, new_doc, .. } => {
                expect_unchanged(target, old_doc)?;
                target.replace_by_id(new_doc.clone())?;
            }
            Operation::Delete { old_doc, .. } => {
                expect_unchanged(target, old_doc)?;
                target.delete_by_id(&old_doc.id);
            }
        }
        Ok(())
    }
}

fn expect_unchanged(target: &Collection, expected: &Document) -> Result<()> {
    match target.find_by_id(&expected.id) {
        None => Err(TinyDocError::DocumentNotFound),
        Some(current) if current != expected => Err(TinyDocError::TransactionAborted(format!(
            "write conflict on {} in '{}'",
            expected.id,
            target.name()
        ))),
        Some(_) => Ok(()),
    }
}

/// A transaction groups multiple operations for atomic execution
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Unique transaction ID
    pub id: TransactionId,

    /// List of buffered operations
    operations: Vec<Operation>,

    /// Buffer capacity
    max_operations: usize,

    /// Current state
    state: TransactionState,
}

impl Transaction {
    /// Create a new active transaction
    pub fn new(id: TransactionId, max_operations: usize) -> Self {
        Transaction {
            id,
            operations: Vec::new(),
            max_operations,
            state: TransactionState::Active,
        }
    }

    /// Get current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Check if transaction is active
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Add an operation to the transaction buffer
    pub fn add_operation(&mut self, op: Operation) -> Result<()> {
        if !self.is_active() {
            return Err(TinyDocError::TransactionCommitted);
        }
        if self.operations.len() >= self.max_operations {
            return Err(TinyDocError::TransactionAborted(format!(
                "transaction {} exceeds {} buffered operations",
                self.id, self.max_operations
            )));
        }
        self.operations.push(op);
        Ok(())
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Names of the collections written, in first-write order
    pub fn touched_collections(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for op in &self.operations {
            if !names.contains(&op.collection()) {
                names.push(op.collection());
            }
        }
        names
    }

    /// Mark transaction as committed
    pub fn mark_committed(&mut self) -> Result<()> {
        if !self.is_active() {
            return Err(TinyDocError::TransactionCommitted);
        }
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Rollback transaction (discard all buffered operations)
    pub fn rollback(&mut self) {
        self.operations.clear();
        self.state = TransactionState::Aborted;
    }

    /// Get number of operations in transaction
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}
