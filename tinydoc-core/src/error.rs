// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TinyDocError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("Duplicate key: collection '{collection}' already contains _id {id}")]
    DuplicateKey { collection: String, id: String },

    #[error("Document not found")]
    DocumentNotFound,

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Unique constraint violated on index '{index}': duplicate key {key}")]
    ConstraintViolation { index: String, key: String },

    #[error("Unsupported predicate: {0}")]
    UnsupportedPredicate(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Stored procedure '{0}' not found")]
    ProcedureNotFound(String),

    #[error("Stored procedure '{name}' failed: {reason}")]
    ProcedureError { name: String, reason: String },

    #[error("Transaction already committed or aborted")]
    TransactionCommitted,

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Another transaction is already active (session {0})")]
    TransactionInProgress(u64),

    #[error("No transaction in progress")]
    NoTransaction,

    #[error("Session {0} has ended")]
    SessionEnded(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TinyDocError {
    /// Errors that abort the enclosing transaction when raised by a session write
    pub fn aborts_transaction(&self) -> bool {
        !matches!(
            self,
            TinyDocError::TransactionCommitted
                | TinyDocError::TransactionInProgress(_)
                | TinyDocError::NoTransaction
                | TinyDocError::SessionEnded(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TinyDocError>;
