// tinydoc-core/src/lib.rs
// In-memory document store: collections, filters, updates, indexes,
// aggregation, stored procedures and session transactions

pub mod error;
pub mod document;
pub mod query;
pub mod update;
pub mod index;
pub mod query_planner;
pub mod find_options;
pub mod expression;
pub mod aggregation;
pub mod collection;
pub mod options;
pub mod procedures;
pub mod transaction;
pub mod session;
pub mod database;


// Public exports
pub use error::{TinyDocError, Result};
pub use document::{Document, DocumentId};
pub use query::Query;
pub use update::UpdateSpec;
pub use index::{IndexDefinition, IndexOptions};
pub use query_planner::{QueryPlan, QueryPlanner};
pub use find_options::{FindOptions, Projection};
pub use aggregation::Pipeline;
pub use collection::{Collection, DeleteResult, UpdateResult};
pub use options::DatabaseOptions;
pub use procedures::{register_shop_procedures, Procedure, ProcedureRegistry};
pub use transaction::{Operation, Transaction, TransactionId, TransactionState};
pub use session::{Session, SessionId, SessionState};
pub use database::{CollectionHandle, Database};
