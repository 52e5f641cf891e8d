//! # Genostore - Object-graph storage for genealogical records
//!
//! Persists a graph of typed primary records (Person, Family, Event, Place,
//! Source, Citation, Media, Repository, Note, Tag) behind a single backend
//! contract.
//!
//! Genostore provides:
//! - Dual-encoded records: an authoritative raw blob plus a queryable JSON document
//! - Two storage engines: SQLite with JSON columns, and a document store
//! - A derived backlink index recomputed from record payloads
//! - Transactions with change notification and undo/redo, plus batch import
//! - Schema creation, versioned upgrades, backfill, verification and
//!   cross-engine migration

pub mod object;
pub mod handle;
pub mod model;
pub mod codec;
pub mod reference;
pub mod schema;
pub mod engine;
pub mod store;
pub mod indexer;
pub mod metadata;
pub mod progress;
pub mod txn;
pub mod migration;
pub mod backend;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use object::ObjectType;
pub use handle::Handle;
pub use model::{Payload, PrimaryObject};
pub use reference::Reference;
pub use engine::{DocumentEngine, EngineKind, SqliteEngine, StorageEngine};
pub use store::{ObjectStore, Record};
pub use metadata::MetaValue;
pub use txn::{Action, BatchTransaction, Signal, Transaction, TxnRef};
pub use indexer::ReferenceStrategy;
pub use config::BackendConfig;
pub use migration::{MigrationNeed, SchemaManager, VerifyReport};
pub use backend::{Backend, Credentials};

/// Result type alias for Genostore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Genostore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Absent handle. Normal control flow for callers, not a failure to report.
    #[error("{obj_type} not found: {handle}")]
    NotFound { obj_type: ObjectType, handle: Handle },

    /// Raw and structured encodings could not be converted into each other.
    #[error("Encoding error for {obj_type} {handle}: {reason}")]
    Encoding {
        obj_type: ObjectType,
        handle: Handle,
        reason: String,
    },

    #[error("Connection error: {0}")]
    Connection(#[from] rusqlite::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Migration failed while {context}: {source}")]
    Migration {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the recoverable "no such record" case
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for per-record encoding failures that bulk scans skip over
    pub fn is_encoding(&self) -> bool {
        matches!(self, Error::Encoding { .. })
    }

    pub(crate) fn migration(context: impl Into<String>, source: Error) -> Self {
        Error::Migration {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
