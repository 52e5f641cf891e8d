//! Storage engines
//!
//! The backend talks to its storage through the [`StorageEngine`] trait.
//! Two implementations ship with the crate:
//!
//! - [`SqliteEngine`] -- relational tables with a BLOB column for the raw
//!   encoding and a JSON text column for the structured encoding
//! - [`DocumentEngine`] -- schemaless document collections kept in memory
//!   and persisted as one JSON file per container
//!
//! All implementations must satisfy these invariants:
//! - Every record write is a single replace; no partial record is observable.
//! - `get` on an absent handle is `Ok(None)`.
//! - The reference container holds each `(owner, target)` edge at most once.
//! - `begin`/`commit`/`rollback` bracket an all-or-nothing unit of work.
//!   Writes outside a bracket are applied immediately.

pub mod document;
pub mod sqlite;

pub use document::DocumentEngine;
pub use sqlite::SqliteEngine;

use crate::Result;
use crate::handle::Handle;
use crate::metadata::{GenderStats, MetaValue};
use crate::object::ObjectType;
use crate::reference::Reference;
use crate::schema::UpgradeStep;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Which engine family a database uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Sqlite,
    Document,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Sqlite => "sqlite",
            EngineKind::Document => "document",
        }
    }
}

impl FromStr for EngineKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sql" | "relational" => Ok(EngineKind::Sqlite),
            "document" | "doc" | "json" => Ok(EngineKind::Document),
            _ => Err(crate::Error::Config(format!("Unknown engine: {}", s))),
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A record as the engine stores it: both encodings plus the change time
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub handle: Handle,
    pub raw: Option<Vec<u8>>,
    pub structured: Option<Value>,
    pub change_time: i64,
}

/// Order of a handle listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandleOrder {
    /// Plain handle order
    #[default]
    Handle,
    /// By the type's sort field in the structured encoding, ties by handle
    SortField,
}

/// Row counts of one object container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub rows: usize,
    pub raw: usize,
    pub structured: usize,
    pub raw_bytes: u64,
}

pub trait StorageEngine {
    fn kind(&self) -> EngineKind;

    /// Where the data lives, for logs and reports
    fn location(&self) -> String;

    // ========== Containers ==========

    fn container_exists(&self, container: &str) -> Result<bool>;

    /// Whether the object container can hold a structured encoding at all
    fn has_structured_field(&self, obj_type: ObjectType) -> Result<bool>;

    /// Whether the container has a raw encoding field
    fn has_raw_field(&self, obj_type: ObjectType) -> Result<bool>;

    /// Create every container of the latest schema
    fn create_schema(&mut self) -> Result<()>;

    /// Apply the structural part of an upgrade step. Must be idempotent.
    fn apply_upgrade(&mut self, step: UpgradeStep) -> Result<()>;

    /// Number of rows in any container
    fn container_rows(&self, container: &str) -> Result<usize>;

    // ========== Records ==========

    fn get(&self, obj_type: ObjectType, handle: &Handle) -> Result<Option<StoredRecord>>;

    /// Insert or replace a record, returning the previous version
    fn put(&mut self, obj_type: ObjectType, record: StoredRecord) -> Result<Option<StoredRecord>>;

    /// Remove a record, returning it if it existed
    fn delete(&mut self, obj_type: ObjectType, handle: &Handle) -> Result<Option<StoredRecord>>;

    /// Overwrite only the structured encoding of an existing record
    fn set_structured(&mut self, obj_type: ObjectType, handle: &Handle, value: &Value) -> Result<bool>;

    fn handles(&self, obj_type: ObjectType, order: HandleOrder) -> Result<Vec<Handle>>;

    /// Handles whose raw encoding is present but structured encoding is not
    fn handles_missing_structured(&self, obj_type: ObjectType) -> Result<Vec<Handle>>;

    /// Handles whose structured field at `path` equals `value`
    fn find_by_field(&self, obj_type: ObjectType, path: &[&str], value: &str) -> Result<Vec<Handle>>;

    /// Stream every record of a type through `visit`
    fn scan(&self, obj_type: ObjectType, visit: &mut dyn FnMut(StoredRecord) -> Result<()>) -> Result<()>;

    fn counts(&self, obj_type: ObjectType) -> Result<RecordCounts>;

    // ========== References ==========

    /// Insert an edge; `false` if it already existed
    fn insert_reference(&mut self, reference: &Reference) -> Result<bool>;

    /// Remove an edge; `false` if it did not exist
    fn delete_reference(&mut self, reference: &Reference) -> Result<bool>;

    /// Remove every edge owned by a record, returning how many were removed
    fn delete_references_from(&mut self, owner_type: ObjectType, owner: &Handle) -> Result<usize>;

    fn references_from(&self, owner_type: ObjectType, owner: &Handle) -> Result<Vec<Reference>>;

    fn references_to(&self, target: &Handle) -> Result<Vec<Reference>>;

    fn all_references(&self) -> Result<Vec<Reference>>;

    // ========== Metadata ==========

    fn get_metadata(&self, key: &str) -> Result<Option<MetaValue>>;

    fn set_metadata(&mut self, key: &str, value: &MetaValue) -> Result<()>;

    fn delete_metadata(&mut self, key: &str) -> Result<bool>;

    fn metadata_entries(&self) -> Result<Vec<(String, MetaValue)>>;

    // ========== Aggregates ==========

    fn gender_stats(&self, given_name: &str) -> Result<Option<GenderStats>>;

    /// Store statistics for a given name; all-zero statistics remove the row
    fn set_gender_stats(&mut self, given_name: &str, stats: GenderStats) -> Result<()>;

    fn all_gender_stats(&self) -> Result<Vec<(String, GenderStats)>>;

    fn surname_count(&self, surname: &str) -> Result<u32>;

    /// Store a surname's usage count; zero removes the row
    fn set_surname_count(&mut self, surname: &str, count: u32) -> Result<()>;

    fn all_surnames(&self) -> Result<Vec<(String, u32)>>;

    fn name_group(&self, name: &str) -> Result<Option<String>>;

    /// Map a surname to a group; `None` removes the mapping
    fn set_name_group(&mut self, name: &str, group: Option<&str>) -> Result<()>;

    fn all_name_groups(&self) -> Result<Vec<(String, String)>>;

    /// Empty the gender statistics and surname containers
    fn clear_aggregates(&mut self) -> Result<()>;

    // ========== Transactions ==========

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    /// Flush and release the underlying storage
    fn close(&mut self) -> Result<()>;
}

/// Run `work` inside one engine transaction: commit on success, roll back on failure
pub fn atomically<T>(
    engine: &mut dyn StorageEngine,
    work: impl FnOnce(&mut dyn StorageEngine) -> Result<T>,
) -> Result<T> {
    engine.begin()?;
    let result = work(&mut *engine);
    settle(engine, result)
}

/// Close the open engine transaction: commit after successful work, roll
/// back after failed work or a failed commit
pub(crate) fn settle<T>(engine: &mut dyn StorageEngine, result: Result<T>) -> Result<T> {
    let result = result.and_then(|value| engine.commit().map(|()| value));
    if result.is_err() && engine.in_transaction() {
        if let Err(rollback) = engine.rollback() {
            tracing::warn!("Rollback failed: {}", rollback);
        }
    }
    result
}
