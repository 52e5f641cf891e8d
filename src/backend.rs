//! Backend - the single storage contract the application talks to
//!
//! Wires the object store, reference indexer, transaction manager, schema
//! manager and metadata store together over one storage engine.
//!
//! Writes always go through a transaction. A [`Transaction`] buffers and is
//! applied atomically on commit; a [`BatchTransaction`] writes immediately
//! and rebuilds the reference index once at commit. Only one transaction of
//! either kind may be open at a time.

use crate::config::{self, BackendConfig};
use crate::engine::{self, DocumentEngine, EngineKind, SqliteEngine, StorageEngine};
use crate::handle::Handle;
use crate::indexer::{self, Backlinks, ReindexStats};
use crate::metadata::{self, GenderStats, MetaValue};
use crate::migration::{BackfillReport, MigrationNeed, MigrationReport, SchemaManager, VerifyReport};
use crate::model::*;
use crate::object::ObjectType;
use crate::progress::ProgressSender;
use crate::schema;
use crate::store::{ObjectStore, Record};
use crate::txn::{
    Action, BatchTransaction, MetadataChange, Notifier, RecordChange, Signal, Transaction, TxnRef, UndoHistory,
    UndoRecord,
};
use crate::{Error, Result};
use crossbeam::channel::Receiver;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Login details for engines that need them; the embedded engines ignore them
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }
}

/// Size of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub name: String,
    pub rows: usize,
    /// Total size of raw encodings, for object containers
    pub raw_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaInfo {
    pub version: Option<u32>,
    pub engine: EngineKind,
    pub location: String,
    pub containers: Vec<ContainerInfo>,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn as_person(payload: Option<&Payload>) -> Option<&Person> {
    match payload {
        Some(Payload::Person(person)) => Some(person),
        _ => None,
    }
}

/// Write or delete one record and bring its derived state along:
/// person aggregates and the owner's reference edges
fn apply_write(
    engine: &mut dyn StorageEngine,
    strategy: indexer::ReferenceStrategy,
    obj_type: ObjectType,
    handle: &Handle,
    target: Option<&Payload>,
) -> Result<Option<Payload>> {
    let old = match target {
        Some(payload) => engine.put_payload(payload)?,
        None => engine.delete_record(obj_type, handle)?,
    };
    if obj_type == ObjectType::Person {
        metadata::apply_person_delta(engine, as_person(old.as_ref()), as_person(target))?;
    }
    indexer::update_references(engine, obj_type, handle, target, strategy)?;
    Ok(old)
}

pub struct Backend {
    engine: Box<dyn StorageEngine>,
    config: BackendConfig,
    schema: SchemaManager,
    directory: Option<PathBuf>,
    open_txn: Option<u64>,
    undo: UndoHistory,
    notifier: Notifier,
}

impl Backend {
    /// Open the database in `dir`, creating it with the default configuration
    /// if the directory holds none
    pub fn open(dir: &Path, credentials: &Credentials) -> Result<Self> {
        config::ensure_db_dir(dir)?;
        let config = match config::load_config(dir)? {
            Some(config) => config,
            None => {
                let config = BackendConfig::default();
                config::write_config(dir, &config, false)?;
                config
            }
        };
        Self::open_with_config(dir, config, credentials)
    }

    /// Create a new database in `dir` with an explicit configuration
    pub fn create(dir: &Path, config: BackendConfig, force: bool) -> Result<Self> {
        config::ensure_db_dir(dir)?;
        config::write_config(dir, &config, force)?;
        Self::open_with_config(dir, config, &Credentials::default())
    }

    fn open_with_config(dir: &Path, config: BackendConfig, credentials: &Credentials) -> Result<Self> {
        if !credentials.is_empty() {
            tracing::debug!("Ignoring credentials for embedded {} engine", config.engine);
        }
        let path = config::engine_path_in(dir, config.engine);
        let engine: Box<dyn StorageEngine> = match config.engine {
            EngineKind::Sqlite => Box::new(SqliteEngine::open(&path)?),
            EngineKind::Document => Box::new(DocumentEngine::open(&path)?),
        };
        let mut backend = Self::from_engine(engine, config)?;
        backend.directory = Some(dir.to_path_buf());
        tracing::info!("Opened {} database at {}", backend.config.engine, dir.display());
        Ok(backend)
    }

    /// A backend over an in-memory engine (for testing)
    pub fn open_in_memory(kind: EngineKind) -> Result<Self> {
        let engine: Box<dyn StorageEngine> = match kind {
            EngineKind::Sqlite => Box::new(SqliteEngine::open_in_memory()?),
            EngineKind::Document => Box::new(DocumentEngine::in_memory()),
        };
        Self::from_engine(engine, BackendConfig::with_engine(kind))
    }

    /// Wrap an already opened engine, creating or upgrading its schema
    pub fn from_engine(mut engine: Box<dyn StorageEngine>, config: BackendConfig) -> Result<Self> {
        let mut schema = SchemaManager::new(config.auto_upgrade);
        schema.check_and_init(engine.as_mut())?;
        Ok(Self {
            engine,
            undo: UndoHistory::new(config.undo_limit),
            config,
            schema,
            directory: None,
            open_txn: None,
            notifier: Notifier::default(),
        })
    }

    /// Flush and release storage; an open transaction is discarded
    pub fn close(mut self) -> Result<()> {
        if let Some(id) = self.open_txn.take() {
            tracing::warn!("Closing backend with transaction {} still open", id);
        }
        self.engine.close()
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// The underlying engine, for read-only use such as a migration source
    pub fn engine(&self) -> &dyn StorageEngine {
        self.engine.as_ref()
    }

    pub fn subscribe(&mut self) -> Receiver<Signal> {
        self.notifier.subscribe()
    }

    // ========== Transactions ==========

    fn ensure_idle(&self) -> Result<()> {
        match self.open_txn {
            Some(id) => Err(Error::Transaction(format!("transaction {} is still open", id))),
            None => Ok(()),
        }
    }

    fn ensure_open(&self, id: u64) -> Result<()> {
        match self.open_txn {
            Some(open) if open == id => Ok(()),
            Some(open) => Err(Error::Transaction(format!(
                "transaction {} is not the open transaction {}",
                id, open
            ))),
            None => Err(Error::Transaction(format!("transaction {} is not open", id))),
        }
    }

    /// Open a buffered transaction
    pub fn transaction_begin(&mut self, description: &str) -> Result<Transaction> {
        self.ensure_idle()?;
        let txn = Transaction::new(description);
        self.open_txn = Some(txn.id());
        tracing::debug!("Begin transaction {} '{}'", txn.id(), description);
        Ok(txn)
    }

    /// Open a write-through batch transaction for bulk imports
    pub fn batch_begin(&mut self, description: &str) -> Result<BatchTransaction> {
        self.ensure_idle()?;
        self.engine.begin()?;
        let txn = BatchTransaction::new(description);
        self.open_txn = Some(txn.id());
        tracing::debug!("Begin batch {} '{}'", txn.id(), description);
        Ok(txn)
    }

    /// Apply a buffered transaction atomically, notify subscribers and
    /// record it for undo
    pub fn transaction_commit(&mut self, txn: Transaction) -> Result<()> {
        self.ensure_open(txn.id())?;
        self.open_txn = None;

        let plan = txn.plan();
        if plan.is_empty() && txn.metadata().is_empty() {
            return Ok(());
        }

        let strategy = self.config.reference_strategy;
        let (changes, meta_changes) = engine::atomically(self.engine.as_mut(), |engine| {
            let mut changes = Vec::with_capacity(plan.len());
            for write in &plan {
                let old = apply_write(engine, strategy, write.obj_type, &write.handle, write.payload.as_ref())?;
                if write.action == Action::Delete && old.is_none() {
                    continue;
                }
                changes.push(RecordChange {
                    obj_type: write.obj_type,
                    handle: write.handle.clone(),
                    action: write.action,
                    old,
                    new: write.payload.clone(),
                });
            }

            let mut meta_changes = Vec::new();
            for (key, value) in txn.metadata() {
                let old = engine.get_metadata(key)?;
                engine.set_metadata(key, value)?;
                meta_changes.push(MetadataChange {
                    key: key.clone(),
                    old,
                    new: value.clone(),
                });
            }
            Ok((changes, meta_changes))
        })?;

        tracing::debug!(
            "Committed transaction {} '{}': {} records, {} settings",
            txn.id(),
            txn.description(),
            changes.len(),
            meta_changes.len()
        );

        for signal in Signal::from_changes(changes.iter().map(|c| (c.obj_type, c.action, &c.handle))) {
            self.notifier.emit(signal);
        }
        if !meta_changes.is_empty() {
            self.notifier
                .emit(Signal::Metadata(meta_changes.iter().map(|m| m.key.clone()).collect()));
        }

        self.undo.push(UndoRecord {
            description: txn.description().to_string(),
            timestamp: now(),
            changes,
            metadata: meta_changes,
        });
        Ok(())
    }

    /// Discard a buffered transaction; nothing was written
    pub fn transaction_abort(&mut self, txn: Transaction) -> Result<()> {
        self.ensure_open(txn.id())?;
        self.open_txn = None;
        tracing::debug!("Aborted transaction {} ({} ops discarded)", txn.id(), txn.len());
        Ok(())
    }

    fn finish_batch(&mut self, txn: &BatchTransaction, progress: Option<&ProgressSender>) -> Result<ReindexStats> {
        self.ensure_open(txn.id())?;
        self.open_txn = None;

        let reindexed = indexer::reindex_all(self.engine.as_mut(), progress);
        let stats = engine::settle(self.engine.as_mut(), reindexed)?;

        // earlier undo records may no longer apply on top of the batch
        self.undo.clear();
        self.notifier.emit(Signal::Rebuild);
        Ok(stats)
    }

    /// Finish a batch: rebuild the reference index once and signal a full refresh
    pub fn batch_commit(&mut self, txn: BatchTransaction, progress: Option<&ProgressSender>) -> Result<ReindexStats> {
        let stats = self.finish_batch(&txn, progress)?;
        tracing::info!("Committed batch '{}': {} writes", txn.description(), txn.len());
        Ok(stats)
    }

    /// Abandon a batch. Writes already applied are kept; the reference index
    /// is rebuilt so it matches them.
    pub fn batch_abort(&mut self, txn: BatchTransaction) -> Result<ReindexStats> {
        tracing::warn!(
            "Aborting batch '{}': {} writes already applied are kept",
            txn.description(),
            txn.len()
        );
        self.finish_batch(&txn, None)
    }

    // ========== Typed Record Operations ==========

    fn write(&mut self, action: Action, payload: Payload, txn: TxnRef<'_>) -> Result<()> {
        self.ensure_open(txn.id())?;
        match txn {
            TxnRef::Buffered(txn) => txn.push(action, payload),
            TxnRef::Batch(txn) => {
                let obj_type = payload.object_type();
                let old = self.engine.put_payload(&payload)?;
                if obj_type == ObjectType::Person {
                    metadata::apply_person_delta(self.engine.as_mut(), as_person(old.as_ref()), as_person(Some(&payload)))?;
                }
                txn.record_write(obj_type);
            }
        }
        Ok(())
    }

    /// Queue a new object, assigning a fresh handle when it has none
    pub fn add<T: PrimaryObject>(&mut self, obj: &mut T, txn: TxnRef<'_>) -> Result<Handle> {
        if obj.handle().is_empty() {
            obj.set_handle(Handle::generate());
        }
        obj.set_change(now());
        let handle = obj.handle().clone();
        self.write(Action::Add, obj.clone().into_payload(), txn)?;
        Ok(handle)
    }

    /// Queue a changed object; an object not yet stored counts as an add
    pub fn commit<T: PrimaryObject>(&mut self, obj: &mut T, txn: TxnRef<'_>) -> Result<()> {
        if obj.handle().is_empty() {
            self.add(obj, txn)?;
            return Ok(());
        }
        obj.set_change(now());
        let exists = self.engine.has_handle(T::TYPE, obj.handle())?
            || matches!(&txn, TxnRef::Buffered(t) if t.touches(T::TYPE, obj.handle()));
        let action = if exists { Action::Update } else { Action::Add };
        self.write(action, obj.clone().into_payload(), txn)
    }

    /// Queue removal of an object
    pub fn remove<T: PrimaryObject>(&mut self, handle: &Handle, txn: TxnRef<'_>) -> Result<()> {
        self.ensure_open(txn.id())?;
        let pending = matches!(&txn, TxnRef::Buffered(t) if t.touches(T::TYPE, handle));
        if !pending && !self.engine.has_handle(T::TYPE, handle)? {
            return Err(Error::NotFound {
                obj_type: T::TYPE,
                handle: handle.clone(),
            });
        }
        match txn {
            TxnRef::Buffered(txn) => txn.push_delete(T::TYPE, handle.clone()),
            TxnRef::Batch(txn) => {
                let old = self.engine.delete_record(T::TYPE, handle)?;
                if T::TYPE == ObjectType::Person {
                    metadata::apply_person_delta(self.engine.as_mut(), as_person(old.as_ref()), None)?;
                }
                txn.record_write(T::TYPE);
            }
        }
        Ok(())
    }

    /// Fetch an object; `NotFound` when the handle is absent
    pub fn get<T: PrimaryObject>(&self, handle: &Handle) -> Result<T> {
        let not_found = || Error::NotFound {
            obj_type: T::TYPE,
            handle: handle.clone(),
        };
        let payload = self.engine.get_payload(T::TYPE, handle)?.ok_or_else(not_found)?;
        T::from_payload(payload).ok_or_else(not_found)
    }

    pub fn get_by_gramps_id<T: PrimaryObject>(&self, gramps_id: &str) -> Result<Option<T>> {
        Ok(self
            .engine
            .find_by_gramps_id(T::TYPE, gramps_id)?
            .and_then(T::from_payload))
    }

    /// Stored record of any type with both encodings
    pub fn get_record(&self, obj_type: ObjectType, handle: &Handle) -> Result<Record> {
        self.engine
            .get_record(obj_type, handle)?
            .ok_or_else(|| Error::NotFound {
                obj_type,
                handle: handle.clone(),
            })
    }

    pub fn handles(&self, obj_type: ObjectType, sort_handles: bool) -> Result<Vec<Handle>> {
        self.engine.list_handles(obj_type, sort_handles)
    }

    pub fn count(&self, obj_type: ObjectType) -> Result<usize> {
        self.engine.count(obj_type)
    }

    // ========== Backlinks ==========

    /// Who points at `handle`, optionally restricted to some owner types
    pub fn find_backlinks(&self, handle: &Handle, include: Option<&[ObjectType]>) -> Result<Backlinks> {
        indexer::find_backlinks(self.engine.as_ref(), handle, include)
    }

    /// Backlinks as `(class name, handle)`; `include_classes` takes class or container names
    pub fn find_backlink_handles(
        &self,
        handle: &Handle,
        include_classes: Option<&[&str]>,
    ) -> Result<impl Iterator<Item = (&'static str, Handle)> + use<>> {
        let include = include_classes
            .map(|names| names.iter().map(|n| n.parse::<ObjectType>()).collect::<Result<Vec<_>>>())
            .transpose()?;
        let backlinks = self.find_backlinks(handle, include.as_deref())?;
        Ok(backlinks.map(|(ty, h)| (ty.class_name(), h)))
    }

    /// Rebuild the reference index from every live record
    pub fn reindex_reference_map(&mut self, progress: Option<&ProgressSender>) -> Result<ReindexStats> {
        self.ensure_idle()?;
        let stats = engine::atomically(self.engine.as_mut(), |engine| indexer::reindex_all(engine, progress))?;
        self.notifier.emit(Signal::Rebuild);
        Ok(stats)
    }

    // ========== Metadata ==========

    pub fn get_metadata(&self, key: &str, default: MetaValue) -> Result<MetaValue> {
        Ok(self.engine.get_metadata(key)?.unwrap_or(default))
    }

    /// Write a setting immediately, outside any transaction
    pub fn set_metadata(&mut self, key: &str, value: MetaValue) -> Result<()> {
        if key == schema::VERSION_KEY {
            return Err(Error::Schema("the schema version is managed by the backend".to_string()));
        }
        self.engine.set_metadata(key, &value)?;
        self.notifier.emit(Signal::Metadata(vec![key.to_string()]));
        Ok(())
    }

    /// Buffer a setting in a transaction so it commits and undoes with it
    pub fn set_metadata_in(&mut self, txn: &mut Transaction, key: &str, value: MetaValue) -> Result<()> {
        self.ensure_open(txn.id())?;
        if key == schema::VERSION_KEY {
            return Err(Error::Schema("the schema version is managed by the backend".to_string()));
        }
        txn.push_metadata(key, value);
        Ok(())
    }

    // ========== Aggregates ==========

    pub fn gender_stats(&self, given_name: &str) -> Result<GenderStats> {
        Ok(self.engine.gender_stats(given_name)?.unwrap_or_default())
    }

    pub fn surnames(&self) -> Result<Vec<(String, u32)>> {
        self.engine.all_surnames()
    }

    /// Group a surname belongs to; a surname without a mapping is its own group
    pub fn get_name_group_mapping(&self, surname: &str) -> Result<String> {
        Ok(self
            .engine
            .name_group(surname)?
            .unwrap_or_else(|| surname.to_string()))
    }

    pub fn set_name_group_mapping(&mut self, surname: &str, group: Option<&str>) -> Result<()> {
        self.engine.set_name_group(surname, group)
    }

    pub fn name_group_mappings(&self) -> Result<Vec<(String, String)>> {
        self.engine.all_name_groups()
    }

    // ========== Undo ==========

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    fn replay(&mut self, record: &UndoRecord, forward: bool) -> Result<()> {
        let strategy = self.config.reference_strategy;
        engine::atomically(self.engine.as_mut(), |engine| {
            if forward {
                for change in &record.changes {
                    apply_write(engine, strategy, change.obj_type, &change.handle, change.new.as_ref())?;
                }
                for meta in &record.metadata {
                    engine.set_metadata(&meta.key, &meta.new)?;
                }
            } else {
                for change in record.changes.iter().rev() {
                    apply_write(engine, strategy, change.obj_type, &change.handle, change.old.as_ref())?;
                }
                for meta in record.metadata.iter().rev() {
                    match &meta.old {
                        Some(value) => engine.set_metadata(&meta.key, value)?,
                        None => {
                            engine.delete_metadata(&meta.key)?;
                        }
                    }
                }
            }
            Ok(())
        })?;

        let signals = Signal::from_changes(record.changes.iter().map(|c| {
            let action = if forward { c.action } else { c.action.inverse() };
            (c.obj_type, action, &c.handle)
        }));
        for signal in signals {
            self.notifier.emit(signal);
        }
        if !record.metadata.is_empty() {
            self.notifier
                .emit(Signal::Metadata(record.metadata.iter().map(|m| m.key.clone()).collect()));
        }
        Ok(())
    }

    /// Revert the most recent committed transaction; `false` if there is none
    pub fn undo(&mut self) -> Result<bool> {
        self.ensure_idle()?;
        let Some(record) = self.undo.take_undo() else {
            return Ok(false);
        };
        match self.replay(&record, false) {
            Ok(()) => {
                tracing::debug!("Undid '{}'", record.description);
                self.undo.undone(record);
                Ok(true)
            }
            Err(e) => {
                self.undo.redone(record);
                Err(e)
            }
        }
    }

    /// Re-apply the most recently undone transaction; `false` if there is none
    pub fn redo(&mut self) -> Result<bool> {
        self.ensure_idle()?;
        let Some(record) = self.undo.take_redo() else {
            return Ok(false);
        };
        match self.replay(&record, true) {
            Ok(()) => {
                tracing::debug!("Redid '{}'", record.description);
                self.undo.redone(record);
                Ok(true)
            }
            Err(e) => {
                self.undo.undone(record);
                Err(e)
            }
        }
    }

    // ========== Schema ==========

    pub fn get_schema_info(&self) -> Result<SchemaInfo> {
        let engine = self.engine.as_ref();
        let mut containers = Vec::new();
        for ty in ObjectType::all() {
            let counts = engine.record_counts(*ty)?;
            containers.push(ContainerInfo {
                name: ty.container().to_string(),
                rows: counts.rows,
                raw_bytes: Some(counts.raw_bytes),
            });
        }
        for name in [schema::REFERENCE, schema::METADATA]
            .into_iter()
            .chain(schema::AUXILIARY_CONTAINERS.iter().copied())
        {
            containers.push(ContainerInfo {
                name: name.to_string(),
                rows: engine.container_rows(name)?,
                raw_bytes: None,
            });
        }
        Ok(SchemaInfo {
            version: self.schema.stored_version(engine)?,
            engine: engine.kind(),
            location: engine.location(),
            containers,
        })
    }

    pub fn detect_migration_needed(&self, source: Option<&dyn StorageEngine>) -> Result<MigrationNeed> {
        self.schema.detect_migration_needed(self.engine.as_ref(), source)
    }

    /// Copy everything from another engine into this backend
    pub fn migrate_from(
        &mut self,
        source: &dyn StorageEngine,
        progress: Option<&ProgressSender>,
    ) -> Result<MigrationReport> {
        self.ensure_idle()?;
        let report = self.schema.migrate_from(self.engine.as_mut(), source, progress)?;
        self.undo.clear();
        self.notifier.emit(Signal::Rebuild);
        Ok(report)
    }

    pub fn backfill_structured_encoding(&mut self, progress: Option<&ProgressSender>) -> Result<BackfillReport> {
        self.ensure_idle()?;
        self.schema.backfill_structured_encoding(self.engine.as_mut(), progress)
    }

    pub fn verify(&self) -> Result<VerifyReport> {
        self.schema.verify(self.engine.as_ref())
    }
}

macro_rules! typed_operations {
    ($($ty:ident {
        add: $add:ident,
        commit: $commit:ident,
        remove: $remove:ident,
        get: $get:ident,
        handles: $handles:ident,
        by_id: $by_id:ident $(,)?
    })*) => {
        impl Backend {
            $(
                #[doc = concat!("Add a ", stringify!($ty), "; returns its (possibly new) handle")]
                pub fn $add<'t>(&mut self, obj: &mut $ty, txn: impl Into<TxnRef<'t>>) -> Result<Handle> {
                    self.add(obj, txn.into())
                }

                pub fn $commit<'t>(&mut self, obj: &mut $ty, txn: impl Into<TxnRef<'t>>) -> Result<()> {
                    self.commit(obj, txn.into())
                }

                pub fn $remove<'t>(&mut self, handle: &Handle, txn: impl Into<TxnRef<'t>>) -> Result<()> {
                    self.remove::<$ty>(handle, txn.into())
                }

                pub fn $get(&self, handle: &Handle) -> Result<$ty> {
                    self.get(handle)
                }

                pub fn $handles(&self, sort_handles: bool) -> Result<Vec<Handle>> {
                    self.handles($ty::TYPE, sort_handles)
                }

                pub fn $by_id(&self, gramps_id: &str) -> Result<Option<$ty>> {
                    self.get_by_gramps_id(gramps_id)
                }
            )*
        }
    };
}

typed_operations! {
    Person {
        add: add_person,
        commit: commit_person,
        remove: remove_person,
        get: get_person_from_handle,
        handles: get_person_handles,
        by_id: get_person_from_gramps_id,
    }
    Family {
        add: add_family,
        commit: commit_family,
        remove: remove_family,
        get: get_family_from_handle,
        handles: get_family_handles,
        by_id: get_family_from_gramps_id,
    }
    Source {
        add: add_source,
        commit: commit_source,
        remove: remove_source,
        get: get_source_from_handle,
        handles: get_source_handles,
        by_id: get_source_from_gramps_id,
    }
    Event {
        add: add_event,
        commit: commit_event,
        remove: remove_event,
        get: get_event_from_handle,
        handles: get_event_handles,
        by_id: get_event_from_gramps_id,
    }
    Media {
        add: add_media,
        commit: commit_media,
        remove: remove_media,
        get: get_media_from_handle,
        handles: get_media_handles,
        by_id: get_media_from_gramps_id,
    }
    Place {
        add: add_place,
        commit: commit_place,
        remove: remove_place,
        get: get_place_from_handle,
        handles: get_place_handles,
        by_id: get_place_from_gramps_id,
    }
    Repository {
        add: add_repository,
        commit: commit_repository,
        remove: remove_repository,
        get: get_repository_from_handle,
        handles: get_repository_handles,
        by_id: get_repository_from_gramps_id,
    }
    Note {
        add: add_note,
        commit: commit_note,
        remove: remove_note,
        get: get_note_from_handle,
        handles: get_note_handles,
        by_id: get_note_from_gramps_id,
    }
    Tag {
        add: add_tag,
        commit: commit_tag,
        remove: remove_tag,
        get: get_tag_from_handle,
        handles: get_tag_handles,
        by_id: get_tag_from_gramps_id,
    }
    Citation {
        add: add_citation,
        commit: commit_citation,
        remove: remove_citation,
        get: get_citation_from_handle,
        handles: get_citation_handles,
        by_id: get_citation_from_gramps_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn backends() -> Vec<Backend> {
        vec![
            Backend::open_in_memory(EngineKind::Sqlite).unwrap(),
            Backend::open_in_memory(EngineKind::Document).unwrap(),
        ]
    }

    fn person(handle: &str, first: &str, surname: &str, gender: Gender) -> Person {
        let mut person = Person::new(format!("I-{}", handle), Name::new(first, surname), gender);
        person.handle = Handle::new(handle);
        person
    }

    fn family(handle: &str, father: &str) -> Family {
        let mut family = Family::new(format!("F-{}", handle));
        family.handle = Handle::new(handle);
        family.father_handle = Some(Handle::new(father));
        family
    }

    fn backlinks(backend: &Backend, target: &str) -> Vec<(&'static str, Handle)> {
        backend
            .find_backlink_handles(&Handle::new(target), None)
            .unwrap()
            .collect()
    }

    #[test]
    fn test_add_person_and_lookup() {
        for mut backend in backends() {
            let mut txn = backend.transaction_begin("add person").unwrap();
            let mut p1 = person("P1", "Ann", "Doe", Gender::Female);
            backend.add_person(&mut p1, &mut txn).unwrap();
            backend.transaction_commit(txn).unwrap();

            assert!(backend.get_person_handles(false).unwrap().contains(&Handle::new("P1")));
            assert_eq!(backend.get_person_from_handle(&Handle::new("P1")).unwrap(), p1);
            let err = backend.get_person_from_handle(&Handle::new("nonexistent")).unwrap_err();
            assert!(err.is_not_found());
            assert_eq!(backend.get_person_from_gramps_id("I-P1").unwrap(), Some(p1));
        }
    }

    #[test]
    fn test_add_assigns_handle_and_change() {
        for mut backend in backends() {
            let mut txn = backend.transaction_begin("add note").unwrap();
            let mut note = Note::new("N0001", "hello");
            let handle = backend.add_note(&mut note, &mut txn).unwrap();
            backend.transaction_commit(txn).unwrap();

            assert!(!handle.is_empty());
            assert_eq!(note.handle, handle);
            assert!(note.change > 0);
            assert_eq!(backend.get_note_from_handle(&handle).unwrap().text, "hello");
        }
    }

    #[test]
    fn test_family_backlink_follows_commits() {
        for mut backend in backends() {
            let mut txn = backend.transaction_begin("setup").unwrap();
            backend.add_person(&mut person("P1", "Bob", "Doe", Gender::Male), &mut txn).unwrap();
            backend.add_family(&mut family("F1", "P1"), &mut txn).unwrap();
            backend.transaction_commit(txn).unwrap();

            let found: Vec<_> = backend
                .find_backlink_handles(&Handle::new("P1"), Some(&["Family"]))
                .unwrap()
                .collect();
            assert_eq!(found, vec![("Family", Handle::new("F1"))]);

            let mut txn = backend.transaction_begin("delete family").unwrap();
            backend.remove_family(&Handle::new("F1"), &mut txn).unwrap();
            backend.transaction_commit(txn).unwrap();
            assert!(backlinks(&backend, "P1").is_empty());
        }
    }

    #[test]
    fn test_batch_import_then_verify() {
        let mut backend = Backend::open_in_memory(EngineKind::Sqlite).unwrap();
        let mut batch = backend.batch_begin("import").unwrap();
        for i in 0..5_000 {
            let p = format!("P{}", i);
            backend
                .add_person(&mut person(&p, "Ann", &format!("S{}", i % 50), Gender::Female), &mut batch)
                .unwrap();
            backend.add_family(&mut family(&format!("F{}", i), &p), &mut batch).unwrap();
        }
        assert_eq!(batch.len(), 10_000);
        let stats = backend.batch_commit(batch, None).unwrap();
        assert_eq!(stats.records, 10_000);
        assert_eq!(stats.references, 5_000);

        let again = backend.reindex_reference_map(None).unwrap();
        assert_eq!((again.added, again.removed), (0, 0));

        let report = backend.verify().unwrap();
        assert_eq!(report.mismatches().count(), 0);
        assert!(report.is_consistent());
        assert_eq!(backend.gender_stats("Ann").unwrap().female, 5_000);
        assert_eq!(backlinks(&backend, "P42"), vec![("Family", Handle::new("F42"))]);
    }

    #[test]
    fn test_abort_leaves_store_untouched() {
        for mut backend in backends() {
            let mut txn = backend.transaction_begin("setup").unwrap();
            backend.add_family(&mut family("F1", "P1"), &mut txn).unwrap();
            backend.transaction_commit(txn).unwrap();
            let before = backend.engine().all_references().unwrap();

            let mut txn = backend.transaction_begin("abandoned").unwrap();
            backend.add_family(&mut family("F2", "P2"), &mut txn).unwrap();
            backend.commit_family(&mut family("F1", "P3"), &mut txn).unwrap();
            backend.remove_family(&Handle::new("F1"), &mut txn).unwrap();
            backend.transaction_abort(txn).unwrap();

            assert_eq!(backend.get_family_handles(false).unwrap(), vec![Handle::new("F1")]);
            assert_eq!(backend.engine().all_references().unwrap(), before);
            assert!(backend.transaction_begin("next").is_ok());
        }
    }

    #[test]
    fn test_single_open_transaction() {
        let mut backend = Backend::open_in_memory(EngineKind::Sqlite).unwrap();
        let txn = backend.transaction_begin("first").unwrap();
        assert!(matches!(backend.transaction_begin("second"), Err(Error::Transaction(_))));
        assert!(matches!(backend.batch_begin("batch"), Err(Error::Transaction(_))));
        assert!(matches!(backend.undo(), Err(Error::Transaction(_))));
        backend.transaction_abort(txn).unwrap();

        let mut stale = backend.transaction_begin("stale").unwrap();
        let stale_id = stale.id();
        backend.transaction_commit(Transaction::new("unrelated")).unwrap_err();
        assert_eq!(backend.open_txn, Some(stale_id));
        backend.add_note(&mut Note::new("N1", "x"), &mut stale).unwrap();
        backend.transaction_commit(stale).unwrap();
    }

    #[test]
    fn test_undo_redo_restores_references_and_aggregates() {
        for mut backend in backends() {
            let mut txn = backend.transaction_begin("setup").unwrap();
            backend.add_person(&mut person("P1", "Ann", "Doe", Gender::Female), &mut txn).unwrap();
            backend.add_family(&mut family("F1", "P1"), &mut txn).unwrap();
            backend.transaction_commit(txn).unwrap();

            let mut txn = backend.transaction_begin("rewire").unwrap();
            backend.commit_family(&mut family("F1", "P2"), &mut txn).unwrap();
            backend
                .commit_person(&mut person("P1", "Ann", "Smith", Gender::Female), &mut txn)
                .unwrap();
            backend.set_metadata_in(&mut txn, "default-person", MetaValue::from("P1")).unwrap();
            backend.transaction_commit(txn).unwrap();

            assert!(backlinks(&backend, "P1").is_empty());
            assert_eq!(backend.engine().surname_count("Smith").unwrap(), 1);
            assert_eq!(backend.engine().surname_count("Doe").unwrap(), 0);

            assert!(backend.undo().unwrap());
            assert_eq!(backlinks(&backend, "P1"), vec![("Family", Handle::new("F1"))]);
            assert!(backlinks(&backend, "P2").is_empty());
            assert_eq!(backend.engine().surname_count("Doe").unwrap(), 1);
            assert_eq!(backend.engine().surname_count("Smith").unwrap(), 0);
            assert_eq!(
                backend.get_metadata("default-person", MetaValue::from("none")).unwrap(),
                MetaValue::from("none")
            );
            assert!(backend.can_redo());

            assert!(backend.redo().unwrap());
            assert_eq!(backlinks(&backend, "P2"), vec![("Family", Handle::new("F1"))]);
            assert_eq!(
                backend.get_metadata("default-person", MetaValue::from("none")).unwrap(),
                MetaValue::from("P1")
            );

            assert!(backend.undo().unwrap());
            assert!(backend.undo().unwrap());
            assert!(!backend.undo().unwrap());
            assert!(backend.get_person_handles(false).unwrap().is_empty());
            assert!(backend.engine().all_references().unwrap().is_empty());
            assert!(backend.surnames().unwrap().is_empty());
        }
    }

    #[test]
    fn test_commit_notifies_per_type_and_action() {
        let mut backend = Backend::open_in_memory(EngineKind::Document).unwrap();
        let rx = backend.subscribe();

        let mut txn = backend.transaction_begin("two people").unwrap();
        backend.add_person(&mut person("P1", "A", "B", Gender::Male), &mut txn).unwrap();
        backend.add_person(&mut person("P2", "C", "D", Gender::Female), &mut txn).unwrap();
        backend.add_family(&mut family("F1", "P1"), &mut txn).unwrap();
        backend.remove_family(&Handle::new("F1"), &mut txn).unwrap();
        backend.transaction_commit(txn).unwrap();

        let signals: Vec<Signal> = rx.try_iter().collect();
        assert_eq!(
            signals,
            vec![Signal::Changed {
                obj_type: ObjectType::Person,
                action: Action::Add,
                handles: vec![Handle::new("P1"), Handle::new("P2")],
            }]
        );

        let mut batch = backend.batch_begin("import").unwrap();
        backend.add_note(&mut Note::new("N1", "x"), &mut batch).unwrap();
        backend.batch_commit(batch, None).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Signal::Rebuild);
        assert!(!backend.can_undo());
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut backend = Backend::open_in_memory(EngineKind::Sqlite).unwrap();
        let mut txn = backend.transaction_begin("remove").unwrap();
        let err = backend.remove_event(&Handle::new("E404"), &mut txn).unwrap_err();
        assert!(err.is_not_found());
        backend.transaction_abort(txn).unwrap();
    }

    #[test]
    fn test_batch_abort_keeps_writes_and_reindexes() {
        let mut backend = Backend::open_in_memory(EngineKind::Sqlite).unwrap();
        let mut batch = backend.batch_begin("partial import").unwrap();
        backend.add_family(&mut family("F1", "P1"), &mut batch).unwrap();
        let stats = backend.batch_abort(batch).unwrap();

        assert_eq!(stats.added, 1);
        assert_eq!(backend.get_family_handles(false).unwrap().len(), 1);
        assert_eq!(backlinks(&backend, "P1").len(), 1);
    }

    #[test]
    fn test_name_group_mapping_defaults_to_surname() {
        let mut backend = Backend::open_in_memory(EngineKind::Document).unwrap();
        assert_eq!(backend.get_name_group_mapping("Smyth").unwrap(), "Smyth");
        backend.set_name_group_mapping("Smyth", Some("Smith")).unwrap();
        assert_eq!(backend.get_name_group_mapping("Smyth").unwrap(), "Smith");
        backend.set_name_group_mapping("Smyth", None).unwrap();
        assert_eq!(backend.get_name_group_mapping("Smyth").unwrap(), "Smyth");
    }

    #[test]
    fn test_version_key_is_protected() {
        let mut backend = Backend::open_in_memory(EngineKind::Sqlite).unwrap();
        assert!(matches!(
            backend.set_metadata(schema::VERSION_KEY, MetaValue::Int(1)),
            Err(Error::Schema(_))
        ));
        let info = backend.get_schema_info().unwrap();
        assert_eq!(info.version, Some(schema::SCHEMA_VERSION));
        assert_eq!(info.containers.len(), 15);
    }

    #[test]
    fn test_reopen_document_database_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackendConfig::with_engine(EngineKind::Document);
        {
            let mut backend = Backend::create(dir.path(), config, false).unwrap();
            let mut txn = backend.transaction_begin("setup").unwrap();
            backend.add_family(&mut family("F1", "P1"), &mut txn).unwrap();
            backend.transaction_commit(txn).unwrap();
            backend.close().unwrap();
        }

        let backend = Backend::open(dir.path(), &Credentials::default()).unwrap();
        assert_eq!(backend.config().engine, EngineKind::Document);
        assert_eq!(backlinks(&backend, "P1"), vec![("Family", Handle::new("F1"))]);
        assert!(dir.path().join(config::DOCUMENTS_DIR).join("family.json").exists());
    }

    #[test]
    fn test_failed_commit_is_not_visible_or_undoable() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackendConfig::with_engine(EngineKind::Document);
        let mut backend = Backend::create(dir.path(), config, false).unwrap();
        let blocker = dir.path().join(config::DOCUMENTS_DIR).join("note.json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        let signals = backend.subscribe();

        let mut txn = backend.transaction_begin("add note").unwrap();
        let mut note = Note::new("N0001", "lost");
        note.handle = Handle::new("N1");
        backend.add_note(&mut note, &mut txn).unwrap();
        assert!(matches!(backend.transaction_commit(txn), Err(Error::Io(_))));

        assert!(backend.get_note_from_handle(&Handle::new("N1")).unwrap_err().is_not_found());
        assert!(!backend.can_undo());
        assert!(signals.try_recv().is_err());

        std::fs::remove_dir(&blocker).unwrap();
        let mut txn = backend.transaction_begin("add note again").unwrap();
        backend.add_note(&mut note, &mut txn).unwrap();
        backend.transaction_commit(txn).unwrap();
        assert_eq!(backend.get_note_from_handle(&Handle::new("N1")).unwrap().text, "lost");
    }

    #[test]
    fn test_migrate_sqlite_database_into_document_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = Backend::create(&dir.path().join("old"), BackendConfig::default(), false).unwrap();
        let mut txn = source.transaction_begin("setup").unwrap();
        source.add_person(&mut person("P1", "Ann", "Doe", Gender::Female), &mut txn).unwrap();
        source.add_family(&mut family("F1", "P1"), &mut txn).unwrap();
        source.transaction_commit(txn).unwrap();

        let mut target = Backend::open_in_memory(EngineKind::Document).unwrap();
        assert_eq!(
            target.detect_migration_needed(Some(source.engine())).unwrap(),
            MigrationNeed::ForeignEngine
        );
        let report = target.migrate_from(source.engine(), None).unwrap();
        assert_eq!(report.total_records(), 2);
        assert!(target.verify().unwrap().is_consistent());
        assert_eq!(backlinks(&target, "P1"), vec![("Family", Handle::new("F1"))]);
        assert_eq!(target.gender_stats("Ann").unwrap().female, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Commit { family: u8, father: u8, child: u8 },
        Remove { family: u8 },
        Batch { family: u8, father: u8 },
        Undo,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 0u8..4, 0u8..4).prop_map(|(family, father, child)| Op::Commit { family, father, child }),
            (0u8..4).prop_map(|family| Op::Remove { family }),
            (0u8..4, 0u8..4).prop_map(|(family, father)| Op::Batch { family, father }),
            Just(Op::Undo),
        ]
    }

    fn apply(backend: &mut Backend, op: &Op) {
        match *op {
            Op::Commit { family: f, father, child } => {
                let mut fam = family(&format!("F{}", f), &format!("P{}", father));
                fam.child_ref_list.push(ChildRef::new(Handle::new(format!("P{}", child))));
                let mut txn = backend.transaction_begin("commit").unwrap();
                backend.commit_family(&mut fam, &mut txn).unwrap();
                backend.transaction_commit(txn).unwrap();
            }
            Op::Remove { family: f } => {
                let mut txn = backend.transaction_begin("remove").unwrap();
                match backend.remove_family(&Handle::new(format!("F{}", f)), &mut txn) {
                    Ok(()) => backend.transaction_commit(txn).unwrap(),
                    Err(e) => {
                        assert!(e.is_not_found());
                        backend.transaction_abort(txn).unwrap();
                    }
                }
            }
            Op::Batch { family: f, father } => {
                let mut batch = backend.batch_begin("batch").unwrap();
                backend
                    .commit_family(&mut family(&format!("F{}", f), &format!("P{}", father)), &mut batch)
                    .unwrap();
                backend.batch_commit(batch, None).unwrap();
            }
            Op::Undo => {
                backend.undo().unwrap();
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_backlinks_match_live_payloads(ops in proptest::collection::vec(op_strategy(), 1..20)) {
            let mut backend = Backend::open_in_memory(EngineKind::Sqlite).unwrap();
            for op in &ops {
                apply(&mut backend, op);
            }

            for p in 0..4 {
                let target = Handle::new(format!("P{}", p));
                let mut expected = BTreeSet::new();
                for handle in backend.get_family_handles(false).unwrap() {
                    let fam = backend.get_family_from_handle(&handle).unwrap();
                    let refs = fam.referenced_handles();
                    if refs.contains(&(ObjectType::Person, target.clone())) {
                        expected.insert(("Family", handle));
                    }
                }
                let actual: BTreeSet<_> = backend.find_backlink_handles(&target, None).unwrap().collect();
                prop_assert_eq!(actual, expected);
            }
            prop_assert!(backend.verify().unwrap().is_consistent());
        }
    }
}
