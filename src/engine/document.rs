//! Document storage engine
//!
//! Every container is a collection of JSON documents held in memory. When
//! opened on a directory, each collection is persisted as
//! `<dir>/<container>.json` and rewritten on `commit` and `close`. Writes made
//! outside a transaction stay in memory until the next flush.
//!
//! Documents are schemaless, so the structured field always "exists"; a
//! legacy collection is one where documents carry only the raw blob.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::{Error, Result};
use crate::handle::Handle;
use crate::metadata::{GenderStats, MetaValue};
use crate::object::ObjectType;
use crate::reference::Reference;
use crate::schema::{self, UpgradeStep};
use super::{EngineKind, HandleOrder, RecordCounts, StorageEngine, StoredRecord};

/// Raw blobs are kept as base64 text inside JSON files
mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|t| STANDARD.decode(t).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    #[serde(with = "base64_bytes", default)]
    raw: Option<Vec<u8>>,
    #[serde(default)]
    json: Option<Value>,
    change_time: i64,
}

impl Document {
    fn into_record(self, handle: Handle) -> StoredRecord {
        StoredRecord {
            handle,
            raw: self.raw,
            structured: self.json,
            change_time: self.change_time,
        }
    }
}

/// Everything the engine stores; cloned wholesale as the rollback snapshot
#[derive(Debug, Clone, Default)]
struct State {
    containers: BTreeSet<String>,
    objects: BTreeMap<ObjectType, BTreeMap<Handle, Document>>,
    references: BTreeSet<Reference>,
    /// target handle -> edges pointing at it
    by_target: BTreeMap<Handle, BTreeSet<Reference>>,
    metadata: BTreeMap<String, MetaValue>,
    gender_stats: BTreeMap<String, GenderStats>,
    surnames: BTreeMap<String, u32>,
    name_groups: BTreeMap<String, String>,
}

impl State {
    fn insert_reference(&mut self, reference: Reference) -> bool {
        if !self.references.insert(reference.clone()) {
            return false;
        }
        self.by_target
            .entry(reference.target_handle.clone())
            .or_default()
            .insert(reference);
        true
    }

    fn remove_reference(&mut self, reference: &Reference) -> bool {
        if !self.references.remove(reference) {
            return false;
        }
        if let Some(edges) = self.by_target.get_mut(&reference.target_handle) {
            edges.remove(reference);
            if edges.is_empty() {
                self.by_target.remove(&reference.target_handle);
            }
        }
        true
    }

    fn owned_by(&self, owner_type: ObjectType, owner: &Handle) -> Vec<Reference> {
        self.references
            .iter()
            .skip_while(|r| &r.owner_handle < owner)
            .take_while(|r| &r.owner_handle == owner)
            .filter(|r| r.owner_type == owner_type)
            .cloned()
            .collect()
    }

    fn collection(&self, obj_type: ObjectType) -> Option<&BTreeMap<Handle, Document>> {
        self.objects.get(&obj_type)
    }
}

/// On-disk shape of the reference collection
#[derive(Serialize, Deserialize)]
struct ReferenceFile {
    edges: Vec<Reference>,
}

/// In-memory document store, optionally persisted to a directory
pub struct DocumentEngine {
    dir: Option<PathBuf>,
    state: State,
    snapshot: Option<Box<State>>,
    /// Containers changed since the last flush
    dirty: BTreeSet<String>,
}

impl DocumentEngine {
    /// Open (or prepare) a document store in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut engine = Self {
            dir: Some(dir.to_path_buf()),
            state: State::default(),
            snapshot: None,
            dirty: BTreeSet::new(),
        };
        engine.load()?;
        Ok(engine)
    }

    /// A document store that lives only in memory (for testing)
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            state: State::default(),
            snapshot: None,
            dirty: BTreeSet::new(),
        }
    }

    fn file_for(dir: &Path, container: &str) -> PathBuf {
        dir.join(format!("{}.json", container))
    }

    fn read_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
        let text = std::fs::read_to_string(path)?;
        let value = serde_json::from_str(&text).map_err(|e| {
            Error::Schema(format!("{} is not a valid document collection: {}", path.display(), e))
        })?;
        Ok(value)
    }

    fn load(&mut self) -> Result<()> {
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };
        let mut state = State::default();

        for ty in ObjectType::all() {
            let path = Self::file_for(&dir, ty.container());
            if path.exists() {
                let docs: BTreeMap<Handle, Document> = Self::read_file(&path)?;
                state.objects.insert(*ty, docs);
                state.containers.insert(ty.container().to_string());
            }
        }

        let path = Self::file_for(&dir, schema::REFERENCE);
        if path.exists() {
            let file: ReferenceFile = Self::read_file(&path)?;
            for edge in file.edges {
                state.insert_reference(edge);
            }
            state.containers.insert(schema::REFERENCE.to_string());
        }

        let path = Self::file_for(&dir, schema::METADATA);
        if path.exists() {
            state.metadata = Self::read_file(&path)?;
            state.containers.insert(schema::METADATA.to_string());
        }
        let path = Self::file_for(&dir, schema::GENDER_STATS);
        if path.exists() {
            state.gender_stats = Self::read_file(&path)?;
            state.containers.insert(schema::GENDER_STATS.to_string());
        }
        let path = Self::file_for(&dir, schema::SURNAME);
        if path.exists() {
            state.surnames = Self::read_file(&path)?;
            state.containers.insert(schema::SURNAME.to_string());
        }
        let path = Self::file_for(&dir, schema::NAME_GROUP);
        if path.exists() {
            state.name_groups = Self::read_file(&path)?;
            state.containers.insert(schema::NAME_GROUP.to_string());
        }

        tracing::debug!("Loaded {} document containers from {}", state.containers.len(), dir.display());
        self.state = state;
        Ok(())
    }

    fn write_file<T: Serialize>(dir: &Path, container: &str, value: &T) -> Result<()> {
        let path = Self::file_for(dir, container);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string(value).map_err(std::io::Error::from)?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn touch(&mut self, container: &str) {
        self.dirty.insert(container.to_string());
    }

    fn write_container(dir: &Path, state: &State, container: &str) -> Result<()> {
        if let Some(ty) = ObjectType::all().iter().find(|ty| ty.container() == container) {
            let empty = BTreeMap::new();
            let docs = state.collection(*ty).unwrap_or(&empty);
            return Self::write_file(dir, container, docs);
        }
        match container {
            schema::REFERENCE => {
                let file = ReferenceFile {
                    edges: state.references.iter().cloned().collect(),
                };
                Self::write_file(dir, container, &file)
            }
            schema::METADATA => Self::write_file(dir, container, &state.metadata),
            schema::GENDER_STATS => Self::write_file(dir, container, &state.gender_stats),
            schema::SURNAME => Self::write_file(dir, container, &state.surnames),
            schema::NAME_GROUP => Self::write_file(dir, container, &state.name_groups),
            other => Err(Error::Schema(format!("unknown container: {}", other))),
        }
    }

    /// Write the containers changed since the last flush
    ///
    /// A container is removed from the dirty set only once its file is
    /// written, so a failed flush can be retried.
    pub fn flush(&mut self) -> Result<()> {
        let Some(dir) = self.dir.clone() else {
            self.dirty.clear();
            return Ok(());
        };
        let pending: Vec<String> = self.dirty.iter().cloned().collect();
        for container in pending {
            if self.state.containers.contains(&container) {
                Self::write_container(&dir, &self.state, &container)?;
            }
            self.dirty.remove(&container);
        }
        Ok(())
    }

    fn require(&self, container: &str) -> Result<()> {
        if self.state.containers.contains(container) {
            Ok(())
        } else {
            Err(Error::Schema(format!("missing container: {}", container)))
        }
    }

    fn collection_mut(&mut self, obj_type: ObjectType) -> Result<&mut BTreeMap<Handle, Document>> {
        self.require(obj_type.container())?;
        self.touch(obj_type.container());
        Ok(self.state.objects.entry(obj_type).or_default())
    }

    fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
        path.iter().try_fold(value, |current, key| current.get(*key))
    }

    fn sort_key(doc: &Document, path: Option<&[&str]>) -> String {
        let Some(path) = path else {
            return String::new();
        };
        match doc.json.as_ref().and_then(|json| Self::lookup(json, path)) {
            Some(Value::String(s)) => s.to_lowercase(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

impl Drop for DocumentEngine {
    fn drop(&mut self) {
        if self.snapshot.is_none() {
            if let Err(e) = self.flush() {
                tracing::warn!("Failed to flush document store on drop: {}", e);
            }
        }
    }
}

impl StorageEngine for DocumentEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Document
    }

    fn location(&self) -> String {
        self.dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }

    // ========== Container Operations ==========

    fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self.state.containers.contains(container))
    }

    fn has_structured_field(&self, obj_type: ObjectType) -> Result<bool> {
        self.container_exists(obj_type.container())
    }

    fn has_raw_field(&self, obj_type: ObjectType) -> Result<bool> {
        self.container_exists(obj_type.container())
    }

    fn create_schema(&mut self) -> Result<()> {
        let state = &mut self.state;
        for ty in ObjectType::all() {
            state.containers.insert(ty.container().to_string());
            state.objects.entry(*ty).or_default();
        }
        for container in [schema::REFERENCE, schema::METADATA]
            .into_iter()
            .chain(schema::AUXILIARY_CONTAINERS.iter().copied())
        {
            state.containers.insert(container.to_string());
        }
        self.dirty.extend(self.state.containers.iter().cloned());
        Ok(())
    }

    fn apply_upgrade(&mut self, step: UpgradeStep) -> Result<()> {
        match step {
            UpgradeStep::StructuredEncoding => {
                for ty in ObjectType::all() {
                    self.state.containers.insert(ty.container().to_string());
                    self.state.objects.entry(*ty).or_default();
                }
            }
            UpgradeStep::AuxiliaryContainers => {
                for container in schema::AUXILIARY_CONTAINERS {
                    self.state.containers.insert(container.to_string());
                }
            }
        }
        self.dirty.extend(self.state.containers.iter().cloned());
        Ok(())
    }

    fn container_rows(&self, container: &str) -> Result<usize> {
        self.require(container)?;
        let state = &self.state;
        let rows = match container {
            schema::REFERENCE => state.references.len(),
            schema::METADATA => state.metadata.len(),
            schema::GENDER_STATS => state.gender_stats.len(),
            schema::SURNAME => state.surnames.len(),
            schema::NAME_GROUP => state.name_groups.len(),
            other => ObjectType::from_class_name(other)
                .and_then(|ty| state.collection(ty))
                .map(BTreeMap::len)
                .unwrap_or(0),
        };
        Ok(rows)
    }

    // ========== Record Operations ==========

    fn get(&self, obj_type: ObjectType, handle: &Handle) -> Result<Option<StoredRecord>> {
        self.require(obj_type.container())?;
        Ok(self
            .state
            .collection(obj_type)
            .and_then(|docs| docs.get(handle))
            .map(|doc| doc.clone().into_record(handle.clone())))
    }

    fn put(&mut self, obj_type: ObjectType, record: StoredRecord) -> Result<Option<StoredRecord>> {
        let handle = record.handle.clone();
        let doc = Document {
            raw: record.raw,
            json: record.structured,
            change_time: record.change_time,
        };
        let old = self.collection_mut(obj_type)?.insert(handle.clone(), doc);
        Ok(old.map(|doc| doc.into_record(handle)))
    }

    fn delete(&mut self, obj_type: ObjectType, handle: &Handle) -> Result<Option<StoredRecord>> {
        let old = self.collection_mut(obj_type)?.remove(handle);
        Ok(old.map(|doc| doc.into_record(handle.clone())))
    }

    fn set_structured(&mut self, obj_type: ObjectType, handle: &Handle, value: &Value) -> Result<bool> {
        match self.collection_mut(obj_type)?.get_mut(handle) {
            Some(doc) => {
                doc.json = Some(value.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn handles(&self, obj_type: ObjectType, order: HandleOrder) -> Result<Vec<Handle>> {
        self.require(obj_type.container())?;
        let Some(docs) = self.state.collection(obj_type) else {
            return Ok(Vec::new());
        };
        match order {
            HandleOrder::Handle => Ok(docs.keys().cloned().collect()),
            HandleOrder::SortField => {
                let info = obj_type.info();
                let mut keyed: Vec<(String, String, &Handle)> = docs
                    .iter()
                    .map(|(handle, doc)| {
                        (
                            Self::sort_key(doc, Some(info.sort_path)),
                            Self::sort_key(doc, info.sort_path_secondary),
                            handle,
                        )
                    })
                    .collect();
                keyed.sort();
                Ok(keyed.into_iter().map(|(_, _, h)| h.clone()).collect())
            }
        }
    }

    fn handles_missing_structured(&self, obj_type: ObjectType) -> Result<Vec<Handle>> {
        self.require(obj_type.container())?;
        Ok(self
            .state
            .collection(obj_type)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| doc.raw.is_some() && doc.json.is_none())
                    .map(|(h, _)| h.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_by_field(&self, obj_type: ObjectType, path: &[&str], value: &str) -> Result<Vec<Handle>> {
        self.require(obj_type.container())?;
        Ok(self
            .state
            .collection(obj_type)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| {
                        doc.json
                            .as_ref()
                            .and_then(|json| Self::lookup(json, path))
                            .and_then(Value::as_str)
                            == Some(value)
                    })
                    .map(|(h, _)| h.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn scan(&self, obj_type: ObjectType, visit: &mut dyn FnMut(StoredRecord) -> Result<()>) -> Result<()> {
        self.require(obj_type.container())?;
        if let Some(docs) = self.state.collection(obj_type) {
            for (handle, doc) in docs {
                visit(doc.clone().into_record(handle.clone()))?;
            }
        }
        Ok(())
    }

    fn counts(&self, obj_type: ObjectType) -> Result<RecordCounts> {
        self.require(obj_type.container())?;
        let mut counts = RecordCounts::default();
        if let Some(docs) = self.state.collection(obj_type) {
            for doc in docs.values() {
                counts.rows += 1;
                if let Some(raw) = &doc.raw {
                    counts.raw += 1;
                    counts.raw_bytes += raw.len() as u64;
                }
                if doc.json.is_some() {
                    counts.structured += 1;
                }
            }
        }
        Ok(counts)
    }

    // ========== Reference Operations ==========

    fn insert_reference(&mut self, reference: &Reference) -> Result<bool> {
        self.require(schema::REFERENCE)?;
        self.touch(schema::REFERENCE);
        Ok(self.state.insert_reference(reference.clone()))
    }

    fn delete_reference(&mut self, reference: &Reference) -> Result<bool> {
        self.require(schema::REFERENCE)?;
        self.touch(schema::REFERENCE);
        Ok(self.state.remove_reference(reference))
    }

    fn delete_references_from(&mut self, owner_type: ObjectType, owner: &Handle) -> Result<usize> {
        self.require(schema::REFERENCE)?;
        self.touch(schema::REFERENCE);
        let owned = self.state.owned_by(owner_type, owner);
        for edge in &owned {
            self.state.remove_reference(edge);
        }
        Ok(owned.len())
    }

    fn references_from(&self, owner_type: ObjectType, owner: &Handle) -> Result<Vec<Reference>> {
        self.require(schema::REFERENCE)?;
        Ok(self.state.owned_by(owner_type, owner))
    }

    fn references_to(&self, target: &Handle) -> Result<Vec<Reference>> {
        self.require(schema::REFERENCE)?;
        let mut edges: Vec<Reference> = self
            .state
            .by_target
            .get(target)
            .map(|edges| edges.iter().cloned().collect())
            .unwrap_or_default();
        edges.sort_by(|a, b| {
            (a.owner_type.class_name(), &a.owner_handle).cmp(&(b.owner_type.class_name(), &b.owner_handle))
        });
        Ok(edges)
    }

    fn all_references(&self) -> Result<Vec<Reference>> {
        self.require(schema::REFERENCE)?;
        Ok(self.state.references.iter().cloned().collect())
    }

    // ========== Metadata Operations ==========

    fn get_metadata(&self, key: &str) -> Result<Option<MetaValue>> {
        self.require(schema::METADATA)?;
        Ok(self.state.metadata.get(key).cloned())
    }

    fn set_metadata(&mut self, key: &str, value: &MetaValue) -> Result<()> {
        self.require(schema::METADATA)?;
        self.state.metadata.insert(key.to_string(), value.clone());
        self.touch(schema::METADATA);
        Ok(())
    }

    fn delete_metadata(&mut self, key: &str) -> Result<bool> {
        self.require(schema::METADATA)?;
        self.touch(schema::METADATA);
        Ok(self.state.metadata.remove(key).is_some())
    }

    fn metadata_entries(&self) -> Result<Vec<(String, MetaValue)>> {
        self.require(schema::METADATA)?;
        Ok(self
            .state
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    // ========== Aggregate Operations ==========

    fn gender_stats(&self, given_name: &str) -> Result<Option<GenderStats>> {
        self.require(schema::GENDER_STATS)?;
        Ok(self.state.gender_stats.get(given_name).copied())
    }

    fn set_gender_stats(&mut self, given_name: &str, stats: GenderStats) -> Result<()> {
        self.require(schema::GENDER_STATS)?;
        if stats.is_empty() {
            self.state.gender_stats.remove(given_name);
        } else {
            self.state.gender_stats.insert(given_name.to_string(), stats);
        }
        self.touch(schema::GENDER_STATS);
        Ok(())
    }

    fn all_gender_stats(&self) -> Result<Vec<(String, GenderStats)>> {
        self.require(schema::GENDER_STATS)?;
        Ok(self
            .state
            .gender_stats
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    fn surname_count(&self, surname: &str) -> Result<u32> {
        self.require(schema::SURNAME)?;
        Ok(self.state.surnames.get(surname).copied().unwrap_or(0))
    }

    fn set_surname_count(&mut self, surname: &str, count: u32) -> Result<()> {
        self.require(schema::SURNAME)?;
        if count == 0 {
            self.state.surnames.remove(surname);
        } else {
            self.state.surnames.insert(surname.to_string(), count);
        }
        self.touch(schema::SURNAME);
        Ok(())
    }

    fn all_surnames(&self) -> Result<Vec<(String, u32)>> {
        self.require(schema::SURNAME)?;
        Ok(self
            .state
            .surnames
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    fn name_group(&self, name: &str) -> Result<Option<String>> {
        self.require(schema::NAME_GROUP)?;
        Ok(self.state.name_groups.get(name).cloned())
    }

    fn set_name_group(&mut self, name: &str, group: Option<&str>) -> Result<()> {
        self.require(schema::NAME_GROUP)?;
        match group {
            Some(group) => {
                self.state.name_groups.insert(name.to_string(), group.to_string());
            }
            None => {
                self.state.name_groups.remove(name);
            }
        }
        self.touch(schema::NAME_GROUP);
        Ok(())
    }

    fn all_name_groups(&self) -> Result<Vec<(String, String)>> {
        self.require(schema::NAME_GROUP)?;
        Ok(self
            .state
            .name_groups
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear_aggregates(&mut self) -> Result<()> {
        self.require(schema::GENDER_STATS)?;
        self.require(schema::SURNAME)?;
        self.state.gender_stats.clear();
        self.state.surnames.clear();
        self.touch(schema::GENDER_STATS);
        self.touch(schema::SURNAME);
        Ok(())
    }

    // ========== Transaction Operations ==========

    fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(Error::Transaction("engine transaction already open".to_string()));
        }
        self.snapshot = Some(Box::new(self.state.clone()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.snapshot.is_none() {
            return Err(Error::Transaction("no engine transaction to commit".to_string()));
        }
        if let Err(e) = self.flush() {
            // Undo in memory, then try to put the files already written back
            if let Some(state) = self.snapshot.take() {
                self.state = *state;
                self.dirty.extend(self.state.containers.iter().cloned());
            }
            if let Err(restore) = self.flush() {
                tracing::warn!("Failed to restore {} after a failed commit: {}", self.location(), restore);
            }
            return Err(e);
        }
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        match self.snapshot.take() {
            Some(state) => {
                self.state = *state;
                Ok(())
            }
            None => Err(Error::Transaction("no engine transaction to roll back".to_string())),
        }
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn close(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            tracing::warn!("Closing {} with an open transaction; rolling back", self.location());
            self.rollback()?;
        }
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(handle: &str, json: Option<Value>) -> StoredRecord {
        StoredRecord {
            handle: Handle::new(handle),
            raw: Some(vec![0, 159, 146, 150]),
            structured: json,
            change_time: 7,
        }
    }

    #[test]
    fn test_missing_container_is_schema_error() {
        let engine = DocumentEngine::in_memory();
        assert!(matches!(
            engine.get(ObjectType::Person, &Handle::new("P1")),
            Err(Error::Schema(_))
        ));
        assert!(!engine.container_exists("person").unwrap());
    }

    #[test]
    fn test_persists_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut engine = DocumentEngine::open(dir.path()).unwrap();
            engine.create_schema().unwrap();
            engine
                .put(ObjectType::Place, record("PL1", Some(serde_json::json!({"title": "Boston"}))))
                .unwrap();
            engine
                .insert_reference(&Reference::new(
                    ObjectType::Event,
                    Handle::new("E1"),
                    ObjectType::Place,
                    Handle::new("PL1"),
                ))
                .unwrap();
            engine.set_metadata("version", &MetaValue::Int(3)).unwrap();
            engine.close().unwrap();
        }

        let engine = DocumentEngine::open(dir.path()).unwrap();
        let place = engine.get(ObjectType::Place, &Handle::new("PL1")).unwrap().unwrap();
        assert_eq!(place.raw, Some(vec![0, 159, 146, 150]));
        assert_eq!(place.structured.unwrap()["title"], "Boston");
        assert_eq!(engine.references_to(&Handle::new("PL1")).unwrap().len(), 1);
        assert_eq!(engine.get_metadata("version").unwrap(), Some(MetaValue::Int(3)));
        assert!(engine.container_exists(schema::NAME_GROUP).unwrap());
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let mut engine = DocumentEngine::in_memory();
        engine.create_schema().unwrap();
        engine.put(ObjectType::Note, record("N1", None)).unwrap();

        engine.begin().unwrap();
        engine.delete(ObjectType::Note, &Handle::new("N1")).unwrap();
        engine.put(ObjectType::Note, record("N2", None)).unwrap();
        engine.rollback().unwrap();

        assert_eq!(engine.handles(ObjectType::Note, HandleOrder::Handle).unwrap(), vec![Handle::new("N1")]);
        assert_eq!(engine.handles_missing_structured(ObjectType::Note).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_flush_restores_pre_transaction_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = DocumentEngine::open(dir.path()).unwrap();
        engine.create_schema().unwrap();
        engine.flush().unwrap();

        let blocker = dir.path().join("note.json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        engine.begin().unwrap();
        engine.put(ObjectType::Tag, record("T1", None)).unwrap();
        engine.put(ObjectType::Note, record("N1", None)).unwrap();

        assert!(matches!(engine.commit(), Err(Error::Io(_))));
        assert!(!engine.in_transaction());
        assert!(engine.get(ObjectType::Note, &Handle::new("N1")).unwrap().is_none());
        assert!(engine.get(ObjectType::Tag, &Handle::new("T1")).unwrap().is_none());

        std::fs::remove_dir(&blocker).unwrap();
        engine.begin().unwrap();
        engine.put(ObjectType::Note, record("N2", None)).unwrap();
        engine.commit().unwrap();
        drop(engine);

        let engine = DocumentEngine::open(dir.path()).unwrap();
        assert_eq!(engine.handles(ObjectType::Note, HandleOrder::Handle).unwrap(), vec![Handle::new("N2")]);
        assert!(engine.handles(ObjectType::Tag, HandleOrder::Handle).unwrap().is_empty());
    }

    #[test]
    fn test_flush_writes_only_changed_containers() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = DocumentEngine::open(dir.path()).unwrap();
        engine.create_schema().unwrap();
        engine.flush().unwrap();
        let tag_file = dir.path().join("tag.json");
        std::fs::remove_file(&tag_file).unwrap();

        engine.begin().unwrap();
        engine.put(ObjectType::Note, record("N1", None)).unwrap();
        engine.commit().unwrap();

        assert!(dir.path().join("note.json").exists());
        assert!(!tag_file.exists());
    }

    #[test]
    fn test_references_from_only_returns_owner_edges() {
        let mut engine = DocumentEngine::in_memory();
        engine.create_schema().unwrap();
        let edge = |owner: &str, target: &str| {
            Reference::new(ObjectType::Family, Handle::new(owner), ObjectType::Person, Handle::new(target))
        };
        engine.insert_reference(&edge("F1", "P1")).unwrap();
        engine.insert_reference(&edge("F1", "P2")).unwrap();
        engine.insert_reference(&edge("F2", "P1")).unwrap();

        assert_eq!(engine.references_from(ObjectType::Family, &Handle::new("F1")).unwrap().len(), 2);
        assert_eq!(engine.delete_references_from(ObjectType::Family, &Handle::new("F1")).unwrap(), 2);
        assert_eq!(engine.references_to(&Handle::new("P1")).unwrap(), vec![edge("F2", "P1")]);
    }
}
