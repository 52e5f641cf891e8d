//! SQLite storage engine
//!
//! One table per object type with `blob_data` (raw encoding), `json_data`
//! (structured encoding, queried with `json_extract`) and `change_time`.

use std::path::{Path, PathBuf};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use crate::{Error, Result};
use crate::handle::Handle;
use crate::metadata::{GenderStats, MetaValue};
use crate::object::ObjectType;
use crate::reference::Reference;
use crate::schema::{self, UpgradeStep};
use super::{EngineKind, HandleOrder, RecordCounts, StorageEngine, StoredRecord};

/// SQLite-backed storage engine
pub struct SqliteEngine {
    conn: Connection,
    path: Option<PathBuf>,
    in_txn: bool,
}

impl SqliteEngine {
    /// Open a database file (creates the file if it doesn't exist, but no tables)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            in_txn: false,
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: None,
            in_txn: false,
        })
    }

    /// Create a v1 schema: blob-only object tables, no auxiliary containers
    pub fn create_legacy_v1_schema(&mut self) -> Result<()> {
        for stmt in schema::legacy_v1_statements() {
            self.conn.execute(&stmt, [])?;
        }
        Ok(())
    }

    /// Build a `json_extract` path (`$.a.b`) from path segments
    fn json_path(path: &[&str]) -> String {
        let mut out = String::from("$");
        for segment in path {
            out.push('.');
            out.push_str(segment);
        }
        out
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        for name in names {
            if name? == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Column expression for the structured field; NULL on v1 tables
    fn structured_column(&self, obj_type: ObjectType) -> Result<&'static str> {
        Ok(if self.has_structured_field(obj_type)? { "json_data" } else { "NULL" })
    }

    /// Helper to convert a row to a StoredRecord
    fn row_to_record(obj_type: ObjectType, row: &rusqlite::Row) -> Result<StoredRecord> {
        let handle = Handle::new(row.get::<_, String>(0)?);
        let json: Option<String> = row.get(2)?;
        let structured = match json {
            Some(text) => Some(serde_json::from_str::<Value>(&text).map_err(|e| Error::Encoding {
                obj_type,
                handle: handle.clone(),
                reason: format!("unreadable json_data: {}", e),
            })?),
            None => None,
        };
        Ok(StoredRecord {
            handle,
            raw: row.get(1)?,
            structured,
            change_time: row.get(3)?,
        })
    }

    fn row_to_reference(row: &rusqlite::Row) -> rusqlite::Result<Reference> {
        let owner_class: String = row.get(1)?;
        let target_class: String = row.get(3)?;
        let owner_type = ObjectType::from_class_name(&owner_class).ok_or_else(|| unknown_class(1, &owner_class))?;
        let target_type = ObjectType::from_class_name(&target_class).ok_or_else(|| unknown_class(3, &target_class))?;
        Ok(Reference::new(
            owner_type,
            Handle::new(row.get::<_, String>(0)?),
            target_type,
            Handle::new(row.get::<_, String>(2)?),
        ))
    }

    fn query_references(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Reference>> {
        let mut stmt = self.conn.prepare(sql)?;
        let refs = stmt
            .query_map(params, Self::row_to_reference)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(refs)
    }

    fn query_handles(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Handle>> {
        let mut stmt = self.conn.prepare(sql)?;
        let handles = stmt
            .query_map(params, |row| row.get::<_, String>(0).map(Handle::new))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(handles)
    }
}

fn unknown_class(column: usize, class: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(Error::Schema(format!("Unknown object class in reference table: {}", class))),
    )
}

impl StorageEngine for SqliteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn location(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }

    // ========== Container Operations ==========

    fn container_exists(&self, container: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [container],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn has_structured_field(&self, obj_type: ObjectType) -> Result<bool> {
        self.column_exists(obj_type.container(), "json_data")
    }

    fn has_raw_field(&self, obj_type: ObjectType) -> Result<bool> {
        self.column_exists(obj_type.container(), "blob_data")
    }

    fn create_schema(&mut self) -> Result<()> {
        for stmt in schema::all_schema_statements() {
            self.conn.execute(&stmt, [])?;
        }
        Ok(())
    }

    fn apply_upgrade(&mut self, step: UpgradeStep) -> Result<()> {
        match step {
            UpgradeStep::StructuredEncoding => {
                for ty in ObjectType::all() {
                    if !self.container_exists(ty.container())? {
                        self.conn.execute(&schema::create_object_table(*ty, true), [])?;
                    } else if !self.has_structured_field(*ty)? {
                        self.conn.execute(&schema::add_structured_column(*ty), [])?;
                    }
                    self.conn.execute(&schema::create_gramps_id_index(*ty), [])?;
                }
            }
            UpgradeStep::AuxiliaryContainers => {
                for stmt in schema::auxiliary_statements() {
                    self.conn.execute(&stmt, [])?;
                }
            }
        }
        Ok(())
    }

    fn container_rows(&self, container: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(&format!("SELECT COUNT(*) FROM {}", container), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========== Record Operations ==========

    fn get(&self, obj_type: ObjectType, handle: &Handle) -> Result<Option<StoredRecord>> {
        let sql = format!(
            "SELECT handle, blob_data, {}, change_time FROM {} WHERE handle = ?1",
            self.structured_column(obj_type)?,
            obj_type.container()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([handle.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_record(obj_type, row)?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, obj_type: ObjectType, record: StoredRecord) -> Result<Option<StoredRecord>> {
        let old = self.get(obj_type, &record.handle)?;
        if !self.has_structured_field(obj_type)? {
            if record.structured.is_some() {
                return Err(Error::Schema(format!(
                    "{} has no json_data column; upgrade the schema first",
                    obj_type.container()
                )));
            }
            self.conn.execute(
                &format!(
                    r#"
                    INSERT INTO {} (handle, blob_data, change_time)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(handle) DO UPDATE SET
                        blob_data = excluded.blob_data,
                        change_time = excluded.change_time
                    "#,
                    obj_type.container()
                ),
                params![record.handle.as_str(), record.raw, record.change_time],
            )?;
            return Ok(old);
        }
        let json = record.structured.as_ref().map(Value::to_string);
        self.conn.execute(
            &format!(
                r#"
                INSERT INTO {} (handle, blob_data, json_data, change_time)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(handle) DO UPDATE SET
                    blob_data = excluded.blob_data,
                    json_data = excluded.json_data,
                    change_time = excluded.change_time
                "#,
                obj_type.container()
            ),
            params![record.handle.as_str(), record.raw, json, record.change_time],
        )?;
        Ok(old)
    }

    fn delete(&mut self, obj_type: ObjectType, handle: &Handle) -> Result<Option<StoredRecord>> {
        let old = self.get(obj_type, handle)?;
        if old.is_some() {
            self.conn.execute(
                &format!("DELETE FROM {} WHERE handle = ?1", obj_type.container()),
                [handle.as_str()],
            )?;
        }
        Ok(old)
    }

    fn set_structured(&mut self, obj_type: ObjectType, handle: &Handle, value: &Value) -> Result<bool> {
        let changed = self.conn.execute(
            &format!("UPDATE {} SET json_data = ?1 WHERE handle = ?2", obj_type.container()),
            params![value.to_string(), handle.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn handles(&self, obj_type: ObjectType, order: HandleOrder) -> Result<Vec<Handle>> {
        let container = obj_type.container();
        let sql = match order {
            HandleOrder::Handle => format!("SELECT handle FROM {} ORDER BY handle", container),
            HandleOrder::SortField => {
                let info = obj_type.info();
                let mut keys = vec![format!(
                    "json_extract(json_data, '{}') COLLATE NOCASE",
                    Self::json_path(info.sort_path)
                )];
                if let Some(secondary) = info.sort_path_secondary {
                    keys.push(format!(
                        "json_extract(json_data, '{}') COLLATE NOCASE",
                        Self::json_path(secondary)
                    ));
                }
                keys.push("handle".to_string());
                format!("SELECT handle FROM {} ORDER BY {}", container, keys.join(", "))
            }
        };
        self.query_handles(&sql, &[])
    }

    fn handles_missing_structured(&self, obj_type: ObjectType) -> Result<Vec<Handle>> {
        let sql = format!(
            "SELECT handle FROM {} WHERE blob_data IS NOT NULL AND json_data IS NULL ORDER BY handle",
            obj_type.container()
        );
        self.query_handles(&sql, &[])
    }

    fn find_by_field(&self, obj_type: ObjectType, path: &[&str], value: &str) -> Result<Vec<Handle>> {
        let sql = format!(
            "SELECT handle FROM {} WHERE json_extract(json_data, '{}') = ?1 ORDER BY handle",
            obj_type.container(),
            Self::json_path(path)
        );
        self.query_handles(&sql, &[&value])
    }

    fn scan(&self, obj_type: ObjectType, visit: &mut dyn FnMut(StoredRecord) -> Result<()>) -> Result<()> {
        let sql = format!(
            "SELECT handle, blob_data, {}, change_time FROM {} ORDER BY handle",
            self.structured_column(obj_type)?,
            obj_type.container()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            match Self::row_to_record(obj_type, row) {
                Ok(record) => visit(record)?,
                Err(e) if e.is_encoding() => tracing::warn!("Skipping unreadable row: {}", e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn counts(&self, obj_type: ObjectType) -> Result<RecordCounts> {
        let sql = format!(
            "SELECT COUNT(*), COUNT(blob_data), COUNT({}), COALESCE(SUM(LENGTH(blob_data)), 0) FROM {}",
            self.structured_column(obj_type)?,
            obj_type.container()
        );
        let counts = self.conn.query_row(&sql, [], |row| {
            Ok(RecordCounts {
                rows: row.get::<_, i64>(0)? as usize,
                raw: row.get::<_, i64>(1)? as usize,
                structured: row.get::<_, i64>(2)? as usize,
                raw_bytes: row.get::<_, i64>(3)? as u64,
            })
        })?;
        Ok(counts)
    }

    // ========== Reference Operations ==========

    fn insert_reference(&mut self, reference: &Reference) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO reference (obj_handle, obj_class, ref_handle, ref_class) VALUES (?1, ?2, ?3, ?4)",
            params![
                reference.owner_handle.as_str(),
                reference.owner_type.class_name(),
                reference.target_handle.as_str(),
                reference.target_type.class_name(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn delete_reference(&mut self, reference: &Reference) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM reference WHERE obj_handle = ?1 AND obj_class = ?2 AND ref_handle = ?3 AND ref_class = ?4",
            params![
                reference.owner_handle.as_str(),
                reference.owner_type.class_name(),
                reference.target_handle.as_str(),
                reference.target_type.class_name(),
            ],
        )?;
        Ok(deleted > 0)
    }

    fn delete_references_from(&mut self, owner_type: ObjectType, owner: &Handle) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM reference WHERE obj_handle = ?1 AND obj_class = ?2",
            params![owner.as_str(), owner_type.class_name()],
        )?;
        Ok(deleted)
    }

    fn references_from(&self, owner_type: ObjectType, owner: &Handle) -> Result<Vec<Reference>> {
        self.query_references(
            "SELECT obj_handle, obj_class, ref_handle, ref_class FROM reference
             WHERE obj_handle = ?1 AND obj_class = ?2 ORDER BY ref_class, ref_handle",
            &[&owner.as_str(), &owner_type.class_name()],
        )
    }

    fn references_to(&self, target: &Handle) -> Result<Vec<Reference>> {
        self.query_references(
            "SELECT obj_handle, obj_class, ref_handle, ref_class FROM reference
             WHERE ref_handle = ?1 ORDER BY obj_class, obj_handle",
            &[&target.as_str()],
        )
    }

    fn all_references(&self) -> Result<Vec<Reference>> {
        self.query_references(
            "SELECT obj_handle, obj_class, ref_handle, ref_class FROM reference",
            &[],
        )
    }

    // ========== Metadata Operations ==========

    fn get_metadata(&self, key: &str) -> Result<Option<MetaValue>> {
        let text: Option<String> = self
            .conn
            .query_row("SELECT value FROM metadata WHERE setting = ?1", [key], |row| row.get(0))
            .optional()?;
        match text {
            Some(text) => {
                let value = serde_json::from_str(&text).map_err(|e| {
                    Error::Schema(format!("metadata value for {:?} is unreadable: {}", key, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set_metadata(&mut self, key: &str, value: &MetaValue) -> Result<()> {
        let text = serde_json::to_string(value)
            .map_err(|e| Error::Schema(format!("metadata value for {:?} cannot be stored: {}", key, e)))?;
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (setting, value, value_type) VALUES (?1, ?2, ?3)",
            params![key, text, value.type_tag()],
        )?;
        Ok(())
    }

    fn delete_metadata(&mut self, key: &str) -> Result<bool> {
        let deleted = self.conn.execute("DELETE FROM metadata WHERE setting = ?1", [key])?;
        Ok(deleted > 0)
    }

    fn metadata_entries(&self) -> Result<Vec<(String, MetaValue)>> {
        let mut stmt = self.conn.prepare("SELECT setting, value FROM metadata ORDER BY setting")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (key, text) in rows {
            match serde_json::from_str(&text) {
                Ok(value) => entries.push((key, value)),
                Err(e) => tracing::warn!("Skipping unreadable metadata {:?}: {}", key, e),
            }
        }
        Ok(entries)
    }

    // ========== Aggregate Operations ==========

    fn gender_stats(&self, given_name: &str) -> Result<Option<GenderStats>> {
        self.conn
            .query_row(
                "SELECT female, male, unknown FROM gender_stats WHERE given_name = ?1",
                [given_name],
                |row| {
                    Ok(GenderStats {
                        female: row.get(0)?,
                        male: row.get(1)?,
                        unknown: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    fn set_gender_stats(&mut self, given_name: &str, stats: GenderStats) -> Result<()> {
        if stats.is_empty() {
            self.conn.execute("DELETE FROM gender_stats WHERE given_name = ?1", [given_name])?;
        } else {
            self.conn.execute(
                "INSERT OR REPLACE INTO gender_stats (given_name, female, male, unknown) VALUES (?1, ?2, ?3, ?4)",
                params![given_name, stats.female, stats.male, stats.unknown],
            )?;
        }
        Ok(())
    }

    fn all_gender_stats(&self) -> Result<Vec<(String, GenderStats)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT given_name, female, male, unknown FROM gender_stats ORDER BY given_name")?;
        let stats = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    GenderStats {
                        female: row.get(1)?,
                        male: row.get(2)?,
                        unknown: row.get(3)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    fn surname_count(&self, surname: &str) -> Result<u32> {
        let count: Option<u32> = self
            .conn
            .query_row("SELECT count FROM surname WHERE surname = ?1", [surname], |row| row.get(0))
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    fn set_surname_count(&mut self, surname: &str, count: u32) -> Result<()> {
        if count == 0 {
            self.conn.execute("DELETE FROM surname WHERE surname = ?1", [surname])?;
        } else {
            self.conn.execute(
                "INSERT OR REPLACE INTO surname (surname, count) VALUES (?1, ?2)",
                params![surname, count],
            )?;
        }
        Ok(())
    }

    fn all_surnames(&self) -> Result<Vec<(String, u32)>> {
        let mut stmt = self.conn.prepare("SELECT surname, count FROM surname ORDER BY surname")?;
        let surnames = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(surnames)
    }

    fn name_group(&self, name: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT grouping FROM name_group WHERE name = ?1", [name], |row| row.get(0))
            .optional()
            .map_err(Into::into)
    }

    fn set_name_group(&mut self, name: &str, group: Option<&str>) -> Result<()> {
        match group {
            Some(group) => {
                self.conn.execute(
                    "INSERT OR REPLACE INTO name_group (name, grouping) VALUES (?1, ?2)",
                    params![name, group],
                )?;
            }
            None => {
                self.conn.execute("DELETE FROM name_group WHERE name = ?1", [name])?;
            }
        }
        Ok(())
    }

    fn all_name_groups(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare("SELECT name, grouping FROM name_group ORDER BY name")?;
        let groups = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    fn clear_aggregates(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM gender_stats", [])?;
        self.conn.execute("DELETE FROM surname", [])?;
        Ok(())
    }

    // ========== Transaction Operations ==========

    fn begin(&mut self) -> Result<()> {
        if self.in_txn {
            return Err(Error::Transaction("engine transaction already open".to_string()));
        }
        self.conn.execute("BEGIN TRANSACTION", [])?;
        self.in_txn = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_txn {
            return Err(Error::Transaction("no engine transaction to commit".to_string()));
        }
        if let Err(e) = self.conn.execute("COMMIT", []) {
            // A failed COMMIT may leave the transaction open
            self.in_txn = !self.conn.is_autocommit();
            return Err(e.into());
        }
        self.in_txn = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_txn {
            return Err(Error::Transaction("no engine transaction to roll back".to_string()));
        }
        self.in_txn = false;
        if !self.conn.is_autocommit() {
            self.conn.execute("ROLLBACK", [])?;
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_txn
    }

    fn close(&mut self) -> Result<()> {
        if self.in_txn {
            tracing::warn!("Closing {} with an open transaction; rolling back", self.location());
            self.rollback()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(handle: &str, structured: Option<Value>) -> StoredRecord {
        StoredRecord {
            handle: Handle::new(handle),
            raw: Some(vec![1, 2, 3]),
            structured,
            change_time: 42,
        }
    }

    fn engine() -> SqliteEngine {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        engine.create_schema().unwrap();
        engine
    }

    /// Every new note also inserts a row that violates a deferred foreign
    /// key, so COMMIT fails while the transaction stays open
    fn engine_with_failing_commit() -> SqliteEngine {
        let engine = engine();
        engine
            .conn
            .execute_batch(
                "PRAGMA foreign_keys = ON;
                 CREATE TABLE owner (id INTEGER PRIMARY KEY);
                 CREATE TABLE owned (owner_id INTEGER REFERENCES owner(id) DEFERRABLE INITIALLY DEFERRED);
                 CREATE TEMP TRIGGER note_owned AFTER INSERT ON note
                 BEGIN INSERT INTO owned VALUES (7); END;",
            )
            .unwrap();
        engine
    }

    #[test]
    fn test_raw_field_detection() {
        let mut engine = engine();
        assert!(engine.has_raw_field(ObjectType::Event).unwrap());
        engine
            .conn
            .execute_batch("DROP TABLE event; CREATE TABLE event (handle TEXT PRIMARY KEY, json_data TEXT);")
            .unwrap();
        assert!(!engine.has_raw_field(ObjectType::Event).unwrap());
        assert!(engine.has_structured_field(ObjectType::Event).unwrap());
    }

    #[test]
    fn test_failed_commit_keeps_transaction_rollbackable() {
        let mut engine = engine_with_failing_commit();
        engine.begin().unwrap();
        engine.put(ObjectType::Note, record("N1", None)).unwrap();

        assert!(engine.commit().is_err());
        assert!(engine.in_transaction());
        engine.rollback().unwrap();
        assert!(!engine.in_transaction());
        assert!(engine.get(ObjectType::Note, &Handle::new("N1")).unwrap().is_none());
        engine.begin().unwrap();
        engine.rollback().unwrap();
    }

    #[test]
    fn test_atomically_rolls_back_failed_commit() {
        let mut engine = engine_with_failing_commit();
        let result = crate::engine::atomically(&mut engine, |engine| {
            engine.put(ObjectType::Note, record("N1", None))?;
            engine.put(ObjectType::Tag, record("T1", None))?;
            Ok(())
        });

        assert!(matches!(result, Err(Error::Connection(_))));
        assert!(!engine.in_transaction());
        assert!(engine.get(ObjectType::Note, &Handle::new("N1")).unwrap().is_none());
        assert!(engine.get(ObjectType::Tag, &Handle::new("T1")).unwrap().is_none());
        engine.begin().unwrap();
        engine.commit().unwrap();
    }

    #[test]
    fn test_record_crud() {
        let mut engine = engine();
        let old = engine
            .put(ObjectType::Note, record("N1", Some(serde_json::json!({"gramps_id": "N0001"}))))
            .unwrap();
        assert!(old.is_none());

        let fetched = engine.get(ObjectType::Note, &Handle::new("N1")).unwrap().unwrap();
        assert_eq!(fetched.raw, Some(vec![1, 2, 3]));
        assert_eq!(fetched.structured.unwrap()["gramps_id"], "N0001");

        let old = engine.put(ObjectType::Note, record("N1", None)).unwrap();
        assert!(old.is_some());
        assert_eq!(engine.counts(ObjectType::Note).unwrap().structured, 0);

        assert!(engine.delete(ObjectType::Note, &Handle::new("N1")).unwrap().is_some());
        assert!(engine.get(ObjectType::Note, &Handle::new("N1")).unwrap().is_none());
    }

    #[test]
    fn test_reference_uniqueness() {
        let mut engine = engine();
        let edge = Reference::new(ObjectType::Family, Handle::new("F1"), ObjectType::Person, Handle::new("P1"));

        assert!(engine.insert_reference(&edge).unwrap());
        assert!(!engine.insert_reference(&edge).unwrap());
        assert_eq!(engine.container_rows(schema::REFERENCE).unwrap(), 1);
        assert_eq!(engine.references_to(&Handle::new("P1")).unwrap(), vec![edge.clone()]);
        assert_eq!(engine.delete_references_from(ObjectType::Family, &Handle::new("F1")).unwrap(), 1);
    }

    #[test]
    fn test_sorted_handles_use_json_field() {
        let mut engine = engine();
        engine.put(ObjectType::Tag, record("a", Some(serde_json::json!({"name": "zeta"})))).unwrap();
        engine.put(ObjectType::Tag, record("b", Some(serde_json::json!({"name": "Alpha"})))).unwrap();
        engine.put(ObjectType::Tag, record("c", Some(serde_json::json!({"name": "beta"})))).unwrap();

        let sorted = engine.handles(ObjectType::Tag, HandleOrder::SortField).unwrap();
        assert_eq!(sorted, vec![Handle::new("b"), Handle::new("c"), Handle::new("a")]);
        let found = engine.find_by_field(ObjectType::Tag, &["name"], "beta").unwrap();
        assert_eq!(found, vec![Handle::new("c")]);
    }

    #[test]
    fn test_upgrade_adds_structured_column() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        engine.create_legacy_v1_schema().unwrap();
        assert!(!engine.has_structured_field(ObjectType::Person).unwrap());
        assert_eq!(engine.counts(ObjectType::Person).unwrap(), RecordCounts::default());

        engine.apply_upgrade(UpgradeStep::StructuredEncoding).unwrap();
        engine.apply_upgrade(UpgradeStep::StructuredEncoding).unwrap();
        assert!(engine.has_structured_field(ObjectType::Person).unwrap());
    }

    #[test]
    fn test_rollback_discards_writes() {
        let mut engine = engine();
        engine.begin().unwrap();
        engine.put(ObjectType::Event, record("E1", None)).unwrap();
        engine.set_metadata("k", &MetaValue::Int(1)).unwrap();
        engine.rollback().unwrap();

        assert!(engine.get(ObjectType::Event, &Handle::new("E1")).unwrap().is_none());
        assert!(engine.get_metadata("k").unwrap().is_none());
        assert!(engine.begin().is_ok());
    }
}
