//! Object Store - typed, dual-encoded record access
//!
//! Sits on top of any [`StorageEngine`]: it encodes payloads into both forms
//! on write and decodes them on read. The raw form is authoritative; the
//! structured form is what sorting and field lookups query.

use crate::codec;
use crate::engine::{HandleOrder, RecordCounts, StorageEngine, StoredRecord};
use crate::handle::Handle;
use crate::model::Payload;
use crate::object::ObjectType;
use crate::{Error, Result};
use serde_json::Value;

/// A decoded view of a stored record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub obj_type: ObjectType,
    pub handle: Handle,
    pub raw: Option<Vec<u8>>,
    pub structured: Option<Value>,
    pub change_time: i64,
}

impl Record {
    pub(crate) fn from_stored(obj_type: ObjectType, stored: StoredRecord) -> Self {
        Self {
            obj_type,
            handle: stored.handle,
            raw: stored.raw,
            structured: stored.structured,
            change_time: stored.change_time,
        }
    }

    /// Decode the payload from the authoritative raw form
    pub fn payload(&self) -> Result<Payload> {
        match &self.raw {
            Some(raw) => codec::decode_raw(self.obj_type, &self.handle, raw),
            None => match &self.structured {
                Some(value) => codec::from_structured(self.obj_type, &self.handle, value),
                None => Err(Error::Encoding {
                    obj_type: self.obj_type,
                    handle: self.handle.clone(),
                    reason: "record carries no encoding".to_string(),
                }),
            },
        }
    }
}

impl StoredRecord {
    /// Decode for reference and aggregate scans: structured when present, else raw
    pub fn decode(&self, obj_type: ObjectType) -> Result<Payload> {
        match (&self.structured, &self.raw) {
            (Some(value), _) => codec::from_structured(obj_type, &self.handle, value),
            (None, Some(raw)) => codec::decode_raw(obj_type, &self.handle, raw),
            (None, None) => Err(Error::Encoding {
                obj_type,
                handle: self.handle.clone(),
                reason: "record carries no encoding".to_string(),
            }),
        }
    }

    /// Decode from the raw form only
    pub fn decode_raw(&self, obj_type: ObjectType) -> Result<Payload> {
        match &self.raw {
            Some(raw) => codec::decode_raw(obj_type, &self.handle, raw),
            None => Err(Error::Encoding {
                obj_type,
                handle: self.handle.clone(),
                reason: "record has no raw encoding".to_string(),
            }),
        }
    }
}

/// Typed record operations, available on every storage engine
pub trait ObjectStore {
    /// Fetch a record; `None` when the handle is absent
    fn get_record(&self, obj_type: ObjectType, handle: &Handle) -> Result<Option<Record>>;

    /// Fetch and decode a payload
    fn get_payload(&self, obj_type: ObjectType, handle: &Handle) -> Result<Option<Payload>>;

    /// Encode a payload into both forms and write it, returning the previous payload
    fn put_payload(&mut self, payload: &Payload) -> Result<Option<Payload>>;

    /// Remove a record, returning its payload if it existed
    fn delete_record(&mut self, obj_type: ObjectType, handle: &Handle) -> Result<Option<Payload>>;

    /// All handles of a type, optionally ordered by the type's sort field
    fn list_handles(&self, obj_type: ObjectType, sort_handles: bool) -> Result<Vec<Handle>>;

    fn count(&self, obj_type: ObjectType) -> Result<usize>;

    fn record_counts(&self, obj_type: ObjectType) -> Result<RecordCounts>;

    fn has_handle(&self, obj_type: ObjectType, handle: &Handle) -> Result<bool>;

    /// Look a record up by its user-facing identifier
    fn find_by_gramps_id(&self, obj_type: ObjectType, gramps_id: &str) -> Result<Option<Payload>>;
}

/// Decode an old version, tolerating a blob that no longer decodes
fn previous(obj_type: ObjectType, old: Option<StoredRecord>) -> Option<Payload> {
    let old = old?;
    match old.decode_raw(obj_type).or_else(|_| old.decode(obj_type)) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!("Previous version of {} {} is undecodable: {}", obj_type, old.handle, e);
            None
        }
    }
}

impl<E: StorageEngine + ?Sized> ObjectStore for E {
    fn get_record(&self, obj_type: ObjectType, handle: &Handle) -> Result<Option<Record>> {
        Ok(self.get(obj_type, handle)?.map(|r| Record::from_stored(obj_type, r)))
    }

    fn get_payload(&self, obj_type: ObjectType, handle: &Handle) -> Result<Option<Payload>> {
        match self.get_record(obj_type, handle)? {
            Some(record) => record.payload().map(Some),
            None => Ok(None),
        }
    }

    fn put_payload(&mut self, payload: &Payload) -> Result<Option<Payload>> {
        let obj_type = payload.object_type();
        let handle = payload.handle().clone();
        if handle.is_empty() {
            return Err(Error::InvalidHandle(format!("cannot store {} without a handle", obj_type)));
        }

        let raw = codec::encode_raw(payload)?;
        let structured = if self.has_structured_field(obj_type)? {
            Some(codec::to_structured(payload)?)
        } else {
            None
        };

        let old = self.put(
            obj_type,
            StoredRecord {
                handle,
                raw: Some(raw),
                structured,
                change_time: payload.change(),
            },
        )?;
        Ok(previous(obj_type, old))
    }

    fn delete_record(&mut self, obj_type: ObjectType, handle: &Handle) -> Result<Option<Payload>> {
        let old = self.delete(obj_type, handle)?;
        Ok(previous(obj_type, old))
    }

    fn list_handles(&self, obj_type: ObjectType, sort_handles: bool) -> Result<Vec<Handle>> {
        let order = if sort_handles {
            HandleOrder::SortField
        } else {
            HandleOrder::Handle
        };
        self.handles(obj_type, order)
    }

    fn count(&self, obj_type: ObjectType) -> Result<usize> {
        self.container_rows(obj_type.container())
    }

    fn record_counts(&self, obj_type: ObjectType) -> Result<RecordCounts> {
        self.counts(obj_type)
    }

    fn has_handle(&self, obj_type: ObjectType, handle: &Handle) -> Result<bool> {
        Ok(self.get(obj_type, handle)?.is_some())
    }

    fn find_by_gramps_id(&self, obj_type: ObjectType, gramps_id: &str) -> Result<Option<Payload>> {
        let handles = self.find_by_field(obj_type, &["gramps_id"], gramps_id)?;
        if handles.len() > 1 {
            tracing::warn!("{} {} is used by {} records", obj_type, gramps_id, handles.len());
        }
        match handles.first() {
            Some(handle) => self.get_payload(obj_type, handle),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DocumentEngine, SqliteEngine};
    use crate::model::*;

    fn engines() -> Vec<Box<dyn StorageEngine>> {
        let mut sqlite = SqliteEngine::open_in_memory().unwrap();
        sqlite.create_schema().unwrap();
        let mut document = DocumentEngine::in_memory();
        document.create_schema().unwrap();
        vec![Box::new(sqlite), Box::new(document)]
    }

    fn person(handle: &str, id: &str, first: &str, surname: &str) -> Payload {
        let mut person = Person::new(id, Name::new(first, surname), Gender::Unknown);
        person.handle = Handle::new(handle);
        person.into_payload()
    }

    #[test]
    fn test_put_get_delete_on_both_engines() {
        for mut engine in engines() {
            let payload = person("P1", "I0001", "Ann", "Doe");
            assert_eq!(engine.put_payload(&payload).unwrap(), None);

            let record = engine.get_record(ObjectType::Person, &Handle::new("P1")).unwrap().unwrap();
            assert!(record.raw.is_some());
            assert_eq!(record.structured.as_ref().unwrap()["gramps_id"], "I0001");
            assert_eq!(record.payload().unwrap(), payload);

            let updated = person("P1", "I0001", "Anne", "Doe");
            assert_eq!(engine.put_payload(&updated).unwrap(), Some(payload));
            assert_eq!(engine.count(ObjectType::Person).unwrap(), 1);

            assert_eq!(engine.delete_record(ObjectType::Person, &Handle::new("P1")).unwrap(), Some(updated));
            assert!(!engine.has_handle(ObjectType::Person, &Handle::new("P1")).unwrap());
            assert_eq!(engine.delete_record(ObjectType::Person, &Handle::new("P1")).unwrap(), None);
        }
    }

    #[test]
    fn test_sorted_listing_and_gramps_id_lookup() {
        for mut engine in engines() {
            engine.put_payload(&person("P1", "I0001", "Zed", "smith")).unwrap();
            engine.put_payload(&person("P2", "I0002", "Amy", "Adams")).unwrap();
            engine.put_payload(&person("P3", "I0003", "Bob", "Smith")).unwrap();
            engine.put_payload(&person("P4", "I0004", "Al", "Smith")).unwrap();

            let sorted = engine.list_handles(ObjectType::Person, true).unwrap();
            let sorted: Vec<&str> = sorted.iter().map(Handle::as_str).collect();
            assert_eq!(sorted, vec!["P2", "P4", "P3", "P1"]);

            let found = engine.find_by_gramps_id(ObjectType::Person, "I0003").unwrap().unwrap();
            assert_eq!(found.handle(), &Handle::new("P3"));
            assert!(engine.find_by_gramps_id(ObjectType::Person, "I9999").unwrap().is_none());
        }
    }

    #[test]
    fn test_empty_handle_rejected() {
        for mut engine in engines() {
            let payload = Note::new("N0001", "text").into_payload();
            assert!(matches!(engine.put_payload(&payload), Err(Error::InvalidHandle(_))));
        }
    }

    #[test]
    fn test_decode_prefers_structured() {
        let mut place = Place::new("P0001", "Boston");
        place.handle = Handle::new("PL1");
        let payload = place.into_payload();
        let stored = StoredRecord {
            handle: Handle::new("PL1"),
            raw: Some(vec![1, 2, 3]),
            structured: Some(codec::to_structured(&payload).unwrap()),
            change_time: 0,
        };
        assert_eq!(stored.decode(ObjectType::Place).unwrap(), payload);
        assert!(stored.decode_raw(ObjectType::Place).unwrap_err().is_encoding());
    }
}
