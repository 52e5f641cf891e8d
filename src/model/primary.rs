//! Primary record payloads
//!
//! One struct per object type. Every payload carries the common
//! `handle`, `gramps_id`, `change` and `private` fields; the rest is
//! type specific. Outgoing references are collected by walking every
//! handle-bearing field, including those of embedded secondary objects.

use super::secondary::{ChildRef, EventRef, Gender, MediaRef, Name, PersonRef, PlaceRef, RepoRef, Url};
use super::{HasReferences, RefSet, add_refs, collect_all};
use crate::handle::Handle;
use crate::object::ObjectType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub handle: Handle,
    pub gramps_id: String,
    pub gender: Gender,
    pub primary_name: Name,
    pub alternate_names: Vec<Name>,
    pub event_ref_list: Vec<EventRef>,
    /// Index into `event_ref_list` of the birth event
    pub birth_ref_index: Option<u32>,
    pub death_ref_index: Option<u32>,
    /// Families in which this person is a spouse
    pub family_list: Vec<Handle>,
    /// Families in which this person is a child
    pub parent_family_list: Vec<Handle>,
    pub person_ref_list: Vec<PersonRef>,
    pub media_list: Vec<MediaRef>,
    pub citation_list: Vec<Handle>,
    pub note_list: Vec<Handle>,
    pub tag_list: Vec<Handle>,
    pub change: i64,
    pub private: bool,
}

impl Person {
    pub fn new(gramps_id: impl Into<String>, name: Name, gender: Gender) -> Self {
        Self {
            gramps_id: gramps_id.into(),
            primary_name: name,
            gender,
            ..Default::default()
        }
    }

    /// All surnames carried by this person, primary name first
    pub fn surnames(&self) -> impl Iterator<Item = &str> {
        std::iter::once(&self.primary_name)
            .chain(self.alternate_names.iter())
            .map(|n| n.surname.as_str())
            .filter(|s| !s.is_empty())
    }
}

impl HasReferences for Person {
    fn collect_references(&self, refs: &mut RefSet) {
        self.primary_name.collect_references(refs);
        collect_all(refs, &self.alternate_names);
        collect_all(refs, &self.event_ref_list);
        add_refs(refs, ObjectType::Family, &self.family_list);
        add_refs(refs, ObjectType::Family, &self.parent_family_list);
        collect_all(refs, &self.person_ref_list);
        collect_all(refs, &self.media_list);
        add_refs(refs, ObjectType::Citation, &self.citation_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
        add_refs(refs, ObjectType::Tag, &self.tag_list);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    pub handle: Handle,
    pub gramps_id: String,
    pub father_handle: Option<Handle>,
    pub mother_handle: Option<Handle>,
    pub child_ref_list: Vec<ChildRef>,
    /// "Married", "Unmarried", "Civil Union", "Unknown"
    pub relationship: String,
    pub event_ref_list: Vec<EventRef>,
    pub media_list: Vec<MediaRef>,
    pub citation_list: Vec<Handle>,
    pub note_list: Vec<Handle>,
    pub tag_list: Vec<Handle>,
    pub change: i64,
    pub private: bool,
}

impl Family {
    pub fn new(gramps_id: impl Into<String>) -> Self {
        Self {
            gramps_id: gramps_id.into(),
            relationship: "Unknown".to_string(),
            ..Default::default()
        }
    }
}

impl HasReferences for Family {
    fn collect_references(&self, refs: &mut RefSet) {
        for parent in [&self.father_handle, &self.mother_handle].into_iter().flatten() {
            refs.insert((ObjectType::Person, parent.clone()));
        }
        collect_all(refs, &self.child_ref_list);
        collect_all(refs, &self.event_ref_list);
        collect_all(refs, &self.media_list);
        add_refs(refs, ObjectType::Citation, &self.citation_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
        add_refs(refs, ObjectType::Tag, &self.tag_list);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub handle: Handle,
    pub gramps_id: String,
    /// "Birth", "Death", "Marriage", ...
    pub event_type: String,
    /// Free-form date text; parsing and display belong to the caller
    pub date: String,
    pub description: String,
    pub place: Option<Handle>,
    pub media_list: Vec<MediaRef>,
    pub citation_list: Vec<Handle>,
    pub note_list: Vec<Handle>,
    pub tag_list: Vec<Handle>,
    pub change: i64,
    pub private: bool,
}

impl Event {
    pub fn new(gramps_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            gramps_id: gramps_id.into(),
            event_type: event_type.into(),
            ..Default::default()
        }
    }
}

impl HasReferences for Event {
    fn collect_references(&self, refs: &mut RefSet) {
        if let Some(place) = &self.place {
            refs.insert((ObjectType::Place, place.clone()));
        }
        collect_all(refs, &self.media_list);
        add_refs(refs, ObjectType::Citation, &self.citation_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
        add_refs(refs, ObjectType::Tag, &self.tag_list);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub handle: Handle,
    pub gramps_id: String,
    pub title: String,
    pub name: String,
    /// "City", "County", "Country", ...
    pub place_type: String,
    /// Kept as entered text so that no precision is lost
    pub latitude: String,
    pub longitude: String,
    /// Places enclosing this one
    pub placeref_list: Vec<PlaceRef>,
    pub urls: Vec<Url>,
    pub media_list: Vec<MediaRef>,
    pub citation_list: Vec<Handle>,
    pub note_list: Vec<Handle>,
    pub tag_list: Vec<Handle>,
    pub change: i64,
    pub private: bool,
}

impl Place {
    pub fn new(gramps_id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            gramps_id: gramps_id.into(),
            title: name.clone(),
            name,
            place_type: "Unknown".to_string(),
            ..Default::default()
        }
    }
}

impl HasReferences for Place {
    fn collect_references(&self, refs: &mut RefSet) {
        collect_all(refs, &self.placeref_list);
        collect_all(refs, &self.media_list);
        add_refs(refs, ObjectType::Citation, &self.citation_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
        add_refs(refs, ObjectType::Tag, &self.tag_list);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub handle: Handle,
    pub gramps_id: String,
    pub title: String,
    pub author: String,
    pub pubinfo: String,
    pub abbrev: String,
    pub reporef_list: Vec<RepoRef>,
    pub media_list: Vec<MediaRef>,
    pub note_list: Vec<Handle>,
    pub tag_list: Vec<Handle>,
    pub change: i64,
    pub private: bool,
}

impl Source {
    pub fn new(gramps_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            gramps_id: gramps_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}

impl HasReferences for Source {
    fn collect_references(&self, refs: &mut RefSet) {
        collect_all(refs, &self.reporef_list);
        collect_all(refs, &self.media_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
        add_refs(refs, ObjectType::Tag, &self.tag_list);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub handle: Handle,
    pub gramps_id: String,
    pub source_handle: Option<Handle>,
    pub page: String,
    pub date: String,
    /// 0 (very low) to 4 (very high)
    pub confidence: u8,
    pub media_list: Vec<MediaRef>,
    pub note_list: Vec<Handle>,
    pub tag_list: Vec<Handle>,
    pub change: i64,
    pub private: bool,
}

impl Citation {
    pub fn new(gramps_id: impl Into<String>, source: Handle, page: impl Into<String>) -> Self {
        Self {
            gramps_id: gramps_id.into(),
            source_handle: Some(source),
            page: page.into(),
            confidence: 2,
            ..Default::default()
        }
    }
}

impl HasReferences for Citation {
    fn collect_references(&self, refs: &mut RefSet) {
        if let Some(source) = &self.source_handle {
            refs.insert((ObjectType::Source, source.clone()));
        }
        collect_all(refs, &self.media_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
        add_refs(refs, ObjectType::Tag, &self.tag_list);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub handle: Handle,
    pub gramps_id: String,
    pub path: String,
    pub mime: String,
    pub desc: String,
    pub checksum: String,
    pub date: String,
    pub citation_list: Vec<Handle>,
    pub note_list: Vec<Handle>,
    pub tag_list: Vec<Handle>,
    pub change: i64,
    pub private: bool,
}

impl Media {
    pub fn new(gramps_id: impl Into<String>, path: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            gramps_id: gramps_id.into(),
            path: path.into(),
            mime: mime.into(),
            ..Default::default()
        }
    }
}

impl HasReferences for Media {
    fn collect_references(&self, refs: &mut RefSet) {
        add_refs(refs, ObjectType::Citation, &self.citation_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
        add_refs(refs, ObjectType::Tag, &self.tag_list);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub handle: Handle,
    pub gramps_id: String,
    pub name: String,
    /// "Library", "Archive", ...
    pub repo_type: String,
    pub urls: Vec<Url>,
    pub note_list: Vec<Handle>,
    pub tag_list: Vec<Handle>,
    pub change: i64,
    pub private: bool,
}

impl Repository {
    pub fn new(gramps_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            gramps_id: gramps_id.into(),
            name: name.into(),
            repo_type: "Library".to_string(),
            ..Default::default()
        }
    }
}

impl HasReferences for Repository {
    fn collect_references(&self, refs: &mut RefSet) {
        add_refs(refs, ObjectType::Note, &self.note_list);
        add_refs(refs, ObjectType::Tag, &self.tag_list);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub handle: Handle,
    pub gramps_id: String,
    pub text: String,
    pub note_type: String,
    /// 0 = flowed, 1 = preformatted
    pub format: u8,
    pub tag_list: Vec<Handle>,
    pub change: i64,
    pub private: bool,
}

impl Note {
    pub fn new(gramps_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            gramps_id: gramps_id.into(),
            text: text.into(),
            note_type: "General".to_string(),
            ..Default::default()
        }
    }
}

impl HasReferences for Note {
    fn collect_references(&self, refs: &mut RefSet) {
        add_refs(refs, ObjectType::Tag, &self.tag_list);
    }
}

/// Tags have no gramps_id of their own; the field stays empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub handle: Handle,
    pub gramps_id: String,
    pub name: String,
    /// "#rrggbb"
    pub color: String,
    pub priority: u32,
    pub change: i64,
    pub private: bool,
}

impl Tag {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            ..Default::default()
        }
    }
}

impl HasReferences for Tag {
    fn collect_references(&self, _refs: &mut RefSet) {}
}
