//! Secondary objects - values embedded inside primary records
//!
//! Secondary objects have no handle of their own. Several of them point at
//! primary records (an `EventRef` points at an Event, a `ChildRef` at a
//! Person) and may carry their own citation and note lists, so reference
//! collection has to walk into them.

use super::{HasReferences, RefSet, add_refs};
use crate::handle::Handle;
use crate::object::ObjectType;
use serde::{Deserialize, Serialize};

/// Biological sex as recorded, used for gender statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
    #[default]
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
            Gender::Unknown => "unknown",
        }
    }
}

/// A personal name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    pub first_name: String,
    pub surname: String,
    pub title: String,
    pub suffix: String,
    pub call: String,
    pub nick: String,
    /// Overrides the surname when grouping names
    pub group_as: String,
    pub name_type: String,
    pub citation_list: Vec<Handle>,
    pub note_list: Vec<Handle>,
    pub private: bool,
}

impl Name {
    pub fn new(first_name: impl Into<String>, surname: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            surname: surname.into(),
            name_type: "Birth Name".to_string(),
            ..Default::default()
        }
    }

    /// First word of the first name, the key of the gender statistics
    pub fn given_key(&self) -> Option<&str> {
        self.first_name.split_whitespace().next()
    }
}

impl HasReferences for Name {
    fn collect_references(&self, refs: &mut RefSet) {
        add_refs(refs, ObjectType::Citation, &self.citation_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
    }
}

/// Link from a person or family to an event, with the role played
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    #[serde(rename = "ref")]
    pub ref_handle: Handle,
    pub role: String,
    pub citation_list: Vec<Handle>,
    pub note_list: Vec<Handle>,
    pub private: bool,
}

impl EventRef {
    pub fn new(event: Handle, role: impl Into<String>) -> Self {
        Self {
            ref_handle: event,
            role: role.into(),
            ..Default::default()
        }
    }
}

impl HasReferences for EventRef {
    fn collect_references(&self, refs: &mut RefSet) {
        refs.insert((ObjectType::Event, self.ref_handle.clone()));
        add_refs(refs, ObjectType::Citation, &self.citation_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
    }
}

/// Link from a family to a child
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    #[serde(rename = "ref")]
    pub ref_handle: Handle,
    /// Relationship to the father ("Birth", "Adopted", ...)
    pub frel: String,
    /// Relationship to the mother
    pub mrel: String,
    pub citation_list: Vec<Handle>,
    pub note_list: Vec<Handle>,
    pub private: bool,
}

impl ChildRef {
    pub fn new(child: Handle) -> Self {
        Self {
            ref_handle: child,
            frel: "Birth".to_string(),
            mrel: "Birth".to_string(),
            ..Default::default()
        }
    }
}

impl HasReferences for ChildRef {
    fn collect_references(&self, refs: &mut RefSet) {
        refs.insert((ObjectType::Person, self.ref_handle.clone()));
        add_refs(refs, ObjectType::Citation, &self.citation_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
    }
}

/// Association between two people (godfather, witness, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    #[serde(rename = "ref")]
    pub ref_handle: Handle,
    pub rel: String,
    pub citation_list: Vec<Handle>,
    pub note_list: Vec<Handle>,
    pub private: bool,
}

impl PersonRef {
    pub fn new(person: Handle, rel: impl Into<String>) -> Self {
        Self {
            ref_handle: person,
            rel: rel.into(),
            ..Default::default()
        }
    }
}

impl HasReferences for PersonRef {
    fn collect_references(&self, refs: &mut RefSet) {
        refs.insert((ObjectType::Person, self.ref_handle.clone()));
        add_refs(refs, ObjectType::Citation, &self.citation_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
    }
}

/// Link to a media object, optionally restricted to a region of it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(rename = "ref")]
    pub ref_handle: Handle,
    /// Region as percentages (x1, y1, x2, y2)
    pub rect: Option<(u8, u8, u8, u8)>,
    pub citation_list: Vec<Handle>,
    pub note_list: Vec<Handle>,
    pub private: bool,
}

impl MediaRef {
    pub fn new(media: Handle) -> Self {
        Self {
            ref_handle: media,
            ..Default::default()
        }
    }
}

impl HasReferences for MediaRef {
    fn collect_references(&self, refs: &mut RefSet) {
        refs.insert((ObjectType::Media, self.ref_handle.clone()));
        add_refs(refs, ObjectType::Citation, &self.citation_list);
        add_refs(refs, ObjectType::Note, &self.note_list);
    }
}

/// Link from a source to the repository holding it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    #[serde(rename = "ref")]
    pub ref_handle: Handle,
    pub call_number: String,
    pub media_type: String,
    pub note_list: Vec<Handle>,
    pub private: bool,
}

impl RepoRef {
    pub fn new(repository: Handle, call_number: impl Into<String>) -> Self {
        Self {
            ref_handle: repository,
            call_number: call_number.into(),
            media_type: "Book".to_string(),
            ..Default::default()
        }
    }
}

impl HasReferences for RepoRef {
    fn collect_references(&self, refs: &mut RefSet) {
        refs.insert((ObjectType::Repository, self.ref_handle.clone()));
        add_refs(refs, ObjectType::Note, &self.note_list);
    }
}

/// Link from a place to an enclosing place
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceRef {
    #[serde(rename = "ref")]
    pub ref_handle: Handle,
    pub date: String,
}

impl PlaceRef {
    pub fn new(enclosing: Handle) -> Self {
        Self {
            ref_handle: enclosing,
            date: String::new(),
        }
    }
}

impl HasReferences for PlaceRef {
    fn collect_references(&self, refs: &mut RefSet) {
        refs.insert((ObjectType::Place, self.ref_handle.clone()));
    }
}

/// Web address attached to a place or repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Url {
    pub path: String,
    pub desc: String,
    pub url_type: String,
    pub private: bool,
}
