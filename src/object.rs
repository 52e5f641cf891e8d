//! Object types - the ten kinds of primary record
//!
//! Every primary record belongs to exactly one kind. The kind decides:
//! - the container (table / collection) it is stored in
//! - the class name used in the reference index
//! - the structured field used for sorted listings
//!
//! All of that lives in one static table indexed by the enum, so there is no
//! runtime registry to keep in sync.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The ten primary record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    Person = 0,
    Family = 1,
    Source = 2,
    Event = 3,
    Media = 4,
    Place = 5,
    Repository = 6,
    Note = 7,
    Tag = 8,
    Citation = 9,
}

/// Static description of one object type
#[derive(Debug)]
pub struct TypeInfo {
    /// Class name, as stored in the reference container
    pub class_name: &'static str,
    /// Container (table / collection) name
    pub container: &'static str,
    /// Path inside the structured encoding used to sort handle listings
    pub sort_path: &'static [&'static str],
    /// Secondary sort path, if any
    pub sort_path_secondary: Option<&'static [&'static str]>,
}

static TYPE_TABLE: [TypeInfo; 10] = [
    TypeInfo {
        class_name: "Person",
        container: "person",
        sort_path: &["primary_name", "surname"],
        sort_path_secondary: Some(&["primary_name", "first_name"]),
    },
    TypeInfo {
        class_name: "Family",
        container: "family",
        sort_path: &["gramps_id"],
        sort_path_secondary: None,
    },
    TypeInfo {
        class_name: "Source",
        container: "source",
        sort_path: &["title"],
        sort_path_secondary: None,
    },
    TypeInfo {
        class_name: "Event",
        container: "event",
        sort_path: &["gramps_id"],
        sort_path_secondary: None,
    },
    TypeInfo {
        class_name: "Media",
        container: "media",
        sort_path: &["desc"],
        sort_path_secondary: None,
    },
    TypeInfo {
        class_name: "Place",
        container: "place",
        sort_path: &["title"],
        sort_path_secondary: None,
    },
    TypeInfo {
        class_name: "Repository",
        container: "repository",
        sort_path: &["name"],
        sort_path_secondary: None,
    },
    TypeInfo {
        class_name: "Note",
        container: "note",
        sort_path: &["gramps_id"],
        sort_path_secondary: None,
    },
    TypeInfo {
        class_name: "Tag",
        container: "tag",
        sort_path: &["name"],
        sort_path_secondary: None,
    },
    TypeInfo {
        class_name: "Citation",
        container: "citation",
        sort_path: &["page"],
        sort_path_secondary: None,
    },
];

impl ObjectType {
    /// Get the static description of this type
    pub fn info(self) -> &'static TypeInfo {
        &TYPE_TABLE[self as usize]
    }

    /// Class name ("Person", "Family", ...)
    pub fn class_name(self) -> &'static str {
        self.info().class_name
    }

    /// Container name ("person", "family", ...)
    pub fn container(self) -> &'static str {
        self.info().container
    }

    /// Integer object key
    pub fn key(self) -> u8 {
        self as u8
    }

    /// Look a type up by its integer object key
    pub fn from_key(key: u8) -> Option<Self> {
        Self::all().get(key as usize).copied()
    }

    /// Look a type up by class name ("Person") or container name ("person")
    pub fn from_class_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.class_name() == name || t.container() == name)
    }

    /// All types, in object key order
    pub fn all() -> &'static [ObjectType] {
        &[
            ObjectType::Person,
            ObjectType::Family,
            ObjectType::Source,
            ObjectType::Event,
            ObjectType::Media,
            ObjectType::Place,
            ObjectType::Repository,
            ObjectType::Note,
            ObjectType::Tag,
            ObjectType::Citation,
        ]
    }
}

impl FromStr for ObjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "person" | "people" | "individual" => Ok(ObjectType::Person),
            "family" | "families" => Ok(ObjectType::Family),
            "source" | "sources" => Ok(ObjectType::Source),
            "event" | "events" => Ok(ObjectType::Event),
            "media" | "mediaobject" | "object" => Ok(ObjectType::Media),
            "place" | "places" => Ok(ObjectType::Place),
            "repository" | "repositories" | "repo" => Ok(ObjectType::Repository),
            "note" | "notes" => Ok(ObjectType::Note),
            "tag" | "tags" => Ok(ObjectType::Tag),
            "citation" | "citations" => Ok(ObjectType::Citation),
            _ => Err(Error::Schema(format!("Unknown object type: {}", s))),
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_table_is_indexed_by_key() {
        for (i, ty) in ObjectType::all().iter().enumerate() {
            assert_eq!(ty.key() as usize, i);
            assert_eq!(ObjectType::from_key(i as u8), Some(*ty));
        }
        assert_eq!(ObjectType::from_key(10), None);
    }

    #[test]
    fn test_container_names_are_lowercase_class_names() {
        for ty in ObjectType::all() {
            assert_eq!(ty.container(), ty.class_name().to_lowercase());
        }
    }

    #[test]
    fn test_object_type_aliases() {
        assert_eq!(ObjectType::from_str("people").unwrap(), ObjectType::Person);
        assert_eq!(ObjectType::from_str("Repo").unwrap(), ObjectType::Repository);
        assert_eq!(ObjectType::from_class_name("Citation"), Some(ObjectType::Citation));
        assert_eq!(ObjectType::from_class_name("note"), Some(ObjectType::Note));
        assert!(ObjectType::from_str("widget").is_err());
    }
}
