//! Reference - a derived "who points at whom" edge
//!
//! A reference exists if and only if the owner's current payload mentions
//! the target handle. References are never written by hand; the indexer
//! derives them whenever an owner is committed or removed.

use crate::handle::Handle;
use crate::model::RefSet;
use crate::object::ObjectType;
use serde::{Deserialize, Serialize};

/// One edge of the reference index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    /// Record holding the reference
    pub owner_handle: Handle,
    pub owner_type: ObjectType,
    /// Record being pointed at
    pub target_handle: Handle,
    pub target_type: ObjectType,
}

impl Reference {
    pub fn new(owner_type: ObjectType, owner_handle: Handle, target_type: ObjectType, target_handle: Handle) -> Self {
        Self {
            owner_handle,
            owner_type,
            target_handle,
            target_type,
        }
    }

    /// Turn an owner's reference set into edges
    pub fn from_ref_set(owner_type: ObjectType, owner_handle: &Handle, refs: RefSet) -> Vec<Reference> {
        refs.into_iter()
            .map(|(target_type, target_handle)| {
                Reference::new(owner_type, owner_handle.clone(), target_type, target_handle)
            })
            .collect()
    }

    /// The `(class, handle)` pair a backlink query reports for this edge
    pub fn backlink(&self) -> (ObjectType, Handle) {
        (self.owner_type, self.owner_handle.clone())
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.owner_type, self.owner_handle, self.target_type, self.target_handle
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ref_set() {
        let refs: RefSet = [
            (ObjectType::Person, Handle::new("P1")),
            (ObjectType::Event, Handle::new("E1")),
        ]
        .into_iter()
        .collect();
        let edges = Reference::from_ref_set(ObjectType::Family, &Handle::new("F1"), refs);

        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.owner_type == ObjectType::Family));
        assert_eq!(edges[0].backlink(), (ObjectType::Family, Handle::new("F1")));
        assert_eq!(edges[1].to_string(), "Family:F1 -> Event:E1");
    }
}
