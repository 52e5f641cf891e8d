//! Record payloads
//!
//! `Payload` is a tagged union over the ten primary record structs. Each
//! struct is an explicit schema, so a field added to one type is picked up by
//! both encodings at build time.

pub mod primary;
pub mod secondary;

use crate::handle::Handle;
use crate::object::ObjectType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use primary::{Citation, Event, Family, Media, Note, Person, Place, Repository, Source, Tag};
pub use secondary::{ChildRef, EventRef, Gender, MediaRef, Name, PersonRef, PlaceRef, RepoRef, Url};

/// Set of `(target type, target handle)` pairs a payload points at
pub type RefSet = BTreeSet<(ObjectType, Handle)>;

/// Anything that can point at primary records
pub trait HasReferences {
    /// Add every referenced handle, walking embedded secondary objects
    fn collect_references(&self, refs: &mut RefSet);

    /// The complete, de-duplicated set of references
    fn referenced_handles(&self) -> RefSet {
        let mut refs = RefSet::new();
        self.collect_references(&mut refs);
        refs
    }
}

pub(crate) fn add_refs(refs: &mut RefSet, obj_type: ObjectType, handles: &[Handle]) {
    refs.extend(handles.iter().map(|h| (obj_type, h.clone())));
}

pub(crate) fn collect_all<T: HasReferences>(refs: &mut RefSet, items: &[T]) {
    for item in items {
        item.collect_references(refs);
    }
}

/// A primary record type that can be stored by the backend.
pub trait PrimaryObject:
    Clone + std::fmt::Debug + PartialEq + Serialize + DeserializeOwned + HasReferences
{
    const TYPE: ObjectType;

    fn handle(&self) -> &Handle;
    fn set_handle(&mut self, handle: Handle);
    fn gramps_id(&self) -> &str;
    fn change(&self) -> i64;
    fn set_change(&mut self, change: i64);
    fn into_payload(self) -> Payload;
    fn from_payload(payload: Payload) -> Option<Self>;
}

macro_rules! primary_objects {
    ($($variant:ident),* $(,)?) => {
        /// Tagged union over the ten primary record kinds
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum Payload {
            $($variant($variant),)*
        }

        impl Payload {
            pub fn object_type(&self) -> ObjectType {
                match self {
                    $(Payload::$variant(_) => ObjectType::$variant,)*
                }
            }

            pub fn handle(&self) -> &Handle {
                match self {
                    $(Payload::$variant(obj) => &obj.handle,)*
                }
            }

            pub fn gramps_id(&self) -> &str {
                match self {
                    $(Payload::$variant(obj) => &obj.gramps_id,)*
                }
            }

            pub fn change(&self) -> i64 {
                match self {
                    $(Payload::$variant(obj) => obj.change,)*
                }
            }

            /// Encode the inner struct with bincode
            pub(crate) fn to_bincode(&self) -> bincode::Result<Vec<u8>> {
                match self {
                    $(Payload::$variant(obj) => bincode::serialize(obj),)*
                }
            }

            /// Decode a struct of the given type from bincode
            pub(crate) fn from_bincode(obj_type: ObjectType, bytes: &[u8]) -> bincode::Result<Self> {
                match obj_type {
                    $(ObjectType::$variant => bincode::deserialize(bytes).map(Payload::$variant),)*
                }
            }

            /// Convert the inner struct to a JSON document
            pub(crate) fn to_json(&self) -> serde_json::Result<serde_json::Value> {
                match self {
                    $(Payload::$variant(obj) => serde_json::to_value(obj),)*
                }
            }

            /// Build a struct of the given type from a JSON document
            pub(crate) fn from_json(obj_type: ObjectType, value: serde_json::Value) -> serde_json::Result<Self> {
                match obj_type {
                    $(ObjectType::$variant => serde_json::from_value(value).map(Payload::$variant),)*
                }
            }
        }

        impl HasReferences for Payload {
            fn collect_references(&self, refs: &mut RefSet) {
                match self {
                    $(Payload::$variant(obj) => obj.collect_references(refs),)*
                }
            }
        }

        $(
            impl PrimaryObject for $variant {
                const TYPE: ObjectType = ObjectType::$variant;

                fn handle(&self) -> &Handle {
                    &self.handle
                }

                fn set_handle(&mut self, handle: Handle) {
                    self.handle = handle;
                }

                fn gramps_id(&self) -> &str {
                    &self.gramps_id
                }

                fn change(&self) -> i64 {
                    self.change
                }

                fn set_change(&mut self, change: i64) {
                    self.change = change;
                }

                fn into_payload(self) -> Payload {
                    Payload::$variant(self)
                }

                fn from_payload(payload: Payload) -> Option<Self> {
                    match payload {
                        Payload::$variant(obj) => Some(obj),
                        _ => None,
                    }
                }
            }
        )*
    };
}

primary_objects!(
    Person, Family, Source, Event, Media, Place, Repository, Note, Tag, Citation,
);
