//! Dual encoding of payloads
//!
//! - raw: bincode bytes of the payload struct. Authoritative.
//! - structured: JSON document of the same struct, used for queries only.
//!
//! The structured form can always be rebuilt from the raw form.

use crate::handle::Handle;
use crate::model::Payload;
use crate::object::ObjectType;
use crate::{Error, Result};
use serde_json::Value;

fn encoding_error(obj_type: ObjectType, handle: &Handle, reason: impl ToString) -> Error {
    Error::Encoding {
        obj_type,
        handle: handle.clone(),
        reason: reason.to_string(),
    }
}

/// Encode a payload into its raw form
pub fn encode_raw(payload: &Payload) -> Result<Vec<u8>> {
    payload
        .to_bincode()
        .map_err(|e| encoding_error(payload.object_type(), payload.handle(), e))
}

/// Decode a raw blob of the given type
pub fn decode_raw(obj_type: ObjectType, handle: &Handle, raw: &[u8]) -> Result<Payload> {
    let payload = Payload::from_bincode(obj_type, raw).map_err(|e| encoding_error(obj_type, handle, e))?;
    if payload.handle() != handle {
        return Err(encoding_error(
            obj_type,
            handle,
            format!("blob carries handle {}", payload.handle()),
        ));
    }
    Ok(payload)
}

/// Encode a payload into its structured form
pub fn to_structured(payload: &Payload) -> Result<Value> {
    payload
        .to_json()
        .map_err(|e| encoding_error(payload.object_type(), payload.handle(), e))
}

/// Decode a structured document of the given type
pub fn from_structured(obj_type: ObjectType, handle: &Handle, value: &Value) -> Result<Payload> {
    Payload::from_json(obj_type, value.clone()).map_err(|e| encoding_error(obj_type, handle, e))
}

/// Encode both forms at once
pub fn encode(payload: &Payload) -> Result<(Vec<u8>, Value)> {
    Ok((encode_raw(payload)?, to_structured(payload)?))
}

/// Rebuild the structured form from a raw blob
pub fn structured_from_raw(obj_type: ObjectType, handle: &Handle, raw: &[u8]) -> Result<Value> {
    to_structured(&decode_raw(obj_type, handle, raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use proptest::prelude::*;

    fn sample_payloads() -> Vec<Payload> {
        let mut person = Person::new("I0001", Name::new("Mary Ann", "Doe"), Gender::Female);
        person.handle = Handle::new("P1");
        person.event_ref_list.push(EventRef::new(Handle::new("E1"), "Primary"));
        person.birth_ref_index = Some(0);
        let mut media_ref = MediaRef::new(Handle::new("M1"));
        media_ref.rect = Some((10, 10, 90, 90));
        person.media_list.push(media_ref);

        let mut place = Place::new("P0001", "Boston");
        place.handle = Handle::new("PL1");
        place.latitude = "42.3601".to_string();
        place.placeref_list.push(PlaceRef::new(Handle::new("PL0")));

        let mut source = Source::new("S0001", "Parish register");
        source.handle = Handle::new("S1");
        source.reporef_list.push(RepoRef::new(Handle::new("R1"), "MS-12"));

        let mut tag = Tag::new("complete", "#00ff00");
        tag.handle = Handle::new("T1");

        let mut family = Family::new("F0001");
        family.handle = Handle::new("F1");
        family.father_handle = Some(Handle::new("P1"));
        family.child_ref_list.push(ChildRef::new(Handle::new("P2")));

        let mut event = Event::new("E0001", "Birth");
        event.handle = Handle::new("E1");
        event.date = "1850-03-02".to_string();
        event.place = Some(Handle::new("PL1"));

        let mut citation = Citation::new("C0001", Handle::new("S1"), "p. 12");
        citation.handle = Handle::new("C1");

        let mut media = Media::new("O0001", "scans/register.png", "image/png");
        media.handle = Handle::new("M1");
        media.citation_list.push(Handle::new("C1"));

        let mut repository = Repository::new("R0001", "State archive");
        repository.handle = Handle::new("R1");
        repository.urls.push(Url {
            path: "https://archive.example/".to_string(),
            desc: "Catalogue".to_string(),
            url_type: "Web Home".to_string(),
            private: false,
        });

        let mut note = Note::new("N0001", "Baptised the same day.\nSee register.");
        note.handle = Handle::new("N1");

        vec![
            person.into_payload(),
            family.into_payload(),
            event.into_payload(),
            place.into_payload(),
            source.into_payload(),
            citation.into_payload(),
            media.into_payload(),
            repository.into_payload(),
            note.into_payload(),
            tag.into_payload(),
        ]
    }

    /// One payload of the given kind, filled from generated text and handles
    fn generated_payload(kind: ObjectType, handle: &str, text: &str, refs: &[String]) -> Payload {
        let handle = Handle::new(handle);
        let refs: Vec<Handle> = refs.iter().map(Handle::new).collect();
        let first = refs.first().cloned();
        match kind {
            ObjectType::Person => Person {
                handle,
                family_list: refs,
                ..Person::new(text, Name::new(text, text), Gender::Unknown)
            }
            .into_payload(),
            ObjectType::Family => Family {
                handle,
                mother_handle: first,
                child_ref_list: refs.into_iter().map(ChildRef::new).collect(),
                ..Family::new(text)
            }
            .into_payload(),
            ObjectType::Event => Event {
                handle,
                place: first,
                description: text.to_string(),
                ..Event::new(text, text)
            }
            .into_payload(),
            ObjectType::Place => Place {
                handle,
                placeref_list: refs.into_iter().map(PlaceRef::new).collect(),
                ..Place::new(text, text)
            }
            .into_payload(),
            ObjectType::Source => Source {
                handle,
                reporef_list: refs.into_iter().map(|r| RepoRef::new(r, text)).collect(),
                ..Source::new(text, text)
            }
            .into_payload(),
            ObjectType::Citation => Citation {
                handle,
                gramps_id: text.to_string(),
                source_handle: first,
                page: text.to_string(),
                ..Default::default()
            }
            .into_payload(),
            ObjectType::Media => Media {
                handle,
                note_list: refs,
                ..Media::new(text, text, "image/jpeg")
            }
            .into_payload(),
            ObjectType::Repository => Repository {
                handle,
                tag_list: refs,
                ..Repository::new(text, text)
            }
            .into_payload(),
            ObjectType::Note => Note {
                handle,
                tag_list: refs,
                ..Note::new(text, text)
            }
            .into_payload(),
            ObjectType::Tag => Tag {
                handle,
                ..Tag::new(text, text)
            }
            .into_payload(),
        }
    }

    #[test]
    fn test_raw_roundtrip() {
        for payload in sample_payloads() {
            let raw = encode_raw(&payload).unwrap();
            let decoded = decode_raw(payload.object_type(), payload.handle(), &raw).unwrap();
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn test_structured_rebuilt_from_raw_matches() {
        for payload in sample_payloads() {
            let (raw, structured) = encode(&payload).unwrap();
            let rebuilt = structured_from_raw(payload.object_type(), payload.handle(), &raw).unwrap();
            assert_eq!(rebuilt, structured);

            let decoded = from_structured(payload.object_type(), payload.handle(), &structured).unwrap();
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn test_samples_cover_every_type() {
        let kinds: std::collections::BTreeSet<ObjectType> =
            sample_payloads().iter().map(Payload::object_type).collect();
        assert_eq!(kinds.len(), ObjectType::all().len());
    }

    proptest! {
        #[test]
        fn prop_every_type_roundtrips(
            kind in 0usize..10,
            handle in "[0-9a-f]{1,24}",
            text in "\\PC{0,40}",
            refs in prop::collection::vec("[A-Z][0-9]{1,4}", 0..4),
        ) {
            let kind = ObjectType::all()[kind];
            let payload = generated_payload(kind, &handle, &text, &refs);

            let (raw, structured) = encode(&payload).unwrap();
            prop_assert_eq!(&decode_raw(kind, payload.handle(), &raw).unwrap(), &payload);
            prop_assert_eq!(&from_structured(kind, payload.handle(), &structured).unwrap(), &payload);
            prop_assert_eq!(structured_from_raw(kind, payload.handle(), &raw).unwrap(), structured);
        }
    }

    #[test]
    fn test_structured_uses_ref_field_name() {
        let payload = sample_payloads().remove(0);
        let doc = to_structured(&payload).unwrap();
        assert_eq!(doc["event_ref_list"][0]["ref"], "E1");
        assert_eq!(doc["primary_name"]["surname"], "Doe");
        assert_eq!(doc["gender"], "female");
    }

    #[test]
    fn test_garbage_blob_is_encoding_error() {
        let err = decode_raw(ObjectType::Person, &Handle::new("P1"), &[1, 2, 3]).unwrap_err();
        assert!(err.is_encoding());
    }

    #[test]
    fn test_blob_under_wrong_handle_is_encoding_error() {
        let payload = sample_payloads().remove(0);
        let raw = encode_raw(&payload).unwrap();
        let err = decode_raw(ObjectType::Person, &Handle::new("other"), &raw).unwrap_err();
        assert!(err.is_encoding());
    }
}
