//! Reference Indexer - derived backlink edges
//!
//! The reference container is never the source of truth. Every edge must be
//! derivable from an owner's current payload, so the indexer only ever:
//! - recomputes one owner's edges after that owner is written or removed
//! - rebuilds the whole container by scanning every primary record
//!
//! Per-owner updates come in two strategies. `FullReplace` drops every edge
//! of the owner and inserts the new set; `Diff` touches only the edges that
//! changed. Both leave the same final state.

use crate::engine::StorageEngine;
use crate::handle::Handle;
use crate::model::{HasReferences, Payload};
use crate::object::ObjectType;
use crate::progress::{self, ProgressMessage, ProgressPhase, ProgressSender};
use crate::reference::Reference;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a single owner's edges are brought up to date
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStrategy {
    #[default]
    FullReplace,
    Diff,
}

/// Edges added and removed for one owner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefDelta {
    pub added: Vec<Reference>,
    pub removed: Vec<Reference>,
}

impl RefDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of a full rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReindexStats {
    /// Primary records scanned
    pub records: usize,
    /// Edges in the index after the rebuild
    pub references: usize,
    pub added: usize,
    pub removed: usize,
    /// Records skipped because their payload failed to decode
    pub skipped: usize,
}

/// Edges present in the index but not derivable, and derivable but absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceDrift {
    pub stale: Vec<Reference>,
    pub missing: Vec<Reference>,
}

impl ReferenceDrift {
    pub fn is_empty(&self) -> bool {
        self.stale.is_empty() && self.missing.is_empty()
    }
}

/// Edges a payload implies for its owner
pub fn derive_references(payload: &Payload) -> BTreeSet<Reference> {
    Reference::from_ref_set(payload.object_type(), payload.handle(), payload.referenced_handles())
        .into_iter()
        .collect()
}

/// Outgoing edges currently indexed for an owner
pub fn references_of(engine: &dyn StorageEngine, owner_type: ObjectType, owner: &Handle) -> Result<Vec<Reference>> {
    engine.references_from(owner_type, owner)
}

/// Bring one owner's edges in line with its new payload
///
/// `payload` is `None` when the owner was removed.
pub fn update_references(
    engine: &mut dyn StorageEngine,
    owner_type: ObjectType,
    owner: &Handle,
    payload: Option<&Payload>,
    strategy: ReferenceStrategy,
) -> Result<RefDelta> {
    let new_refs = payload.map(derive_references).unwrap_or_default();
    let existing: BTreeSet<Reference> = engine.references_from(owner_type, owner)?.into_iter().collect();

    let delta = RefDelta {
        added: new_refs.difference(&existing).cloned().collect(),
        removed: existing.difference(&new_refs).cloned().collect(),
    };

    match strategy {
        ReferenceStrategy::FullReplace => {
            engine.delete_references_from(owner_type, owner)?;
            for edge in &new_refs {
                engine.insert_reference(edge)?;
            }
        }
        ReferenceStrategy::Diff => {
            for edge in &delta.removed {
                engine.delete_reference(edge)?;
            }
            for edge in &delta.added {
                engine.insert_reference(edge)?;
            }
        }
    }

    if !delta.is_empty() {
        tracing::debug!(
            "References of {} {}: +{} -{}",
            owner_type,
            owner,
            delta.added.len(),
            delta.removed.len()
        );
    }
    Ok(delta)
}

/// Scan every primary record and collect the edges its payload implies
///
/// Returns the derivable set, the number of records scanned and the number skipped.
fn derivable_references(
    engine: &dyn StorageEngine,
    progress: Option<&ProgressSender>,
) -> Result<(BTreeSet<Reference>, usize, usize)> {
    let mut derived = BTreeSet::new();
    let mut records = 0;
    let mut skipped = 0;

    let total = ObjectType::all()
        .iter()
        .map(|ty| engine.container_rows(ty.container()))
        .sum::<Result<usize>>()?;
    progress::report(progress, ProgressMessage::Started { phase: ProgressPhase::References, total });

    for ty in ObjectType::all() {
        engine.scan(*ty, &mut |record| {
            records += 1;
            match record.decode(*ty) {
                Ok(payload) => derived.extend(derive_references(&payload)),
                Err(e) if e.is_encoding() => {
                    tracing::warn!("Skipping {} {} while indexing references: {}", ty, record.handle, e);
                    progress::report(progress, ProgressMessage::Warning(e.to_string()));
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
            progress::report(
                progress,
                ProgressMessage::Progress { phase: ProgressPhase::References, current: records },
            );
            Ok(())
        })?;
    }

    Ok((derived, records, skipped))
}

/// Rebuild the reference container from every live primary record
///
/// Only the difference between the indexed and derivable sets is written, so
/// a second run right after the first adds and removes nothing.
pub fn reindex_all(engine: &mut dyn StorageEngine, progress: Option<&ProgressSender>) -> Result<ReindexStats> {
    let (derived, records, skipped) = derivable_references(engine, progress)?;
    let existing: BTreeSet<Reference> = engine.all_references()?.into_iter().collect();

    let mut stats = ReindexStats {
        records,
        references: derived.len(),
        skipped,
        ..Default::default()
    };

    for edge in existing.difference(&derived) {
        if engine.delete_reference(edge)? {
            stats.removed += 1;
        }
    }
    for edge in derived.difference(&existing) {
        if engine.insert_reference(edge)? {
            stats.added += 1;
        }
    }

    progress::report(progress, ProgressMessage::Finished { phase: ProgressPhase::References });
    tracing::info!(
        "Reindexed {} records: {} references (+{} -{}, {} skipped)",
        stats.records,
        stats.references,
        stats.added,
        stats.removed,
        stats.skipped
    );
    Ok(stats)
}

/// Compare the indexed edges with the derivable set without changing anything
pub fn reference_drift(engine: &dyn StorageEngine) -> Result<ReferenceDrift> {
    let (derived, _, _) = derivable_references(engine, None)?;
    let existing: BTreeSet<Reference> = engine.all_references()?.into_iter().collect();
    Ok(ReferenceDrift {
        stale: existing.difference(&derived).cloned().collect(),
        missing: derived.difference(&existing).cloned().collect(),
    })
}

/// Owners pointing at a handle, as `(owner type, owner handle)`
pub struct Backlinks {
    edges: std::vec::IntoIter<Reference>,
    include: Option<Vec<ObjectType>>,
}

impl Iterator for Backlinks {
    type Item = (ObjectType, Handle);

    fn next(&mut self) -> Option<Self::Item> {
        let include = self.include.as_deref();
        self.edges
            .by_ref()
            .find(|edge| include.is_none_or(|types| types.contains(&edge.owner_type)))
            .map(|edge| edge.backlink())
    }
}

/// Who points at `target`, optionally restricted to some owner types
pub fn find_backlinks(
    engine: &dyn StorageEngine,
    target: &Handle,
    include_types: Option<&[ObjectType]>,
) -> Result<Backlinks> {
    Ok(Backlinks {
        edges: engine.references_to(target)?.into_iter(),
        include: include_types.map(<[ObjectType]>::to_vec),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DocumentEngine, SqliteEngine};
    use crate::model::*;
    use crate::store::ObjectStore;

    fn engines() -> Vec<Box<dyn StorageEngine>> {
        let mut sqlite = SqliteEngine::open_in_memory().unwrap();
        sqlite.create_schema().unwrap();
        let mut document = DocumentEngine::in_memory();
        document.create_schema().unwrap();
        vec![Box::new(sqlite), Box::new(document)]
    }

    fn family(handle: &str, father: Option<&str>, children: &[&str]) -> Payload {
        let mut family = Family::new(format!("F{}", handle));
        family.handle = Handle::new(handle);
        family.father_handle = father.map(Handle::new);
        family.child_ref_list = children.iter().map(|c| ChildRef::new(Handle::new(*c))).collect();
        family.into_payload()
    }

    #[test]
    fn test_strategies_reach_same_state() {
        for strategy in [ReferenceStrategy::FullReplace, ReferenceStrategy::Diff] {
            for mut engine in engines() {
                let f1 = Handle::new("F1");
                let first = family("F1", Some("P1"), &["P2", "P3"]);
                let delta = update_references(engine.as_mut(), ObjectType::Family, &f1, Some(&first), strategy).unwrap();
                assert_eq!(delta.added.len(), 3);

                let second = family("F1", Some("P1"), &["P3", "P4"]);
                let delta = update_references(engine.as_mut(), ObjectType::Family, &f1, Some(&second), strategy).unwrap();
                assert_eq!(delta.added.len(), 1);
                assert_eq!(delta.removed.len(), 1);
                assert_eq!(delta.removed[0].target_handle, Handle::new("P2"));

                let indexed: BTreeSet<Reference> = references_of(engine.as_ref(), ObjectType::Family, &f1)
                    .unwrap()
                    .into_iter()
                    .collect();
                assert_eq!(indexed, derive_references(&second));

                update_references(engine.as_mut(), ObjectType::Family, &f1, None, strategy).unwrap();
                assert!(references_of(engine.as_ref(), ObjectType::Family, &f1).unwrap().is_empty());
            }
        }
    }

    #[test]
    fn test_reindex_all_is_idempotent() {
        for mut engine in engines() {
            engine.put_payload(&family("F1", Some("P1"), &["P2"])).unwrap();
            engine.put_payload(&family("F2", Some("P1"), &[])).unwrap();
            // stale edge from an owner that no longer mentions the target
            engine
                .insert_reference(&Reference::new(
                    ObjectType::Family,
                    Handle::new("F2"),
                    ObjectType::Person,
                    Handle::new("P9"),
                ))
                .unwrap();

            let first = reindex_all(engine.as_mut(), None).unwrap();
            assert_eq!(first.records, 2);
            assert_eq!(first.references, 3);
            assert_eq!(first.added, 3);
            assert_eq!(first.removed, 1);

            let second = reindex_all(engine.as_mut(), None).unwrap();
            assert_eq!((second.added, second.removed), (0, 0));
            assert!(reference_drift(engine.as_ref()).unwrap().is_empty());
        }
    }

    #[test]
    fn test_reindex_skips_undecodable_records() {
        for mut engine in engines() {
            engine.put_payload(&family("F1", Some("P1"), &[])).unwrap();
            engine
                .put(
                    ObjectType::Family,
                    crate::engine::StoredRecord {
                        handle: Handle::new("F2"),
                        raw: Some(vec![255, 255]),
                        structured: None,
                        change_time: 0,
                    },
                )
                .unwrap();

            let stats = reindex_all(engine.as_mut(), None).unwrap();
            assert_eq!(stats.records, 2);
            assert_eq!(stats.skipped, 1);
            assert_eq!(stats.references, 1);
        }
    }

    #[test]
    fn test_find_backlinks_filters_owner_types() {
        for mut engine in engines() {
            let p1 = Handle::new("P1");
            update_references(
                engine.as_mut(),
                ObjectType::Family,
                &Handle::new("F1"),
                Some(&family("F1", Some("P1"), &[])),
                ReferenceStrategy::FullReplace,
            )
            .unwrap();
            let mut person = Person::new("I2", Name::new("B", "C"), Gender::Male);
            person.handle = Handle::new("P2");
            person.person_ref_list.push(PersonRef::new(p1.clone(), "Godfather"));
            update_references(
                engine.as_mut(),
                ObjectType::Person,
                &Handle::new("P2"),
                Some(&person.into_payload()),
                ReferenceStrategy::Diff,
            )
            .unwrap();

            let all: Vec<_> = find_backlinks(engine.as_ref(), &p1, None).unwrap().collect();
            assert_eq!(all.len(), 2);

            let families: Vec<_> = find_backlinks(engine.as_ref(), &p1, Some(&[ObjectType::Family]))
                .unwrap()
                .collect();
            assert_eq!(families, vec![(ObjectType::Family, Handle::new("F1"))]);
        }
    }
}
