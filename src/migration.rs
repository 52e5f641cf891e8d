//! Schema / Migration Manager
//!
//! Owns the schema lifecycle of one backend:
//! - first open creates every container and stamps the latest version
//! - an older database is upgraded step by step (only with `auto_upgrade`)
//! - a newer database is refused
//!
//! It also moves data between engines, backfills structured encodings on
//! legacy records and verifies that both encodings and the reference index
//! agree with each other.

use crate::codec;
use crate::engine::{StorageEngine, atomically, settle};
use crate::indexer::{self, ReferenceDrift, ReindexStats};
use crate::metadata::{self, MetaValue};
use crate::object::ObjectType;
use crate::progress::{self, ProgressMessage, ProgressPhase, ProgressSender};
use crate::schema::{self, UPGRADES, UpgradeStep};
use crate::store::ObjectStore;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// What a target needs before it can be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationNeed {
    None,
    /// Records exist with only the raw encoding
    LegacyBlobOnly,
    /// Data lives in an engine of another kind and must be copied over
    ForeignEngine,
}

impl std::fmt::Display for MigrationNeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationNeed::None => "none",
            MigrationNeed::LegacyBlobOnly => "legacy-blob-only",
            MigrationNeed::ForeignEngine => "foreign-engine",
        };
        f.write_str(s)
    }
}

/// Outcome of [`SchemaManager::migrate_from`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub records: BTreeMap<ObjectType, usize>,
    /// Source records whose payload could not be decoded
    pub skipped: usize,
    pub metadata: usize,
    pub gender_stats: usize,
    pub surnames: usize,
    pub name_groups: usize,
    pub references: ReindexStats,
}

impl MigrationReport {
    pub fn total_records(&self) -> usize {
        self.records.values().sum()
    }
}

/// Outcome of [`SchemaManager::backfill_structured_encoding`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub filled: usize,
    pub skipped: usize,
}

/// Encoding counts of one object container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncodingCounts {
    pub obj_type: ObjectType,
    pub raw: usize,
    pub structured: usize,
}

impl EncodingCounts {
    pub fn is_consistent(&self) -> bool {
        self.raw == self.structured
    }
}

/// Outcome of [`SchemaManager::verify`]; never repaired automatically
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub counts: Vec<EncodingCounts>,
    pub references: ReferenceDrift,
}

impl VerifyReport {
    /// Containers whose raw and structured counts differ
    pub fn mismatches(&self) -> impl Iterator<Item = &EncodingCounts> {
        self.counts.iter().filter(|c| !c.is_consistent())
    }

    pub fn is_consistent(&self) -> bool {
        self.mismatches().next().is_none() && self.references.is_empty()
    }
}

pub struct SchemaManager {
    latest: u32,
    auto_upgrade: bool,
    checked: bool,
}

impl SchemaManager {
    pub fn new(auto_upgrade: bool) -> Self {
        Self::with_latest(schema::SCHEMA_VERSION, auto_upgrade)
    }

    pub fn with_latest(latest: u32, auto_upgrade: bool) -> Self {
        Self {
            latest,
            auto_upgrade,
            checked: false,
        }
    }

    pub fn latest(&self) -> u32 {
        self.latest
    }

    /// Whether `check_and_init` already ran for this manager
    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// Version stamped in the metadata container
    ///
    /// `None` when no schema exists yet. A database without a version key is v1.
    pub fn stored_version(&self, engine: &dyn StorageEngine) -> Result<Option<u32>> {
        if !engine.container_exists(ObjectType::Person.container())? {
            return Ok(None);
        }
        if !engine.container_exists(schema::METADATA)? {
            return Ok(Some(1));
        }
        match engine.get_metadata(schema::VERSION_KEY)? {
            Some(value) => match value.as_int().map(u32::try_from) {
                Some(Ok(v)) if v >= 1 => Ok(Some(v)),
                _ => Err(Error::Schema(format!("invalid schema version: {:?}", value))),
            },
            None => Ok(Some(1)),
        }
    }

    /// Create or upgrade the schema so the engine is at the latest version
    ///
    /// Runs once per manager; later calls return the latest version without
    /// touching storage.
    pub fn check_and_init(&mut self, engine: &mut dyn StorageEngine) -> Result<u32> {
        if self.checked {
            return Ok(self.latest);
        }

        match self.stored_version(engine)? {
            None => {
                atomically(engine, |engine| {
                    engine.create_schema()?;
                    self.stamp_version(engine)
                })?;
                tracing::info!("Created schema v{} at {}", self.latest, engine.location());
            }
            Some(version) if version > self.latest => {
                return Err(Error::Schema(format!(
                    "database schema v{} is newer than supported v{}",
                    version, self.latest
                )));
            }
            Some(version) if version < self.latest => {
                if !self.auto_upgrade {
                    return Err(Error::Schema(format!(
                        "database schema v{} needs an upgrade to v{}; enable auto_upgrade",
                        version, self.latest
                    )));
                }
                self.upgrade(engine, version)?;
            }
            Some(_) => {
                validate_layout(engine)?;
                tracing::debug!("Schema v{} is current", self.latest);
            }
        }

        self.checked = true;
        Ok(self.latest)
    }

    fn stamp_version(&self, engine: &mut dyn StorageEngine) -> Result<()> {
        engine.set_metadata(schema::VERSION_KEY, &MetaValue::Int(i64::from(self.latest)))
    }

    fn upgrade(&self, engine: &mut dyn StorageEngine, from: u32) -> Result<()> {
        atomically(engine, |engine| {
            if !engine.container_exists(schema::METADATA)? || !engine.container_exists(schema::REFERENCE)? {
                return Err(Error::Schema("legacy database lacks reference or metadata container".to_string()));
            }
            for upgrade in UPGRADES.iter().filter(|u| u.to_version > from && u.to_version <= self.latest) {
                tracing::info!("Upgrading schema to v{}: {}", upgrade.to_version, upgrade.description);
                engine.apply_upgrade(upgrade.step)?;
                match upgrade.step {
                    UpgradeStep::StructuredEncoding => {
                        let report = backfill(engine, None)?;
                        tracing::info!("Backfilled {} structured encodings ({} skipped)", report.filled, report.skipped);
                    }
                    UpgradeStep::AuxiliaryContainers => {
                        let counts = metadata::rebuild_aggregates(engine)?;
                        tracing::info!(
                            "Rebuilt aggregates from {} people: {} given names, {} surnames",
                            counts.people,
                            counts.given_names,
                            counts.surnames
                        );
                    }
                }
            }
            self.stamp_version(engine)
        })
    }

    /// Classify what `target` needs, given a possible `source` to copy from
    pub fn detect_migration_needed(
        &self,
        target: &dyn StorageEngine,
        source: Option<&dyn StorageEngine>,
    ) -> Result<MigrationNeed> {
        if target.container_exists(ObjectType::Person.container())? {
            for ty in ObjectType::all() {
                if !target.has_structured_field(*ty)? {
                    return Ok(MigrationNeed::LegacyBlobOnly);
                }
                let counts = target.counts(*ty)?;
                if counts.raw > counts.structured {
                    return Ok(MigrationNeed::LegacyBlobOnly);
                }
            }
        }

        if let Some(source) = source {
            if source.kind() != target.kind() && source.container_exists(ObjectType::Person.container())? {
                let mut source_rows = 0;
                let mut target_rows = 0;
                for ty in ObjectType::all() {
                    source_rows += source.container_rows(ty.container())?;
                    if target.container_exists(ty.container())? {
                        target_rows += target.container_rows(ty.container())?;
                    }
                }
                if source_rows > 0 && target_rows == 0 {
                    return Ok(MigrationNeed::ForeignEngine);
                }
            }
        }
        Ok(MigrationNeed::None)
    }

    /// Copy every record, setting and aggregate from `source` into `target`
    ///
    /// Runs inside one target transaction. Any failure other than an
    /// undecodable source record rolls the whole migration back.
    pub fn migrate_from(
        &self,
        target: &mut dyn StorageEngine,
        source: &dyn StorageEngine,
        progress: Option<&ProgressSender>,
    ) -> Result<MigrationReport> {
        tracing::info!("Migrating {} ({}) into {} ({})", source.location(), source.kind(), target.location(), target.kind());
        target.begin().map_err(|e| Error::migration("starting the target transaction", e))?;

        let mut report = MigrationReport::default();
        let mut stage = "copying records";
        let result = copy_everything(target, source, progress, &mut report, &mut stage)
            .and_then(|_| {
                stage = "stamping the schema version";
                self.stamp_version(target)
            });

        match result {
            Ok(()) => {
                settle(target, Ok(())).map_err(|e| Error::migration("committing", e))?;
                tracing::info!(
                    "Migrated {} records ({} skipped), {} references",
                    report.total_records(),
                    report.skipped,
                    report.references.references
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback) = target.rollback() {
                    tracing::warn!("Rollback after failed migration also failed: {}", rollback);
                }
                Err(Error::migration(stage, e))
            }
        }
    }

    /// Populate every missing structured encoding from its raw form
    pub fn backfill_structured_encoding(
        &self,
        engine: &mut dyn StorageEngine,
        progress: Option<&ProgressSender>,
    ) -> Result<BackfillReport> {
        let report = atomically(engine, |engine| backfill(engine, progress))?;
        tracing::info!("Backfilled {} structured encodings ({} skipped)", report.filled, report.skipped);
        Ok(report)
    }

    /// Compare raw and structured counts per type, and the reference index
    /// against the derivable edge set
    pub fn verify(&self, engine: &dyn StorageEngine) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        for ty in ObjectType::all() {
            let counts = engine.record_counts(*ty)?;
            let entry = EncodingCounts {
                obj_type: *ty,
                raw: counts.raw,
                structured: counts.structured,
            };
            if !entry.is_consistent() {
                tracing::warn!("{}: {} raw vs {} structured encodings", ty, entry.raw, entry.structured);
            }
            report.counts.push(entry);
        }
        report.references = indexer::reference_drift(engine)?;
        if !report.references.is_empty() {
            tracing::warn!(
                "Reference index drift: {} stale, {} missing",
                report.references.stale.len(),
                report.references.missing.len()
            );
        }
        Ok(report)
    }
}

fn backfill(engine: &mut dyn StorageEngine, progress: Option<&ProgressSender>) -> Result<BackfillReport> {
    let mut report = BackfillReport::default();
    for ty in ObjectType::all() {
        if !engine.has_structured_field(*ty)? {
            return Err(Error::Schema(format!("{} has no structured encoding field", ty.container())));
        }
        let missing = engine.handles_missing_structured(*ty)?;
        if missing.is_empty() {
            continue;
        }
        let phase = ProgressPhase::Backfill(*ty);
        progress::report(progress, ProgressMessage::Started { phase, total: missing.len() });

        for (i, handle) in missing.iter().enumerate() {
            let Some(record) = engine.get(*ty, handle)? else {
                continue;
            };
            let Some(raw) = record.raw.as_deref() else {
                continue;
            };
            match codec::structured_from_raw(*ty, handle, raw) {
                Ok(value) => {
                    if engine.set_structured(*ty, handle, &value)? {
                        report.filled += 1;
                    }
                }
                Err(e) if e.is_encoding() => {
                    tracing::warn!("Cannot backfill {} {}: {}", ty, handle, e);
                    progress::report(progress, ProgressMessage::Warning(e.to_string()));
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
            progress::report(progress, ProgressMessage::Progress { phase, current: i + 1 });
        }
        progress::report(progress, ProgressMessage::Finished { phase });
    }
    Ok(report)
}

fn copy_everything(
    target: &mut dyn StorageEngine,
    source: &dyn StorageEngine,
    progress: Option<&ProgressSender>,
    report: &mut MigrationReport,
    stage: &mut &'static str,
) -> Result<()> {
    for ty in ObjectType::all() {
        if !source.container_exists(ty.container())? {
            continue;
        }
        let phase = ProgressPhase::Records(*ty);
        progress::report(
            progress,
            ProgressMessage::Started { phase, total: source.container_rows(ty.container())? },
        );
        let mut copied = 0;
        let mut skipped = 0;
        source.scan(*ty, &mut |record| {
            let payload = match record.decode_raw(*ty).or_else(|_| record.decode(*ty)) {
                Ok(payload) => payload,
                Err(e) if e.is_encoding() => {
                    tracing::warn!("Skipping {} {} during migration: {}", ty, record.handle, e);
                    progress::report(progress, ProgressMessage::Warning(e.to_string()));
                    skipped += 1;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            target.put_payload(&payload)?;
            copied += 1;
            progress::report(progress, ProgressMessage::Progress { phase, current: copied + skipped });
            Ok(())
        })?;
        progress::report(progress, ProgressMessage::Finished { phase });
        report.records.insert(*ty, copied);
        report.skipped += skipped;
    }

    *stage = "copying metadata";
    if source.container_exists(schema::METADATA)? {
        progress::report(progress, ProgressMessage::Started { phase: ProgressPhase::Metadata, total: 0 });
        for (key, value) in source.metadata_entries()? {
            if key == schema::VERSION_KEY {
                continue;
            }
            target.set_metadata(&key, &value)?;
            report.metadata += 1;
        }
        progress::report(progress, ProgressMessage::Finished { phase: ProgressPhase::Metadata });
    }

    *stage = "copying aggregates";
    progress::report(progress, ProgressMessage::Started { phase: ProgressPhase::Aggregates, total: 0 });
    let has_aggregates = source.container_exists(schema::GENDER_STATS)? && source.container_exists(schema::SURNAME)?;
    if has_aggregates {
        target.clear_aggregates()?;
        for (name, stats) in source.all_gender_stats()? {
            target.set_gender_stats(&name, stats)?;
            report.gender_stats += 1;
        }
        for (surname, count) in source.all_surnames()? {
            target.set_surname_count(&surname, count)?;
            report.surnames += 1;
        }
    } else {
        let counts = metadata::rebuild_aggregates(target)?;
        report.gender_stats = counts.given_names;
        report.surnames = counts.surnames;
    }
    if source.container_exists(schema::NAME_GROUP)? {
        for (name, group) in source.all_name_groups()? {
            target.set_name_group(&name, Some(&group))?;
            report.name_groups += 1;
        }
    }
    progress::report(progress, ProgressMessage::Finished { phase: ProgressPhase::Aggregates });

    *stage = "rebuilding references";
    report.references = indexer::reindex_all(target, progress)?;
    Ok(())
}

/// Every container and field of the latest schema must be present
fn validate_layout(engine: &dyn StorageEngine) -> Result<()> {
    for ty in ObjectType::all() {
        let container = ty.container();
        if !engine.container_exists(container)? {
            return Err(Error::Schema(format!("missing container: {}", container)));
        }
        if !engine.has_raw_field(*ty)? {
            return Err(Error::Schema(format!("container {} has no blob_data field", container)));
        }
        if !engine.has_structured_field(*ty)? {
            return Err(Error::Schema(format!("container {} has no json_data field", container)));
        }
    }
    for container in [schema::REFERENCE, schema::METADATA]
        .into_iter()
        .chain(schema::AUXILIARY_CONTAINERS.iter().copied())
    {
        if !engine.container_exists(container)? {
            return Err(Error::Schema(format!("missing container: {}", container)));
        }
    }
    Ok(())
}
