//! Database schema definitions
//!
//! Version history:
//! - v1: object containers hold only the raw blob; `reference` and `metadata`
//! - v2: structured `json_data` field on every object container
//! - v3: `gender_stats`, `surname` and `name_group` containers, reference target index

use crate::object::ObjectType;

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 3;

/// Metadata key holding the schema version
pub const VERSION_KEY: &str = "version";

pub const REFERENCE: &str = "reference";
pub const METADATA: &str = "metadata";
pub const GENDER_STATS: &str = "gender_stats";
pub const SURNAME: &str = "surname";
pub const NAME_GROUP: &str = "name_group";

/// Containers introduced by the v3 upgrade
pub const AUXILIARY_CONTAINERS: &[&str] = &[GENDER_STATS, SURNAME, NAME_GROUP];

/// A single, idempotent schema upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStep {
    /// Add the structured encoding field and backfill it
    StructuredEncoding,
    /// Create the auxiliary aggregate containers and rebuild them
    AuxiliaryContainers,
}

#[derive(Debug)]
pub struct Upgrade {
    pub to_version: u32,
    pub step: UpgradeStep,
    pub description: &'static str,
}

/// Ordered upgrade steps; a database at version N runs every step with `to_version > N`
pub const UPGRADES: &[Upgrade] = &[
    Upgrade {
        to_version: 2,
        step: UpgradeStep::StructuredEncoding,
        description: "add structured encoding to object containers",
    },
    Upgrade {
        to_version: 3,
        step: UpgradeStep::AuxiliaryContainers,
        description: "add gender statistics, surname and name group containers",
    },
];

/// SQL to create one object container
pub fn create_object_table(obj_type: ObjectType, with_structured: bool) -> String {
    let json_column = if with_structured { "\n    json_data TEXT," } else { "" };
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {} (
    handle TEXT PRIMARY KEY NOT NULL,
    blob_data BLOB,{}
    change_time INTEGER NOT NULL DEFAULT 0
)
"#,
        obj_type.container(),
        json_column
    )
}

/// SQL to add the structured field to a v1 object container
pub fn add_structured_column(obj_type: ObjectType) -> String {
    format!("ALTER TABLE {} ADD COLUMN json_data TEXT", obj_type.container())
}

/// Expression index over the gramps_id inside the structured field
pub fn create_gramps_id_index(obj_type: ObjectType) -> String {
    let container = obj_type.container();
    format!(
        "CREATE INDEX IF NOT EXISTS idx_{0}_gramps_id ON {0}(json_extract(json_data, '$.gramps_id'))",
        container
    )
}

/// SQL to create the reference table
pub const CREATE_REFERENCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS reference (
    obj_handle TEXT NOT NULL,
    obj_class TEXT NOT NULL,
    ref_handle TEXT NOT NULL,
    ref_class TEXT NOT NULL,
    UNIQUE(obj_handle, obj_class, ref_handle, ref_class)
)
"#;

/// SQL to create the metadata table
pub const CREATE_METADATA_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    setting TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    value_type TEXT NOT NULL DEFAULT 'json'
)
"#;

/// SQL to create the gender statistics table
pub const CREATE_GENDER_STATS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS gender_stats (
    given_name TEXT PRIMARY KEY NOT NULL,
    female INTEGER NOT NULL DEFAULT 0,
    male INTEGER NOT NULL DEFAULT 0,
    unknown INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQL to create the surname table
pub const CREATE_SURNAME_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS surname (
    surname TEXT PRIMARY KEY NOT NULL,
    count INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQL to create the name group table
pub const CREATE_NAME_GROUP_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS name_group (
    name TEXT PRIMARY KEY NOT NULL,
    grouping TEXT NOT NULL
)
"#;

pub const CREATE_REFERENCE_OWNER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_reference_obj ON reference(obj_handle)";

pub const CREATE_REFERENCE_TARGET_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_reference_ref ON reference(ref_handle)";

/// Statements creating the containers added in v3
pub fn auxiliary_statements() -> Vec<String> {
    vec![
        CREATE_GENDER_STATS_TABLE.to_string(),
        CREATE_SURNAME_TABLE.to_string(),
        CREATE_NAME_GROUP_TABLE.to_string(),
        CREATE_REFERENCE_TARGET_INDEX.to_string(),
    ]
}

/// All schema creation statements for the latest version
pub fn all_schema_statements() -> Vec<String> {
    let mut stmts: Vec<String> = ObjectType::all()
        .iter()
        .map(|ty| create_object_table(*ty, true))
        .collect();
    stmts.extend(ObjectType::all().iter().map(|ty| create_gramps_id_index(*ty)));
    stmts.push(CREATE_REFERENCE_TABLE.to_string());
    stmts.push(CREATE_REFERENCE_OWNER_INDEX.to_string());
    stmts.push(CREATE_METADATA_TABLE.to_string());
    stmts.extend(auxiliary_statements());
    stmts
}

/// Statements for a v1 database, kept so legacy files can be produced and upgraded
pub fn legacy_v1_statements() -> Vec<String> {
    let mut stmts: Vec<String> = ObjectType::all()
        .iter()
        .map(|ty| create_object_table(*ty, false))
        .collect();
    stmts.push(CREATE_REFERENCE_TABLE.to_string());
    stmts.push(CREATE_REFERENCE_OWNER_INDEX.to_string());
    stmts.push(CREATE_METADATA_TABLE.to_string());
    stmts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrades_are_ordered_and_reach_latest() {
        let versions: Vec<u32> = UPGRADES.iter().map(|u| u.to_version).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(versions.last().copied(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_object_table_sql() {
        let sql = create_object_table(ObjectType::Person, true);
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS person"));
        assert!(sql.contains("json_data TEXT"));
        assert!(!create_object_table(ObjectType::Person, false).contains("json_data"));
    }
}
