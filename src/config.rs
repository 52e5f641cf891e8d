//! Per-database configuration
//!
//! Every database directory carries a `genostore.toml`:
//!
//! ```toml
//! engine = "sqlite"
//! reference_strategy = "full_replace"
//! undo_limit = 1000
//! auto_upgrade = false
//! ```

use crate::engine::EngineKind;
use crate::indexer::ReferenceStrategy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "genostore.toml";
pub const SQLITE_FILE: &str = "sqlite.db";
pub const DOCUMENTS_DIR: &str = "documents";

pub const DEFAULT_UNDO_LIMIT: usize = 1000;

fn default_undo_limit() -> usize {
    DEFAULT_UNDO_LIMIT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub engine: EngineKind,
    #[serde(default)]
    pub reference_strategy: ReferenceStrategy,
    /// Committed transactions kept for undo; 0 disables undo
    #[serde(default = "default_undo_limit")]
    pub undo_limit: usize,
    /// Upgrade older schemas on open instead of refusing them
    #[serde(default)]
    pub auto_upgrade: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            reference_strategy: ReferenceStrategy::default(),
            undo_limit: DEFAULT_UNDO_LIMIT,
            auto_upgrade: false,
        }
    }
}

impl BackendConfig {
    pub fn with_engine(engine: EngineKind) -> Self {
        Self {
            engine,
            ..Default::default()
        }
    }
}

pub fn config_path_in(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Where the engine keeps its data inside a database directory
pub fn engine_path_in(dir: &Path, engine: EngineKind) -> PathBuf {
    match engine {
        EngineKind::Sqlite => dir.join(SQLITE_FILE),
        EngineKind::Document => dir.join(DOCUMENTS_DIR),
    }
}

/// Read `genostore.toml` from a database directory; `None` if there is none
pub fn load_config(dir: &Path) -> Result<Option<BackendConfig>> {
    let path = config_path_in(dir);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: BackendConfig = toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(config))
}

pub fn write_config(dir: &Path, config: &BackendConfig, force: bool) -> Result<()> {
    let path = config_path_in(dir);
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        )));
    }

    let contents = toml::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(dir: &Path) -> Result<()> {
    if !dir.as_os_str().is_empty() && !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: BackendConfig = toml::from_str("engine = \"document\"").unwrap();
        assert_eq!(config.engine, EngineKind::Document);
        assert_eq!(config.reference_strategy, ReferenceStrategy::FullReplace);
        assert_eq!(config.undo_limit, DEFAULT_UNDO_LIMIT);
        assert!(!config.auto_upgrade);
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config(dir.path()).unwrap(), None);

        let config = BackendConfig {
            reference_strategy: ReferenceStrategy::Diff,
            auto_upgrade: true,
            ..BackendConfig::with_engine(EngineKind::Document)
        };
        write_config(dir.path(), &config, false).unwrap();
        assert!(matches!(write_config(dir.path(), &config, false), Err(Error::Config(_))));
        assert_eq!(load_config(dir.path()).unwrap(), Some(config));
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(config_path_in(dir.path()), "engine = \"oracle\"").unwrap();
        assert!(matches!(load_config(dir.path()), Err(Error::Config(_))));
    }
}
