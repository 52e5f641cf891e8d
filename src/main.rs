//! Genostore CLI - inspect and maintain genealogical databases

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use genostore::backend::SchemaInfo;
use genostore::config::{self, BackendConfig};
use genostore::engine::{DocumentEngine, EngineKind, SqliteEngine, StorageEngine};
use genostore::indexer::ReferenceStrategy;
use genostore::progress::ProgressSender;
use genostore::ui::{self, ContainerRow, EncodingRow, Icons, ProgressManager, Spinner, TableBuilder};
use genostore::{Backend, Credentials, Handle, ObjectType};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "genostore")]
#[command(version)]
#[command(about = "Object-graph storage for genealogical records")]
#[command(long_about = r#"
Genostore keeps people, families, events and the records around them in a
SQLite or document database, with a backlink index kept in step with every
commit.

Example usage:
  genostore init --db ./tree --engine document
  genostore list person --db ./tree --sorted
  genostore backlinks 4f1c0e0a7d3b9e2a61c5d8f0 --db ./tree --include Family
  genostore migrate --from ./old-tree --db ./tree
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new database directory
    Init {
        /// Database directory
        #[arg(short, long, default_value = ".")]
        db: PathBuf,

        /// Storage engine (sqlite, document)
        #[arg(short, long, default_value = "sqlite")]
        engine: EngineKind,

        /// How reference edges are refreshed on commit (full-replace, diff)
        #[arg(long, value_enum, default_value_t = StrategyArg::FullReplace)]
        strategy: StrategyArg,

        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show schema version, engine and container sizes
    Info {
        #[arg(short, long, default_value = ".")]
        db: PathBuf,
    },

    /// List the handles of one record type
    List {
        /// Record type, by class or container name (Person, family, ...)
        obj_type: ObjectType,

        #[arg(short, long, default_value = ".")]
        db: PathBuf,

        /// Sort by the type's natural key instead of handle order
        #[arg(short, long)]
        sorted: bool,
    },

    /// Print one record
    Show {
        obj_type: ObjectType,
        handle: String,

        #[arg(short, long, default_value = ".")]
        db: PathBuf,
    },

    /// List the records that reference a handle
    Backlinks {
        handle: String,

        #[arg(short, long, default_value = ".")]
        db: PathBuf,

        /// Only owners of these types
        #[arg(short, long, value_delimiter = ',')]
        include: Vec<ObjectType>,
    },

    /// Rebuild the reference index from every record
    Reindex {
        #[arg(short, long, default_value = ".")]
        db: PathBuf,
    },

    /// Fill in missing structured encodings from raw data
    Backfill {
        #[arg(short, long, default_value = ".")]
        db: PathBuf,
    },

    /// Check encoding counts and the reference index
    Verify {
        #[arg(short, long, default_value = ".")]
        db: PathBuf,
    },

    /// Copy every record from another database into this one
    Migrate {
        /// Source database directory
        #[arg(short, long)]
        from: PathBuf,

        #[arg(short, long, default_value = ".")]
        db: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    FullReplace,
    Diff,
}

impl From<StrategyArg> for ReferenceStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::FullReplace => ReferenceStrategy::FullReplace,
            StrategyArg::Diff => ReferenceStrategy::Diff,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let json = cli.format == Format::Json;

    match cli.command {
        Commands::Init { db, engine, strategy, force } => {
            let config = BackendConfig {
                reference_strategy: strategy.into(),
                ..BackendConfig::with_engine(engine)
            };
            let backend = Backend::create(&db, config, force)
                .with_context(|| format!("creating database in {}", db.display()))?;
            let info = backend.get_schema_info()?;
            backend.close()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                ui::success(&format!("Created {} database in {}", engine.as_str(), db.display()));
                ui::summary_row("Schema version", &version_text(info.version));
            }
        }

        Commands::Info { db } => {
            let backend = open(&db)?;
            let info = backend.get_schema_info()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_info(&info, backend.config());
            }
            backend.close()?;
        }

        Commands::List { obj_type, db, sorted } => {
            let backend = open(&db)?;
            let handles = backend.handles(obj_type, sorted)?;
            if json {
                let rows: Vec<_> = handles
                    .iter()
                    .map(|h| {
                        let gramps_id = backend
                            .get_record(obj_type, h)
                            .ok()
                            .and_then(|r| r.payload().ok())
                            .map(|p| p.gramps_id().to_string());
                        serde_json::json!({ "handle": h, "gramps_id": gramps_id })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                ui::header(&format!("{} {} records", handles.len(), obj_type.class_name()));
                for handle in &handles {
                    let label = match backend.get_record(obj_type, handle).and_then(|r| r.payload()) {
                        Ok(payload) => payload.gramps_id().to_string(),
                        Err(e) => ui::dim(&e.to_string()),
                    };
                    ui::record(obj_type, handle, &label);
                }
            }
            backend.close()?;
        }

        Commands::Show { obj_type, handle, db } => {
            let backend = open(&db)?;
            let handle = Handle::parse(&handle)?;
            let record = backend.get_record(obj_type, &handle)?;
            let payload = record.payload()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                ui::header(&format!("{} {}", obj_type.class_name(), handle));
                ui::summary_row("Gramps ID", payload.gramps_id());
                ui::summary_row("Changed", &format_time(record.change_time));
                let raw_size = record
                    .raw
                    .as_ref()
                    .map(|r| ui::human_bytes(r.len() as u64))
                    .unwrap_or_else(|| "-".into());
                ui::summary_row("Raw", &raw_size);
                ui::summary_row("Structured", if record.structured.is_some() { "yes" } else { "no" });
                println!();
                println!("{}", serde_json::to_string_pretty(&payload)?);
            }
            backend.close()?;
        }

        Commands::Backlinks { handle, db, include } => {
            let backend = open(&db)?;
            let handle = Handle::parse(&handle)?;
            let include = (!include.is_empty()).then_some(include);
            let links: Vec<(ObjectType, Handle)> = backend.find_backlinks(&handle, include.as_deref())?.collect();

            if json {
                let rows: Vec<_> = links
                    .iter()
                    .map(|(ty, h)| serde_json::json!({ "class": ty.class_name(), "handle": h }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if links.is_empty() {
                ui::info("Backlinks", &format!("nothing references {}", handle));
            } else {
                ui::header(&format!("{} {} records reference {}", Icons::LINK, links.len(), handle));
                for (ty, owner) in &links {
                    ui::record(*ty, owner, "");
                }
            }
            backend.close()?;
        }

        Commands::Reindex { db } => {
            let mut backend = open(&db)?;
            let start = Instant::now();
            let stats = with_progress(json, |progress| backend.reindex_reference_map(progress))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                let mut table = TableBuilder::new();
                table
                    .add_row("Records scanned", stats.records)
                    .add_row("References", stats.references)
                    .add_row("Added", stats.added)
                    .add_row("Removed", stats.removed)
                    .add_row("Skipped", stats.skipped);
                println!("{}", table.build());
                ui::timing(&format!("{:.2?}", start.elapsed()));
            }
            backend.close()?;
        }

        Commands::Backfill { db } => {
            let mut backend = open(&db)?;
            let report = with_progress(json, |progress| backend.backfill_structured_encoding(progress))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                ui::success(&format!("Filled {} structured encodings", report.filled));
                if report.skipped > 0 {
                    ui::warn(&format!("{} records could not be decoded", report.skipped));
                }
            }
            backend.close()?;
        }

        Commands::Verify { db } => {
            let backend = open(&db)?;
            let spinner = (!json)
                .then(|| Spinner::new(&format!("{} Verifying encodings and references", Icons::GEAR)));
            let report = backend.verify()?;
            if let Some(spinner) = spinner {
                spinner.finish_with_message("Verification finished");
            }
            backend.close()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                ui::section("Encodings");
                let rows: Vec<EncodingRow> = report.counts.iter().map(EncodingRow::from).collect();
                println!("{}", ui::render(&rows));
                ui::section("References");
                ui::summary_row("Stale edges", &report.references.stale.len().to_string());
                ui::summary_row("Missing edges", &report.references.missing.len().to_string());
                println!();
                if report.is_consistent() {
                    ui::success("No inconsistencies found");
                } else {
                    ui::error("Inconsistencies found; run `genostore backfill` or `genostore reindex`");
                }
            }
            if !report.is_consistent() {
                std::process::exit(1);
            }
        }

        Commands::Migrate { from, db } => {
            let source = open_source(&from)?;
            let mut backend = open(&db)?;
            let need = backend.detect_migration_needed(Some(source.as_ref()))?;
            tracing::info!("Migrating {} into {} ({})", from.display(), db.display(), need);

            let start = Instant::now();
            let report = if json {
                backend.migrate_from(source.as_ref(), None)?
            } else {
                let (manager, tx) = ProgressManager::new();
                let result = backend.migrate_from(source.as_ref(), Some(&tx));
                drop(tx);
                let records = result.as_ref().map(|r| r.total_records()).unwrap_or(0);
                let references = result.as_ref().map(|r| r.references.references).unwrap_or(0);
                manager.finish_with_summary(start.elapsed(), records, references);
                result?
            };
            backend.close()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let mut table = TableBuilder::new();
                for (ty, count) in &report.records {
                    table.add_row(&format!("{} {}", Icons::for_type(*ty), ty.class_name()), count);
                }
                table
                    .add_row("Metadata keys", report.metadata)
                    .add_row("Given names", report.gender_stats)
                    .add_row("Surnames", report.surnames)
                    .add_row("Name groups", report.name_groups)
                    .add_row("Skipped", report.skipped);
                println!("{}", table.build());
            }
        }
    }

    Ok(())
}

fn open(db: &Path) -> anyhow::Result<Backend> {
    Backend::open(db, &Credentials::default()).with_context(|| format!("opening database in {}", db.display()))
}

/// Open another database's engine directly, without touching its schema
fn open_source(dir: &Path) -> anyhow::Result<Box<dyn StorageEngine>> {
    let Some(source_config) = config::load_config(dir)? else {
        bail!("{} is not a genostore database (no {})", dir.display(), config::CONFIG_FILE);
    };
    let path = config::engine_path_in(dir, source_config.engine);
    let engine: Box<dyn StorageEngine> = match source_config.engine {
        EngineKind::Sqlite => Box::new(SqliteEngine::open(&path)?),
        EngineKind::Document => Box::new(DocumentEngine::open(&path)?),
    };
    Ok(engine)
}

/// Run a long operation with progress bars in text mode
fn with_progress<T>(
    json: bool,
    work: impl FnOnce(Option<&ProgressSender>) -> genostore::Result<T>,
) -> anyhow::Result<T> {
    if json {
        return Ok(work(None)?);
    }
    let (manager, tx) = ProgressManager::new();
    let result = work(Some(&tx));
    drop(tx);
    let warnings = manager.join();
    if warnings > 0 {
        ui::warn(&format!("{} warnings", warnings));
    }
    Ok(result?)
}

fn print_info(info: &SchemaInfo, config: &BackendConfig) {
    ui::header("Genostore database");
    ui::summary_row("Location", &info.location);
    ui::summary_row("Engine", info.engine.as_str());
    ui::summary_row("Schema version", &version_text(info.version));
    ui::summary_row("Reference strategy", &format!("{:?}", config.reference_strategy));
    ui::summary_row("Undo limit", &config.undo_limit.to_string());
    println!();
    let rows: Vec<ContainerRow> = info.containers.iter().map(ContainerRow::from).collect();
    println!("{}", ui::render(&rows));
}

fn version_text(version: Option<u32>) -> String {
    version.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
}

fn format_time(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}
