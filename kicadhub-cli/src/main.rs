//! KiCad Hub CLI - library checks, BOMs, cross-references and backups from the command line.

use clap::{Args, Parser, Subcommand, ValueEnum};
use kicadhub::backup::{BackupStatus, Category};
use kicadhub::library::{FootprintIndex, ScanReport};
use kicadhub::reports::{write_test_plan, ReportKind, ReportLog};
use kicadhub::{
    bulk_edit_property, generate_bom, parse_schematic, write_csv, BackupScheduler, CancelToken,
    CrossReference, Failure, HubError, LibraryIndex, ProjectRegistry, RulesEngine, Scope,
    SettingsStore,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing::Level;

#[derive(Parser)]
#[command(name = "kicadhub")]
#[command(about = "KiCad library and project knowledge base", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true, env = "KICADHUB_SETTINGS", value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index symbol and footprint libraries and report problems
    Scan {
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Check library parts against the configured property rules
    Validate {
        /// `all` or a library name
        #[arg(long, default_value = "all")]
        scope: String,

        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Also list failures covered by exemptions
        #[arg(long)]
        show_exempted: bool,

        /// Exit with error code if any part fails
        #[arg(long)]
        fail: bool,
    },

    /// Exempt a library or a single part from a rule
    Exempt {
        #[command(flatten)]
        target: ExemptTarget,

        /// Property the rule checks
        #[arg(long)]
        rule: String,
    },

    /// Set a property on one symbol in its library file
    SetProperty {
        library: String,
        part: String,
        key: String,
        value: String,
    },

    /// Write a bill of materials as CSV
    Bom {
        #[command(flatten)]
        source: BomSource,

        /// Output file (stdout if omitted)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show which projects use a library part
    Xref {
        /// `Library:Name`
        part: String,

        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Snapshot app data and libraries into zip archives
    Backup {
        /// Ignore the schedule
        #[arg(long)]
        force: bool,
    },

    /// List the snapshots of a backup category
    Snapshots {
        #[arg(value_enum)]
        category: CategoryArg,
    },

    /// Extract a snapshot over the original files
    Restore {
        #[arg(value_enum)]
        category: CategoryArg,

        /// Snapshot name, e.g. 2025-01-01_10-00-00
        timestamp: String,
    },

    /// Manage project records
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Append to the bug or feature request log
    Report {
        #[arg(value_enum)]
        kind: ReportArg,

        text: String,
    },

    /// Expand `${BASE_DIR}` and print the stored form of a path
    Resolve { path: String },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ExemptTarget {
    /// Library to exempt
    #[arg(long)]
    library: Option<String>,

    /// Part to exempt, as `Library:Name`
    #[arg(long)]
    part: Option<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct BomSource {
    /// Project whose main schematic and prices to use
    #[arg(long)]
    project: Option<String>,

    /// Root schematic, without pricing
    #[arg(long, value_name = "FILE")]
    schematic: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ProjectAction {
    /// List projects, pinned first
    List,
    /// Pin or unpin a project
    Pin { name: String },
    /// Mark a project archived
    Archive { name: String },
    /// Copy a project record under a new name
    Clone { source: String, target: String },
    /// Set the root schematic of a project
    SetSchematic { name: String, path: String },
    /// Export the test plan as markdown
    TestPlan {
        name: String,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output for scripts
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    AppData,
    Symbols,
    Footprints,
}

impl From<CategoryArg> for Category {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::AppData => Category::AppData,
            CategoryArg::Symbols => Category::Symbols,
            CategoryArg::Footprints => Category::Footprints,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportArg {
    Bug,
    Feature,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    process::exit(exit_code);
}

fn settings_store(path: Option<PathBuf>) -> kicadhub::Result<SettingsStore> {
    path.or_else(SettingsStore::default_path)
        .map(SettingsStore::new)
        .ok_or_else(|| HubError::Other("no settings file given and no config directory found".into()))
}

fn run(cli: Cli) -> kicadhub::Result<i32> {
    let mut registry = ProjectRegistry::open(settings_store(cli.settings)?)?;

    match cli.command {
        Commands::Scan { format } => handle_scan(&registry, format),
        Commands::Validate {
            scope,
            format,
            show_exempted,
            fail,
        } => handle_validate(&registry, &scope, format, show_exempted, fail),
        Commands::Exempt { target, rule } => {
            let mut rules = registry.settings().rules_config();
            match (target.library, target.part) {
                (Some(library), _) => rules.exempt_library(&library, &rule),
                (None, Some(part)) => rules.exempt_part(&part, &rule),
                (None, None) => return Err(HubError::Other("nothing to exempt".into())),
            }
            registry.settings_mut().set_rules_config(rules);
            registry.save()?;
            Ok(0)
        }
        Commands::SetProperty {
            library,
            part,
            key,
            value,
        } => {
            let index = scan_symbols(&registry)?;
            if bulk_edit_property(&index, &library, &part, &key, &value)? {
                println!("Updated {}:{}", library, part);
            } else {
                println!("{}:{} already has {} = {}", library, part, key, value);
            }
            Ok(0)
        }
        Commands::Bom { source, output } => handle_bom(&registry, source, output.as_deref()),
        Commands::Xref { part, format } => handle_xref(&registry, &part, format),
        Commands::Backup { force } => handle_backup(&mut registry, force),
        Commands::Snapshots { category } => {
            let scheduler = scheduler(&registry);
            for snapshot in scheduler.list_snapshots(category.into())? {
                println!("{}", snapshot.name);
            }
            Ok(0)
        }
        Commands::Restore {
            category,
            timestamp,
        } => {
            let report = scheduler(&registry).restore(category.into(), &timestamp)?;
            println!("Restored {} files", report.files_restored);
            if report.restart_required {
                println!("Restart running applications to pick up restored settings");
            }
            Ok(0)
        }
        Commands::Project { action } => handle_project(&mut registry, action),
        Commands::Report { kind, text } => {
            let dir = registry
                .store()
                .path()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let kind = match kind {
                ReportArg::Bug => ReportKind::Bug,
                ReportArg::Feature => ReportKind::FeatureRequest,
            };
            let path = ReportLog::new(dir).append(kind, &text, chrono::Local::now().naive_local())?;
            println!("Saved to {}", path.display());
            Ok(0)
        }
        Commands::Resolve { path } => {
            let resolver = registry.settings().resolver();
            let resolved = resolver.resolve(&path);
            println!("{}", resolved);
            println!("{}", resolver.relativize(&resolved));
            Ok(0)
        }
    }
}

fn scan_symbols(registry: &ProjectRegistry) -> kicadhub::Result<LibraryIndex> {
    let index = LibraryIndex::new();
    index.scan(&registry.settings().symbol_roots())?;
    Ok(index)
}

fn scheduler(registry: &ProjectRegistry) -> BackupScheduler {
    BackupScheduler::new(registry.settings().backup_root(registry.store().path()))
}

fn handle_scan(registry: &ProjectRegistry, format: OutputFormat) -> kicadhub::Result<i32> {
    let settings = registry.settings();
    let cancel = CancelToken::new();

    let symbols = LibraryIndex::new().scan_with(&settings.symbol_roots(), &cancel)?;
    let footprint_roots = settings.footprint_roots();
    let footprints = if footprint_roots.is_empty() {
        ScanReport::default()
    } else {
        FootprintIndex::new().scan(&footprint_roots, &[], &settings.resolver(), &cancel)?
    };

    match format {
        OutputFormat::Human => {
            println!(
                "Symbols:    {} parts in {} libraries",
                symbols.parts, symbols.libraries
            );
            println!(
                "Footprints: {} footprints in {} libraries",
                footprints.parts, footprints.libraries
            );
            let diagnostics: Vec<_> = symbols.diagnostics.iter().chain(&footprints.diagnostics).collect();
            if !diagnostics.is_empty() {
                println!("\nDiagnostics:");
                for d in diagnostics {
                    println!("  - {}", d);
                }
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "symbols": symbols,
                "footprints": footprints,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(0)
}

fn handle_validate(
    registry: &ProjectRegistry,
    scope: &str,
    format: OutputFormat,
    show_exempted: bool,
    fail: bool,
) -> kicadhub::Result<i32> {
    let index = scan_symbols(registry)?;
    let snapshot = index.snapshot();
    let scope = Scope::parse(scope);
    let engine = RulesEngine::new(registry.settings().rules_config());

    let (failures, stats) = engine.validate_and_get_stats(&snapshot, &scope);
    let exempted = if show_exempted {
        engine.get_exempted_failures(&snapshot, &scope)
    } else {
        Vec::new()
    };

    match format {
        OutputFormat::Human => {
            if failures.is_empty() {
                println!("No rule failures");
            } else {
                println!("Failures:");
                print_failures(&failures);
            }
            if !exempted.is_empty() {
                println!("\nExempted:");
                print_failures(&exempted);
            }
            println!(
                "\nChecked {} parts, {} failures",
                stats.total_checked, stats.total_fails
            );
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "failures": failures,
                "exempted": exempted,
                "stats": stats,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(if fail && !failures.is_empty() { 1 } else { 0 })
}

fn print_failures(failures: &[Failure]) {
    for failure in failures {
        println!("  {}:{}  {}", failure.library, failure.part, failure.message);
    }
}

fn handle_bom(registry: &ProjectRegistry, source: BomSource, output: Option<&Path>) -> kicadhub::Result<i32> {
    let (schematic, pricing) = match (source.project, source.schematic) {
        (Some(project), _) => {
            let record = registry
                .find(&project)
                .ok_or_else(|| HubError::Project(format!("project '{}' not found", project)))?;
            let schematic = registry.main_schematic_path(&project).ok_or_else(|| {
                HubError::Project(format!("project '{}' has no main schematic", project))
            })?;
            (schematic, record.bom_pricing.clone())
        }
        (None, Some(schematic)) => (schematic, BTreeMap::new()),
        (None, None) => return Err(HubError::Other("no schematic given".into())),
    };

    let hierarchy = parse_schematic(&schematic)?;
    let report = generate_bom(&hierarchy, &pricing);
    match output {
        Some(path) => {
            write_csv(&report.rows, File::create(path)?)?;
            println!(
                "Wrote {} rows ({} parts, {:.2} total) to {}",
                report.rows.len(),
                report.total_qty(),
                report.total_price(),
                path.display()
            );
        }
        None => write_csv(&report.rows, io::stdout().lock())?,
    }
    Ok(0)
}

fn handle_xref(registry: &ProjectRegistry, part: &str, format: OutputFormat) -> kicadhub::Result<i32> {
    let index = scan_symbols(registry)?;
    let xref = CrossReference::build_from_disk(&index.snapshot(), registry);
    for d in &xref.diagnostics {
        tracing::warn!("{}", d);
    }
    let usage = xref.usage(part);

    match format {
        OutputFormat::Human => {
            if usage.is_empty() {
                println!("{} is not used by any project", part);
            }
            for u in usage {
                println!(
                    "  {}: {} instances (last opened {})",
                    u.project,
                    u.count,
                    u.last_touched.as_deref().unwrap_or("never")
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(usage)?),
    }
    Ok(0)
}

fn handle_backup(registry: &mut ProjectRegistry, force: bool) -> kicadhub::Result<i32> {
    let scheduler = scheduler(registry);
    let sources = registry.settings().backup_sources(registry.store().path());
    let now = chrono::Local::now().naive_local();

    let runs = scheduler.perform_backup(&mut registry.settings_mut().backup, &sources, now, force);
    let mut failed = false;
    for run in &runs {
        match &run.status {
            BackupStatus::Created(path) => println!("{}: {}", run.category, path.display()),
            BackupStatus::Failed(reason) => {
                failed = true;
                println!("{}: failed: {}", run.category, reason);
            }
            BackupStatus::Disabled => println!("{}: disabled", run.category),
            BackupStatus::NotDue => println!("{}: not due", run.category),
            BackupStatus::NoSources => println!("{}: nothing to back up", run.category),
        }
    }
    registry.save()?;
    Ok(if failed { 1 } else { 0 })
}

fn handle_project(registry: &mut ProjectRegistry, action: ProjectAction) -> kicadhub::Result<i32> {
    match action {
        ProjectAction::List => {
            for name in registry.pinned_first() {
                let Some(record) = registry.find(name) else {
                    continue;
                };
                let pin = if record.metadata.pinned { "*" } else { " " };
                println!("{} {} [{}]", pin, name, record.metadata.status);
            }
            return Ok(0);
        }
        ProjectAction::Pin { name } => {
            let pinned = registry.toggle_pin(&name)?;
            println!("{} {}", name, if pinned { "pinned" } else { "unpinned" });
        }
        ProjectAction::Archive { name } => registry.archive(&name)?,
        ProjectAction::Clone { source, target } => registry.clone_project(&source, &target)?,
        ProjectAction::SetSchematic { name, path } => {
            registry.get(&name);
            registry.set_main_schematic(&name, &path)?;
        }
        ProjectAction::TestPlan { name, output } => {
            let record = registry
                .find(&name)
                .ok_or_else(|| HubError::Project(format!("project '{}' not found", name)))?;
            write_test_plan(&output, &name, &record.test_plan)?;
            println!("Wrote {}", output.display());
            return Ok(0);
        }
    }
    registry.save()?;
    Ok(0)
}
