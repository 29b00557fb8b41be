//! KiCad Hub - library and project knowledge base for KiCad users
//!
//! Indexes symbol and footprint libraries, checks parts against property
//! rules, tracks projects, cross-references which projects use which parts,
//! builds BOMs from schematic hierarchies and keeps zip backups of libraries
//! and settings.
//!
//! # Quick Start
//!
//! ```no_run
//! use kicadhub::{LibraryIndex, RulesEngine, Scope, SettingsStore};
//!
//! let store = SettingsStore::new("settings.json");
//! let settings = store.load().unwrap();
//!
//! let index = LibraryIndex::new();
//! index.scan(&settings.symbol_roots()).unwrap();
//!
//! let engine = RulesEngine::new(settings.rules_config());
//! for failure in engine.validate(&index.snapshot(), &Scope::All) {
//!     println!("{}:{} {}", failure.library, failure.part, failure.message);
//! }
//! ```
//!
//! # Features
//!
//! - **Library index**: `.kicad_sym` and `.pretty` scanning with atomic snapshot swaps
//! - **Rules**: required properties, regex patterns, library and part exemptions
//! - **Projects**: kanban, checklists, requirements, test plans, pricing
//! - **BOM**: hierarchical schematics, DNP and exclusion handling, CSV export
//! - **Backups**: scheduled zip snapshots with retention and restore

pub mod backup;
pub mod bom;
pub mod core;
pub mod git;
pub mod library;
pub mod parser;
pub mod paths;
pub mod projects;
pub mod reports;
pub mod rules;
pub mod settings;
pub mod tools;
pub mod xref;

// Re-export main types
pub use backup::{BackupConfig, BackupScheduler, BackupSources, BackupStatus, Category};
pub use bom::{generate_bom, write_csv, BomReport, BomRow};
pub use crate::core::{CancelToken, HubError, PathError, Result};
pub use library::{FootprintIndex, LibraryIndex, LibrarySnapshot, ScanReport};
pub use parser::{Diagnostic, ParseOutcome, SchematicHierarchy, SchematicParser};
pub use paths::PathResolver;
pub use projects::{ProjectRecord, ProjectRegistry};
pub use rules::{bulk_edit_property, Failure, RulesConfig, RulesEngine, Scope, ValidationStats};
pub use settings::{Settings, SettingsStore};
pub use tools::{ExternalTool, ToolError, ToolKind};
pub use xref::CrossReference;

/// Parse a schematic hierarchy, failing on unreadable root files.
pub fn parse_schematic(path: &std::path::Path) -> Result<SchematicHierarchy> {
    let (hierarchy, diagnostics) = SchematicParser::parse_schematic(path).into_parts(path);
    hierarchy.ok_or_else(|| HubError::Parse {
        file: path.to_path_buf(),
        message: diagnostics
            .into_iter()
            .next()
            .map(|d| d.message)
            .unwrap_or_default(),
    })
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        CancelToken, Failure, HubError, LibraryIndex, ProjectRegistry, Result, RulesEngine, Scope,
        Settings, SettingsStore,
    };
}
