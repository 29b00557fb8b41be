//! Footprint index: `library:name` lookups over `.pretty` directories.
//!
//! Library nicknames come from `fp-lib-table` files when present; any
//! `.pretty` folder not named by a table is reachable under its folder name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::core::{check_roots, CancelToken, Result};
use crate::library::index::ScanReport;
use crate::parser::footprint::FootprintParser;
use crate::parser::lib_table::parse_lib_table;
use crate::parser::outcome::Diagnostic;
use crate::parser::schema::{split_uid, FootprintRecord};
use crate::paths::PathResolver;

#[derive(Debug, Clone, PartialEq)]
pub struct FootprintLibrary {
    pub name: String,
    pub path: PathBuf,
    pub footprints: Vec<FootprintRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct FootprintSnapshot {
    libraries: Vec<FootprintLibrary>,
    nicknames: HashMap<String, usize>,
}

impl PartialEq for FootprintSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.libraries == other.libraries && self.nicknames == other.nicknames
    }
}

impl FootprintSnapshot {
    /// Look up `library:name`, resolving the library nickname first.
    pub fn get(&self, reference: &str) -> Option<&FootprintRecord> {
        let (nick, name) = split_uid(reference)?;
        let library = &self.libraries[*self.nicknames.get(nick)?];
        library.footprints.iter().find(|f| f.name == name)
    }

    pub fn libraries(&self) -> &[FootprintLibrary] {
        &self.libraries
    }

    /// Directory a nickname resolves to.
    pub fn library_path(&self, nick: &str) -> Option<&Path> {
        self.nicknames
            .get(nick)
            .map(|&i| self.libraries[i].path.as_path())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FootprintRecord> {
        self.libraries.iter().flat_map(|l| l.footprints.iter())
    }

    pub fn footprint_count(&self) -> usize {
        self.libraries.iter().map(|l| l.footprints.len()).sum()
    }

    /// Build from footprint roots plus any explicit lib-table files. Tables
    /// found inside the roots are used too.
    pub fn build(
        roots: &[PathBuf],
        tables: &[PathBuf],
        resolver: &PathResolver,
        cancel: &CancelToken,
    ) -> Result<(Self, ScanReport)> {
        check_roots("footprints", roots)?;
        let mut report = ScanReport::default();

        let mut pretty_dirs: Vec<PathBuf> = Vec::new();
        let mut found_tables: Vec<PathBuf> = tables.to_vec();
        for root in roots {
            for entry in WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if entry.file_type().is_dir()
                    && path.extension().and_then(|s| s.to_str()) == Some("pretty")
                {
                    pretty_dirs.push(canonical(path));
                } else if entry.file_type().is_file()
                    && entry.file_name().to_str() == Some("fp-lib-table")
                {
                    found_tables.push(path.to_path_buf());
                }
            }
        }

        let mut table_nicks: Vec<(String, PathBuf)> = Vec::new();
        for table in &found_tables {
            let (entries, diags) = parse_lib_table(table).into_parts(table);
            report.diagnostics.extend(diags);
            let table_dir = table.parent().map(Path::to_path_buf).unwrap_or_default();
            let table_resolver = resolver
                .clone()
                .with_var("KIPRJMOD", &table_dir.to_string_lossy());
            for entry in entries.unwrap_or_default() {
                let dir = PathBuf::from(table_resolver.resolve(&entry.uri));
                if !dir.is_dir() {
                    report.diagnostics.push(Diagnostic::new(
                        table,
                        format!("library '{}' points at missing {}", entry.name, dir.display()),
                    ));
                    continue;
                }
                let dir = canonical(&dir);
                if !pretty_dirs.contains(&dir) {
                    pretty_dirs.push(dir.clone());
                }
                table_nicks.push((entry.name, dir));
            }
        }

        let mut libraries = Vec::new();
        let mut by_dir: HashMap<PathBuf, usize> = HashMap::new();
        for dir in &pretty_dirs {
            cancel.check()?;
            let mut footprints = Vec::new();
            for entry in WalkDir::new(dir)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let file = entry.path();
                if file.extension().and_then(|s| s.to_str()) != Some("kicad_mod") {
                    continue;
                }
                let (record, diags) = FootprintParser::parse_footprint(file).into_parts(file);
                for d in &diags {
                    warn!("{}", d);
                }
                report.diagnostics.extend(diags);
                footprints.extend(record);
            }
            by_dir.insert(dir.clone(), libraries.len());
            libraries.push(FootprintLibrary {
                name: pretty_name(dir),
                path: dir.clone(),
                footprints,
            });
        }

        let mut nicknames = HashMap::new();
        for (nick, dir) in table_nicks {
            if let Some(&i) = by_dir.get(&dir) {
                nicknames.entry(nick).or_insert(i);
            }
        }
        for (i, library) in libraries.iter().enumerate() {
            nicknames.entry(library.name.clone()).or_insert(i);
        }

        let snapshot = Self {
            libraries,
            nicknames,
        };
        report.libraries = snapshot.libraries.len();
        report.parts = snapshot.footprint_count();
        Ok((snapshot, report))
    }
}

fn pretty_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.strip_suffix(".pretty").unwrap_or(s))
        .unwrap_or_default()
        .to_string()
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Debug, Default)]
pub struct FootprintIndex {
    current: RwLock<Arc<FootprintSnapshot>>,
}

impl FootprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<FootprintSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, snapshot: FootprintSnapshot) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(snapshot);
    }

    pub fn scan(
        &self,
        roots: &[PathBuf],
        tables: &[PathBuf],
        resolver: &PathResolver,
        cancel: &CancelToken,
    ) -> Result<ScanReport> {
        let (snapshot, report) = FootprintSnapshot::build(roots, tables, resolver, cancel)?;
        cancel.check()?;
        self.replace(snapshot);
        info!(
            "Indexed {} footprints in {} libraries",
            report.parts, report.libraries
        );
        Ok(report)
    }

    pub fn get(&self, reference: &str) -> Option<FootprintRecord> {
        self.snapshot().get(reference).cloned()
    }
}
