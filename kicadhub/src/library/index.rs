//! In-memory symbol library index.
//!
//! A scan builds a complete [`LibrarySnapshot`] off to the side and then swaps
//! it in, so readers holding an `Arc` to the previous snapshot keep a
//! consistent view and never observe a half-built index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{info, warn};

use crate::core::{check_roots, discover_files, CancelToken, HubError, Result};
use crate::parser::outcome::Diagnostic;
use crate::parser::schema::{split_uid, PartRecord};
use crate::parser::symbol_lib::{library_name, SymbolLibParser};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolLibrary {
    pub name: String,
    pub file_path: PathBuf,
    pub parts: Vec<PartRecord>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub libraries: usize,
    pub parts: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Immutable view of every indexed library, in scan order.
#[derive(Debug, Clone, Default)]
pub struct LibrarySnapshot {
    libraries: Vec<SymbolLibrary>,
    positions: HashMap<String, usize>,
}

impl PartialEq for LibrarySnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.libraries == other.libraries
    }
}

impl LibrarySnapshot {
    pub fn from_libraries(libraries: Vec<SymbolLibrary>) -> Self {
        let positions = libraries
            .iter()
            .enumerate()
            .map(|(i, lib)| (lib.name.clone(), i))
            .collect();
        Self {
            libraries,
            positions,
        }
    }

    pub fn get(&self, library: &str, name: &str) -> Option<&PartRecord> {
        self.library(library)?.parts.iter().find(|p| p.name == name)
    }

    pub fn get_uid(&self, uid: &str) -> Option<&PartRecord> {
        let (library, name) = split_uid(uid)?;
        self.get(library, name)
    }

    pub fn library(&self, name: &str) -> Option<&SymbolLibrary> {
        self.positions.get(name).map(|&i| &self.libraries[i])
    }

    pub fn libraries(&self) -> &[SymbolLibrary] {
        &self.libraries
    }

    /// `(library, name, record)` for every part.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &PartRecord)> {
        self.libraries.iter().flat_map(|lib| {
            lib.parts
                .iter()
                .map(move |p| (lib.name.as_str(), p.name.as_str(), p))
        })
    }

    pub fn part_count(&self) -> usize {
        self.libraries.iter().map(|l| l.parts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    /// Build a snapshot from library roots. Roots are walked in the order
    /// given, files within a root in file-name order. The first library of a
    /// given name wins.
    pub fn build(roots: &[PathBuf], cancel: &CancelToken) -> Result<(Self, ScanReport)> {
        check_roots("symbols", roots)?;
        let mut libraries: Vec<SymbolLibrary> = Vec::new();
        let mut report = ScanReport::default();

        for root in roots {
            for file in discover_files(root, "kicad_sym") {
                cancel.check()?;
                let name = library_name(&file);
                if let Some(existing) = libraries.iter().find(|l| l.name == name) {
                    report.diagnostics.push(Diagnostic::new(
                        &file,
                        format!(
                            "library '{}' already loaded from {}; skipped",
                            name,
                            existing.file_path.display()
                        ),
                    ));
                    continue;
                }
                let (parts, diags) = SymbolLibParser::parse_symbol_library(&file).into_parts(&file);
                for d in &diags {
                    warn!("{}", d);
                }
                report.diagnostics.extend(diags);
                if let Some(parts) = parts {
                    libraries.push(SymbolLibrary {
                        name,
                        file_path: file,
                        parts,
                    });
                }
            }
        }

        let snapshot = Self::from_libraries(libraries);
        report.libraries = snapshot.libraries.len();
        report.parts = snapshot.part_count();
        Ok((snapshot, report))
    }
}

/// Shared handle to the current snapshot.
#[derive(Debug, Default)]
pub struct LibraryIndex {
    current: RwLock<Arc<LibrarySnapshot>>,
}

impl LibraryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<LibrarySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, snapshot: LibrarySnapshot) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(snapshot);
    }

    /// Scan `roots` and publish the result. Returns the number of parts.
    pub fn scan(&self, roots: &[PathBuf]) -> Result<usize> {
        Ok(self.scan_with(roots, &CancelToken::new())?.parts)
    }

    /// Scan with a cancel token. A cancelled scan leaves the index untouched.
    pub fn scan_with(&self, roots: &[PathBuf], cancel: &CancelToken) -> Result<ScanReport> {
        let (snapshot, report) = LibrarySnapshot::build(roots, cancel)?;
        cancel.check()?;
        self.replace(snapshot);
        info!(
            "Indexed {} parts in {} libraries ({} diagnostics)",
            report.parts,
            report.libraries,
            report.diagnostics.len()
        );
        Ok(report)
    }

    pub fn get(&self, library: &str, name: &str) -> Option<PartRecord> {
        self.snapshot().get(library, name).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().part_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-parse one library file and replace only that library.
    pub fn reload_library(&self, file: &Path) -> Result<Vec<Diagnostic>> {
        let (parts, diagnostics) = SymbolLibParser::parse_symbol_library(file).into_parts(file);
        let parts = parts.ok_or_else(|| HubError::Parse {
            file: file.to_path_buf(),
            message: diagnostics
                .first()
                .map(|d| d.message.clone())
                .unwrap_or_default(),
        })?;
        let name = library_name(file);

        let mut libraries = self.snapshot().libraries.clone();
        let updated = SymbolLibrary {
            name: name.clone(),
            file_path: file.to_path_buf(),
            parts,
        };
        match libraries.iter_mut().find(|l| l.name == name) {
            Some(existing) => *existing = updated,
            None => libraries.push(updated),
        }
        self.replace(LibrarySnapshot::from_libraries(libraries));
        Ok(diagnostics)
    }
}
