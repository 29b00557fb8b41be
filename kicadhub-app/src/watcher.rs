use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// What kind of library data a changed file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Symbols,
    Footprints,
    LibTable,
}

/// A library file changed on disk (created, modified or removed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Watcher for symbol and footprint library roots
pub struct LibraryWatcher {
    debouncer: Option<Debouncer<RecommendedWatcher>>,
    event_tx: broadcast::Sender<LibraryChange>,
    watched: Vec<PathBuf>,
}

impl LibraryWatcher {
    /// Quiet period before a burst of saves is reported as one change.
    pub const DEBOUNCE: Duration = Duration::from_millis(1500);

    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self {
            debouncer: None,
            event_tx: tx,
            watched: Vec::new(),
        }
    }

    /// Watch every existing root recursively, replacing any previous set.
    /// Missing roots are skipped with a warning.
    pub fn watch(&mut self, roots: &[PathBuf]) -> Result<()> {
        self.unwatch();

        let tx = self.event_tx.clone();
        let mut debouncer = new_debouncer(Self::DEBOUNCE, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for change in Self::changes(&events) {
                        debug!("Library change: {:?}", change);
                        // nobody listening is fine
                        let _ = tx.send(change);
                    }
                }
                Err(e) => error!("Watcher error: {:?}", e),
            }
        })
        .context("Failed to create file watcher debouncer")?;

        let mut watched = Vec::new();
        for root in roots {
            if !root.is_dir() {
                warn!("Not watching missing root {}", root.display());
                continue;
            }
            let root = root
                .canonicalize()
                .with_context(|| format!("Failed to canonicalize path: {:?}", root))?;
            if watched.contains(&root) {
                continue;
            }
            debouncer
                .watcher()
                .watch(&root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to start watching: {:?}", root))?;
            info!("Watching {}", root.display());
            watched.push(root);
        }

        if !watched.is_empty() {
            self.debouncer = Some(debouncer);
            self.watched = watched;
        }
        Ok(())
    }

    pub fn unwatch(&mut self) {
        if let Some(mut debouncer) = self.debouncer.take() {
            for path in &self.watched {
                let _ = debouncer.watcher().unwatch(path);
            }
            info!("Stopped watching {} roots", self.watched.len());
        }
        self.watched.clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryChange> {
        self.event_tx.subscribe()
    }

    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.watched
    }

    pub fn is_watching(&self) -> bool {
        self.debouncer.is_some()
    }

    pub fn classify(path: &Path) -> Option<ChangeKind> {
        match path.file_name().and_then(|n| n.to_str()) {
            Some("fp-lib-table") | Some("sym-lib-table") => return Some(ChangeKind::LibTable),
            _ => {}
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("kicad_sym") => Some(ChangeKind::Symbols),
            Some("kicad_mod") => Some(ChangeKind::Footprints),
            Some("pretty") => Some(ChangeKind::Footprints),
            _ => None,
        }
    }

    /// One change per distinct library file in a debounced batch.
    fn changes(events: &[DebouncedEvent]) -> Vec<LibraryChange> {
        let mut changes: Vec<LibraryChange> = Vec::new();
        for event in events {
            let Some(kind) = Self::classify(&event.path) else {
                continue;
            };
            if !changes.iter().any(|c| c.path == event.path) {
                changes.push(LibraryChange {
                    path: event.path.clone(),
                    kind,
                });
            }
        }
        changes
    }
}

impl Default for LibraryWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LibraryWatcher {
    fn drop(&mut self) {
        self.unwatch();
    }
}
