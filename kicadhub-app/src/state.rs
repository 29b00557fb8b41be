use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use kicadhub::backup::BackupRun;
use kicadhub::backup::BackupStatus;
use kicadhub::library::{FootprintIndex, ScanReport};
use kicadhub::settings::SettingsSource;
use kicadhub::{BomReport, LibraryIndex, ProjectRegistry, Settings, SettingsStore};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::watcher::ChangeKind;

/// Which long-running job an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SymbolScan,
    FootprintScan,
    Bom,
    Backup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub libraries: usize,
    pub parts: usize,
    pub diagnostics: Vec<String>,
}

impl From<&ScanReport> for ScanSummary {
    fn from(report: &ScanReport) -> Self {
        Self {
            libraries: report.libraries,
            parts: report.parts,
            diagnostics: report.diagnostics.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Events for whatever front end is attached.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    SettingsLoaded { source: String },
    LibraryChanged { path: PathBuf, kind: ChangeKind },
    SymbolsIndexed { generation: u64, summary: ScanSummary },
    FootprintsIndexed { generation: u64, summary: ScanSummary },
    BomReady { generation: u64, project: String, report: BomReport },
    BackupFinished { created: Vec<PathBuf>, failed: Vec<String> },
    TaskFailed { task: TaskKind, generation: u64, message: String },
}

impl AppEvent {
    pub fn backup_finished(runs: &[BackupRun]) -> Self {
        let mut created = Vec::new();
        let mut failed = Vec::new();
        for run in runs {
            match &run.status {
                BackupStatus::Created(path) => created.push(path.clone()),
                BackupStatus::Failed(reason) => failed.push(format!("{}: {}", run.category, reason)),
                _ => {}
            }
        }
        AppEvent::BackupFinished { created, failed }
    }
}

/// Everything a session shares: the project registry (which owns the
/// settings), both library indexes and the event sink.
pub struct AppContext {
    registry: Mutex<ProjectRegistry>,
    settings_path: PathBuf,
    pub library: Arc<LibraryIndex>,
    pub footprints: Arc<FootprintIndex>,
    events: broadcast::Sender<AppEvent>,
}

impl AppContext {
    pub const EVENT_CAPACITY: usize = 64;

    pub fn new(registry: ProjectRegistry) -> Self {
        let (events, _) = broadcast::channel(Self::EVENT_CAPACITY);
        Self {
            settings_path: registry.store().path().to_path_buf(),
            registry: Mutex::new(registry),
            library: Arc::new(LibraryIndex::new()),
            footprints: Arc::new(FootprintIndex::new()),
            events,
        }
    }

    /// Open the settings at `settings_path`, recovering from the default
    /// backup location if the file is unreadable.
    pub fn load(settings_path: &Path) -> Result<Self> {
        let store = SettingsStore::new(settings_path);
        let backup_root = Settings::default().backup_root(settings_path);
        let (settings, source) = store.load_or_recover(Some(&backup_root));
        let source = match source {
            SettingsSource::File => "file".to_string(),
            SettingsSource::Backup(snapshot) => {
                warn!("Settings restored from {}", snapshot.display());
                format!("backup:{}", snapshot.display())
            }
            SettingsSource::Defaults => "defaults".to_string(),
        };
        if let Some(parent) = settings_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        info!("Loaded settings from {} ({})", settings_path.display(), source);

        let ctx = Self::new(ProjectRegistry::with_settings(store, settings));
        ctx.emit(AppEvent::SettingsLoaded { source });
        Ok(ctx)
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub async fn registry(&self) -> MutexGuard<'_, ProjectRegistry> {
        self.registry.lock().await
    }

    /// Copy of the current settings.
    pub async fn settings(&self) -> Settings {
        self.registry.lock().await.settings().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: AppEvent) {
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_settings_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg").join("settings.json");
        let ctx = AppContext::load(&path).unwrap();

        assert_eq!(ctx.settings().await, Settings::default());
        assert_eq!(ctx.settings_path(), path.as_path());
        assert!(path.parent().unwrap().is_dir());
        assert!(ctx.library.is_empty());
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::load(&dir.path().join("settings.json")).unwrap();
        let mut rx = ctx.subscribe();

        ctx.emit(AppEvent::LibraryChanged {
            path: PathBuf::from("/libs/Device.kicad_sym"),
            kind: ChangeKind::Symbols,
        });
        match rx.recv().await.unwrap() {
            AppEvent::LibraryChanged { kind, .. } => assert_eq!(kind, ChangeKind::Symbols),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = AppEvent::TaskFailed {
            task: TaskKind::SymbolScan,
            generation: 3,
            message: "no library roots configured for symbols".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_failed");
        assert_eq!(json["task"], "symbol_scan");
        assert_eq!(json["generation"], 3);
    }
}
