//! The session loop: library scans, BOM builds and backups run as background
//! jobs while the watcher feeds rescans.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime};
use kicadhub::backup::{BackupRun, BackupScheduler, BackupStatus, Category};
use kicadhub::library::FootprintSnapshot;
use kicadhub::{generate_bom, parse_schematic, BomReport, HubError, LibrarySnapshot, ScanReport};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::state::{AppContext, AppEvent, ScanSummary, TaskKind};
use crate::watcher::{ChangeKind, LibraryChange, LibraryWatcher};
use crate::workers::{Tagged, TaskQueue};

enum Next {
    Symbols(Tagged<(LibrarySnapshot, ScanReport)>),
    Footprints(Tagged<(FootprintSnapshot, ScanReport)>),
    Bom(Tagged<(String, BomReport)>),
    Change(std::result::Result<LibraryChange, RecvError>),
    Idle,
}

enum Step {
    Shutdown,
    Tick,
    Handled(bool),
}

pub struct Host {
    ctx: Arc<AppContext>,
    symbol_scans: TaskQueue<(LibrarySnapshot, ScanReport)>,
    footprint_scans: TaskQueue<(FootprintSnapshot, ScanReport)>,
    boms: TaskQueue<(String, BomReport)>,
    watcher: LibraryWatcher,
    changes: broadcast::Receiver<LibraryChange>,
}

impl Host {
    pub const BACKUP_TICK: Duration = Duration::from_secs(60);

    pub fn new(ctx: Arc<AppContext>) -> Self {
        let watcher = LibraryWatcher::new();
        let changes = watcher.subscribe();
        Self {
            ctx,
            symbol_scans: TaskQueue::new("symbol scan"),
            footprint_scans: TaskQueue::new("footprint scan"),
            boms: TaskQueue::new("bom"),
            watcher,
            changes,
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn watcher(&self) -> &LibraryWatcher {
        &self.watcher
    }

    /// Watch the configured library roots and queue the initial scans.
    pub async fn start(&mut self) -> Result<()> {
        let settings = self.ctx.settings().await;
        let mut roots = settings.symbol_roots();
        roots.extend(settings.footprint_roots());
        self.watcher.watch(&roots)?;

        self.request_symbol_scan().await;
        self.request_footprint_scan().await;
        Ok(())
    }

    /// Queue a symbol library rescan. `None` when no roots are configured.
    pub async fn request_symbol_scan(&mut self) -> Option<u64> {
        let roots = self.ctx.settings().await.symbol_roots();
        if roots.is_empty() {
            debug!("No symbol roots configured, skipping scan");
            return None;
        }
        let handle = self
            .symbol_scans
            .submit(move |cancel| LibrarySnapshot::build(&roots, cancel));
        Some(handle.generation)
    }

    pub async fn request_footprint_scan(&mut self) -> Option<u64> {
        let settings = self.ctx.settings().await;
        let roots = settings.footprint_roots();
        if roots.is_empty() {
            debug!("No footprint roots configured, skipping scan");
            return None;
        }
        let resolver = settings.resolver();
        let handle = self.footprint_scans.submit(move |cancel| {
            FootprintSnapshot::build(&roots, &[], &resolver, cancel)
        });
        Some(handle.generation)
    }

    /// Queue a BOM build for `project` from its main schematic and stored prices.
    pub async fn request_bom(&mut self, project: &str) -> Result<u64> {
        let (schematic, pricing) = {
            let registry = self.ctx.registry().await;
            let schematic = registry
                .main_schematic_path(project)
                .ok_or_else(|| anyhow!("Project '{}' has no main schematic", project))?;
            let pricing = registry
                .find(project)
                .map(|p| p.bom_pricing.clone())
                .unwrap_or_default();
            (schematic, pricing)
        };
        let name = project.to_string();
        let handle = self.boms.submit(move |cancel| {
            let hierarchy = parse_schematic(&schematic)?;
            cancel.check()?;
            Ok((name, generate_bom(&hierarchy, &pricing)))
        });
        Ok(handle.generation)
    }

    /// Back up every due category (all enabled ones when `force`), then
    /// persist the advanced `last_run` stamps.
    pub async fn backup_tick(&self, now: NaiveDateTime, force: bool) -> Result<Vec<BackupRun>> {
        let (mut config, sources, root) = {
            let registry = self.ctx.registry().await;
            let settings = registry.settings();
            let file = registry.store().path();
            (
                settings.backup.clone(),
                settings.backup_sources(file),
                settings.backup_root(file),
            )
        };

        let (runs, config) = tokio::task::spawn_blocking(move || {
            let runs = BackupScheduler::new(root).perform_backup(&mut config, &sources, now, force);
            (runs, config)
        })
        .await
        .context("Backup task panicked")?;

        let created = runs
            .iter()
            .any(|r| matches!(r.status, BackupStatus::Created(_)));
        let failed = runs
            .iter()
            .any(|r| matches!(r.status, BackupStatus::Failed(_)));

        if created {
            let mut registry = self.ctx.registry().await;
            for category in Category::ALL {
                registry.settings_mut().backup.category_mut(category).last_run =
                    config.category(category).last_run.clone();
            }
            registry.save().context("Failed to save backup timestamps")?;
        }
        if created || failed {
            self.ctx.emit(AppEvent::backup_finished(&runs));
        }
        Ok(runs)
    }

    /// Wait for one job result or library change and act on it. Returns
    /// `false` once nothing can make progress any more.
    pub async fn handle_next(&mut self) -> bool {
        let next = tokio::select! {
            Some(tagged) = self.symbol_scans.next() => Next::Symbols(tagged),
            Some(tagged) = self.footprint_scans.next() => Next::Footprints(tagged),
            Some(tagged) = self.boms.next() => Next::Bom(tagged),
            change = self.changes.recv() => Next::Change(change),
            else => Next::Idle,
        };

        match next {
            Next::Symbols(Tagged { generation, result }) => match result {
                Ok((snapshot, report)) => {
                    info!(
                        "Indexed {} parts in {} libraries",
                        report.parts, report.libraries
                    );
                    self.ctx.library.replace(snapshot);
                    self.ctx.emit(AppEvent::SymbolsIndexed {
                        generation,
                        summary: ScanSummary::from(&report),
                    });
                }
                Err(e) => self.failed(TaskKind::SymbolScan, generation, e),
            },
            Next::Footprints(Tagged { generation, result }) => match result {
                Ok((snapshot, report)) => {
                    info!(
                        "Indexed {} footprints in {} libraries",
                        report.parts, report.libraries
                    );
                    self.ctx.footprints.replace(snapshot);
                    self.ctx.emit(AppEvent::FootprintsIndexed {
                        generation,
                        summary: ScanSummary::from(&report),
                    });
                }
                Err(e) => self.failed(TaskKind::FootprintScan, generation, e),
            },
            Next::Bom(Tagged { generation, result }) => match result {
                Ok((project, report)) => self.ctx.emit(AppEvent::BomReady {
                    generation,
                    project,
                    report,
                }),
                Err(e) => self.failed(TaskKind::Bom, generation, e),
            },
            Next::Change(Ok(change)) => self.on_change(change).await,
            Next::Change(Err(RecvError::Lagged(missed))) => {
                warn!("Missed {} library changes, rescanning everything", missed);
                self.request_symbol_scan().await;
                self.request_footprint_scan().await;
            }
            Next::Change(Err(RecvError::Closed)) | Next::Idle => return false,
        }
        true
    }

    async fn on_change(&mut self, change: LibraryChange) {
        self.ctx.emit(AppEvent::LibraryChanged {
            path: change.path.clone(),
            kind: change.kind,
        });
        match change.kind {
            ChangeKind::Symbols => {
                self.request_symbol_scan().await;
            }
            ChangeKind::Footprints | ChangeKind::LibTable => {
                self.request_footprint_scan().await;
            }
        }
    }

    fn failed(&self, task: TaskKind, generation: u64, error: HubError) {
        if matches!(error, HubError::Cancelled) {
            debug!("{:?} generation {} cancelled", task, generation);
            return;
        }
        warn!("{:?} generation {} failed: {}", task, generation, error);
        self.ctx.emit(AppEvent::TaskFailed {
            task,
            generation,
            message: error.to_string(),
        });
    }

    /// Drive the session until `shutdown` resolves, ticking backups every
    /// [`Host::BACKUP_TICK`].
    pub async fn run_until<F: Future>(mut self, shutdown: F) -> Result<()> {
        let start = tokio::time::Instant::now() + Self::BACKUP_TICK;
        let mut tick = tokio::time::interval_at(start, Self::BACKUP_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            let step = tokio::select! {
                biased;
                _ = &mut shutdown => Step::Shutdown,
                _ = tick.tick() => Step::Tick,
                progressed = self.handle_next() => Step::Handled(progressed),
            };
            match step {
                Step::Shutdown => break,
                Step::Tick => {
                    if let Err(e) = self.backup_tick(Local::now().naive_local(), false).await {
                        warn!("Scheduled backup failed: {:#}", e);
                    }
                }
                Step::Handled(true) => {}
                Step::Handled(false) => {
                    (&mut shutdown).await;
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Stop background work and take the exit backup if configured.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down");
        self.symbol_scans.cancel();
        self.footprint_scans.cancel();
        self.boms.cancel();
        self.watcher.unwatch();

        let on_exit = self.ctx.settings().await.backup.backup_on_exit;
        if on_exit {
            self.backup_tick(Local::now().naive_local(), true).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kicadhub::{ProjectRegistry, Settings, SettingsStore};
    use tempfile::TempDir;

    const LIBRARY: &str = r#"(kicad_symbol_lib (version 20231120) (generator kicad_symbol_editor)
  (symbol "R_10k" (property "Reference" "R") (property "Value" "10k") (property "MPN" "RC0603"))
  (symbol "R_1k" (property "Reference" "R") (property "Value" "1k") (property "MPN" "RC0603-1K"))
)
"#;

    fn context(dir: &TempDir, settings: Settings) -> Arc<AppContext> {
        let store = SettingsStore::new(dir.path().join("settings.json"));
        store.save(&settings).unwrap();
        Arc::new(AppContext::new(ProjectRegistry::with_settings(store, settings)))
    }

    fn library_settings(dir: &TempDir) -> Settings {
        let symbols = dir.path().join("symbols");
        std::fs::create_dir_all(&symbols).unwrap();
        std::fs::write(symbols.join("Device.kicad_sym"), LIBRARY).unwrap();
        Settings {
            symbol_path: symbols.to_string_lossy().into_owned(),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_symbol_scan_publishes_snapshot() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, library_settings(&dir));
        let mut events = ctx.subscribe();
        let mut host = Host::new(ctx.clone());

        let generation = host.request_symbol_scan().await.unwrap();
        assert!(host.handle_next().await);

        assert_eq!(ctx.library.len(), 2);
        match events.recv().await.unwrap() {
            AppEvent::SymbolsIndexed { generation: g, summary } => {
                assert_eq!(g, generation);
                assert_eq!(summary.parts, 2);
                assert_eq!(summary.libraries, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_roots_skips_scan() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Settings::default());
        let mut host = Host::new(ctx);

        assert_eq!(host.request_symbol_scan().await, None);
        assert_eq!(host.request_footprint_scan().await, None);
    }

    #[tokio::test]
    async fn test_missing_root_reports_failure() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            symbol_path: dir.path().join("gone").to_string_lossy().into_owned(),
            ..Settings::default()
        };
        let ctx = context(&dir, settings);
        let mut events = ctx.subscribe();
        let mut host = Host::new(ctx.clone());

        host.request_symbol_scan().await.unwrap();
        assert!(host.handle_next().await);

        match events.recv().await.unwrap() {
            AppEvent::TaskFailed { task, .. } => assert_eq!(task, TaskKind::SymbolScan),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(ctx.library.is_empty());
    }

    #[tokio::test]
    async fn test_bom_request_needs_schematic() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Settings::default());
        let mut host = Host::new(ctx);

        assert!(host.request_bom("Nowhere").await.is_err());
    }

    #[tokio::test]
    async fn test_bom_request_emits_report() {
        let dir = TempDir::new().unwrap();
        let schematic = dir.path().join("board.kicad_sch");
        std::fs::write(
            &schematic,
            "(kicad_sch (uuid \"r\")\n  (symbol (lib_id \"Device:R\") (property \"Reference\" \"R1\") (property \"Value\" \"10k\") (property \"Footprint\" \"0603\"))\n  (symbol (lib_id \"Device:R\") (property \"Reference\" \"R2\") (property \"Value\" \"10k\") (property \"Footprint\" \"0603\")))\n",
        )
        .unwrap();
        let ctx = context(&dir, Settings::default());
        {
            let mut registry = ctx.registry().await;
            registry.get("Board");
            registry
                .set_main_schematic("Board", &schematic.to_string_lossy())
                .unwrap();
        }
        let mut events = ctx.subscribe();
        let mut host = Host::new(ctx);

        host.request_bom("Board").await.unwrap();
        assert!(host.handle_next().await);

        match events.recv().await.unwrap() {
            AppEvent::BomReady { project, report, .. } => {
                assert_eq!(project, "Board");
                assert_eq!(report.rows.len(), 1);
                assert_eq!(report.total_qty(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backup_tick_advances_last_run() {
        let dir = TempDir::new().unwrap();
        let mut settings = library_settings(&dir);
        settings.backup.path = dir.path().join("backups").to_string_lossy().into_owned();
        let ctx = context(&dir, settings);
        let host = Host::new(ctx.clone());

        let now = NaiveDateTime::parse_from_str("2025-01-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let runs = host.backup_tick(now, false).await.unwrap();
        assert!(runs.iter().any(|r| r.category == Category::Symbols
            && matches!(r.status, BackupStatus::Created(_))));

        let saved = SettingsStore::new(ctx.settings_path()).load().unwrap();
        assert_eq!(
            saved.backup.symbols.last_run.as_deref(),
            Some("2025-01-01 10:00:00")
        );
        assert!(dir.path().join("backups").join("symbols").is_dir());

        // nothing due ten minutes later
        let later = now + chrono::Duration::minutes(10);
        let runs = host.backup_tick(later, false).await.unwrap();
        assert!(runs.iter().all(|r| !matches!(r.status, BackupStatus::Created(_))));
    }

    #[tokio::test]
    async fn test_shutdown_without_exit_backup() {
        let dir = TempDir::new().unwrap();
        let mut settings = library_settings(&dir);
        settings.backup.path = dir.path().join("backups").to_string_lossy().into_owned();
        settings.backup.backup_on_exit = false;
        let ctx = context(&dir, settings);
        let host = Host::new(ctx);

        host.run_until(async {}).await.unwrap();
        assert!(!dir.path().join("backups").exists());
    }
}
