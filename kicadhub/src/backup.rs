//! Zip snapshots of app data and library trees, with retention and restore.
//!
//! Layout: `{root}/{category}/{YYYY-MM-DD_HH-MM-SS}.zip`. Each archive holds a
//! `manifest.json` naming the original location of every source and the
//! source contents under a numeric prefix (`0/…`, `1/…`). Archives are written
//! to a `.partial` file and renamed once complete.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::{HubError, PathError, Result};

/// Format of persisted `last_run` values.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SNAPSHOT_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    AppData,
    Symbols,
    Footprints,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::AppData, Category::Symbols, Category::Footprints];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::AppData => "app_data",
            Category::Symbols => "symbols",
            Category::Footprints => "footprints",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub enabled: bool,
    pub interval_min: u64,
    pub max_backups: usize,
    pub last_run: Option<String>,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_min: 24 * 60,
            max_backups: 10,
            last_run: None,
        }
    }
}

/// The `backup` settings block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub path: String,
    pub backup_on_exit: bool,
    pub app_data: CategoryConfig,
    pub symbols: CategoryConfig,
    pub footprints: CategoryConfig,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BackupConfig {
    pub fn category(&self, category: Category) -> &CategoryConfig {
        match category {
            Category::AppData => &self.app_data,
            Category::Symbols => &self.symbols,
            Category::Footprints => &self.footprints,
        }
    }

    pub fn category_mut(&mut self, category: Category) -> &mut CategoryConfig {
        match category {
            Category::AppData => &mut self.app_data,
            Category::Symbols => &mut self.symbols,
            Category::Footprints => &mut self.footprints,
        }
    }
}

/// Whether an enabled category's interval has elapsed since `last_run`.
/// A missing or unparsable `last_run` counts as never run.
pub fn is_due(config: &CategoryConfig, now: NaiveDateTime) -> bool {
    if !config.enabled {
        return false;
    }
    let Some(last) = config
        .last_run
        .as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok())
    else {
        return true;
    };
    now - last >= Duration::minutes(config.interval_min as i64)
}

/// Files and directories captured per category.
#[derive(Debug, Clone, Default)]
pub struct BackupSources {
    pub app_data: Vec<PathBuf>,
    pub symbols: Vec<PathBuf>,
    pub footprints: Vec<PathBuf>,
}

impl BackupSources {
    pub fn get(&self, category: Category) -> &[PathBuf] {
        match category {
            Category::AppData => &self.app_data,
            Category::Symbols => &self.symbols,
            Category::Footprints => &self.footprints,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackupStatus {
    Created(PathBuf),
    Disabled,
    NotDue,
    NoSources,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupRun {
    pub category: Category,
    pub status: BackupStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub name: String,
    pub path: PathBuf,
    #[serde(skip)]
    pub modified: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreReport {
    pub files_restored: usize,
    /// App data is loaded at startup, so restoring it takes a restart.
    pub restart_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    category: Category,
    created: String,
    roots: Vec<ManifestRoot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestRoot {
    prefix: String,
    path: PathBuf,
    is_file: bool,
}

pub struct BackupScheduler {
    root: PathBuf,
}

impl BackupScheduler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.as_str())
    }

    /// Snapshot every enabled category that is due (or all enabled ones when
    /// `force`). A failed category keeps its previous `last_run`.
    pub fn perform_backup(
        &self,
        config: &mut BackupConfig,
        sources: &BackupSources,
        now: NaiveDateTime,
        force: bool,
    ) -> Vec<BackupRun> {
        Category::ALL
            .into_iter()
            .map(|category| {
                let settings = config.category_mut(category);
                let status = if !settings.enabled {
                    BackupStatus::Disabled
                } else if !force && !is_due(settings, now) {
                    BackupStatus::NotDue
                } else if sources.get(category).is_empty() {
                    BackupStatus::NoSources
                } else {
                    match self.backup_category(category, settings, sources.get(category), now) {
                        Ok(path) => BackupStatus::Created(path),
                        Err(e) => {
                            warn!("Backup of {} failed: {}", category, e);
                            BackupStatus::Failed(e.to_string())
                        }
                    }
                };
                BackupRun { category, status }
            })
            .collect()
    }

    /// Write one snapshot, advance `last_run` and apply retention.
    pub fn backup_category(
        &self,
        category: Category,
        config: &mut CategoryConfig,
        sources: &[PathBuf],
        now: NaiveDateTime,
    ) -> Result<PathBuf> {
        let dir = self.category_dir(category);
        fs::create_dir_all(&dir)?;
        let target = unique_snapshot_path(&dir, &now.format(SNAPSHOT_FORMAT).to_string());
        let partial = target.with_extension("zip.partial");

        if let Err(e) = write_archive(&partial, category, sources, now) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        if let Err(e) = fs::rename(&partial, &target) {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }

        config.last_run = Some(now.format(TIMESTAMP_FORMAT).to_string());
        let evicted = self.enforce_retention(category, config.max_backups, &target)?;
        info!(
            "Backed up {} to {} ({} old snapshots removed)",
            category,
            target.display(),
            evicted.len()
        );
        Ok(target)
    }

    /// Snapshots oldest first, by modification time then name.
    pub fn list_snapshots(&self, category: Category) -> Result<Vec<Snapshot>> {
        let dir = self.category_dir(category);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() || path.extension().and_then(|s| s.to_str()) != Some("zip") {
                continue;
            }
            snapshots.push(Snapshot {
                name: entry.file_name().to_string_lossy().to_string(),
                modified: entry.metadata()?.modified()?,
                path,
            });
        }
        snapshots.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(snapshots)
    }

    fn enforce_retention(&self, category: Category, max_backups: usize, keep: &Path) -> Result<Vec<PathBuf>> {
        let max = max_backups.max(1);
        let mut snapshots = self.list_snapshots(category)?;
        let mut evicted = Vec::new();
        while snapshots.len() > max {
            let Some(pos) = snapshots.iter().position(|s| s.path != keep) else {
                break;
            };
            let oldest = snapshots.remove(pos);
            fs::remove_file(&oldest.path)?;
            evicted.push(oldest.path);
        }
        Ok(evicted)
    }

    /// Extract a snapshot over its original locations. `timestamp` is the
    /// snapshot name with or without `.zip`.
    pub fn restore(&self, category: Category, timestamp: &str) -> Result<RestoreReport> {
        let path = self.snapshot_path(category, timestamp)?;
        if !path.is_file() {
            return Err(PathError::MissingFile(path.display().to_string()).into());
        }
        let mut archive = ZipArchive::new(File::open(&path)?)?;
        let manifest = read_manifest(&mut archive)?;

        let mut files_restored = 0;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            if name == MANIFEST || entry.is_dir() {
                continue;
            }
            let Some(target) = manifest_target(&manifest, &name) else {
                warn!("Skipping unexpected entry {} in {}", name, path.display());
                continue;
            };
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
            files_restored += 1;
        }

        info!("Restored {} files from {}", files_restored, path.display());
        Ok(RestoreReport {
            files_restored,
            restart_required: category == Category::AppData,
        })
    }

    /// Snapshot names are plain file names inside the category directory.
    fn snapshot_path(&self, category: Category, timestamp: &str) -> Result<PathBuf> {
        let plain = !timestamp.is_empty()
            && !timestamp.contains(['/', '\\'])
            && timestamp != "."
            && !timestamp.contains("..")
            && Path::new(timestamp).is_relative();
        if !plain {
            return Err(PathError::InvalidName(timestamp.to_string()).into());
        }
        let name = if timestamp.ends_with(".zip") {
            timestamp.to_string()
        } else {
            format!("{}.zip", timestamp)
        };
        Ok(self.category_dir(category).join(name))
    }
}

/// Contents of one backed-up file, located by its original path.
pub fn read_snapshot_file(snapshot: &Path, original: &Path) -> Result<Option<Vec<u8>>> {
    let mut archive = ZipArchive::new(File::open(snapshot)?)?;
    let manifest = read_manifest(&mut archive)?;
    let Some(root) = manifest.roots.iter().find(|r| r.is_file && r.path == original) else {
        return Ok(None);
    };
    let file_name = original
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut entry = archive.by_name(&format!("{}/{}", root.prefix, file_name))?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(Some(data))
}

fn unique_snapshot_path(dir: &Path, stem: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{}.zip", stem));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}.zip", stem, n));
        n += 1;
    }
    candidate
}

fn write_archive(path: &Path, category: Category, sources: &[PathBuf], now: NaiveDateTime) -> Result<()> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(File::create(path)?);

    let mut roots = Vec::new();
    for (i, source) in sources.iter().enumerate() {
        let prefix = i.to_string();
        if source.is_file() {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            zip.start_file(format!("{}/{}", prefix, name), options)?;
            io::copy(&mut File::open(source)?, &mut zip)?;
        } else if source.is_dir() {
            for entry in WalkDir::new(source).sort_by_file_name() {
                let entry = entry.map_err(|e| HubError::Other(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(source)
                    .map_err(|e| HubError::Other(e.to_string()))?;
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                zip.start_file(format!("{}/{}", prefix, rel), options)?;
                io::copy(&mut File::open(entry.path())?, &mut zip)?;
            }
        } else {
            return Err(PathError::MissingRoot(source.display().to_string()).into());
        }
        roots.push(ManifestRoot {
            prefix,
            path: source.clone(),
            is_file: source.is_file(),
        });
    }

    let manifest = Manifest {
        category,
        created: now.format(TIMESTAMP_FORMAT).to_string(),
        roots,
    };
    zip.start_file(MANIFEST, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    zip.finish()?.sync_all()?;
    Ok(())
}

fn read_manifest(archive: &mut ZipArchive<File>) -> Result<Manifest> {
    let entry = archive.by_name(MANIFEST)?;
    Ok(serde_json::from_reader(entry)?)
}

/// Where an archive entry goes on restore. Entries that would escape their
/// root are rejected.
fn manifest_target(manifest: &Manifest, name: &str) -> Option<PathBuf> {
    let (prefix, rest) = name.split_once('/')?;
    let root = manifest.roots.iter().find(|r| r.prefix == prefix)?;
    if root.is_file {
        return Some(root.path.clone());
    }
    let rel = Path::new(rest);
    if rel.components().all(|c| matches!(c, Component::Normal(_))) {
        Some(root.path.join(rel))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_is_due() {
        let mut config = CategoryConfig {
            interval_min: 60,
            ..Default::default()
        };
        assert!(is_due(&config, at(10, 0)));
        config.last_run = Some("2025-01-01 09:30:00".into());
        assert!(!is_due(&config, at(10, 0)));
        assert!(is_due(&config, at(10, 30)));
        config.enabled = false;
        assert!(!is_due(&config, at(12, 0)));
    }

    #[test]
    fn test_not_due_is_skipped_unless_forced() {
        let data = TempDir::new().unwrap();
        let settings = data.path().join("settings.json");
        std::fs::write(&settings, "{}").unwrap();
        let backups = TempDir::new().unwrap();
        let scheduler = BackupScheduler::new(backups.path());
        let mut config = BackupConfig::default();
        config.app_data.last_run = Some("2025-01-01 09:59:00".into());
        let sources = BackupSources {
            app_data: vec![settings],
            ..Default::default()
        };

        let runs = scheduler.perform_backup(&mut config, &sources, at(10, 0), false);
        assert_eq!(runs[0].status, BackupStatus::NotDue);
        assert_eq!(runs[1].status, BackupStatus::NoSources);

        let runs = scheduler.perform_backup(&mut config, &sources, at(10, 0), true);
        assert!(matches!(runs[0].status, BackupStatus::Created(_)));
        assert_eq!(config.app_data.last_run.as_deref(), Some("2025-01-01 10:00:00"));
    }

    #[test]
    fn test_failure_keeps_last_run_and_leaves_no_partial() {
        let backups = TempDir::new().unwrap();
        let scheduler = BackupScheduler::new(backups.path());
        let mut config = CategoryConfig::default();
        let missing = vec![PathBuf::from("/no/such/library/root")];

        let result = scheduler.backup_category(Category::Symbols, &mut config, &missing, at(10, 0));
        assert!(result.is_err());
        assert_eq!(config.last_run, None);
        let leftovers: Vec<_> = std::fs::read_dir(scheduler.category_dir(Category::Symbols))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_same_second_snapshots_do_not_collide() {
        let lib = TempDir::new().unwrap();
        std::fs::write(lib.path().join("Device.kicad_sym"), "(kicad_symbol_lib)").unwrap();
        let backups = TempDir::new().unwrap();
        let scheduler = BackupScheduler::new(backups.path());
        let mut config = CategoryConfig::default();
        let sources = vec![lib.path().to_path_buf()];

        let a = scheduler.backup_category(Category::Symbols, &mut config, &sources, at(10, 0)).unwrap();
        let b = scheduler.backup_category(Category::Symbols, &mut config, &sources, at(10, 0)).unwrap();
        assert_ne!(a, b);
        assert!(b.to_string_lossy().ends_with("2025-01-01_10-00-00_1.zip"));
    }

    #[test]
    fn test_restore_round_trip() {
        let lib = TempDir::new().unwrap();
        std::fs::create_dir(lib.path().join("Conn.pretty")).unwrap();
        std::fs::write(lib.path().join("Conn.pretty/USB_C.kicad_mod"), "(footprint \"USB_C\")").unwrap();
        let backups = TempDir::new().unwrap();
        let scheduler = BackupScheduler::new(backups.path());
        let mut config = CategoryConfig::default();
        scheduler
            .backup_category(Category::Footprints, &mut config, &[lib.path().to_path_buf()], at(10, 0))
            .unwrap();

        std::fs::write(lib.path().join("Conn.pretty/USB_C.kicad_mod"), "garbage").unwrap();
        let report = scheduler.restore(Category::Footprints, "2025-01-01_10-00-00").unwrap();
        assert_eq!(report.files_restored, 1);
        assert!(!report.restart_required);
        assert_eq!(
            std::fs::read_to_string(lib.path().join("Conn.pretty/USB_C.kicad_mod")).unwrap(),
            "(footprint \"USB_C\")"
        );
        assert!(scheduler.restore(Category::Footprints, "1999-01-01_00-00-00").is_err());
    }

    #[test]
    fn test_restore_rejects_names_outside_category() {
        let backups = TempDir::new().unwrap();
        let scheduler = BackupScheduler::new(backups.path().join("bk"));
        // a real archive one level above the category directory
        std::fs::create_dir_all(backups.path().join("bk")).unwrap();
        std::fs::write(backups.path().join("bk").join("outside.zip"), "x").unwrap();

        for name in ["../outside", "../outside.zip", "../../x", "a/b", "a\\b", "..", "", "/tmp/x"] {
            assert!(
                matches!(
                    scheduler.restore(Category::Symbols, name),
                    Err(HubError::Path(PathError::InvalidName(_)))
                ),
                "{:?} accepted",
                name
            );
        }
    }

    #[test]
    fn test_read_snapshot_file() {
        let data = TempDir::new().unwrap();
        let settings = data.path().join("settings.json");
        std::fs::write(&settings, r#"{"projects":["A"]}"#).unwrap();
        let backups = TempDir::new().unwrap();
        let scheduler = BackupScheduler::new(backups.path());
        let snapshot = scheduler
            .backup_category(Category::AppData, &mut CategoryConfig::default(), &[settings.clone()], at(8, 0))
            .unwrap();

        let bytes = read_snapshot_file(&snapshot, &settings).unwrap().unwrap();
        assert_eq!(bytes, br#"{"projects":["A"]}"#);
        assert!(read_snapshot_file(&snapshot, Path::new("/elsewhere.json")).unwrap().is_none());
    }

    #[test]
    fn test_manifest_target_rejects_escape() {
        let manifest = Manifest {
            category: Category::Symbols,
            created: String::new(),
            roots: vec![ManifestRoot {
                prefix: "0".into(),
                path: PathBuf::from("/libs"),
                is_file: false,
            }],
        };
        assert_eq!(manifest_target(&manifest, "0/a/b.kicad_sym"), Some(PathBuf::from("/libs/a/b.kicad_sym")));
        assert_eq!(manifest_target(&manifest, "0/../etc/passwd"), None);
        assert_eq!(manifest_target(&manifest, "7/x"), None);
    }
}
