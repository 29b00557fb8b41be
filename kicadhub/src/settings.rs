//! Persistent settings document.
//!
//! One JSON file holds library roots, rules, project records, templates and
//! backup configuration. Known keys are typed; anything else is carried in
//! `extra` and written back unchanged. Saves go through a temp file and a
//! rename so a crash mid-write leaves the previous file intact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::backup::{read_snapshot_file, BackupConfig, BackupScheduler, BackupSources, Category};
use crate::core::{temp_path, write_atomic, HubError, Result};
use crate::paths::PathResolver;
use crate::projects::model::{ChecklistSection, GitRepoEntry, ProjectRecord, Task, TimeEntry};
use crate::rules::config::{Exemptions, RulesConfig};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schema_version: u32,
    /// `;`-joined symbol library roots.
    pub symbol_path: String,
    /// `;`-joined footprint library roots.
    pub footprint_path: String,
    /// Base for `${BASE_DIR}`.
    pub path_root: String,
    pub external_tools: ExternalTools,
    pub projects: Vec<String>,
    pub project_registry: BTreeMap<String, ProjectRecord>,
    pub global_rules: BTreeMap<String, String>,
    pub library_rules: BTreeMap<String, BTreeMap<String, String>>,
    pub exemptions: Exemptions,
    pub checklist_templates: BTreeMap<String, ChecklistSection>,
    pub kanban_templates: BTreeMap<String, Vec<Task>>,
    pub kanban_categories: Vec<String>,
    /// Task category → lanes it may be moved into.
    pub category_restrictions: BTreeMap<String, Vec<String>>,
    pub kanban_priority_weights: BTreeMap<String, f64>,
    pub backup: BackupConfig,
    pub project_statuses: Vec<String>,
    pub time_entries: Vec<TimeEntry>,
    pub time_task_library: Vec<String>,
    pub library_git_roots: Vec<String>,
    pub library_git_notes: BTreeMap<String, String>,
    pub manual_git_repos: Vec<GitRepoEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalTools {
    pub editor: String,
    pub kicad: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        let lanes = ["backlog", "in_progress", "review", "done"];
        Self {
            schema_version: SCHEMA_VERSION,
            symbol_path: String::new(),
            footprint_path: String::new(),
            path_root: String::new(),
            external_tools: ExternalTools::default(),
            projects: Vec::new(),
            project_registry: BTreeMap::new(),
            global_rules: BTreeMap::new(),
            library_rules: BTreeMap::new(),
            exemptions: Exemptions::default(),
            checklist_templates: BTreeMap::new(),
            kanban_templates: lanes.iter().map(|l| (l.to_string(), Vec::new())).collect(),
            kanban_categories: vec!["Schematic".into(), "Layout".into(), "Firmware".into(), "Test".into()],
            category_restrictions: BTreeMap::new(),
            kanban_priority_weights: BTreeMap::from([
                ("Low".to_string(), 1.0),
                ("Medium".to_string(), 2.0),
                ("High".to_string(), 3.0),
            ]),
            backup: BackupConfig::default(),
            project_statuses: ["Planning", "Active", "On Hold", "Completed", "Archived"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            time_entries: Vec::new(),
            time_task_library: Vec::new(),
            library_git_roots: Vec::new(),
            library_git_notes: BTreeMap::new(),
            manual_git_repos: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl Settings {
    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(&self.path_root)
    }

    pub fn symbol_roots(&self) -> Vec<PathBuf> {
        self.resolver()
            .resolve_list(&self.symbol_path)
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }

    pub fn footprint_roots(&self) -> Vec<PathBuf> {
        self.resolver()
            .resolve_list(&self.footprint_path)
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }

    pub fn rules_config(&self) -> RulesConfig {
        RulesConfig {
            global_rules: self.global_rules.clone(),
            library_rules: self.library_rules.clone(),
            exemptions: self.exemptions.clone(),
        }
    }

    pub fn set_rules_config(&mut self, config: RulesConfig) {
        self.global_rules = config.global_rules;
        self.library_rules = config.library_rules;
        self.exemptions = config.exemptions;
    }

    /// `backup.path` resolved, or `backups/` beside the settings file.
    pub fn backup_root(&self, settings_file: &Path) -> PathBuf {
        let configured = self.resolver().resolve(&self.backup.path);
        if !configured.is_empty() {
            return PathBuf::from(configured);
        }
        settings_file
            .parent()
            .map(|dir| dir.join("backups"))
            .unwrap_or_else(|| PathBuf::from("backups"))
    }

    /// What each backup category captures.
    pub fn backup_sources(&self, settings_file: &Path) -> BackupSources {
        BackupSources {
            app_data: vec![settings_file.to_path_buf()],
            symbols: self.symbol_roots(),
            footprints: self.footprint_roots(),
        }
    }
}

/// Bring an older document up to [`SCHEMA_VERSION`].
fn migrate(doc: &mut Value) {
    let Some(obj) = doc.as_object_mut() else {
        return;
    };
    let version = obj.get("schema_version").and_then(Value::as_u64).unwrap_or(0);
    if version < 1 {
        // Unversioned files sometimes stored root lists as arrays.
        for key in ["symbol_path", "footprint_path"] {
            if let Some(Value::Array(items)) = obj.get(key) {
                let joined = items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(";");
                obj.insert(key.to_string(), Value::String(joined));
            }
        }
        debug!("Migrated settings from schema version {} to 1", version);
    }
    obj.insert("schema_version".into(), Value::from(SCHEMA_VERSION));
}

/// Where a loaded [`Settings`] came from.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsSource {
    File,
    Backup(PathBuf),
    Defaults,
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/kicadhub/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("kicadhub").join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, filling defaults for missing keys. A missing file
    /// yields defaults. A temp file left by an interrupted save is removed.
    pub fn load(&self) -> Result<Settings> {
        let tmp = temp_path(&self.path);
        if tmp.exists() {
            warn!("Removing stale temp file {}", tmp.display());
            fs::remove_file(&tmp)?;
        }
        if !self.path.exists() {
            debug!("No settings at {}, using defaults", self.path.display());
            return Ok(Settings::default());
        }
        let content = fs::read_to_string(&self.path)?;
        parse_settings(&content)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        write_atomic(&self.path, json.as_bytes())?;
        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }

    /// Load, or fall back to the newest `app_data` snapshot under
    /// `backup_root` that holds this file, or to defaults. An unreadable file
    /// is kept beside the original as `.corrupt`.
    pub fn load_or_recover(&self, backup_root: Option<&Path>) -> (Settings, SettingsSource) {
        let error = match self.load() {
            Ok(settings) => return (settings, SettingsSource::File),
            Err(e) => e,
        };
        warn!("Settings at {} unreadable: {}", self.path.display(), error);
        let corrupt = self.path.with_extension("json.corrupt");
        if let Err(e) = fs::rename(&self.path, &corrupt) {
            warn!("Could not set aside {}: {}", self.path.display(), e);
        }

        if let Some(root) = backup_root {
            match self.recover_from(root) {
                Ok(Some((settings, snapshot))) => {
                    info!("Recovered settings from {}", snapshot.display());
                    return (settings, SettingsSource::Backup(snapshot));
                }
                Ok(None) => {}
                Err(e) => warn!("Settings recovery failed: {}", e),
            }
        }
        warn!("Starting with default settings; previous settings could not be loaded");
        (Settings::default(), SettingsSource::Defaults)
    }

    fn recover_from(&self, backup_root: &Path) -> Result<Option<(Settings, PathBuf)>> {
        let scheduler = BackupScheduler::new(backup_root);
        for snapshot in scheduler.list_snapshots(Category::AppData)?.into_iter().rev() {
            let Some(bytes) = read_snapshot_file(&snapshot.path, &self.path)? else {
                continue;
            };
            let content = String::from_utf8(bytes).map_err(|e| HubError::Other(e.to_string()))?;
            match parse_settings(&content) {
                Ok(settings) => {
                    self.save(&settings)?;
                    return Ok(Some((settings, snapshot.path)));
                }
                Err(e) => warn!("Snapshot {} unusable: {}", snapshot.name, e),
            }
        }
        Ok(None)
    }
}

/// Only malformed JSON or a non-object root is an error. A well-formed
/// document with a value of the wrong shape loses just that key (or that
/// project) and loads the rest.
fn parse_settings(content: &str) -> Result<Settings> {
    let mut doc: Value = serde_json::from_str(content)?;
    migrate(&mut doc);
    let error = match Settings::deserialize(&doc) {
        Ok(settings) => return Ok(settings),
        Err(e) => e,
    };
    let Value::Object(map) = doc else {
        return Err(error.into());
    };
    warn!("Settings do not match the expected shape ({}); loading what fits", error);

    let mut kept = Map::new();
    for (key, value) in map {
        let value = if key == "project_registry" {
            salvage_projects(value)
        } else {
            value
        };
        let single = Value::Object(Map::from_iter([(key.clone(), value.clone())]));
        match Settings::deserialize(&single) {
            Ok(_) => {
                kept.insert(key, value);
            }
            Err(e) => warn!("Ignoring settings key '{}': {}", key, e),
        }
    }
    Ok(Settings::deserialize(&Value::Object(kept))?)
}

fn salvage_projects(value: Value) -> Value {
    let Value::Object(projects) = value else {
        return value;
    };
    let kept = projects
        .into_iter()
        .filter(|(name, record)| match ProjectRecord::deserialize(record) {
            Ok(_) => true,
            Err(e) => {
                warn!("Ignoring project '{}': {}", name, e);
                false
            }
        })
        .collect();
    Value::Object(kept)
}
