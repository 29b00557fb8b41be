//! Project records and the settings document they live in.
//!
//! The registry owns the in-memory [`Settings`]; every mutation goes through
//! it and [`ProjectRegistry::save`] is the only path back to disk.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::backup::TIMESTAMP_FORMAT;
use crate::core::{HubError, PathError, Result};
use crate::parser::schematic::SchematicHierarchy;
use crate::projects::model::{pricing_key, GitRepoEntry, ProjectRecord, StructureCache, TimeEntry};
use crate::settings::{Settings, SettingsStore};

pub const ARCHIVED_STATUS: &str = "Archived";

pub struct ProjectRegistry {
    store: SettingsStore,
    settings: Settings,
}

fn not_found(name: &str) -> HubError {
    HubError::Project(format!("project '{}' not found", name))
}

impl ProjectRegistry {
    pub fn open(store: SettingsStore) -> Result<Self> {
        let settings = store.load()?;
        Ok(Self::with_settings(store, settings))
    }

    pub fn with_settings(store: SettingsStore, settings: Settings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    /// Project names in the user's order.
    pub fn names(&self) -> &[String] {
        &self.settings.projects
    }

    pub fn find(&self, name: &str) -> Option<&ProjectRecord> {
        self.settings.project_registry.get(name)
    }

    fn find_mut(&mut self, name: &str) -> Result<&mut ProjectRecord> {
        self.settings
            .project_registry
            .get_mut(name)
            .ok_or_else(|| not_found(name))
    }

    /// The record for `name`, created from the templates if absent.
    pub fn get(&mut self, name: &str) -> &mut ProjectRecord {
        if !self.settings.project_registry.contains_key(name) {
            let record = self.seeded_record();
            self.settings.project_registry.insert(name.to_string(), record);
            debug!("Created project record '{}'", name);
        }
        if !self.settings.projects.iter().any(|p| p == name) {
            self.settings.projects.push(name.to_string());
        }
        self.settings
            .project_registry
            .entry(name.to_string())
            .or_default()
    }

    fn seeded_record(&self) -> ProjectRecord {
        let mut record = ProjectRecord {
            kanban: self.settings.kanban_templates.clone(),
            checklist: self.settings.checklist_templates.clone(),
            ..Default::default()
        };
        record.kanban_limits = record.kanban.keys().map(|lane| (lane.clone(), 0)).collect();
        record.metadata.status = self
            .settings
            .project_statuses
            .first()
            .cloned()
            .unwrap_or_else(|| "Planning".to_string());
        record
    }

    pub fn save(&self) -> Result<()> {
        self.store.save(&self.settings)
    }

    /// Deep copy `src` to a new project `dst`.
    pub fn clone_project(&mut self, src: &str, dst: &str) -> Result<()> {
        if self.find(dst).is_some() {
            return Err(HubError::Project(format!("project '{}' already exists", dst)));
        }
        let mut record = self.find(src).cloned().ok_or_else(|| not_found(src))?;
        record.metadata.pinned = false;
        *self.get(dst) = record;
        info!("Cloned project '{}' to '{}'", src, dst);
        Ok(())
    }

    pub fn archive(&mut self, name: &str) -> Result<()> {
        self.find_mut(name)?.metadata.status = ARCHIVED_STATUS.to_string();
        Ok(())
    }

    /// Flip the pinned flag; returns the new value.
    pub fn toggle_pin(&mut self, name: &str) -> Result<bool> {
        let metadata = &mut self.find_mut(name)?.metadata;
        metadata.pinned = !metadata.pinned;
        Ok(metadata.pinned)
    }

    /// Point the project at its root schematic. The path must name an
    /// existing file; it is stored relative to `${BASE_DIR}` when possible.
    pub fn set_main_schematic(&mut self, name: &str, path: &str) -> Result<()> {
        let resolver = self.settings.resolver();
        let resolved = resolver.resolve(path);
        if resolved.is_empty() || !Path::new(&resolved).is_file() {
            return Err(PathError::MissingFile(path.to_string()).into());
        }
        let stored = resolver.relativize(&resolved);
        self.find_mut(name)?.metadata.main_schematic = stored;
        Ok(())
    }

    /// Absolute path of the project's main schematic, if one is set.
    pub fn main_schematic_path(&self, name: &str) -> Option<PathBuf> {
        let stored = &self.find(name)?.metadata.main_schematic;
        if stored.is_empty() {
            return None;
        }
        Some(PathBuf::from(self.settings.resolver().resolve(stored)))
    }

    pub fn add_manual_git_repo(&mut self, name: &str, path: &str) -> Result<()> {
        let resolver = self.settings.resolver();
        let resolved = resolver.resolve(path);
        if resolved.is_empty() || !Path::new(&resolved).is_dir() {
            return Err(PathError::MissingRoot(path.to_string()).into());
        }
        let stored = resolver.relativize(&resolved);
        let repos = &mut self.settings.manual_git_repos;
        match repos.iter_mut().find(|r| resolver.resolve(&r.path) == resolved) {
            Some(existing) => existing.name = name.to_string(),
            None => repos.push(GitRepoEntry {
                name: name.to_string(),
                path: stored,
            }),
        }
        Ok(())
    }

    /// Returns whether a repo with that path was listed.
    pub fn remove_manual_git_repo(&mut self, path: &str) -> bool {
        let resolver = self.settings.resolver();
        let target = resolver.resolve(path);
        let repos = &mut self.settings.manual_git_repos;
        let before = repos.len();
        repos.retain(|r| resolver.resolve(&r.path) != target);
        repos.len() != before
    }

    pub fn delete(&mut self, name: &str) -> Result<ProjectRecord> {
        let record = self
            .settings
            .project_registry
            .remove(name)
            .ok_or_else(|| not_found(name))?;
        self.settings.projects.retain(|p| p != name);
        Ok(record)
    }

    /// Rename keeping the position in the project list.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return Ok(());
        }
        if self.find(new).is_some() {
            return Err(HubError::Project(format!("project '{}' already exists", new)));
        }
        let record = self
            .settings
            .project_registry
            .remove(old)
            .ok_or_else(|| not_found(old))?;
        self.settings.project_registry.insert(new.to_string(), record);
        for entry in self.settings.projects.iter_mut().filter(|p| *p == old) {
            *entry = new.to_string();
        }
        Ok(())
    }

    /// Record that the project was opened at `now`.
    pub fn touch(&mut self, name: &str, now: NaiveDateTime) -> Result<()> {
        self.find_mut(name)?.metadata.last_accessed = Some(now.format(TIMESTAMP_FORMAT).to_string());
        Ok(())
    }

    pub fn set_bom_price(&mut self, name: &str, value: &str, footprint: &str, price: f64) -> Result<()> {
        self.find_mut(name)?
            .bom_pricing
            .insert(pricing_key(value, footprint), price);
        Ok(())
    }

    pub fn cache_structure(&mut self, name: &str, hierarchy: &SchematicHierarchy) -> Result<()> {
        let cache = StructureCache {
            tree: hierarchy.to_tree(),
            part_count: hierarchy.instances().len(),
        };
        self.find_mut(name)?.structure = Some(cache);
        Ok(())
    }

    /// Move the task at `index` in lane `from` to the end of lane `to`. Lane
    /// limits and category restrictions are enforced.
    pub fn move_task(&mut self, name: &str, from: &str, index: usize, to: &str) -> Result<()> {
        let restrictions = self.settings.category_restrictions.clone();
        let record = self.find_mut(name)?;

        let category = record
            .kanban
            .get(from)
            .and_then(|lane| lane.get(index))
            .map(|task| task.category.clone())
            .ok_or_else(|| HubError::Project(format!("no task {} in lane '{}'", index, from)))?;
        if !record.kanban.contains_key(to) {
            return Err(HubError::Project(format!("unknown lane '{}'", to)));
        }
        if from == to {
            return Ok(());
        }
        if let Some(allowed) = restrictions.get(&category) {
            if !allowed.iter().any(|lane| lane == to) {
                return Err(HubError::Project(format!(
                    "'{}' tasks cannot move to '{}'",
                    category, to
                )));
            }
        }
        let limit = record.kanban_limits.get(to).copied().unwrap_or(0);
        let occupied = record.kanban.get(to).map(Vec::len).unwrap_or(0);
        if limit > 0 && occupied >= limit {
            return Err(HubError::Project(format!("lane '{}' is full (limit {})", to, limit)));
        }

        let task = record
            .kanban
            .get_mut(from)
            .map(|lane| lane.remove(index))
            .ok_or_else(|| HubError::Project(format!("unknown lane '{}'", from)))?;
        record.kanban.entry(to.to_string()).or_default().push(task);
        Ok(())
    }

    pub fn log_time(&mut self, name: &str, entry: TimeEntry) -> Result<()> {
        let record = self.find_mut(name)?;
        if !entry.task.is_empty() && !record.tasks.contains(&entry.task) {
            record.tasks.push(entry.task.clone());
        }
        record.time_entries.push(entry);
        Ok(())
    }

    /// Project names with pinned ones first, then most recently accessed.
    /// Ties keep list order.
    pub fn pinned_first(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.settings.projects.iter().map(String::as_str).collect();
        let key = |name: &str| {
            self.find(name)
                .map(|r| (r.metadata.pinned, r.metadata.last_accessed.clone()))
                .unwrap_or_default()
        };
        names.sort_by(|a, b| {
            let (pa, la) = key(a);
            let (pb, lb) = key(b);
            pb.cmp(&pa).then(lb.cmp(&la))
        });
        names
    }
}
