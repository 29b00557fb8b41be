//! Which projects use which library parts, and which parts use which
//! footprints.
//!
//! Tables are rebuilt wholesale; callers refresh after a library scan, a
//! project save, or on request.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::library::LibrarySnapshot;
use crate::parser::outcome::{Diagnostic, ParseOutcome};
use crate::parser::schematic::SchematicHierarchy;
use crate::projects::ProjectRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectUsage {
    pub project: String,
    /// Distinct reference designators placing the part.
    pub count: usize,
    pub last_touched: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FootprintUser {
    pub part_uid: String,
    /// `None` when no project places the part.
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrossReference {
    parts: BTreeMap<String, Vec<ProjectUsage>>,
    footprints: BTreeMap<String, Vec<FootprintUser>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CrossReference {
    /// Build from the library snapshot and every project with a main
    /// schematic, parsing hierarchies from disk.
    pub fn build_from_disk(index: &LibrarySnapshot, registry: &ProjectRegistry) -> Self {
        Self::build(index, registry, crate::parser::SchematicParser::parse_schematic)
    }

    /// Build with a custom hierarchy loader.
    pub fn build<F>(index: &LibrarySnapshot, registry: &ProjectRegistry, mut load: F) -> Self
    where
        F: FnMut(&Path) -> ParseOutcome<SchematicHierarchy>,
    {
        let mut xref = Self::default();

        for project in registry.names() {
            let Some(schematic) = registry.main_schematic_path(project) else {
                continue;
            };
            let (hierarchy, diags) = load(&schematic).into_parts(&schematic);
            for d in &diags {
                warn!("{}", d);
            }
            xref.diagnostics.extend(diags);
            let Some(hierarchy) = hierarchy else {
                continue;
            };

            let mut refs_by_part: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
            for instance in hierarchy.instances() {
                refs_by_part
                    .entry(instance.lib_id.as_str())
                    .or_default()
                    .insert(instance.reference.as_str());
            }
            let last_touched = registry
                .find(project)
                .and_then(|r| r.metadata.last_accessed.clone());
            for (uid, refs) in refs_by_part {
                xref.parts.entry(uid.to_string()).or_default().push(ProjectUsage {
                    project: project.clone(),
                    count: refs.len(),
                    last_touched: last_touched.clone(),
                });
            }
        }

        for (_, _, part) in index.iter() {
            let Some(footprint) = part.footprint_ref() else {
                continue;
            };
            let uid = part.uid();
            let users = xref.footprints.entry(footprint.to_string()).or_default();
            match xref.parts.get(&uid) {
                Some(usages) => users.extend(usages.iter().map(|u| FootprintUser {
                    part_uid: uid.clone(),
                    project: Some(u.project.clone()),
                })),
                None => users.push(FootprintUser {
                    part_uid: uid,
                    project: None,
                }),
            }
        }

        debug!(
            "Cross-reference: {} parts used, {} footprints referenced",
            xref.parts.len(),
            xref.footprints.len()
        );
        xref
    }

    pub fn usage(&self, part_uid: &str) -> &[ProjectUsage] {
        self.parts.get(part_uid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn footprint_users(&self, footprint_ref: &str) -> &[FootprintUser] {
        self.footprints
            .get(footprint_ref)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_used(&self, part_uid: &str) -> bool {
        !self.usage(part_uid).is_empty()
    }

    /// Indexed parts no project places, in index order.
    pub fn unused_parts(&self, index: &LibrarySnapshot) -> Vec<String> {
        index
            .iter()
            .map(|(_, _, p)| p.uid())
            .filter(|uid| !self.is_used(uid))
            .collect()
    }
}
