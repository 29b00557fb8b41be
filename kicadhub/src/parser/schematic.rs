//! KiCad schematic hierarchy parser (`.kicad_sch`, KiCad 6+).
//!
//! Format reference:
//! https://dev-docs.kicad.org/en/file-formats/sexpr-schematic/
//!
//! - Placed symbols: `(symbol (lib_id "Device:R") (in_bom yes) (dnp no) (property "Reference" "R1") ...)`
//! - Sub-sheets: `(sheet (uuid ...) (property "Sheetname" "PSU") (property "Sheetfile" "psu.kicad_sch"))`
//!   (KiCad 6 writes `"Sheet name"` / `"Sheet file"`)
//! - Per-instance references: `(instances (project "x" (path "/root-uuid/sheet-uuid" (reference "R5"))))`
//!
//! Sheets are stored in a graph arena keyed by canonical path. A file that
//! is reachable through several parents becomes one shared node, and a sheet
//! that references one of its ancestors is reported and not followed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::parser::outcome::{Diagnostic, ParseOutcome};
use crate::parser::schema::{SheetNode, SymbolInstance};
use crate::parser::sexp::{SExp, SExpParser};

/// Parsed sheet hierarchy rooted at one `.kicad_sch`.
#[derive(Debug, Clone)]
pub struct SchematicHierarchy {
    graph: DiGraph<SheetNode, ()>,
    root: NodeIndex,
}

/// Owned, serializable view of the hierarchy, cached on project records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetTree {
    pub name: String,
    pub path: String,
    pub sheet_path: String,
    pub part_count: usize,
    #[serde(default)]
    pub children: Vec<SheetTree>,
}

impl SchematicHierarchy {
    pub fn root(&self) -> &SheetNode {
        &self.graph[self.root]
    }

    pub fn root_index(&self) -> NodeIndex {
        self.root
    }

    pub fn node(&self, index: NodeIndex) -> &SheetNode {
        &self.graph[index]
    }

    /// Child sheets in the order they appear in the parent file.
    pub fn children(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut children: Vec<_> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect();
        // petgraph yields the most recently added edge first
        children.reverse();
        children
    }

    pub fn sheet_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Sheets in depth-first pre-order, each shared sheet once.
    pub fn sheets(&self) -> Vec<&SheetNode> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            if !visited.insert(index) {
                continue;
            }
            order.push(&self.graph[index]);
            for child in self.children(index).into_iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Every symbol instance in the hierarchy, root sheet first.
    pub fn instances(&self) -> Vec<&SymbolInstance> {
        self.sheets()
            .into_iter()
            .flat_map(|sheet| sheet.instances.iter())
            .collect()
    }

    pub fn to_tree(&self) -> SheetTree {
        self.tree_from(self.root, &mut HashSet::new())
    }

    fn tree_from(&self, index: NodeIndex, visited: &mut HashSet<NodeIndex>) -> SheetTree {
        visited.insert(index);
        let node = &self.graph[index];
        let children = self
            .children(index)
            .into_iter()
            .filter(|c| !visited.contains(c))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|c| self.tree_from(c, visited))
            .collect();
        SheetTree {
            name: node.name.clone(),
            path: node.path.to_string_lossy().to_string(),
            sheet_path: node.sheet_path.clone(),
            part_count: node.instances.len(),
            children,
        }
    }
}

pub struct SchematicParser;

impl SchematicParser {
    /// Parse the root sheet and every sheet it references.
    pub fn parse_schematic(root_file: &Path) -> ParseOutcome<SchematicHierarchy> {
        let mut builder = HierarchyBuilder::default();
        let root_path = canonical(root_file);
        let root_name = root_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let sheet = match read_sheet(&root_path) {
            Ok((sheet, diags)) => {
                builder.diagnostics.extend(diags);
                sheet
            }
            Err(reason) => return ParseOutcome::Fail(reason),
        };
        let root_uuid_path = format!("/{}", sheet.uuid.clone().unwrap_or_default());
        let root = builder.add_sheet(&root_path, root_name, "/".to_string(), &root_uuid_path, sheet, None);

        let mut ancestors = vec![root_path];
        builder.visit_children(root, &root_uuid_path, &mut ancestors);
        builder.check_references();

        let HierarchyBuilder {
            graph, diagnostics, ..
        } = builder;
        debug!(
            "Parsed schematic hierarchy with {} sheets",
            graph.node_count()
        );
        ParseOutcome::from_parts(SchematicHierarchy { graph, root }, diagnostics)
    }
}

#[derive(Default)]
struct HierarchyBuilder {
    graph: DiGraph<SheetNode, ()>,
    by_path: HashMap<PathBuf, NodeIndex>,
    pending: HashMap<NodeIndex, Vec<SheetRef>>,
    diagnostics: Vec<Diagnostic>,
}

impl HierarchyBuilder {
    fn add_sheet(
        &mut self,
        path: &Path,
        name: String,
        sheet_path: String,
        uuid_path: &str,
        sheet: RawSheet,
        parent: Option<NodeIndex>,
    ) -> NodeIndex {
        let instances = sheet
            .symbols
            .iter()
            .filter_map(|s| s.to_instance(uuid_path, &sheet_path))
            .collect();
        let index = self.graph.add_node(SheetNode {
            path: path.to_path_buf(),
            name,
            sheet_path,
            instances,
        });
        self.by_path.insert(path.to_path_buf(), index);
        self.pending.insert(index, sheet.sheets);
        if let Some(parent) = parent {
            self.graph.add_edge(parent, index, ());
        }
        index
    }

    fn visit_children(&mut self, parent: NodeIndex, uuid_path: &str, ancestors: &mut Vec<PathBuf>) {
        let refs = self.pending.remove(&parent).unwrap_or_default();
        let parent_path = self.graph[parent].path.clone();
        let parent_sheet_path = self.graph[parent].sheet_path.clone();
        let dir = parent_path.parent().map(Path::to_path_buf).unwrap_or_default();

        for sheet_ref in refs {
            let child_path = canonical(&dir.join(&sheet_ref.file));

            if let Some(&existing) = self.by_path.get(&child_path) {
                if ancestors.contains(&child_path) {
                    warn!("Sheet cycle through {}", child_path.display());
                    self.diagnostics.push(Diagnostic::new(
                        &parent_path,
                        format!("sheet '{}' refers back to an ancestor; not followed", sheet_ref.file),
                    ));
                } else if self.graph.find_edge(parent, existing).is_none() {
                    self.graph.add_edge(parent, existing, ());
                }
                continue;
            }

            let sheet = match read_sheet(&child_path) {
                Ok((sheet, diags)) => {
                    self.diagnostics.extend(diags);
                    sheet
                }
                Err(reason) => {
                    self.diagnostics.push(Diagnostic::new(&parent_path, reason));
                    continue;
                }
            };
            let name = if sheet_ref.name.is_empty() {
                child_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string()
            } else {
                sheet_ref.name.clone()
            };
            let child_sheet_path = format!("{}{}/", parent_sheet_path, name);
            let child_uuid_path = format!("{}/{}", uuid_path, sheet_ref.uuid);
            let child = self.add_sheet(
                &child_path,
                name,
                child_sheet_path,
                &child_uuid_path,
                sheet,
                Some(parent),
            );

            ancestors.push(child_path);
            self.visit_children(child, &child_uuid_path, ancestors);
            ancestors.pop();
        }
    }

    fn check_references(&mut self) {
        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            for instance in &node.instances {
                if let Some(first) = seen.get(&instance.reference) {
                    if first != &node.path {
                        self.diagnostics.push(Diagnostic::new(
                            &node.path,
                            format!(
                                "reference {} also used in {}",
                                instance.reference,
                                first.display()
                            ),
                        ));
                    }
                } else {
                    seen.insert(instance.reference.clone(), node.path.clone());
                }
            }
        }
    }
}

struct RawSheet {
    uuid: Option<String>,
    symbols: Vec<RawSymbol>,
    sheets: Vec<SheetRef>,
}

struct SheetRef {
    name: String,
    file: String,
    uuid: String,
}

struct RawSymbol {
    lib_id: String,
    reference: String,
    value: String,
    footprint: String,
    dnp: bool,
    excluded: bool,
    instance_refs: Vec<(String, String)>,
}

impl RawSymbol {
    fn to_instance(&self, uuid_path: &str, sheet_path: &str) -> Option<SymbolInstance> {
        let reference = self
            .instance_refs
            .iter()
            .find(|(path, _)| path == uuid_path)
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| self.reference.clone());
        // power flags and other virtual symbols
        if reference.starts_with('#') {
            return None;
        }
        Some(SymbolInstance {
            reference,
            lib_id: self.lib_id.clone(),
            value: self.value.clone(),
            footprint: self.footprint.clone(),
            sheet_path: sheet_path.to_string(),
            dnp: self.dnp,
            excluded: self.excluded,
        })
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn read_sheet(path: &Path) -> Result<(RawSheet, Vec<Diagnostic>), String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    parse_sheet_str(&content, path)
}

fn parse_sheet_str(content: &str, path: &Path) -> Result<(RawSheet, Vec<Diagnostic>), String> {
    let mut diagnostics = Vec::new();
    let mut parser = SExpParser::new(content);
    let (root, error) = parser.parse_lenient();
    if let Some(e) = &error {
        diagnostics.push(Diagnostic::at_line(path, e.line(), e.to_string()));
    }
    let root = root.ok_or_else(|| format!("{}: no s-expression found", path.display()))?;
    if root.tag() != Some("kicad_sch") {
        return Err(format!(
            "{}: expected kicad_sch root, found {}",
            path.display(),
            root.tag().unwrap_or("nothing")
        ));
    }

    let symbols = root
        .children("symbol")
        .into_iter()
        .filter_map(parse_placed_symbol)
        .collect();

    let mut sheets = Vec::new();
    for sheet in root.children("sheet") {
        let props = crate::parser::symbol_lib::parse_properties(sheet);
        let file = props
            .get("Sheetfile")
            .or_else(|| props.get("Sheet file"))
            .cloned();
        let Some(file) = file.filter(|f| !f.is_empty()) else {
            diagnostics.push(Diagnostic::new(path, "sheet without a Sheetfile property"));
            continue;
        };
        let name = props
            .get("Sheetname")
            .or_else(|| props.get("Sheet name"))
            .cloned()
            .unwrap_or_default();
        sheets.push(SheetRef {
            name,
            file,
            uuid: sheet.value_of("uuid").unwrap_or_default().to_string(),
        });
    }

    Ok((
        RawSheet {
            uuid: root.value_of("uuid").map(str::to_string),
            symbols,
            sheets,
        },
        diagnostics,
    ))
}

fn parse_placed_symbol(symbol: &SExp) -> Option<RawSymbol> {
    let lib_id = symbol.value_of("lib_id")?.to_string();
    let props = crate::parser::symbol_lib::parse_properties(symbol);
    let prop = |key: &str| props.get(key).cloned().unwrap_or_default();

    let excluded = symbol.flag("in_bom") == Some(false)
        || symbol.flag("exclude_from_bom") == Some(true);

    let mut instance_refs = Vec::new();
    if let Some(instances) = symbol.child("instances") {
        for project in instances.children("project") {
            for path in project.children("path") {
                if let (Some(p), Some(r)) = (path.atom_at(1), path.value_of("reference")) {
                    instance_refs.push((p.to_string(), r.to_string()));
                }
            }
        }
    }

    Some(RawSymbol {
        lib_id,
        reference: prop("Reference"),
        value: prop("Value"),
        footprint: prop("Footprint"),
        dnp: symbol.flag("dnp") == Some(true),
        excluded,
        instance_refs,
    })
}
