use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::parser::schematic::SheetTree;

/// Everything the hub tracks about one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectRecord {
    pub metadata: ProjectMetadata,
    /// Lane key → ordered tasks.
    pub kanban: BTreeMap<String, Vec<Task>>,
    /// Lane key → maximum task count, 0 for unlimited.
    pub kanban_limits: BTreeMap<String, usize>,
    pub checklist: BTreeMap<String, ChecklistSection>,
    pub requirements: Vec<Requirement>,
    pub test_plan: TestPlan,
    /// Canonical `value|footprint` key → unit price.
    pub bom_pricing: BTreeMap<String, f64>,
    pub structure: Option<StructureCache>,
    pub time_entries: Vec<TimeEntry>,
    pub tasks: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectMetadata {
    pub location: String,
    pub main_schematic: String,
    pub layout_file: String,
    pub number: String,
    pub revision: String,
    #[serde(rename = "type")]
    pub project_type: String,
    pub status: String,
    pub pinned: bool,
    pub tags: Vec<String>,
    /// `YYYY-MM-DD HH:MM:SS`, local time.
    pub last_accessed: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub name: String,
    pub desc: String,
    /// Percent complete, 0 to 100.
    #[serde(deserialize_with = "lenient_percent")]
    pub progress: u8,
    pub category: String,
    pub priority: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecklistSection {
    pub description: String,
    pub rules: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecklistItem {
    pub text: String,
    pub owner: String,
    pub due: String,
    pub status: CheckStatus,
    pub comment: String,
}

/// Checklist answer. Text other than `Yes`, `No` or `N/A` is kept as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CheckStatus {
    Yes,
    #[default]
    No,
    NotApplicable,
    Other(String),
}

impl From<String> for CheckStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Yes" => CheckStatus::Yes,
            "No" => CheckStatus::No,
            "N/A" => CheckStatus::NotApplicable,
            _ => CheckStatus::Other(s),
        }
    }
}

impl From<CheckStatus> for String {
    fn from(status: CheckStatus) -> Self {
        match status {
            CheckStatus::Yes => "Yes".into(),
            CheckStatus::No => "No".into(),
            CheckStatus::NotApplicable => "N/A".into(),
            CheckStatus::Other(s) => s,
        }
    }
}

/// Numbers, numeric strings (`"40"`, `"40%"`) or anything else (0), clamped to 100.
fn lenient_percent<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let percent = match &value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if percent.is_nan() {
        return Ok(0);
    }
    Ok(percent.clamp(0.0, 100.0).round() as u8)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirement {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub status: String,
    pub priority: String,
    pub tags: Vec<String>,
    pub sub_requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestPlan {
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestCase {
    pub id: String,
    pub title: String,
    pub category: String,
    pub priority: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub steps: Vec<String>,
    pub runs: Vec<TestRun>,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestRun {
    pub date: String,
    pub result: String,
    pub notes: String,
}

/// Last parsed sheet tree, so project views open without re-parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureCache {
    pub tree: SheetTree,
    pub part_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeEntry {
    pub date: String,
    pub task: String,
    pub minutes: u32,
    pub notes: String,
}

/// A git repository added by hand to the overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitRepoEntry {
    pub name: String,
    pub path: String,
}

/// Pricing key for a BOM row: trimmed value, trimmed lowercase footprint.
pub fn pricing_key(value: &str, footprint: &str) -> String {
    format!("{}|{}", value.trim(), footprint.trim().to_lowercase())
}
