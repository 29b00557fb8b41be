//! Plain-text feedback logs and test-plan export.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

use crate::backup::TIMESTAMP_FORMAT;
use crate::core::Result;
use crate::projects::model::{TestCase, TestPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Bug,
    FeatureRequest,
}

impl ReportKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ReportKind::Bug => "bugs.txt",
            ReportKind::FeatureRequest => "feature_requests.txt",
        }
    }
}

/// Appends timestamped entries to `bugs.txt` / `feature_requests.txt`.
pub struct ReportLog {
    dir: PathBuf,
}

impl ReportLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, kind: ReportKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn append(&self, kind: ReportKind, text: &str, now: NaiveDateTime) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(kind);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        write!(
            file,
            "[{}]\n{}\n\n",
            now.format(TIMESTAMP_FORMAT),
            text.trim_end()
        )?;
        info!("Appended entry to {}", path.display());
        Ok(path)
    }
}

/// Render a project's test plan as markdown, grouped by category in order
/// of first appearance.
pub fn export_test_plan(project: &str, plan: &TestPlan) -> String {
    let mut out = format!("# Test Plan: {}\n", project);
    if plan.cases.is_empty() {
        out.push_str("\nNo test cases.\n");
        return out;
    }

    let mut categories: Vec<&str> = Vec::new();
    for case in &plan.cases {
        let category = category_of(case);
        if !categories.contains(&category) {
            categories.push(category);
        }
    }

    for category in categories {
        out.push_str(&format!("\n## {}\n", category));
        for case in plan.cases.iter().filter(|c| category_of(c) == category) {
            render_case(&mut out, case);
        }
    }
    out
}

fn category_of(case: &TestCase) -> &str {
    if case.category.trim().is_empty() {
        "Uncategorized"
    } else {
        case.category.trim()
    }
}

fn render_case(out: &mut String, case: &TestCase) {
    out.push_str(&format!("\n### {}: {}\n\n", case.id, case.title));
    for (label, value) in [
        ("Priority", &case.priority),
        ("Type", &case.kind),
        ("Status", &case.status),
    ] {
        if !value.is_empty() {
            out.push_str(&format!("- **{}:** {}\n", label, value));
        }
    }
    if !case.steps.is_empty() {
        out.push_str("\n**Steps**\n\n");
        for (i, step) in case.steps.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, step));
        }
    }
    if !case.runs.is_empty() {
        out.push_str("\n| Date | Result | Notes |\n|---|---|---|\n");
        for run in &case.runs {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                run.date,
                run.result,
                run.notes.replace('|', "\\|").replace('\n', " ")
            ));
        }
    }
    if !case.attachments.is_empty() {
        out.push_str("\n**Attachments**\n\n");
        for attachment in &case.attachments {
            out.push_str(&format!("- {}\n", attachment));
        }
    }
}

/// Write the test plan markdown to `path`.
pub fn write_test_plan(path: &Path, project: &str, plan: &TestPlan) -> Result<()> {
    fs::write(path, export_test_plan(project, plan))?;
    Ok(())
}
