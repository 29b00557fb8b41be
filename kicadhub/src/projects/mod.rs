//! Per-project records: metadata, kanban, checklists, requirements, test
//! plans, pricing and time tracking.

pub mod model;
pub mod registry;

pub use model::{
    pricing_key, CheckStatus, ChecklistItem, ChecklistSection, GitRepoEntry, ProjectMetadata,
    ProjectRecord, Requirement, StructureCache, Task, TestCase, TestPlan, TestRun, TimeEntry,
};
pub use registry::{ProjectRegistry, ARCHIVED_STATUS};
