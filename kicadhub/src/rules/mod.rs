//! Library quality rules: required properties, value patterns and exemptions.

pub mod bulk_edit;
pub mod config;
pub mod engine;

pub use bulk_edit::bulk_edit_property;
pub use config::{ExemptionKind, Exemptions, RulesConfig};
pub use engine::{Failure, RulesEngine, Scope, ValidationStats};
