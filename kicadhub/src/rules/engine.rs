//! Property rules over indexed library parts.
//!
//! A global rule applies to every part; a library rule only to parts of that
//! library. Each check yields at most one [`Failure`]. Exempted checks that
//! would have failed are kept aside as shadow failures.

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::library::LibrarySnapshot;
use crate::parser::schema::PartRecord;
use crate::rules::config::{ExemptionKind, RulesConfig};

/// Which parts a validation run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Library(String),
}

impl Scope {
    /// `"all"` selects everything, anything else names a library.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("all") {
            Scope::All
        } else {
            Scope::Library(s.to_string())
        }
    }

    fn includes(&self, library: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Library(name) => name == library,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub library: String,
    pub part: String,
    /// The property the failing rule checks.
    pub rule: String,
    pub message: String,
    /// Set on shadow failures only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exempted_by: Option<ExemptionKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationStats {
    pub total_checked: usize,
    pub total_fails: usize,
    pub fails_by_lib: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RuleKind {
    /// Missing, empty and `~` all count as absent.
    Global,
    /// Only an absent key counts as missing.
    Library,
}

pub struct RulesEngine {
    config: RulesConfig,
    patterns: HashMap<String, std::result::Result<Regex, String>>,
}

impl RulesEngine {
    pub fn new(config: RulesConfig) -> Self {
        let mut patterns = HashMap::new();
        let all = config
            .global_rules
            .values()
            .chain(config.library_rules.values().flat_map(|r| r.values()));
        for pattern in all {
            if pattern.is_empty() || patterns.contains_key(pattern) {
                continue;
            }
            // Full-match semantics regardless of the user's anchors.
            let compiled = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                warn!("Invalid rule pattern {:?}: {}", pattern, e);
                e.to_string()
            });
            patterns.insert(pattern.clone(), compiled);
        }
        Self { config, patterns }
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    pub fn into_config(self) -> RulesConfig {
        self.config
    }

    pub fn validate(&self, index: &LibrarySnapshot, scope: &Scope) -> Vec<Failure> {
        self.evaluate(index, scope).0
    }

    /// Checks that fail but are covered by an exemption.
    pub fn get_exempted_failures(&self, index: &LibrarySnapshot, scope: &Scope) -> Vec<Failure> {
        self.evaluate(index, scope).1
    }

    pub fn validate_and_get_stats(
        &self,
        index: &LibrarySnapshot,
        scope: &Scope,
    ) -> (Vec<Failure>, ValidationStats) {
        let (failures, _) = self.evaluate(index, scope);
        let mut stats = ValidationStats {
            total_checked: index.iter().filter(|(lib, _, _)| scope.includes(lib)).count(),
            total_fails: failures.len(),
            ..Default::default()
        };
        for failure in &failures {
            *stats.fails_by_lib.entry(failure.library.clone()).or_default() += 1;
        }
        (failures, stats)
    }

    fn evaluate(&self, index: &LibrarySnapshot, scope: &Scope) -> (Vec<Failure>, Vec<Failure>) {
        let mut active = Vec::new();
        let mut shadow = Vec::new();

        for (library, name, part) in index.iter() {
            if !scope.includes(library) {
                continue;
            }
            let uid = part.uid();
            let library_rules = self.config.library_rules.get(library);
            let checks = self
                .config
                .global_rules
                .iter()
                .map(|(p, r)| (RuleKind::Global, p, r))
                .chain(
                    library_rules
                        .into_iter()
                        .flat_map(|rules| rules.iter().map(|(p, r)| (RuleKind::Library, p, r))),
                );

            for (kind, property, pattern) in checks {
                let Some(message) = self.check(kind, property, pattern, part) else {
                    continue;
                };
                let exempted_by = self.config.exemptions.lookup(library, &uid, property);
                let failure = Failure {
                    library: library.to_string(),
                    part: name.to_string(),
                    rule: property.clone(),
                    message,
                    exempted_by,
                };
                if exempted_by.is_some() {
                    shadow.push(failure);
                } else {
                    active.push(failure);
                }
            }
        }

        debug!(
            "Validation: {} failures, {} exempted",
            active.len(),
            shadow.len()
        );
        (active, shadow)
    }

    fn check(&self, kind: RuleKind, property: &str, pattern: &str, part: &PartRecord) -> Option<String> {
        let value = match (kind, part.property(property)) {
            (_, None) => return Some(format!("Missing '{}'", property)),
            (RuleKind::Global, Some(v)) if v.trim().is_empty() || v.trim() == "~" => {
                return Some(format!("Missing '{}'", property));
            }
            (_, Some(v)) => v,
        };
        if pattern.is_empty() {
            return None;
        }
        match self.patterns.get(pattern) {
            Some(Ok(re)) if re.is_match(value) => None,
            Some(Ok(_)) => Some(format!("Invalid '{}': value doesn't match pattern", property)),
            Some(Err(err)) => Some(format!("Invalid rule '{}': {}", property, err)),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::SymbolLibrary;

    fn part(library: &str, name: &str, props: &[(&str, &str)]) -> PartRecord {
        PartRecord {
            library: library.into(),
            name: name.into(),
            file_path: format!("/libs/{library}.kicad_sym"),
            properties: props.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            pins: vec![],
        }
    }

    fn snapshot(parts: Vec<PartRecord>) -> LibrarySnapshot {
        let mut libraries: Vec<SymbolLibrary> = Vec::new();
        for p in parts {
            match libraries.iter_mut().find(|l| l.name == p.library) {
                Some(lib) => lib.parts.push(p),
                None => libraries.push(SymbolLibrary {
                    name: p.library.clone(),
                    file_path: p.file_path.clone().into(),
                    parts: vec![p],
                }),
            }
        }
        LibrarySnapshot::from_libraries(libraries)
    }

    #[test]
    fn test_global_missing_and_tilde() {
        let mut config = RulesConfig::default();
        config.global_rules.insert("Datasheet".into(), String::new());
        let index = snapshot(vec![
            part("Device", "A", &[("Datasheet", "~")]),
            part("Device", "B", &[("Datasheet", "  ")]),
            part("Device", "C", &[]),
            part("Device", "D", &[("Datasheet", "http://x")]),
        ]);
        let failures = RulesEngine::new(config).validate(&index, &Scope::All);
        let parts: Vec<_> = failures.iter().map(|f| f.part.as_str()).collect();
        assert_eq!(parts, vec!["A", "B", "C"]);
        assert!(failures.iter().all(|f| f.message == "Missing 'Datasheet'"));
    }

    #[test]
    fn test_library_rule_requires_key_only() {
        let mut config = RulesConfig::default();
        config
            .library_rules
            .entry("Resistors".into())
            .or_default()
            .insert("Tolerance".into(), String::new());
        let index = snapshot(vec![
            part("Resistors", "R1", &[("Tolerance", "")]),
            part("Resistors", "R2", &[]),
            part("Caps", "C1", &[]),
        ]);
        let failures = RulesEngine::new(config).validate(&index, &Scope::All);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].part, "R2");
        assert_eq!(failures[0].message, "Missing 'Tolerance'");
    }

    #[test]
    fn test_regex_is_full_match() {
        let mut config = RulesConfig::default();
        config.global_rules.insert("Value".into(), "[0-9]+k".into());
        let index = snapshot(vec![
            part("Device", "ok", &[("Value", "10k")]),
            part("Device", "partial", &[("Value", "10k5")]),
        ]);
        let failures = RulesEngine::new(config).validate(&index, &Scope::All);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].part, "partial");
        assert_eq!(failures[0].message, "Invalid 'Value': value doesn't match pattern");
    }

    #[test]
    fn test_invalid_regex_reports_instead_of_failing() {
        let mut config = RulesConfig::default();
        config.global_rules.insert("MPN".into(), "([".into());
        let index = snapshot(vec![part("Device", "R", &[("MPN", "X")])]);
        let failures = RulesEngine::new(config).validate(&index, &Scope::All);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.starts_with("Invalid rule 'MPN': "));
    }

    #[test]
    fn test_scope_and_stats() {
        let mut config = RulesConfig::default();
        config.global_rules.insert("MPN".into(), String::new());
        let index = snapshot(vec![
            part("Caps", "C1", &[]),
            part("Caps", "C2", &[("MPN", "GRM")]),
            part("Resistors", "R1", &[]),
        ]);
        let engine = RulesEngine::new(config);

        let caps = engine.validate(&index, &Scope::parse("Caps"));
        assert_eq!(caps.len(), 1);
        assert_eq!(Scope::parse("ALL"), Scope::All);

        let (_, stats) = engine.validate_and_get_stats(&index, &Scope::All);
        assert_eq!(stats.total_checked, 3);
        assert_eq!(stats.total_fails, 2);
        assert_eq!(stats.fails_by_lib.get("Caps"), Some(&1));
        assert_eq!(stats.fails_by_lib.get("Resistors"), Some(&1));
    }

    #[test]
    fn test_shadow_failures_carry_exemption_kind() {
        let mut config = RulesConfig::default();
        config.global_rules.insert("MPN".into(), String::new());
        config.exempt_library("Caps", "MPN");
        config.exempt_part("Resistors:R1", "MPN");
        let index = snapshot(vec![part("Caps", "C1", &[]), part("Resistors", "R1", &[])]);
        let engine = RulesEngine::new(config);

        assert!(engine.validate(&index, &Scope::All).is_empty());
        let shadow = engine.get_exempted_failures(&index, &Scope::All);
        assert_eq!(shadow.len(), 2);
        assert_eq!(shadow[0].exempted_by, Some(ExemptionKind::Library));
        assert_eq!(shadow[1].exempted_by, Some(ExemptionKind::Part));
    }
}
