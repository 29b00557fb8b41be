use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Rule and exemption configuration, stored in settings as
/// `global_rules`, `library_rules` and `exemptions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Property name → regex. An empty regex only requires a non-empty value.
    #[serde(default)]
    pub global_rules: BTreeMap<String, String>,
    /// Library → property name → optional regex.
    #[serde(default)]
    pub library_rules: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub exemptions: Exemptions,
}

/// Opt-outs keyed by rule name (the property a rule checks).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exemptions {
    #[serde(default)]
    pub libraries: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub parts: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemptionKind {
    Library,
    Part,
}

impl Exemptions {
    /// Which exemption (if any) covers `rule` for this part. Library
    /// exemptions take precedence over part exemptions.
    pub fn lookup(&self, library: &str, part_uid: &str, rule: &str) -> Option<ExemptionKind> {
        let listed = |rules: Option<&Vec<String>>| rules.is_some_and(|r| r.iter().any(|x| x == rule));
        if listed(self.libraries.get(library)) {
            Some(ExemptionKind::Library)
        } else if listed(self.parts.get(part_uid)) {
            Some(ExemptionKind::Part)
        } else {
            None
        }
    }

    pub fn exempt_library(&mut self, library: &str, rule: &str) {
        add_unique(self.libraries.entry(library.to_string()).or_default(), rule);
    }

    pub fn exempt_part(&mut self, part_uid: &str, rule: &str) {
        add_unique(self.parts.entry(part_uid.to_string()).or_default(), rule);
    }
}

impl RulesConfig {
    pub fn exempt_library(&mut self, library: &str, rule: &str) {
        self.exemptions.exempt_library(library, rule);
    }

    pub fn exempt_part(&mut self, part_uid: &str, rule: &str) {
        self.exemptions.exempt_part(part_uid, rule);
    }

    /// Drop `rule` from a library or part exemption list. Returns whether
    /// anything was removed.
    pub fn remove_exemption(&mut self, kind: ExemptionKind, key: &str, rule: &str) -> bool {
        let map = match kind {
            ExemptionKind::Library => &mut self.exemptions.libraries,
            ExemptionKind::Part => &mut self.exemptions.parts,
        };
        let Some(rules) = map.get_mut(key) else {
            return false;
        };
        let before = rules.len();
        rules.retain(|r| r != rule);
        let removed = rules.len() != before;
        if rules.is_empty() {
            map.remove(key);
        }
        removed
    }
}

fn add_unique(rules: &mut Vec<String>, rule: &str) {
    if !rules.iter().any(|r| r == rule) {
        rules.push(rule.to_string());
    }
}
