//! KiCad symbol library parser (`.kicad_sym`, KiCad 6+).
//!
//! Format reference:
//! https://dev-docs.kicad.org/en/file-formats/sexpr-symbol-lib/
//!
//! - Root: `(kicad_symbol_lib (version ...) (generator ...) (symbol ...)...)`
//! - Properties: `(property "KEY" "VALUE" (at ...) (effects ...))`
//! - Pins live in unit sub-symbols: `(symbol "R_1_1" (pin passive line ... (name "~") (number "1")))`
//! - Derived symbols: `(symbol "R_Small" (extends "R") ...)`

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::parser::outcome::{Diagnostic, ParseOutcome};
use crate::parser::schema::{PartRecord, Pin};
use crate::parser::sexp::{SExp, SExpParser};

pub struct SymbolLibParser;

impl SymbolLibParser {
    /// Parse one library file. The library name is the file stem.
    pub fn parse_symbol_library(path: &Path) -> ParseOutcome<Vec<PartRecord>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse_symbol_library_str(&content, path),
            Err(e) => ParseOutcome::Fail(format!("cannot read {}: {}", path.display(), e)),
        }
    }

    pub fn parse_symbol_library_str(content: &str, path: &Path) -> ParseOutcome<Vec<PartRecord>> {
        let library = library_name(path);
        let mut diagnostics = Vec::new();

        let mut parser = SExpParser::new(content);
        let (root, error) = parser.parse_lenient();
        if let Some(e) = &error {
            diagnostics.push(Diagnostic::at_line(path, e.line(), e.to_string()));
        }
        let Some(root) = root else {
            return ParseOutcome::Fail(format!("{}: no s-expression found", path.display()));
        };
        match root.tag() {
            Some("kicad_symbol_lib") => {}
            other => {
                return ParseOutcome::Fail(format!(
                    "expected kicad_symbol_lib root, found {}",
                    other.unwrap_or("nothing")
                ))
            }
        }

        let mut parts: Vec<PartRecord> = Vec::new();
        let mut extends: HashMap<String, String> = HashMap::new();
        let mut seen = HashSet::new();

        for symbol in root.children("symbol") {
            let Some(name) = symbol.atom_at(1) else {
                diagnostics.push(Diagnostic::new(path, "symbol without a name"));
                continue;
            };
            if !seen.insert(name.to_string()) {
                diagnostics.push(Diagnostic::new(
                    path,
                    format!("duplicate symbol '{}' ignored", name),
                ));
                continue;
            }
            if let Some(base) = symbol.value_of("extends") {
                extends.insert(name.to_string(), base.to_string());
            }
            parts.push(PartRecord {
                library: library.clone(),
                name: name.to_string(),
                file_path: path.to_string_lossy().to_string(),
                properties: parse_properties(symbol),
                pins: collect_pins(symbol),
            });
        }

        apply_inheritance(&mut parts, &extends, path, &mut diagnostics);
        debug!("Parsed {} symbols from {}", parts.len(), path.display());

        ParseOutcome::from_parts(parts, diagnostics)
    }
}

pub(crate) fn library_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn parse_properties(node: &SExp) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for prop in node.children("property") {
        if let (Some(key), Some(value)) = (prop.atom_at(1), prop.atom_at(2)) {
            properties
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    properties
}

/// Pins from the symbol itself and all its unit sub-symbols, in file order.
/// Alternate body styles repeat identical pins; those are kept once.
fn collect_pins(symbol: &SExp) -> Vec<Pin> {
    let mut pins = Vec::new();
    push_pins(symbol, &mut pins);
    for unit in symbol.children("symbol") {
        push_pins(unit, &mut pins);
    }
    pins
}

fn push_pins(node: &SExp, pins: &mut Vec<Pin>) {
    for pin in node.children("pin") {
        let number = pin
            .child("number")
            .and_then(|n| n.atom_at(1))
            .unwrap_or_default()
            .to_string();
        let name = pin
            .child("name")
            .and_then(|n| n.atom_at(1))
            .unwrap_or_default()
            .to_string();
        let electrical_type = pin.atom_at(1).unwrap_or("unspecified").to_string();
        let pin = Pin {
            number,
            name,
            electrical_type,
        };
        if !pins.contains(&pin) {
            pins.push(pin);
        }
    }
}

fn apply_inheritance(
    parts: &mut [PartRecord],
    extends: &HashMap<String, String>,
    path: &Path,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let bases: HashMap<String, PartRecord> = parts
        .iter()
        .filter(|p| !extends.contains_key(&p.name))
        .map(|p| (p.name.clone(), p.clone()))
        .collect();

    for part in parts.iter_mut() {
        let Some(base_name) = extends.get(&part.name) else {
            continue;
        };
        let Some(base) = bases.get(base_name) else {
            diagnostics.push(Diagnostic::new(
                path,
                format!("symbol '{}' extends unknown symbol '{}'", part.name, base_name),
            ));
            continue;
        };
        if part.pins.is_empty() {
            part.pins = base.pins.clone();
        }
        for (key, value) in &base.properties {
            part.properties
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const LIB: &str = r#"(kicad_symbol_lib (version 20220914) (generator kicad_symbol_editor)
  (symbol "R" (pin_numbers hide) (in_bom yes) (on_board yes)
    (property "Reference" "R" (at 2.032 0 90) (effects (font (size 1.27 1.27))))
    (property "Value" "R" (at 0 0 90) (effects (font (size 1.27 1.27))))
    (property "Footprint" "" (at -1.778 0 90) (effects (font (size 1.27 1.27)) hide))
    (property "MPN" "RC0603-10K" (at 0 0 0) (effects (font (size 1.27 1.27)) hide))
    (symbol "R_0_1"
      (rectangle (start -1.016 -2.54) (end 1.016 2.54) (stroke (width 0.254) (type default)) (fill (type none)))
    )
    (symbol "R_1_1"
      (pin passive line (at 0 3.81 270) (length 1.27) (name "~" (effects (font (size 1.27 1.27)))) (number "1" (effects (font (size 1.27 1.27)))))
      (pin passive line (at 0 -3.81 90) (length 1.27) (name "~" (effects (font (size 1.27 1.27)))) (number "2" (effects (font (size 1.27 1.27)))))
    )
  )
  (symbol "R_Small" (extends "R")
    (property "Reference" "R" (at 0 0 0) (effects (font (size 1.27 1.27))))
    (property "Value" "R_Small" (at 0 0 0) (effects (font (size 1.27 1.27))))
  )
)
"#;

    #[test]
    fn test_parse_library() {
        let path = PathBuf::from("/libs/Device.kicad_sym");
        let outcome = SymbolLibParser::parse_symbol_library_str(LIB, &path);
        assert!(outcome.is_ok());
        let parts = outcome.value().unwrap();
        assert_eq!(parts.len(), 2);

        let r = &parts[0];
        assert_eq!(r.uid(), "Device:R");
        assert_eq!(r.property("MPN"), Some("RC0603-10K"));
        assert_eq!(r.pins.len(), 2);
        assert_eq!(r.pins[0].number, "1");
        assert_eq!(r.pins[0].electrical_type, "passive");

        let small = &parts[1];
        assert_eq!(small.property("Value"), Some("R_Small"));
        assert_eq!(small.property("MPN"), Some("RC0603-10K"));
        assert_eq!(small.pins, r.pins);
    }

    #[test]
    fn test_truncated_file_keeps_complete_symbols() {
        let cut = LIB.find("(symbol \"R_Small\"").unwrap();
        let truncated = format!("{}(symbol \"Broken\" (property \"Value\"", &LIB[..cut]);
        let path = PathBuf::from("/libs/Device.kicad_sym");
        match SymbolLibParser::parse_symbol_library_str(&truncated, &path) {
            ParseOutcome::PartialOk(parts, diags) => {
                assert_eq!(parts.len(), 1);
                assert_eq!(parts[0].name, "R");
                assert_eq!(diags.len(), 1);
                assert!(diags[0].line.is_some());
            }
            other => panic!("expected partial result, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_root_fails() {
        let path = PathBuf::from("/libs/x.kicad_sym");
        let outcome = SymbolLibParser::parse_symbol_library_str("(kicad_sch (version 1))", &path);
        assert!(matches!(outcome, ParseOutcome::Fail(_)));
    }
}
