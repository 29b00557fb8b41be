use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One symbol from a `.kicad_sym` library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRecord {
    pub library: String,
    pub name: String,
    pub file_path: String,
    pub properties: BTreeMap<String, String>,
    pub pins: Vec<Pin>,
}

impl PartRecord {
    pub fn uid(&self) -> String {
        part_uid(&self.library, &self.name)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The `Footprint` property, if it names a real footprint.
    pub fn footprint_ref(&self) -> Option<&str> {
        self.property("Footprint")
            .map(str::trim)
            .filter(|f| !f.is_empty() && *f != "~")
    }
}

pub fn part_uid(library: &str, name: &str) -> String {
    format!("{}:{}", library, name)
}

/// Split `library:name`. Names may contain further colons; the library may not.
pub fn split_uid(uid: &str) -> Option<(&str, &str)> {
    uid.split_once(':')
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub number: String,
    pub name: String,
    pub electrical_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootprintRecord {
    pub library: String,
    pub name: String,
    pub file_path: String,
    pub pads: Vec<Pad>,
    pub lines: Vec<Line>,
    pub model_path: Option<String>,
}

impl FootprintRecord {
    pub fn reference(&self) -> String {
        part_uid(&self.library, &self.name)
    }

    /// Distinct pad numbers; bussed pads share a number.
    pub fn pad_numbers(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for pad in &self.pads {
            if !seen.contains(&pad.number.as_str()) {
                seen.push(pad.number.as_str());
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pad {
    pub number: String,
    pub pad_type: String,
    pub shape: String,
    pub size: (f64, f64),
    pub layers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub layer: String,
    pub start: (f64, f64),
    pub end: (f64, f64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInstance {
    pub reference: String,
    pub lib_id: String,
    pub value: String,
    pub footprint: String,
    pub sheet_path: String,
    pub dnp: bool,
    pub excluded: bool,
}

/// A sheet file in a schematic hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetNode {
    /// Canonical absolute path of the sheet file.
    pub path: PathBuf,
    pub name: String,
    /// Display path, `/` for the root, `/PSU/` for a child named PSU.
    pub sheet_path: String,
    pub instances: Vec<SymbolInstance>,
}

/// Row of an `fp-lib-table` or `sym-lib-table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibTableEntry {
    pub name: String,
    pub lib_type: String,
    pub uri: String,
    pub options: String,
    pub descr: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_and_split() {
        let part = PartRecord {
            library: "Device".into(),
            name: "R".into(),
            file_path: "/lib/Device.kicad_sym".into(),
            properties: BTreeMap::from([("Footprint".into(), "~".into())]),
            pins: vec![],
        };
        assert_eq!(part.uid(), "Device:R");
        assert_eq!(part.footprint_ref(), None);
        assert_eq!(split_uid("Lib:Name:With:Colons"), Some(("Lib", "Name:With:Colons")));
    }

    #[test]
    fn test_pad_numbers_dedupe_bussed_pads() {
        let pad = |n: &str| Pad {
            number: n.into(),
            pad_type: "smd".into(),
            shape: "rect".into(),
            size: (1.0, 1.0),
            layers: vec!["F.Cu".into()],
        };
        let fp = FootprintRecord {
            library: "Pkg".into(),
            name: "SOT-223".into(),
            file_path: String::new(),
            pads: vec![pad("1"), pad("2"), pad("3"), pad("2")],
            lines: vec![],
            model_path: None,
        };
        assert_eq!(fp.pad_numbers(), vec!["1", "2", "3"]);
        assert_eq!(fp.reference(), "Pkg:SOT-223");
    }
}
