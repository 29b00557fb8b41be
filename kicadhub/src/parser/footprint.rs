//! KiCad footprint parser (`.kicad_mod`).
//!
//! Format reference:
//! https://dev-docs.kicad.org/en/file-formats/sexpr-footprint/
//!
//! - Root: `(footprint "NAME" ...)`, or `(module NAME ...)` in KiCad 5 files
//! - Pads: `(pad "1" smd roundrect (at X Y) (size W H) (layers "F.Cu" "F.Paste" "F.Mask"))`
//! - Outlines: `(fp_line (start X Y) (end X Y) (layer "F.SilkS") ...)`
//! - 3D model: `(model "${KICAD7_3DMODEL_DIR}/...wrl" ...)`

use std::path::Path;

use crate::parser::outcome::{Diagnostic, ParseOutcome};
use crate::parser::schema::{FootprintRecord, Line, Pad};
use crate::parser::sexp::{SExp, SExpParser};

pub struct FootprintParser;

impl FootprintParser {
    pub fn parse_footprint(path: &Path) -> ParseOutcome<FootprintRecord> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse_footprint_str(&content, path),
            Err(e) => ParseOutcome::Fail(format!("cannot read {}: {}", path.display(), e)),
        }
    }

    pub fn parse_footprint_str(content: &str, path: &Path) -> ParseOutcome<FootprintRecord> {
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
            Some("footprint") | Some("module") => {}
            other => {
                return ParseOutcome::Fail(format!(
                    "expected footprint root, found {}",
                    other.unwrap_or("nothing")
                ))
            }
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .or_else(|| root.atom_at(1).map(str::to_string))
            .unwrap_or_default();

        let pads = root.children("pad").into_iter().filter_map(parse_pad).collect();
        let lines = root
            .children("fp_line")
            .into_iter()
            .filter_map(parse_line)
            .collect();
        let model_path = root
            .child("model")
            .and_then(|m| m.atom_at(1))
            .map(str::to_string);

        let record = FootprintRecord {
            library: footprint_library_name(path),
            name,
            file_path: path.to_string_lossy().to_string(),
            pads,
            lines,
            model_path,
        };
        ParseOutcome::from_parts(record, diagnostics)
    }
}

/// `Foo.pretty/bar.kicad_mod` belongs to library `Foo`.
pub fn footprint_library_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .map(|s| s.strip_suffix(".pretty").unwrap_or(s))
        .unwrap_or_default()
        .to_string()
}

fn parse_pad(pad: &SExp) -> Option<Pad> {
    let number = pad.atom_at(1)?.to_string();
    let pad_type = pad.atom_at(2).unwrap_or_default().to_string();
    let shape = pad.atom_at(3).unwrap_or_default().to_string();
    let size = pad.point_of("size").unwrap_or((0.0, 0.0));
    let layers = pad
        .child("layers")
        .and_then(|l| l.as_list())
        .map(|items| {
            items
                .iter()
                .skip(1)
                .filter_map(|i| i.as_atom())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(Pad {
        number,
        pad_type,
        shape,
        size,
        layers,
    })
}

fn parse_line(line: &SExp) -> Option<Line> {
    Some(Line {
        layer: line.value_of("layer").unwrap_or_default().to_string(),
        start: line.point_of("start")?,
        end: line.point_of("end")?,
    })
}
