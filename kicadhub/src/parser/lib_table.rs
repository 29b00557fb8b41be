//! `fp-lib-table` / `sym-lib-table` parser.
//!
//! ```text
//! (fp_lib_table
//!   (version 7)
//!   (lib (name "Foo")(type "KiCad")(uri "${KIPRJMOD}/Foo.pretty")(options "")(descr ""))
//! )
//! ```

use std::path::Path;

use crate::parser::outcome::{Diagnostic, ParseOutcome};
use crate::parser::schema::LibTableEntry;
use crate::parser::sexp::SExpParser;

pub fn parse_lib_table(path: &Path) -> ParseOutcome<Vec<LibTableEntry>> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_lib_table_str(&content, path),
        Err(e) => ParseOutcome::Fail(format!("cannot read {}: {}", path.display(), e)),
    }
}

pub fn parse_lib_table_str(content: &str, path: &Path) -> ParseOutcome<Vec<LibTableEntry>> {
    let mut diagnostics = Vec::new();
    let mut parser = SExpParser::new(content);
    let (root, error) = parser.parse_lenient();
    if let Some(e) = &error {
        diagnostics.push(Diagnostic::at_line(path, e.line(), e.to_string()));
    }
    let Some(root) = root else {
        return ParseOutcome::Fail(format!("{}: no s-expression found", path.display()));
    };
    if !matches!(root.tag(), Some("fp_lib_table") | Some("sym_lib_table")) {
        return ParseOutcome::Fail(format!(
            "expected a lib table, found {}",
            root.tag().unwrap_or("nothing")
        ));
    }

    let mut entries = Vec::new();
    for lib in root.children("lib") {
        let Some(name) = lib.value_of("name") else {
            diagnostics.push(Diagnostic::new(path, "lib entry without a name"));
            continue;
        };
        let field = |key: &str| lib.value_of(key).unwrap_or_default().to_string();
        entries.push(LibTableEntry {
            name: name.to_string(),
            lib_type: field("type"),
            uri: field("uri"),
            options: field("options"),
            descr: field("descr"),
        });
    }
    ParseOutcome::from_parts(entries, diagnostics)
}
