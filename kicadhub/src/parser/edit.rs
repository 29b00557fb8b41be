//! In-place edits of symbol properties in `.kicad_sym` text.
//!
//! Edits splice the source text instead of re-serializing the tree, so
//! everything outside the touched value token (formatting, comments, order
//! of other properties) is preserved byte for byte.

use thiserror::Error;

use crate::parser::sexp::{quote, ParseError, SExpParser, Spanned};

#[derive(Debug, Error, PartialEq)]
pub enum EditError {
    #[error("malformed s-expression: {0}")]
    Parse(#[from] ParseError),
    #[error("malformed s-expression at byte {0}")]
    Malformed(usize),
    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),
}

fn atom_text(node: &Spanned, index: usize) -> Option<&str> {
    node.atom_at(index).and_then(Spanned::as_atom)
}

/// Set `key` to `value` on top-level symbol `symbol`. An existing
/// `(property "key" ...)` keeps everything but its value token; a missing one
/// is inserted after the symbol's last property with matching indentation.
pub fn set_symbol_property(
    content: &str,
    symbol: &str,
    key: &str,
    value: &str,
) -> Result<String, EditError> {
    let root = SExpParser::new(content).parse_spanned()?;
    if root.as_atom().is_some() {
        return Err(EditError::Malformed(root.start));
    }
    let target = root
        .lists()
        .find(|n| n.tag() == Some("symbol") && atom_text(n, 1) == Some(symbol))
        .ok_or_else(|| EditError::SymbolNotFound(symbol.to_string()))?;

    let properties: Vec<&Spanned> = target.lists().filter(|n| n.tag() == Some("property")).collect();

    if let Some(existing) = properties.iter().find(|p| atom_text(p, 1) == Some(key)) {
        return Ok(match existing.atom_at(2) {
            Some(token) => splice(content, token.start, token.end, &quote(value)),
            None => {
                let key_end = existing
                    .atom_at(1)
                    .ok_or(EditError::Malformed(existing.start))?
                    .end;
                splice(content, key_end, key_end, &format!(" {}", quote(value)))
            }
        });
    }

    let (anchor, indent) = match properties.last() {
        Some(last) => (last.end, line_indent(content, last.start)),
        None => {
            let name_end = target.atom_at(1).ok_or(EditError::Malformed(target.start))?.end;
            (name_end, format!("{}  ", line_indent(content, target.start)))
        }
    };
    let insertion = format!(
        "\n{indent}(property {} {} (at 0 0 0)\n{indent}  (effects (font (size 1.27 1.27)) hide)\n{indent})",
        quote(key),
        quote(value),
    );
    Ok(splice(content, anchor, anchor, &insertion))
}

fn splice(content: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut out = String::with_capacity(content.len() + replacement.len());
    out.push_str(&content[..start]);
    out.push_str(replacement);
    out.push_str(&content[end..]);
    out
}

/// Leading whitespace of the line containing byte `pos`.
fn line_indent(content: &str, pos: usize) -> String {
    let line_start = content[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    content[line_start..pos]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = "(kicad_symbol_lib (version 20220914)\n  (symbol \"R\" (in_bom yes)\n    (property \"Reference\" \"R\" (at 0 0 0)\n      (effects (font (size 1.27 1.27)))\n    )\n    (property \"MPN\" \"OLD\"   (at 0 0 0)) ; extra tokens kept\n    (symbol \"R_1_1\" (pin passive line (number \"1\")))\n  )\n  (symbol \"C\" (property \"MPN\" \"OLD\"))\n)\n";

    #[test]
    fn test_replace_existing_value_only() {
        let out = set_symbol_property(LIB, "R", "MPN", "RC0603-10K").unwrap();
        assert_eq!(out, LIB.replacen("\"OLD\"", "\"RC0603-10K\"", 1));
        // the other symbol's MPN is untouched
        assert!(out.contains("(symbol \"C\" (property \"MPN\" \"OLD\"))"));
    }

    #[test]
    fn test_insert_after_last_property() {
        let out = set_symbol_property(LIB, "R", "Tolerance", "1%").unwrap();
        let mpn = out.find("\"MPN\"").unwrap();
        let tol = out.find("(property \"Tolerance\" \"1%\"").unwrap();
        let unit = out.find("(symbol \"R_1_1\"").unwrap();
        assert!(mpn < tol && tol < unit);
        assert!(out.contains("\n    (property \"Tolerance\""));
        assert!(out.starts_with(&LIB[..LIB.find(") ; extra").unwrap() + 1]));
    }

    #[test]
    fn test_edit_is_idempotent() {
        let once = set_symbol_property(LIB, "R", "Tolerance", "1%").unwrap();
        let twice = set_symbol_property(&once, "R", "Tolerance", "1%").unwrap();
        assert_eq!(once, twice);
        let again = set_symbol_property(LIB, "R", "MPN", "X").unwrap();
        assert_eq!(again, set_symbol_property(&again, "R", "MPN", "X").unwrap());
    }

    #[test]
    fn test_quotes_are_escaped() {
        let out = set_symbol_property(LIB, "C", "MPN", "a \"b\"").unwrap();
        assert!(out.contains(r#"(property "MPN" "a \"b\"")"#));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            set_symbol_property("(kicad_symbol_lib (symbol \"R\"", "R", "MPN", "x"),
            Err(EditError::Parse(_))
        ));
        assert_eq!(
            set_symbol_property("bare", "R", "MPN", "x"),
            Err(EditError::Malformed(0))
        );
    }

    #[test]
    fn test_unknown_symbol() {
        assert_eq!(
            set_symbol_property(LIB, "Nope", "MPN", "x"),
            Err(EditError::SymbolNotFound("Nope".into()))
        );
    }
}
