use std::fs;

use tracing::info;

use crate::core::{write_atomic, HubError, Result};
use crate::library::LibraryIndex;
use crate::parser::edit::set_symbol_property;

/// Set `key = value` on `library:name` in its `.kicad_sym` file and refresh
/// that library in the index. The rest of the file is left byte-for-byte
/// unchanged. Returns `false` when the file already had that value.
pub fn bulk_edit_property(
    index: &LibraryIndex,
    library: &str,
    name: &str,
    key: &str,
    value: &str,
) -> Result<bool> {
    let file = index
        .snapshot()
        .library(library)
        .map(|lib| lib.file_path.clone())
        .ok_or_else(|| HubError::Other(format!("unknown library '{}'", library)))?;

    let content = fs::read_to_string(&file)?;
    let updated = set_symbol_property(&content, name, key, value)?;
    if updated == content {
        return Ok(false);
    }
    write_atomic(&file, updated.as_bytes())?;
    index.reload_library(&file)?;
    info!("Set {} = {:?} on {}:{}", key, value, library, name);
    Ok(true)
}
