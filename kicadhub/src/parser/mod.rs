pub mod edit;
pub mod footprint;
pub mod lib_table;
pub mod outcome;
pub mod schema;
pub mod schematic;
pub mod sexp;
pub mod symbol_lib;

// Re-export for convenience
pub use footprint::FootprintParser;
pub use lib_table::parse_lib_table;
pub use outcome::{Diagnostic, ParseOutcome};
pub use schema::*;
pub use schematic::{SchematicHierarchy, SchematicParser, SheetTree};
pub use sexp::{ParseError, SExp, SExpParser};
pub use symbol_lib::SymbolLibParser;
