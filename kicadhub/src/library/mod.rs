pub mod footprints;
pub mod index;

pub use footprints::{FootprintIndex, FootprintLibrary, FootprintSnapshot};
pub use index::{LibraryIndex, LibrarySnapshot, ScanReport, SymbolLibrary};
