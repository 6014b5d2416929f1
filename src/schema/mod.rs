//! Schema module - Configuration, molecule and record types.

mod config;
mod molecule;
mod records;
mod smiles;

pub use config::*;
pub use molecule::*;
pub use records::*;
pub use smiles::*;
