//! Compute module - Canonicalization, fingerprints, graph edits and evolution.

mod canonical;
mod edit;
mod fingerprint;

pub mod evolution;

pub use canonical::*;
pub use edit::*;
pub use fingerprint::*;
