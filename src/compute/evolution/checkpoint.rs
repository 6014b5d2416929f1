//! JSON checkpoints of a run between generations.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::schema::{GenerationRecord, IndividualSnapshot};

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Checkpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Checkpoint JSON invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported checkpoint version {found} (expected {expected})", expected = CHECKPOINT_VERSION)]
    UnsupportedVersion { found: u32 },
    #[error("Checkpoint molecule '{text}' cannot be rebuilt")]
    UnparsableText { text: String },
}

/// Everything needed to continue a run: survivors, history and the id and
/// random-number state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// Last completed generation.
    pub generation: usize,
    /// Next identifier to allocate.
    pub next_id: u64,
    /// Seed for the random-number generator of the resumed run.
    pub reseed: u64,
    /// Seconds the run had been going when the checkpoint was taken.
    pub elapsed_seconds: f64,
    /// Survivors, best first.
    pub population: Vec<IndividualSnapshot>,
    /// One record per completed generation.
    pub records: Vec<GenerationRecord>,
}

impl Checkpoint {
    /// Write the checkpoint as pretty JSON. The file is replaced atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    /// Read a checkpoint written by [`Checkpoint::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let content = fs::read_to_string(path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: checkpoint.version,
            });
        }
        Ok(checkpoint)
    }
}
