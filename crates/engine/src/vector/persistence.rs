//! Save/load for a whole [`HnswIndex`] (spec §4.3 `save_path` /
//! `load_on_startup` / `save_on_shutdown`). Grounded on the same
//! write-temp-then-fsync-then-rename primitive the KV backbone uses for
//! checkpoints (`weave_durability::write_atomic`), so a crash mid-save
//! never leaves a torn index file on disk.

use std::path::Path;

use weave_core::error::Result;
use weave_durability::checkpoint::{read_file, write_atomic};

use super::graph::HnswIndex;

/// Serialize `index` and atomically write it to `path`.
pub fn save(index: &HnswIndex, path: impl AsRef<Path>) -> Result<()> {
    let bytes = serde_json::to_vec(index)?;
    write_atomic(path, &bytes)
}

/// Load an index previously written by [`save`].
pub fn load(path: impl AsRef<Path>) -> Result<HnswIndex> {
    let bytes = read_file(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
