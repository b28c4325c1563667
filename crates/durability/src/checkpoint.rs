//! Atomic file writes (write `*.tmp`, fsync, rename) shared by KV
//! checkpoints, vector index persistence and CDC/time-series retention —
//! grounded on the teacher's `RunBundle`/`DatabaseHandle::checkpoint`
//! write-temp-then-rename pattern.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use weave_core::error::Result;

/// Write `bytes` to `path` atomically: write to `path.tmp`, fsync, then
/// rename over `path`.
pub fn write_atomic(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a file written by [`write_atomic`].
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_is_readable_and_leaves_no_tmp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(read_file(&path).unwrap(), b"hello");
        assert!(!path.with_extension("tmp").exists());
    }
}
