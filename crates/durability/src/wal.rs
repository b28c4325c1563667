//! Write-ahead log: length-prefixed, CRC32-checked records, grounded on the
//! teacher's `strata-storage` WAL record framing (`crc32fast` + `byteorder`)
//! but simplified to a single append-only file per store.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use weave_core::error::{Error, Result};

/// An append-only, fsync-backed record log used to make `write_batch`
/// durable before it is applied to the in-memory KV index (spec §4.1).
pub struct Wal {
    path: PathBuf,
    file: File,
}

impl Wal {
    /// Open (creating if absent) the WAL file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(Wal { path, file })
    }

    /// Append one record: `[len: u32][crc32: u32][payload]`, fsynced before
    /// returning so the frame is durable once this call succeeds.
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        let crc = crc32fast::hash(payload);
        let mut header = Vec::with_capacity(8);
        header.write_u32::<LittleEndian>(payload.len() as u32)?;
        header.write_u32::<LittleEndian>(crc)?;
        self.file.write_all(&header)?;
        self.file.write_all(payload)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Replay every valid record in file order. A truncated trailing record
    /// (partial write from a crash) is silently dropped, matching
    /// "no operation is guaranteed to cancel mid-syscall" — WAL replay must
    /// tolerate a torn tail.
    pub fn replay(&self) -> Result<Vec<Vec<u8>>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut out = Vec::new();
        loop {
            let mut header = [0u8; 8];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(Error::from(e)),
            }
            let len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
            let crc = u32::from_le_bytes(header[4..8].try_into().unwrap());
            let mut payload = vec![0u8; len];
            if reader.read_exact(&mut payload).is_err() {
                break; // torn tail
            }
            if crc32fast::hash(&payload) != crc {
                break; // torn/corrupt tail
            }
            out.push(payload);
        }
        Ok(out)
    }

    /// Truncate the log to empty (called right after a successful
    /// checkpoint, since the checkpoint now captures everything replayed so
    /// far).
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replay_returns_records_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(b"one").unwrap();
            wal.append(b"two").unwrap();
        }
        let wal = Wal::open(&path).unwrap();
        let records = wal.replay().unwrap();
        assert_eq!(records, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn torn_tail_is_dropped_not_errored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(b"full-record").unwrap();
        }
        // Simulate a crash mid-write: append a partial frame.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&100u32.to_le_bytes()).unwrap();
            f.write_all(&0u32.to_le_bytes()).unwrap();
            f.write_all(b"short").unwrap();
        }
        let wal = Wal::open(&path).unwrap();
        let records = wal.replay().unwrap();
        assert_eq!(records, vec![b"full-record".to_vec()]);
    }

    #[test]
    fn truncate_empties_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(b"x").unwrap();
        wal.truncate().unwrap();
        assert!(wal.replay().unwrap().is_empty());
    }
}
