//! Durability primitives: write-ahead log framing, atomic file writes and
//! block compression. Sits directly above `weave-core`; `weave-storage`
//! builds the KV backbone's `get`/`put`/`scan_prefix`/`checkpoint` contract
//! on top of these.

#![warn(missing_docs)]

pub mod checkpoint;
pub mod compression;
pub mod wal;

pub use checkpoint::{read_file, write_atomic};
pub use wal::Wal;
