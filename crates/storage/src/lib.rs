//! The KV backbone (spec §4.1): the flat keyed store every index and the
//! query engine read and write through.

#![warn(missing_docs)]

pub mod batch;
pub mod kv;

pub use batch::{Op, WriteBatch};
pub use kv::KvStore;
