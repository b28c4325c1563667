//! Atomic write batches (spec §4.1).

use serde::{Deserialize, Serialize};

/// One mutation within a [`WriteBatch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Op {
    /// Insert or overwrite a key.
    Put(Vec<u8>, Vec<u8>),
    /// Remove a key (no-op if absent).
    Delete(Vec<u8>),
}

/// A sequence of operations applied all-or-nothing. Every indexer in the
/// workspace composes one of these and submits it once (spec §9,
/// "Concurrency across multi-index mutations") rather than issuing
/// individual `put`/`delete` calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch {
    /// An empty batch.
    pub fn new() -> Self {
        WriteBatch::default()
    }

    /// Queue a `put`.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(Op::Put(key, value));
    }

    /// Queue a `delete`.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(Op::Delete(key));
    }

    /// Merge another batch's operations into this one, preserving order.
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if no operations are queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Borrow the queued operations in order.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }
}
