//! Vector Index Manager (spec §4.3): a from-scratch HNSW graph keyed by
//! entity primary key, with save/load persistence and pluggable distance
//! metrics.
//!
//! Grounded on the teacher's `primitives::vector::hnsw::HnswGraph` —
//! `BTreeMap` node storage, `BTreeSet` per-layer neighbor lists, a
//! `splitmix64`-seeded deterministic level assignment, and lazy (soft)
//! deletion. Simplified from the teacher's three-tier design
//! (`HnswGraph` / `CompactHnswGraph` / mmap-backed segments) down to the
//! single mutable `HnswGraph` shape: this workspace has no segment-sealing
//! or memory-mapped-recovery story, so the compaction tier has nothing to
//! plug into — see DESIGN.md.

mod distance;
mod graph;
mod persistence;

pub use distance::distance;
pub use graph::{HnswIndex, SearchHit};
pub use persistence::{load, save};

use serde::{Deserialize, Serialize};

/// A stable identifier for one vector inside an [`HnswIndex`]. Distinct from
/// the entity primary key so the graph's internal bookkeeping (levels,
/// neighbor sets) stays compact `u64` arithmetic; [`HnswIndex`] maintains
/// the bijection to primary keys itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VectorId(pub u64);
