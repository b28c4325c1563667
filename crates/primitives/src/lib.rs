//! Secondary-model primitives layered on the KV backbone: secondary
//! indexes, graph adjacency, and the CDC log (spec §4.2, §4.5).

#![warn(missing_docs)]

pub mod cdc;
pub mod graph;
pub mod index;

pub use cdc::{CdcEvent, CdcLog, ChangeOp};
pub use graph::{Direction, GraphIndex};
pub use index::{IndexDef, IndexKind, IndexManager};
