//! The HNSW vector index and the Gorilla-compressed time-series store
//! (spec §4.3, §4.4), both layered directly on the KV backbone.

#![warn(missing_docs)]

pub mod gorilla;
pub mod timeseries;
pub mod vector;

pub use timeseries::{Aggregate, ContinuousAggregate, DataPoint, QueryOptions, TimeseriesStore};
pub use vector::{HnswIndex, SearchHit, VectorId};
