//! The embedded public surface (spec §6): a single [`Facade`] composing the
//! KV backbone, secondary/vector/graph indexes, the time-series store, CDC
//! and the query engine. HTTP/RPC transport, clustering, and every other
//! collaborator-owned concern the spec scopes out live outside this crate;
//! `weave-api` only exposes the calls those layers would dispatch to.

#![warn(missing_docs)]

mod cdc;
mod facade;
mod timeseries;
mod vector;

pub use cdc::CdcFilters;
pub use facade::Facade;
pub use vector::VectorCollection;

pub use weave_core::config::{DistanceMetric, VectorConfig, WeaveConfig};
pub use weave_core::error::{Error, Result};
pub use weave_core::value::Value;
pub use weave_engine::timeseries::{Aggregate, DataPoint, QueryOptions};
pub use weave_engine::vector::SearchHit;
pub use weave_executor::{ExecuteOptions, ExecuteResult};
pub use weave_primitives::cdc::{CdcEvent, ChangeOp};
pub use weave_primitives::index::IndexKind;
