//! # WeaveDB
//!
//! An embedded multi-model storage and query core: a keyed LSM-style KV
//! backbone underneath secondary (equality/range/composite) indexes, a
//! graph adjacency index, a from-scratch HNSW vector index, a
//! Gorilla-compressed time-series store, a change data capture log, and a
//! reduced-AQL query engine with five dispatchable query shapes
//! (conjunctive, disjunctive, join, traversal, vector/geo).
//!
//! # Quick start
//!
//! ```no_run
//! use weavedb::{Facade, WeaveConfig, Value};
//! use std::collections::BTreeMap;
//!
//! fn main() -> weavedb::Result<()> {
//!     let db = Facade::open("./my-data", WeaveConfig::default())?;
//!
//!     let mut fields = BTreeMap::new();
//!     fields.insert("name".to_string(), Value::String("ann".to_string()));
//!     db.upsert("users", Value::Object(fields))?;
//!
//!     let result = db.execute("FOR u IN users RETURN u.name", Default::default())?;
//!     assert_eq!(result.items, vec![Value::String("ann".to_string())]);
//!     Ok(())
//! }
//! ```
//!
//! # Layout
//!
//! | Crate | Responsibility |
//! |---|---|
//! | `weave-core` | Entities, `Value`, config, the unified error type, key layout |
//! | `weave-storage` | The keyed byte store (WAL + checkpoints via `weave-durability`) |
//! | `weave-primitives` | Secondary indexes, graph adjacency, CDC log |
//! | `weave-engine` | HNSW vector index, Gorilla time-series store |
//! | `weave-search` | BM25 full-text index |
//! | `weave-executor` | The reduced-AQL query engine |
//! | `weave-concurrency` | The SAGA coordinator |
//! | `weave-api` | [`Facade`], the single public entry point re-exported here |
//!
//! Only this crate's re-exports are a stable surface; the crates above are
//! implementation detail and may be restructured freely.

pub use weave_api::*;
