//! Graph adjacency index (spec §4.2 "Graph Index"): out/in edge lookups
//! layered on the same flat keyspace as every other index, so traversal
//! in `weave-executor` is just prefix scans.

use weave_core::error::Result;
use weave_core::key;
use weave_storage::{KvStore, WriteBatch};

/// Edge direction as seen from a given vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Edges leaving the vertex.
    Out,
    /// Edges entering the vertex.
    In,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
        }
    }
}

/// Maintains the `graph:out:*` / `graph:in:*` adjacency key-spaces. Each
/// adjacency value carries the edge's weight (1.0 when the edge declared
/// none) alongside the vertex at the other end (spec §3 "Graph": edges are
/// entities with `from`, `to`, and optional `weight` fields).
pub struct GraphIndex;

/// Default edge weight for edges with no declared `weight` field.
pub const DEFAULT_EDGE_WEIGHT: f64 = 1.0;

fn encode_adjacency_value(other: &str, weight: f64) -> Vec<u8> {
    format!("{weight}\0{other}").into_bytes()
}

fn decode_adjacency_value(bytes: &[u8]) -> (String, f64) {
    let text = String::from_utf8_lossy(bytes);
    match text.split_once('\0') {
        Some((w, other)) => (other.to_string(), w.parse().unwrap_or(DEFAULT_EDGE_WEIGHT)),
        None => (text.to_string(), DEFAULT_EDGE_WEIGHT),
    }
}

impl GraphIndex {
    /// Queue the adjacency rows for one directed edge `from -> to` (edge
    /// primary key `edge_pk`, e.g. the edge entity's own UUID) into `batch`,
    /// carrying `weight` for weighted-path traversal.
    pub fn edge_insert(batch: &mut WriteBatch, from: &str, to: &str, edge_pk: &str, weight: f64) {
        batch.put(key::graph_adjacency_key("out", from, edge_pk), encode_adjacency_value(to, weight));
        batch.put(key::graph_adjacency_key("in", to, edge_pk), encode_adjacency_value(from, weight));
    }

    /// Queue removal of one directed edge's adjacency rows into `batch`.
    pub fn edge_delete(batch: &mut WriteBatch, from: &str, to: &str, edge_pk: &str) {
        batch.delete(key::graph_adjacency_key("out", from, edge_pk));
        batch.delete(key::graph_adjacency_key("in", to, edge_pk));
    }

    /// Neighboring vertices reachable from `vertex` in `direction`, paired
    /// with the edge primary key that connects them.
    pub fn neighbors(store: &KvStore, vertex: &str, direction: Direction) -> Result<Vec<(String, String)>> {
        Ok(Self::weighted_neighbors(store, vertex, direction)?
            .into_iter()
            .map(|(other, edge_pk, _weight)| (other, edge_pk))
            .collect())
    }

    /// Like [`Self::neighbors`], but also returns each edge's weight so
    /// callers can accumulate path cost during a weighted traversal.
    pub fn weighted_neighbors(store: &KvStore, vertex: &str, direction: Direction) -> Result<Vec<(String, String, f64)>> {
        let prefix = key::graph_adjacency_prefix(direction.as_str(), vertex);
        let mut out = Vec::new();
        store.scan_prefix(&prefix, |k, v| {
            let edge_pk = String::from_utf8_lossy(&k[prefix.len()..]).to_string();
            let (other, weight) = decode_adjacency_value(v);
            out.push((other, edge_pk, weight));
            true
        })?;
        Ok(out)
    }
}
