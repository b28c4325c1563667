//! The HNSW graph itself (spec §4.3). Grounded on the teacher's
//! `HnswGraph`: `BTreeMap` node storage and `BTreeSet` per-layer neighbor
//! sets for deterministic iteration order, a `splitmix64`-seeded level
//! assignment, and lazy (soft) deletion via a tombstone timestamp rather
//! than physical removal — a deleted node stays reachable for traversal
//! but is excluded from results and from re-entry-point selection.
//!
//! The search and insertion algorithms (`greedy_search_to_layer`,
//! `search_layer`, `select_neighbors`, `prune_neighbors_for`,
//! `insert_into_graph`) follow the teacher's implementation of the HNSW
//! paper (Malkov & Yashunin) almost line for line; the only structural
//! change is that every comparison works in distance terms (lower is
//! closer) instead of the teacher's similarity terms (higher is closer),
//! so candidate/result heap orderings are inverted accordingly.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use serde::{Deserialize, Serialize};
use weave_core::config::DistanceMetric;
use weave_core::error::{Error, Result};

use super::distance::distance;
use super::VectorId;

/// One match from [`HnswIndex::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Entity primary key of the matched vector.
    pub pk: String,
    /// Distance to the query vector under the index's configured metric.
    /// Lower is closer.
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    level: usize,
    neighbors: Vec<BTreeSet<VectorId>>,
    deleted_at: Option<u64>,
}

/// Deterministic splitmix64, seeded once per index so rebuilt indexes
/// assign the same levels to the same insertion sequence.
struct LevelAssigner {
    state: u64,
    m: usize,
}

impl LevelAssigner {
    fn new(m: usize) -> Self {
        Self { state: 42, m }
    }

    fn next_level(&mut self) -> usize {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^= z >> 31;
        let uniform = (z >> 11) as f64 / (1u64 << 53) as f64;
        let ml = 1.0 / (self.m as f64).ln();
        (-uniform.max(f64::MIN_POSITIVE).ln() * ml).floor() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoredId {
    id: VectorId,
    distance: f32,
}

impl Eq for ScoredId {}

impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A from-scratch HNSW index keyed by entity primary key. Serializable as a
/// whole via [`super::persistence`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    dimension: usize,
    metric: DistanceMetric,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    nodes: BTreeMap<VectorId, HnswNode>,
    embeddings: BTreeMap<VectorId, Vec<f32>>,
    pk_to_id: BTreeMap<String, VectorId>,
    id_to_pk: BTreeMap<VectorId, String>,
    entry_point: Option<VectorId>,
    next_id: u64,
    #[serde(skip, default = "default_assigner")]
    assigner: LevelAssigner,
}

fn default_assigner() -> LevelAssigner {
    LevelAssigner::new(16)
}

impl HnswIndex {
    /// A new empty index. `m` is the bidirectional link count per layer
    /// above the base layer (base layer uses `2*m`); `ef_construction` and
    /// `ef_search` are the candidate-list widths used at build and query
    /// time respectively.
    pub fn new(dimension: usize, metric: DistanceMetric, m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            dimension,
            metric,
            m: m.max(1),
            m_max0: m.max(1) * 2,
            ef_construction: ef_construction.max(1),
            ef_search: ef_search.max(1),
            nodes: BTreeMap::new(),
            embeddings: BTreeMap::new(),
            pk_to_id: BTreeMap::new(),
            id_to_pk: BTreeMap::new(),
            entry_point: None,
            next_id: 0,
            assigner: LevelAssigner::new(m.max(1)),
        }
    }

    /// Fixed vector dimension this index was built with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Distance metric this index was built with.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Number of live (non-deleted) vectors.
    pub fn len(&self) -> usize {
        self.nodes.values().filter(|n| n.deleted_at.is_none()).count()
    }

    /// True if the index holds no live vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dist(&self, a: &[f32], b: &[f32]) -> f32 {
        distance(a, b, self.metric)
    }

    fn embedding_of(&self, id: VectorId) -> &[f32] {
        self.embeddings.get(&id).expect("embedding missing for live node")
    }

    fn is_live(&self, id: VectorId) -> bool {
        self.nodes.get(&id).map(|n| n.deleted_at.is_none()).unwrap_or(false)
    }

    /// Insert or replace the vector for `pk`. Replacing removes the old
    /// vector's graph presence first so the index never carries two
    /// entries for one primary key.
    pub fn insert(&mut self, pk: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::invalid(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        if self.pk_to_id.contains_key(pk) {
            self.remove_by_pk(pk)?;
        }

        let id = VectorId(self.next_id);
        self.next_id += 1;
        let level = self.assigner.next_level();

        self.embeddings.insert(id, vector);
        self.nodes.insert(
            id,
            HnswNode {
                level,
                neighbors: vec![BTreeSet::new(); level + 1],
                deleted_at: None,
            },
        );
        self.pk_to_id.insert(pk.to_string(), id);
        self.id_to_pk.insert(id, pk.to_string());

        self.insert_into_graph(id, level);

        if self.entry_point.is_none() {
            self.entry_point = Some(id);
        } else {
            let entry_level = self.nodes[&self.entry_point.unwrap()].level;
            if level > entry_level {
                self.entry_point = Some(id);
            }
        }
        Ok(())
    }

    fn insert_into_graph(&mut self, id: VectorId, level: usize) {
        let entry = match self.entry_point {
            Some(e) => e,
            None => return,
        };
        let vector = self.embedding_of(id).to_vec();
        let entry_level = self.nodes[&entry].level;

        let mut current = entry;
        for layer in ((level + 1)..=entry_level).rev() {
            current = self.greedy_search_to_layer(&vector, current, layer);
        }

        for layer in (0..=level.min(entry_level)).rev() {
            let candidates = self.search_layer(&vector, current, layer, self.ef_construction);
            let max_conn = if layer == 0 { self.m_max0 } else { self.m };
            let selected = self.select_neighbors(&candidates, max_conn);

            for &neighbor in &selected {
                self.nodes.get_mut(&id).unwrap().neighbors[layer].insert(neighbor);
                if let Some(n) = self.nodes.get_mut(&neighbor) {
                    if layer < n.neighbors.len() {
                        n.neighbors[layer].insert(id);
                        self.prune_neighbors_for(neighbor, layer, max_conn);
                    }
                }
            }
            if let Some(&best) = selected.iter().next() {
                current = best;
            }
        }
    }

    fn prune_neighbors_for(&mut self, id: VectorId, layer: usize, max_conn: usize) {
        let neighbor_ids: Vec<VectorId> = self.nodes[&id].neighbors[layer].iter().copied().collect();
        if neighbor_ids.len() <= max_conn {
            return;
        }
        let vector = self.embedding_of(id).to_vec();
        let mut scored: Vec<ScoredId> = neighbor_ids
            .into_iter()
            .map(|n| ScoredId { id: n, distance: self.dist(&vector, self.embedding_of(n)) })
            .collect();
        scored.sort();
        scored.truncate(max_conn);
        self.nodes.get_mut(&id).unwrap().neighbors[layer] = scored.into_iter().map(|s| s.id).collect();
    }

    fn select_neighbors(&self, candidates: &[ScoredId], max_conn: usize) -> BTreeSet<VectorId> {
        candidates.iter().take(max_conn).map(|c| c.id).collect()
    }

    fn greedy_search_to_layer(&self, query: &[f32], entry: VectorId, layer: usize) -> VectorId {
        let mut current = entry;
        let mut current_dist = self.dist(query, self.embedding_of(current));
        loop {
            let mut improved = false;
            if let Some(node) = self.nodes.get(&current) {
                if layer < node.neighbors.len() {
                    for &neighbor in &node.neighbors[layer] {
                        if !self.is_live(neighbor) {
                            continue;
                        }
                        let d = self.dist(query, self.embedding_of(neighbor));
                        if d < current_dist {
                            current = neighbor;
                            current_dist = d;
                            improved = true;
                        }
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search at one layer (HNSW paper Algorithm 2). Returns up to `ef`
    /// candidates sorted by ascending distance.
    fn search_layer(&self, query: &[f32], entry: VectorId, layer: usize, ef: usize) -> Vec<ScoredId> {
        let mut visited = BTreeSet::new();
        visited.insert(entry);

        let entry_scored = ScoredId { id: entry, distance: self.dist(query, self.embedding_of(entry)) };
        let mut candidates = BinaryHeap::new();
        candidates.push(std::cmp::Reverse(entry_scored));

        let mut results: BTreeSet<ScoredId> = BTreeSet::new();
        if self.is_live(entry) {
            results.insert(entry_scored);
        }

        while let Some(std::cmp::Reverse(current)) = candidates.pop() {
            let worst = results.iter().next_back().copied();
            if let Some(worst) = worst {
                if current.distance > worst.distance && results.len() >= ef {
                    break;
                }
            }

            if let Some(node) = self.nodes.get(&current.id) {
                if layer >= node.neighbors.len() {
                    continue;
                }
                for &neighbor in &node.neighbors[layer] {
                    if !visited.insert(neighbor) {
                        continue;
                    }
                    let d = self.dist(query, self.embedding_of(neighbor));
                    let scored = ScoredId { id: neighbor, distance: d };
                    let worst = results.iter().next_back().copied();
                    if results.len() < ef || worst.map(|w| d < w.distance).unwrap_or(true) {
                        candidates.push(std::cmp::Reverse(scored));
                        if self.is_live(neighbor) {
                            results.insert(scored);
                            if results.len() > ef {
                                if let Some(&last) = results.iter().next_back() {
                                    results.remove(&last);
                                }
                            }
                        }
                    }
                }
            }
        }

        results.into_iter().collect()
    }

    /// Remove the vector stored for `pk`, if any. Soft-deletes the node:
    /// it stays in the graph for traversal by other insertions but is
    /// excluded from search results and from entry-point re-selection.
    pub fn remove_by_pk(&mut self, pk: &str) -> Result<()> {
        let id = match self.pk_to_id.remove(pk) {
            Some(id) => id,
            None => return Ok(()),
        };
        self.id_to_pk.remove(&id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.deleted_at = Some(now_millis());
        }
        if self.entry_point == Some(id) {
            self.entry_point = self.nodes.iter().find(|(_, n)| n.deleted_at.is_none()).map(|(id, _)| *id);
        }
        Ok(())
    }

    /// True if `pk` currently has a live vector.
    pub fn contains(&self, pk: &str) -> bool {
        self.pk_to_id.get(pk).map(|id| self.is_live(*id)).unwrap_or(false)
    }

    /// Approximate k-nearest-neighbor search. Returns up to `k` hits sorted
    /// by ascending distance.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(Error::invalid(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }
        let entry = match self.entry_point {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };
        let entry_level = self.nodes[&entry].level;
        let mut current = entry;
        for layer in (1..=entry_level).rev() {
            current = self.greedy_search_to_layer(query, current, layer);
        }

        let ef = self.ef_search.max(k);
        let candidates = self.search_layer(query, current, 0, ef);

        Ok(candidates
            .into_iter()
            .take(k)
            .map(|c| SearchHit { pk: self.id_to_pk[&c.id].clone(), distance: c.distance })
            .collect())
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
