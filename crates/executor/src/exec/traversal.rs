//! Graph traversal execution (spec §4.6.2, §4.6.3): breadth-first
//! expansion over [`weave_primitives::graph::GraphIndex`]'s adjacency
//! key-space, visited-by-pk deduplication, depth-bounded emission.
//!
//! The adjacency index is global rather than partitioned by named graph
//! (see [`weave_primitives::graph::GraphIndex`]); `TraversalQuery::graph` is
//! carried through for diagnostics but does not scope the walk.

use std::collections::{HashSet, VecDeque};

use weave_core::deadline::Deadline;
use weave_core::error::Result;
use weave_core::value::Value;
use weave_primitives::graph::{Direction, GraphIndex};
use weave_storage::KvStore;

use crate::eval::{self, EvalContext, SubqueryRunner};
use crate::query::{TraversalDirection, TraversalQuery};

struct Frontier {
    vertex_pk: String,
    edge_pk: Option<String>,
    path: Vec<String>,
    path_weight: f64,
    depth: u32,
}

/// Counters exposed by `explain` for a traversal (spec §4.6.3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraversalMetrics {
    /// Total adjacency rows visited across the whole walk.
    pub edges_expanded: u64,
    /// Neighbors skipped because they were discovered at `max_depth`, where
    /// expansion stops without queuing them.
    pub pruned_last_level: u64,
    /// Candidates that failed a per-row filter before projection.
    pub filter_short_circuits: u64,
    /// Vertices dequeued at each depth, indexed by depth.
    pub frontier_processed_per_depth: Vec<u64>,
}

impl TraversalMetrics {
    fn record_depth(&mut self, depth: u32) {
        let depth = depth as usize;
        if self.frontier_processed_per_depth.len() <= depth {
            self.frontier_processed_per_depth.resize(depth + 1, 0);
        }
        self.frontier_processed_per_depth[depth] += 1;
    }
}

/// Runs a [`TraversalQuery`] end to end, reporting [`TraversalMetrics`]
/// alongside the projected rows.
pub fn execute(q: &TraversalQuery, store: &KvStore, runner: &dyn SubqueryRunner, deadline: &Deadline) -> Result<(Vec<Value>, TraversalMetrics)> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(q.start_pk.clone());

    let mut queue: VecDeque<Frontier> = VecDeque::new();
    queue.push_back(Frontier { vertex_pk: q.start_pk.clone(), edge_pk: None, path: vec![q.start_pk.clone()], path_weight: 0.0, depth: 0 });

    let mut out = Vec::new();
    let mut metrics = TraversalMetrics::default();

    while let Some(node) = queue.pop_front() {
        deadline.check()?;
        metrics.record_depth(node.depth);

        if node.depth >= q.min_depth && node.depth > 0 {
            match project_candidate(q, store, &node, runner)? {
                Some(row) => out.push(row),
                None => metrics.filter_short_circuits += 1,
            }
        }

        if node.depth >= q.max_depth {
            let neighbors = edges_for(store, &node.vertex_pk, q.direction)?;
            metrics.edges_expanded += neighbors.len() as u64;
            metrics.pruned_last_level += neighbors.iter().filter(|(pk, _, _)| !visited.contains(pk)).count() as u64;
            continue;
        }

        let neighbors = edges_for(store, &node.vertex_pk, q.direction)?;
        metrics.edges_expanded += neighbors.len() as u64;
        for (neighbor_pk, edge_pk, weight) in neighbors {
            deadline.check()?;
            if visited.contains(&neighbor_pk) {
                continue;
            }
            visited.insert(neighbor_pk.clone());
            let mut path = node.path.clone();
            path.push(neighbor_pk.clone());
            queue.push_back(Frontier {
                vertex_pk: neighbor_pk,
                edge_pk: Some(edge_pk),
                path,
                path_weight: node.path_weight + weight,
                depth: node.depth + 1,
            });
        }
    }

    Ok((out, metrics))
}

fn edges_for(store: &KvStore, vertex_pk: &str, direction: TraversalDirection) -> Result<Vec<(String, String, f64)>> {
    let mut out = Vec::new();
    if matches!(direction, TraversalDirection::Out | TraversalDirection::Any) {
        out.extend(GraphIndex::weighted_neighbors(store, vertex_pk, Direction::Out)?);
    }
    if matches!(direction, TraversalDirection::In | TraversalDirection::Any) {
        out.extend(GraphIndex::weighted_neighbors(store, vertex_pk, Direction::In)?);
    }
    Ok(out)
}

fn project_candidate(q: &TraversalQuery, store: &KvStore, node: &Frontier, runner: &dyn SubqueryRunner) -> Result<Option<Value>> {
    let Some(vertex_entity) = super::common::fetch_entity_by_pk(store, &node.vertex_pk)? else {
        return Ok(None);
    };
    let mut ctx = EvalContext::new();
    ctx.bind(q.var_vertex.clone(), vertex_entity.to_value());
    ctx.bind("__path_weight".to_string(), Value::Double(node.path_weight));
    if let Some(edge_var) = &q.var_edge {
        ctx.bind(edge_var.clone(), node.edge_pk.clone().map(Value::String).unwrap_or(Value::Null));
    }
    if let Some(path_var) = &q.var_path {
        ctx.bind(path_var.clone(), Value::Array(node.path.iter().cloned().map(Value::String).collect()));
    }
    for (name, expr) in &q.let_nodes {
        let value = eval::eval(expr, &ctx, runner)?;
        ctx.bind(name.clone(), value);
    }
    for f in &q.filters {
        if !eval::truthy(&eval::eval(f, &ctx, runner)?) {
            return Ok(None);
        }
    }
    Ok(Some(eval::eval(&q.ret, &ctx, runner)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;
    use weave_core::config::StorageConfig;
    use weave_core::entity::Entity;

    use crate::ast::Expr;

    struct NoSubqueries;
    impl SubqueryRunner for NoSubqueries {
        fn run(&self, _program: &crate::query::Program, _outer: &EvalContext<'_>) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    fn vertex(store: &KvStore, collection: &str, name: &str) -> String {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::String(name.to_string()));
        let entity = Entity::new(collection, None, fields);
        let pk = entity.pk.clone();
        let mut batch = weave_storage::WriteBatch::new();
        batch.put(weave_core::key::entity_key(collection, entity.uuid()), serde_json::to_vec(&entity).unwrap());
        store.write_batch(batch).unwrap();
        pk
    }

    fn edge(store: &KvStore, from: &str, to: &str, edge_pk: &str) {
        weighted_edge(store, from, to, edge_pk, weave_primitives::graph::DEFAULT_EDGE_WEIGHT);
    }

    fn weighted_edge(store: &KvStore, from: &str, to: &str, edge_pk: &str, weight: f64) {
        let mut batch = weave_storage::WriteBatch::new();
        GraphIndex::edge_insert(&mut batch, from, to, edge_pk, weight);
        store.write_batch(batch).unwrap();
    }

    #[test]
    fn bfs_reaches_a_two_hop_neighbor_within_max_depth() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), StorageConfig::default()).unwrap();
        let a = vertex(&store, "people", "ann");
        let b = vertex(&store, "people", "bo");
        let c = vertex(&store, "people", "cy");
        edge(&store, &a, &b, "e1");
        edge(&store, &b, &c, "e2");

        let q = TraversalQuery {
            var_vertex: "v".to_string(),
            var_edge: None,
            var_path: None,
            min_depth: 1,
            max_depth: 2,
            direction: TraversalDirection::Out,
            start_pk: a,
            graph: "social".to_string(),
            filters: vec![],
            let_nodes: vec![],
            ret: Expr::FieldAccess(Box::new(Expr::Variable("v".to_string())), "name".to_string()),
        };
        let deadline = Deadline::none();
        let (mut results, metrics) = execute(&q, &store, &NoSubqueries, &deadline).unwrap();
        results.sort_by_key(|v| v.to_string());
        assert_eq!(results, vec![Value::String("bo".to_string()), Value::String("cy".to_string())]);
        assert_eq!(metrics.edges_expanded, 2);
        assert_eq!(metrics.frontier_processed_per_depth, vec![1, 1, 1]);
    }

    #[test]
    fn min_depth_excludes_direct_neighbors() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), StorageConfig::default()).unwrap();
        let a = vertex(&store, "people", "ann");
        let b = vertex(&store, "people", "bo");
        let c = vertex(&store, "people", "cy");
        edge(&store, &a, &b, "e1");
        edge(&store, &b, &c, "e2");

        let q = TraversalQuery {
            var_vertex: "v".to_string(),
            var_edge: None,
            var_path: None,
            min_depth: 2,
            max_depth: 2,
            direction: TraversalDirection::Out,
            start_pk: a,
            graph: "social".to_string(),
            filters: vec![],
            let_nodes: vec![],
            ret: Expr::FieldAccess(Box::new(Expr::Variable("v".to_string())), "name".to_string()),
        };
        let deadline = Deadline::none();
        let (results, _metrics) = execute(&q, &store, &NoSubqueries, &deadline).unwrap();
        assert_eq!(results, vec![Value::String("cy".to_string())]);
    }

    #[test]
    fn path_weight_accumulates_across_hops() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), StorageConfig::default()).unwrap();
        let a = vertex(&store, "people", "ann");
        let b = vertex(&store, "people", "bo");
        let c = vertex(&store, "people", "cy");
        weighted_edge(&store, &a, &b, "e1", 1.5);
        weighted_edge(&store, &b, &c, "e2", 2.5);

        let q = TraversalQuery {
            var_vertex: "v".to_string(),
            var_edge: None,
            var_path: None,
            min_depth: 1,
            max_depth: 2,
            direction: TraversalDirection::Out,
            start_pk: a,
            graph: "social".to_string(),
            filters: vec![],
            let_nodes: vec![],
            ret: Expr::Variable("__path_weight".to_string()),
        };
        let deadline = Deadline::none();
        let (mut results, _metrics) = execute(&q, &store, &NoSubqueries, &deadline).unwrap();
        results.sort_by(|a, b| a.partial_cmp_value(b).unwrap());
        assert_eq!(results, vec![Value::Double(1.5), Value::Double(4.0)]);
    }
}
