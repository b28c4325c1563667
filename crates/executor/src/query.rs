//! The translated query shapes (spec §4.6.1, §9 "Dynamic dispatch on query
//! shapes"): one tagged variant per shape, dispatched once at execution
//! time rather than through an inheritance tree.

use serde::{Deserialize, Serialize};

use crate::ast::Expr;

/// Ascending or descending sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDir {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// A comparison operator usable in a range predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// `field <op> value`, pushed down to a range-index scan when possible.
#[derive(Debug, Clone)]
pub struct RangePredicate {
    /// Field name on the bound variable.
    pub field: String,
    /// Comparator.
    pub op: CmpOp,
    /// Right-hand side, evaluated once (constants only are pushdown-eligible).
    pub value: Expr,
}

/// `FOR var IN collection FILTER ... (AND-only)`.
#[derive(Debug, Clone)]
pub struct ConjunctiveQuery {
    /// Loop variable.
    pub var: String,
    /// Source collection.
    pub collection: String,
    /// `field == value` predicates eligible for an equality-index probe.
    pub equality_predicates: Vec<(String, Expr)>,
    /// Predicates eligible for a range-index probe.
    pub range_predicates: Vec<RangePredicate>,
    /// Everything else; evaluated as a post-filter after fetch.
    pub other_filters: Vec<Expr>,
    /// `LET name = expr` bindings, evaluated per row before `other_filters`/`ret`.
    pub let_nodes: Vec<(String, Expr)>,
    /// `SORT field ASC|DESC`, if present.
    pub order_by: Option<(String, SortDir)>,
    /// `LIMIT offset, count`.
    pub limit: Option<(u64, u64)>,
    /// `RETURN` projection expression.
    pub ret: Expr,
}

/// One DNF disjunct: a conjunction of equality atoms.
pub type Disjunct = Vec<(String, Expr)>;

/// `FOR var IN collection FILTER ... OR ...`, converted to disjunctive
/// normal form.
#[derive(Debug, Clone)]
pub struct DisjunctiveQuery {
    /// Loop variable.
    pub var: String,
    /// Source collection.
    pub collection: String,
    /// DNF disjuncts, unioned with deduplication.
    pub disjuncts: Vec<Disjunct>,
    /// Any remaining filter applied after union + fetch.
    pub post_filter: Option<Expr>,
    /// `SORT field ASC|DESC`, if present.
    pub order_by: Option<(String, SortDir)>,
    /// `LIMIT offset, count`.
    pub limit: Option<(u64, u64)>,
    /// `RETURN` projection expression.
    pub ret: Expr,
}

/// One side of a [`JoinQuery`].
#[derive(Debug, Clone)]
pub struct ForNode {
    /// Loop variable.
    pub var: String,
    /// Source collection.
    pub collection: String,
}

/// `FOR a IN x FOR b IN y FILTER ...` over exactly two `FOR`s.
#[derive(Debug, Clone)]
pub struct JoinQuery {
    /// The two `FOR` clauses, in source order.
    pub for_nodes: [ForNode; 2],
    /// Equality join key as `(left_field, right_field)`, if the filters
    /// contain `left.f == right.g`; drives a hash join when present.
    pub join_key: Option<(String, String)>,
    /// Filters referring to only the left variable, pushed to that side.
    pub left_filters: Vec<Expr>,
    /// Filters referring to only the right variable, pushed to that side.
    pub right_filters: Vec<Expr>,
    /// Every other filter, evaluated once both rows are bound.
    pub other_filters: Vec<Expr>,
    /// `LET` bindings evaluated left to right before `other_filters`/`ret`.
    pub let_nodes: Vec<(String, Expr)>,
    /// `SORT field ASC|DESC` over the joined row, if present.
    pub sort: Option<(Expr, SortDir)>,
    /// `LIMIT offset, count`.
    pub limit: Option<(u64, u64)>,
    /// `RETURN` projection expression.
    pub ret: Expr,
}

/// Edge direction relative to the traversal's starting vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    /// Follow outbound edges.
    Out,
    /// Follow inbound edges.
    In,
    /// Follow edges in either direction.
    Any,
}

/// `FOR v[, e[, p]] IN min..max DIRECTION start GRAPH name FILTER ...`: BFS.
#[derive(Debug, Clone)]
pub struct TraversalQuery {
    /// Vertex binding.
    pub var_vertex: String,
    /// Optional edge binding.
    pub var_edge: Option<String>,
    /// Optional path binding (list of vertex pks visited so far).
    pub var_path: Option<String>,
    /// Minimum depth (inclusive) a vertex must reach before emission.
    pub min_depth: u32,
    /// Maximum BFS depth.
    pub max_depth: u32,
    /// Edge direction to follow.
    pub direction: TraversalDirection,
    /// Starting vertex primary key.
    pub start_pk: String,
    /// Name of the underlying edge collection driving the adjacency index.
    pub graph: String,
    /// Filters evaluated per candidate vertex/edge/path.
    pub filters: Vec<Expr>,
    /// `LET name = expr` bindings, evaluated per candidate before `filters`/`ret`.
    pub let_nodes: Vec<(String, Expr)>,
    /// `RETURN` projection expression.
    pub ret: Expr,
}

/// A hybrid vector/structural query: an ANN search whose candidates are
/// additionally checked against a structural predicate, supplied as an
/// external callable (spec §4.6.1, "treat the geo expressions as an
/// external callable returning a boolean predicate over an entity").
#[derive(Debug, Clone)]
pub struct VectorGeoQuery {
    /// Source collection (the vector index's configured collection).
    pub collection: String,
    /// Query vector.
    pub query_vector: Vec<f32>,
    /// Number of nearest neighbors to return after the structural filter.
    pub k: usize,
    /// Post-ANN structural predicate.
    pub filters: Vec<Expr>,
    /// `RETURN` projection expression.
    pub ret: Expr,
}

/// One `Query` shape, dispatched by arm (spec §9).
#[derive(Debug, Clone)]
pub enum Query {
    /// Single `FOR` with AND-only predicates.
    Conjunctive(ConjunctiveQuery),
    /// Single `FOR` with a top-level `OR`, DNF-converted.
    Disjunctive(DisjunctiveQuery),
    /// Two `FOR`s, hash- or nested-loop-joined.
    Join(Box<JoinQuery>),
    /// Graph BFS traversal.
    Traversal(Box<TraversalQuery>),
    /// Vector ANN search plus a structural post-filter.
    VectorGeo(Box<VectorGeoQuery>),
}

/// Aggregate function recognized by `COLLECT ... AGGREGATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    /// Row count.
    Count,
    /// Sum of a numeric expression.
    Sum,
    /// Arithmetic mean of a numeric expression.
    Avg,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
}

/// `COLLECT key = expr AGGREGATE name = FUNC(expr), ... [HAVING cond]`.
#[derive(Debug, Clone)]
pub struct CollectClause {
    /// Group-key binding name and its expression.
    pub group_key: (String, Expr),
    /// `(result_name, function, argument)`. `argument` is `None` for `COUNT()`.
    pub aggregates: Vec<(String, AggFunc, Option<Expr>)>,
    /// Post-aggregation filter over the group-key and aggregate bindings.
    pub having: Option<Expr>,
    /// Final projection, evaluated with group-key and aggregate bindings in
    /// scope.
    pub ret: Expr,
}

/// One CTE execution materialized (or inlined) before the main query.
#[derive(Debug, Clone)]
pub struct CteBinding {
    /// The `WITH <name> AS (...)` name.
    pub name: String,
    /// The nested query.
    pub query: Query,
}

/// A fully parsed and translated program: zero or more CTEs, an optional
/// `COLLECT` stage layered over a conjunctive source, and the main query
/// shape.
#[derive(Debug, Clone)]
pub struct Program {
    /// `WITH` bindings, in source order.
    pub ctes: Vec<CteBinding>,
    /// `COLLECT` clause, if the main query is a single `FOR ... COLLECT`.
    pub collect: Option<CollectClause>,
    /// The main query shape.
    pub main: Query,
}
