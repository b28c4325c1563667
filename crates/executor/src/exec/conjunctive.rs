//! Conjunctive execution (spec §4.6.2): leading equality/range predicate
//! served from an index when one is declared, everything else applied as a
//! post-filter; `SORT`/`LIMIT` applied after fetch.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use weave_core::deadline::Deadline;
use weave_core::error::{Error, Result};
use weave_core::value::Value;
use weave_primitives::index::{IndexKind, IndexManager};
use weave_search::FullTextIndex;
use weave_storage::KvStore;

use crate::ast::Expr;
use crate::eval::{self, EvalContext, SubqueryRunner};
use crate::optimizer::ExplainMode;
use crate::query::{CmpOp, ConjunctiveQuery, RangePredicate, SortDir};

/// One fetched row: the loop variable's bound value plus any `LET` bindings,
/// already filtered but not yet sorted, limited or projected. Used directly
/// by the `COLLECT` stage; [`execute`] turns it into a final projection.
pub struct Row {
    /// Value bound to the query's loop variable.
    pub var_value: Value,
    /// `LET` bindings evaluated for this row, in declaration order.
    pub let_bindings: Vec<(String, Value)>,
    /// BM25 score, bound to `__bm25_score`, when a `FULLTEXT(...)` predicate
    /// drove candidate selection for this row.
    pub bm25_score: Option<f32>,
}

impl Row {
    /// Builds an [`EvalContext`] with this row's bindings in scope.
    pub fn context<'a>(&self, var: &str) -> EvalContext<'a> {
        let mut ctx = EvalContext::new();
        ctx.bind(var.to_string(), self.var_value.clone());
        if let Some(score) = self.bm25_score {
            ctx.bind("__bm25_score".to_string(), Value::Double(score as f64));
        }
        for (name, value) in &self.let_bindings {
            ctx.bind(name.clone(), value.clone());
        }
        ctx
    }
}

/// Applies every predicate/`LET` binding to one candidate value, returning
/// `None` if it is filtered out. `bm25_score` is the score the candidate was
/// fetched with, if a `FULLTEXT(...)` predicate drove candidate selection.
pub fn row_from_value(q: &ConjunctiveQuery, var_value: Value, bm25_score: Option<f32>, runner: &dyn SubqueryRunner) -> Result<Option<Row>> {
    let mut ctx = EvalContext::new();
    ctx.bind(q.var.clone(), var_value.clone());
    if let Some(score) = bm25_score {
        ctx.bind("__bm25_score".to_string(), Value::Double(score as f64));
    }

    if !passes_equality(&var_value, &q.equality_predicates, &ctx, runner)? {
        return Ok(None);
    }
    if !passes_range(&var_value, &q.range_predicates, &ctx, runner)? {
        return Ok(None);
    }

    let mut let_bindings = Vec::with_capacity(q.let_nodes.len());
    for (name, expr) in &q.let_nodes {
        let value = eval::eval(expr, &ctx, runner)?;
        ctx.bind(name.clone(), value.clone());
        let_bindings.push((name.clone(), value));
    }

    for f in &q.other_filters {
        if !eval::truthy(&eval::eval(f, &ctx, runner)?) {
            return Ok(None);
        }
    }
    Ok(Some(Row { var_value, let_bindings, bm25_score }))
}

/// Fetches and filters rows, applying `LET` bindings, but does not sort,
/// limit or project — the shape `COLLECT` needs to group over. Also reports
/// which [`ExplainMode`] served the scan.
pub fn fetch_rows(q: &ConjunctiveQuery, store: &KvStore, indexes: &IndexManager, allow_full_scan: bool, runner: &dyn SubqueryRunner, deadline: &Deadline) -> Result<(Vec<Row>, ExplainMode)> {
    let (candidates, scores, mode) = candidate_pks(q, store, indexes, allow_full_scan)?;
    let mut out = Vec::new();
    for pk in candidates {
        deadline.check()?;
        let Some(entity) = super::common::fetch_entity(store, &q.collection, &pk)? else {
            continue;
        };
        let score = scores.as_ref().and_then(|m| m.get(&pk).copied());
        if let Some(row) = row_from_value(q, super::common::entity_value(&entity), score, runner)? {
            out.push(row);
        }
    }
    Ok((out, mode))
}

/// Sorts, limits and projects already-filtered rows.
pub fn finish(q: &ConjunctiveQuery, mut rows: Vec<Row>, runner: &dyn SubqueryRunner, deadline: &Deadline) -> Result<Vec<Value>> {
    if let Some((field, dir)) = &q.order_by {
        rows.sort_by(|a, b| {
            let av = a.var_value.get_path(field);
            let bv = b.var_value.get_path(field);
            let ord = match (av, bv) {
                (Some(x), Some(y)) => x.partial_cmp_value(y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if matches!(dir, SortDir::Desc) {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    if let Some((offset, count)) = q.limit {
        let start = offset as usize;
        let end = start.saturating_add(count as usize);
        rows = rows.into_iter().skip(start).take(end.saturating_sub(start)).collect();
    }

    rows.iter()
        .map(|row| {
            deadline.check()?;
            let ctx = row.context(&q.var);
            eval::eval(&q.ret, &ctx, runner)
        })
        .collect()
}

/// Runs a [`ConjunctiveQuery`] end to end: fetch, sort, limit, project.
/// Returns the [`ExplainMode`] that served the scan alongside the results.
pub fn execute(q: &ConjunctiveQuery, store: &KvStore, indexes: &IndexManager, allow_full_scan: bool, runner: &dyn SubqueryRunner, deadline: &Deadline) -> Result<(Vec<Value>, ExplainMode)> {
    let (rows, mode) = fetch_rows(q, store, indexes, allow_full_scan, runner, deadline)?;
    Ok((finish(q, rows, runner, deadline)?, mode))
}

/// A single-column equality or a full-tuple composite predicate eligible to
/// drive candidate selection off an index.
enum IndexCandidate<'a> {
    Equality { field: &'a str, value: &'a Value },
    Composite { columns: &'a [String], values: Vec<&'a Value> },
}

fn candidate_pks(q: &ConjunctiveQuery, store: &KvStore, indexes: &IndexManager, allow_full_scan: bool) -> Result<(Vec<String>, Option<BTreeMap<String, f32>>, ExplainMode)> {
    if let Some((field, query)) = fulltext_predicate(q) {
        let hits = FullTextIndex::search(store, &q.collection, &field, &query, crate::optimizer::DEFAULT_MAX_PROBE)?;
        let scores: BTreeMap<String, f32> = hits.iter().cloned().collect();
        let pks = hits.into_iter().map(|(pk, _)| pk).collect();
        return Ok((pks, Some(scores), ExplainMode::IndexOptimized));
    }

    let mut candidates: Vec<IndexCandidate<'_>> = Vec::new();
    for (field, expr) in &q.equality_predicates {
        if let Expr::Literal(value) = expr {
            if has_index(indexes, &q.collection, field, IndexKind::Equality) {
                candidates.push(IndexCandidate::Equality { field, value });
            }
        }
    }
    for def in indexes.indexes_for(&q.collection) {
        if def.kind != IndexKind::Composite {
            continue;
        }
        let mut values = Vec::with_capacity(def.columns.len());
        for col in &def.columns {
            let Some((_, expr)) = q.equality_predicates.iter().find(|(f, _)| f == col) else {
                break;
            };
            let Expr::Literal(value) = expr else { break };
            values.push(value);
        }
        if values.len() == def.columns.len() {
            candidates.push(IndexCandidate::Composite { columns: &def.columns, values });
        }
    }

    if !candidates.is_empty() {
        let mut estimates = Vec::with_capacity(candidates.len());
        for (slot, candidate) in candidates.iter().enumerate() {
            let est = match candidate {
                IndexCandidate::Equality { field, value } => {
                    crate::optimizer::estimate_equality(store, indexes, &q.collection, field, value, crate::optimizer::DEFAULT_MAX_PROBE)?
                }
                IndexCandidate::Composite { columns, values } => {
                    let owned: Vec<Value> = values.iter().map(|v| (*v).clone()).collect();
                    crate::optimizer::estimate_composite(store, indexes, &q.collection, columns, &owned, crate::optimizer::DEFAULT_MAX_PROBE)?
                }
            };
            estimates.push((slot, est));
        }
        let order = crate::optimizer::order_by_selectivity(estimates);
        let mode = if candidates.len() > 1 { ExplainMode::IndexParallel } else { ExplainMode::IndexOptimized };
        let pks = match &candidates[order[0]] {
            IndexCandidate::Equality { field, value } => indexes.lookup_equality(store, &q.collection, field, value)?,
            IndexCandidate::Composite { columns, values } => {
                let owned: Vec<Value> = values.iter().map(|v| (*v).clone()).collect();
                indexes.lookup_composite(store, &q.collection, columns, &owned)?
            }
        };
        return Ok((pks, None, mode));
    }
    for rp in &q.range_predicates {
        if has_index(indexes, &q.collection, &rp.field, IndexKind::Range) {
            if let Expr::Literal(value) = &rp.value {
                let (lower, upper) = range_bounds(rp.op, value);
                let pks = indexes.lookup_range(store, &q.collection, &rp.field, lower.as_ref(), upper.as_ref())?;
                return Ok((pks, None, ExplainMode::IndexRangeAware));
            }
        }
    }
    if !allow_full_scan {
        return Err(Error::invalid(format!(
            "query on collection '{}' has no usable index and full scans are not allowed",
            q.collection
        )));
    }
    Ok((super::common::scan_collection_pks(store, &q.collection)?, None, ExplainMode::FullScanFallback))
}

/// Detects a `FULLTEXT(var.field, "query")` predicate over this query's loop
/// variable among `other_filters`, so it can drive candidate selection
/// instead of a full collection scan.
fn fulltext_predicate(q: &ConjunctiveQuery) -> Option<(String, String)> {
    for f in &q.other_filters {
        let Expr::FunctionCall(name, args) = f else { continue };
        if !name.eq_ignore_ascii_case("FULLTEXT") {
            continue;
        }
        let [Expr::FieldAccess(base, field), Expr::Literal(Value::String(query))] = args.as_slice() else { continue };
        if matches!(base.as_ref(), Expr::Variable(v) if v == &q.var) {
            return Some((field.clone(), query.clone()));
        }
    }
    None
}

fn has_index(indexes: &IndexManager, collection: &str, column: &str, kind: IndexKind) -> bool {
    indexes.indexes_for(collection).iter().any(|d| d.kind == kind && d.columns.len() == 1 && d.columns[0] == column)
}

fn range_bounds(op: CmpOp, value: &Value) -> (Option<Value>, Option<Value>) {
    match op {
        CmpOp::Gt | CmpOp::Ge => (Some(value.clone()), None),
        CmpOp::Lt | CmpOp::Le => (None, Some(value.clone())),
        CmpOp::Eq | CmpOp::Neq => (None, None),
    }
}

fn passes_equality(var_value: &Value, preds: &[(String, Expr)], ctx: &EvalContext<'_>, runner: &dyn SubqueryRunner) -> Result<bool> {
    for (field, value_expr) in preds {
        let actual = var_value.get_path(field).cloned().unwrap_or(Value::Null);
        let expected = eval::eval(value_expr, ctx, runner)?;
        if !actual.json_eq(&expected) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn passes_range(var_value: &Value, preds: &[crate::query::RangePredicate], ctx: &EvalContext<'_>, runner: &dyn SubqueryRunner) -> Result<bool> {
    for rp in preds {
        let actual = var_value.get_path(&rp.field).cloned().unwrap_or(Value::Null);
        let expected = eval::eval(&rp.value, ctx, runner)?;
        let Some(ord) = actual.partial_cmp_value(&expected) else {
            return Ok(false);
        };
        let holds = match rp.op {
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Neq => ord != Ordering::Equal,
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;
    use weave_core::config::StorageConfig;
    use weave_core::entity::Entity;
    use weave_primitives::index::IndexDef;

    struct NoSubqueries;
    impl SubqueryRunner for NoSubqueries {
        fn run(&self, _program: &crate::query::Program, _outer: &EvalContext<'_>) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    fn store_with(rows: &[(&str, i64, &str)]) -> (tempfile::TempDir, KvStore, IndexManager) {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), StorageConfig::default()).unwrap();
        let mut mgr = IndexManager::new();
        mgr.create_index(IndexDef::equality("users", "country"));
        for (name, age, country) in rows {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), Value::String(name.to_string()));
            fields.insert("age".to_string(), Value::Int(*age));
            fields.insert("country".to_string(), Value::String(country.to_string()));
            let entity = Entity::new("users", None, fields);
            let mut batch = weave_storage::WriteBatch::new();
            batch.put(weave_core::key::entity_key("users", entity.uuid()), serde_json::to_vec(&entity).unwrap());
            mgr.index_insert(&mut batch, "users", entity.uuid(), &entity.fields).unwrap();
            store.write_batch(batch).unwrap();
        }
        (dir, store, mgr)
    }

    #[test]
    fn equality_predicate_uses_the_index_and_returns_matches() {
        let (_d, store, mgr) = store_with(&[("ann", 30, "US"), ("bo", 40, "FR")]);
        let q = ConjunctiveQuery {
            var: "u".to_string(),
            collection: "users".to_string(),
            equality_predicates: vec![("country".to_string(), Expr::Literal(Value::String("US".to_string())))],
            range_predicates: vec![],
            other_filters: vec![],
            let_nodes: vec![],
            order_by: None,
            limit: None,
            ret: Expr::FieldAccess(Box::new(Expr::Variable("u".to_string())), "name".to_string()),
        };
        let deadline = Deadline::none();
        let (results, mode) = execute(&q, &store, &mgr, false, &NoSubqueries, &deadline).unwrap();
        assert_eq!(results, vec![Value::String("ann".to_string())]);
        assert_eq!(mode, ExplainMode::IndexOptimized);
    }

    #[test]
    fn unindexed_field_falls_back_to_full_scan() {
        let (_d, store, mgr) = store_with(&[("ann", 30, "US"), ("bo", 40, "FR")]);
        let q = ConjunctiveQuery {
            var: "u".to_string(),
            collection: "users".to_string(),
            equality_predicates: vec![],
            range_predicates: vec![RangePredicate { field: "age".to_string(), op: CmpOp::Gt, value: Expr::Literal(Value::Int(35)) }],
            other_filters: vec![],
            let_nodes: vec![],
            order_by: None,
            limit: None,
            ret: Expr::FieldAccess(Box::new(Expr::Variable("u".to_string())), "name".to_string()),
        };
        let deadline = Deadline::none();
        let (results, mode) = execute(&q, &store, &mgr, true, &NoSubqueries, &deadline).unwrap();
        assert_eq!(results, vec![Value::String("bo".to_string())]);
        assert_eq!(mode, ExplainMode::FullScanFallback);
    }

    #[test]
    fn unindexed_field_without_allow_full_scan_is_rejected() {
        let (_d, store, mgr) = store_with(&[("ann", 30, "US"), ("bo", 40, "FR")]);
        let q = ConjunctiveQuery {
            var: "u".to_string(),
            collection: "users".to_string(),
            equality_predicates: vec![],
            range_predicates: vec![RangePredicate { field: "age".to_string(), op: CmpOp::Gt, value: Expr::Literal(Value::Int(35)) }],
            other_filters: vec![],
            let_nodes: vec![],
            order_by: None,
            limit: None,
            ret: Expr::FieldAccess(Box::new(Expr::Variable("u".to_string())), "name".to_string()),
        };
        let deadline = Deadline::none();
        assert!(execute(&q, &store, &mgr, false, &NoSubqueries, &deadline).is_err());
    }

    #[test]
    fn order_by_and_limit_apply_after_fetch() {
        let (_d, store, mgr) = store_with(&[("ann", 30, "US"), ("bo", 40, "US"), ("cy", 20, "US")]);
        let q = ConjunctiveQuery {
            var: "u".to_string(),
            collection: "users".to_string(),
            equality_predicates: vec![("country".to_string(), Expr::Literal(Value::String("US".to_string())))],
            range_predicates: vec![],
            other_filters: vec![],
            let_nodes: vec![],
            order_by: Some(("age".to_string(), SortDir::Asc)),
            limit: Some((0, 2)),
            ret: Expr::FieldAccess(Box::new(Expr::Variable("u".to_string())), "name".to_string()),
        };
        let deadline = Deadline::none();
        let (results, _mode) = execute(&q, &store, &mgr, false, &NoSubqueries, &deadline).unwrap();
        assert_eq!(results, vec![Value::String("cy".to_string()), Value::String("ann".to_string())]);
    }

    #[test]
    fn composite_predicate_uses_the_composite_index() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), StorageConfig::default()).unwrap();
        let mut mgr = IndexManager::new();
        mgr.create_index(IndexDef::composite("orders", vec!["region".to_string(), "status".to_string()]));
        for (pk, region, status) in [("o1", "eu", "open"), ("o2", "eu", "closed"), ("o3", "us", "open")] {
            let mut fields = BTreeMap::new();
            fields.insert("region".to_string(), Value::String(region.to_string()));
            fields.insert("status".to_string(), Value::String(status.to_string()));
            let entity = Entity::new("orders", Some(pk.to_string()), fields);
            let mut batch = weave_storage::WriteBatch::new();
            batch.put(weave_core::key::entity_key("orders", entity.uuid()), serde_json::to_vec(&entity).unwrap());
            mgr.index_insert(&mut batch, "orders", entity.uuid(), &entity.fields).unwrap();
            store.write_batch(batch).unwrap();
        }

        let q = ConjunctiveQuery {
            var: "o".to_string(),
            collection: "orders".to_string(),
            equality_predicates: vec![
                ("region".to_string(), Expr::Literal(Value::String("eu".to_string()))),
                ("status".to_string(), Expr::Literal(Value::String("open".to_string()))),
            ],
            range_predicates: vec![],
            other_filters: vec![],
            let_nodes: vec![],
            order_by: None,
            limit: None,
            ret: Expr::FieldAccess(Box::new(Expr::Variable("o".to_string())), "_key".to_string()),
        };
        let deadline = Deadline::none();
        let (results, mode) = execute(&q, &store, &mgr, false, &NoSubqueries, &deadline).unwrap();
        assert_eq!(results, vec![Value::String("o1".to_string())]);
        assert_eq!(mode, ExplainMode::IndexOptimized);
    }
}
