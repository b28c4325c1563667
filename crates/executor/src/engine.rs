//! Top-level entry point: parse, translate, run CTEs, dispatch to the
//! matching execution engine, and paginate (spec §4.6, §6 `execute`).

use std::cmp::Ordering;
use std::collections::HashMap;

use weave_core::deadline::Deadline;
use weave_core::error::{Error, Result};
use weave_core::value::Value;
use weave_primitives::index::IndexManager;
use weave_storage::KvStore;

use crate::cte::CteCache;
use crate::cursor::Cursor;
use crate::eval::{EvalContext, SubqueryRunner};
use crate::exec::{collect, conjunctive, disjunctive, join, traversal};
use crate::parser;
use crate::plan::Plan;
use crate::query::{Program, Query, SortDir};

/// Inputs to one [`execute`] call (spec §6).
#[derive(Clone)]
pub struct ExecuteOptions {
    /// Cooperative cancellation/timeout, checked between rows.
    pub deadline: Deadline,
    /// Rows per page; `None` returns everything in one page.
    pub page_size: Option<u64>,
    /// An opaque token from a prior [`ExecuteResult::next_cursor`]. Ignored
    /// when `use_cursor` is `false`.
    pub cursor: Option<String>,
    /// Whether to resume from `cursor`/emit `next_cursor` at all. Callers
    /// that only want a single full materialization set this to `false`.
    pub use_cursor: bool,
    /// Overrides the query's own `LIMIT`, if any, with a hard cap.
    pub limit_override: Option<u64>,
    /// Whether a full collection scan is permitted when no index applies.
    /// `None` defers to `QueryConfig::allow_full_scan_default`.
    pub allow_full_scan: Option<bool>,
    /// Whether to populate [`ExecuteResult::plan`].
    pub explain: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            deadline: Deadline::none(),
            page_size: None,
            cursor: None,
            use_cursor: true,
            limit_override: None,
            allow_full_scan: None,
            explain: false,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteResult {
    /// Projected rows for this page.
    pub items: Vec<Value>,
    /// True if more rows remain beyond this page.
    pub has_more: bool,
    /// A cursor for the next page, if `has_more`.
    pub next_cursor: Option<String>,
    /// How the query was served, if `explain` was requested.
    pub plan: Option<Plan>,
}

/// Parses, optimizes and executes `aql` against `store`/`indexes`.
pub fn execute(store: &KvStore, indexes: &IndexManager, aql: &str, options: ExecuteOptions) -> Result<ExecuteResult> {
    execute_with_default_full_scan(store, indexes, aql, options, false)
}

/// Like [`execute`], but `allow_full_scan_default` supplies the fallback
/// when the call site leaves [`ExecuteOptions::allow_full_scan`] unset
/// (spec §6 `query.allow_full_scan_default`).
pub fn execute_with_default_full_scan(
    store: &KvStore,
    indexes: &IndexManager,
    aql: &str,
    options: ExecuteOptions,
    allow_full_scan_default: bool,
) -> Result<ExecuteResult> {
    let allow_full_scan = options.allow_full_scan.unwrap_or(allow_full_scan_default);
    let program = parser::parse(aql)?;
    let runner = EngineRunner { store, indexes, allow_full_scan, deadline: options.deadline.clone() };
    let (mut all_rows, sort_column, direction, plan) =
        run_program(&program, store, indexes, allow_full_scan, &HashMap::new(), &runner, &options.deadline)?;
    tracing::debug!(target: "weave::executor", ctes = program.ctes.len(), rows = all_rows.len(), "query executed");

    if let Some(limit) = options.limit_override {
        all_rows.truncate(limit as usize);
    }

    if !options.use_cursor {
        return Ok(ExecuteResult {
            items: all_rows,
            has_more: false,
            next_cursor: None,
            plan: options.explain.then_some(plan).flatten(),
        });
    }

    let cursor = match &options.cursor {
        Some(token) => Some(Cursor::decode(token, sort_column.as_deref())?),
        None => None,
    };
    let page_size = options
        .page_size
        .or(cursor.as_ref().map(|c| c.effective_limit))
        .map(|n| n as usize)
        .unwrap_or(all_rows.len().max(1));

    let start = match &cursor {
        Some(c) => position_after(&all_rows, sort_column.as_deref(), c),
        None => 0,
    };
    let end = start.saturating_add(page_size).min(all_rows.len());
    let items = if start >= all_rows.len() { Vec::new() } else { all_rows[start..end].to_vec() };
    let has_more = end < all_rows.len();

    let next_cursor = has_more.then(|| {
        let last = &items[items.len() - 1];
        Cursor {
            sort_column: sort_column.clone(),
            last_value: sort_column.as_deref().and_then(|f| last.get_path(f).cloned()),
            last_pk: last.get_path("_key").and_then(|v| if let Value::String(s) = v { Some(s.clone()) } else { None }),
            direction,
            effective_limit: page_size as u64,
        }
        .encode()
    });

    Ok(ExecuteResult { items, has_more, next_cursor, plan: options.explain.then_some(plan).flatten() })
}

/// Finds the index of the first row strictly past the cursor's last
/// delivered row, under `sort_column`'s ordering (pk-ordered when absent).
fn position_after(rows: &[Value], sort_column: Option<&str>, cursor: &Cursor) -> usize {
    rows.iter()
        .position(|row| {
            let pk = row.get_path("_key").and_then(|v| if let Value::String(s) = v { Some(s.as_str()) } else { None });
            match sort_column {
                Some(field) => {
                    let value = row.get_path(field);
                    let ord = match (value, cursor.last_value.as_ref()) {
                        (Some(v), Some(lv)) => v.partial_cmp_value(lv).unwrap_or(Ordering::Equal),
                        _ => Ordering::Equal,
                    };
                    let past = match cursor.direction {
                        SortDir::Asc => ord == Ordering::Greater,
                        SortDir::Desc => ord == Ordering::Less,
                    };
                    past || (ord == Ordering::Equal && pk.map(|p| Some(p) > cursor.last_pk.as_deref()).unwrap_or(false))
                }
                None => pk.map(|p| Some(p) > cursor.last_pk.as_deref()).unwrap_or(false),
            }
        })
        .unwrap_or(rows.len())
}

struct EngineRunner<'a> {
    store: &'a KvStore,
    indexes: &'a IndexManager,
    allow_full_scan: bool,
    deadline: Deadline,
}

impl SubqueryRunner for EngineRunner<'_> {
    fn run(&self, program: &Program, _outer: &EvalContext<'_>) -> Result<Vec<Value>> {
        // Subqueries do not see the enclosing query's CTEs (spec is silent;
        // decided in favor of the simpler, documented scoping rule).
        let (rows, ..) = run_program(program, self.store, self.indexes, self.allow_full_scan, &HashMap::new(), self, &self.deadline)?;
        Ok(rows)
    }
}

type ProgramResult = (Vec<Value>, Option<String>, SortDir, Option<Plan>);

fn run_program(
    program: &Program,
    store: &KvStore,
    indexes: &IndexManager,
    allow_full_scan: bool,
    outer_ctes: &HashMap<String, Vec<Value>>,
    runner: &dyn SubqueryRunner,
    deadline: &Deadline,
) -> Result<ProgramResult> {
    let mut cte_rows = outer_ctes.clone();
    let mut cache = CteCache::new(crate::cte::DEFAULT_BUDGET_BYTES);
    for cte in &program.ctes {
        deadline.check()?;
        let (rows, ..) = run_query(&cte.query, store, indexes, allow_full_scan, &cte_rows, runner, deadline)?;
        cache.insert(&cte.name, rows.clone())?;
        if cache.used_bytes() > crate::cte::DEFAULT_BUDGET_BYTES / 2 {
            tracing::warn!(target: "weave::executor", name = %cte.name, used_bytes = cache.used_bytes(), "CTE cache past half its budget");
        }
        cte_rows.insert(cte.name.clone(), rows);
    }

    if let Some(collect_clause) = &program.collect {
        let Query::Conjunctive(q) = &program.main else {
            return Err(Error::invalid("COLLECT requires a single-FOR conjunctive source"));
        };
        let rows = if let Some(source) = cte_rows.get(&q.collection) {
            source.iter().cloned().map(|v| conjunctive::row_from_value(q, v, None, runner)).collect::<Result<Vec<_>>>()?.into_iter().flatten().collect()
        } else {
            conjunctive::fetch_rows(q, store, indexes, allow_full_scan, runner, deadline)?.0
        };
        let out = collect::execute(collect_clause, &q.var, &rows, runner)?;
        return Ok((out, None, SortDir::Asc, None));
    }

    run_query(&program.main, store, indexes, allow_full_scan, &cte_rows, runner, deadline)
}

fn run_query(
    query: &Query,
    store: &KvStore,
    indexes: &IndexManager,
    allow_full_scan: bool,
    cte_rows: &HashMap<String, Vec<Value>>,
    runner: &dyn SubqueryRunner,
    deadline: &Deadline,
) -> Result<ProgramResult> {
    match query {
        Query::Conjunctive(q) => {
            if let Some(source) = cte_rows.get(&q.collection) {
                let rows = source.iter().cloned().map(|v| conjunctive::row_from_value(q, v, None, runner)).collect::<Result<Vec<_>>>()?.into_iter().flatten().collect();
                let items = conjunctive::finish(q, rows, runner, deadline)?;
                let (sort_column, direction) = sort_of(&q.order_by);
                Ok((items, sort_column, direction, None))
            } else {
                let (items, mode) = conjunctive::execute(q, store, indexes, allow_full_scan, runner, deadline)?;
                let (sort_column, direction) = sort_of(&q.order_by);
                Ok((items, sort_column, direction, Some(Plan::Conjunctive(mode))))
            }
        }
        Query::Disjunctive(q) => {
            let items = disjunctive::execute(q, store, indexes, runner, deadline)?;
            let (sort_column, direction) = sort_of(&q.order_by);
            Ok((items, sort_column, direction, None))
        }
        Query::Join(q) => {
            let items = join::execute(q, store, indexes, runner, deadline)?;
            Ok((items, None, SortDir::Asc, None))
        }
        Query::Traversal(q) => {
            let (items, metrics) = traversal::execute(q, store, runner, deadline)?;
            Ok((items, None, SortDir::Asc, Some(Plan::Traversal(metrics))))
        }
        Query::VectorGeo(_) => Err(Error::invalid("vector/geo hybrid queries are not reachable from the reduced grammar this parser accepts")),
    }
}

fn sort_of(order_by: &Option<(String, SortDir)>) -> (Option<String>, SortDir) {
    match order_by {
        Some((field, dir)) => (Some(field.clone()), *dir),
        None => (None, SortDir::Asc),
    }
}
