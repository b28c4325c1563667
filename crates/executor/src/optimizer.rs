//! Cardinality-sampling optimizer (spec §4.6.3): no cost-based statistics
//! are maintained; instead each candidate equality predicate is probed for
//! up to `max_probe` matches and the cheapest-looking one drives the scan.

use weave_core::error::Result;
use weave_core::value::Value;
use weave_primitives::index::IndexManager;
use weave_storage::KvStore;

/// Default cap on how many keys a cardinality probe will count before
/// giving up and reporting `capped`.
pub const DEFAULT_MAX_PROBE: usize = 1000;

/// The result of probing one predicate's selectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimation {
    /// Matches observed, up to `max_probe`.
    pub count: usize,
    /// True if the probe stopped early because it hit `max_probe`.
    pub capped: bool,
}

/// How the optimizer chose to serve a query, surfaced for `explain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainMode {
    /// An equality or range index drove the scan with no fallback.
    IndexOptimized,
    /// A range predicate was attached to an index-ordered leading scan.
    IndexRangeAware,
    /// Multiple indexed predicates were available; the optimizer picked the
    /// most selective one and post-filtered the rest.
    IndexParallel,
    /// No usable index was found; a full collection scan was required.
    FullScanFallback,
}

/// Probes an equality predicate's selectivity by counting matches, capped
/// at `max_probe`.
pub fn estimate_equality(store: &KvStore, indexes: &IndexManager, collection: &str, column: &str, value: &Value, max_probe: usize) -> Result<Estimation> {
    let (count, capped) = indexes.estimate_count_equal(store, collection, column, value, max_probe)?;
    Ok(Estimation { count, capped })
}

/// Probes a composite predicate's selectivity the same way, over the full
/// declared column tuple.
pub fn estimate_composite(store: &KvStore, indexes: &IndexManager, collection: &str, columns: &[String], values: &[Value], max_probe: usize) -> Result<Estimation> {
    let (count, capped) = indexes.estimate_count_equal_composite(store, collection, columns, values, max_probe)?;
    Ok(Estimation { count, capped })
}

/// Orders candidate equality predicates by estimated selectivity: capped
/// (unbounded-looking) probes sort last, then ascending by count.
pub fn order_by_selectivity(mut estimates: Vec<(usize, Estimation)>) -> Vec<usize> {
    estimates.sort_by_key(|(_, e)| (e.capped, e.count));
    estimates.into_iter().map(|(idx, _)| idx).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncapped_estimates_sort_ascending_by_count() {
        let ordered = order_by_selectivity(vec![
            (0, Estimation { count: 50, capped: false }),
            (1, Estimation { count: 5, capped: false }),
            (2, Estimation { count: 20, capped: false }),
        ]);
        assert_eq!(ordered, vec![1, 2, 0]);
    }

    #[test]
    fn capped_estimates_sort_after_uncapped_ones() {
        let ordered = order_by_selectivity(vec![(0, Estimation { count: 1000, capped: true }), (1, Estimation { count: 900, capped: false })]);
        assert_eq!(ordered, vec![1, 0]);
    }
}
