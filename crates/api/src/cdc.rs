//! Change-feed operations (spec §4.5, §6 `cdc_list`).

use std::time::Duration;

use weave_core::error::Result;
use weave_primitives::cdc::{CdcEvent, ChangeOp};

use crate::facade::Facade;

/// Optional narrowing applied to [`Facade::cdc_list`] after the underlying
/// log read. A long-poll that times out waiting for *any* event does not
/// keep waiting just because the first arrival doesn't match `filters` —
/// matching spec.md §4.5's filters being orthogonal to the wait itself.
#[derive(Debug, Clone, Default)]
pub struct CdcFilters {
    /// Only events for this collection.
    pub collection: Option<String>,
    /// Only events of this change kind.
    pub op: Option<ChangeOp>,
}

impl Facade {
    /// Lists events after `from_seq`, waiting up to `long_poll_ms` for at
    /// least one to arrive if none are immediately available. `0` disables
    /// waiting.
    pub fn cdc_list(&self, from_seq: u64, limit: usize, filters: &CdcFilters, long_poll_ms: u64) -> Result<Vec<CdcEvent>> {
        let events = if long_poll_ms == 0 {
            self.cdc.list_since(&self.store, from_seq, limit)?
        } else {
            self.cdc.long_poll(&self.store, from_seq, limit, Duration::from_millis(long_poll_ms))?
        };
        Ok(events
            .into_iter()
            .filter(|e| filters.collection.as_deref().map(|c| c == e.collection).unwrap_or(true))
            .filter(|e| filters.op.map(|op| op == e.op).unwrap_or(true))
            .collect())
    }
}
