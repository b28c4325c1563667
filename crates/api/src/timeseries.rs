//! Time-series operations (spec §4.4, §6 `ts_put`/`ts_query`/`ts_aggregate`).

use weave_core::error::Result;
use weave_engine::timeseries::{Aggregate, DataPoint, QueryOptions};

use crate::facade::Facade;

impl Facade {
    /// Writes one point.
    pub fn ts_put(&self, point: DataPoint) -> Result<()> {
        self.timeseries.put_point(&self.store, &point)
    }

    /// Writes a batch of points, Gorilla-encoded into one chunk when the
    /// store is configured for compression.
    pub fn ts_put_batch(&self, points: Vec<DataPoint>) -> Result<()> {
        self.timeseries.put_points(&self.store, points)
    }

    /// Range query over one metric.
    pub fn ts_query(&self, metric: &str, options: &QueryOptions) -> Result<Vec<DataPoint>> {
        self.timeseries.query(&self.store, metric, options)
    }

    /// Min/max/avg/sum/count over one metric's window.
    pub fn ts_aggregate(&self, metric: &str, options: &QueryOptions) -> Result<Option<Aggregate>> {
        self.timeseries.aggregate(&self.store, metric, options)
    }
}
