//! Time-series store (spec §4.4): per-metric/entity point storage with
//! optional Gorilla-compressed chunking, range queries, aggregation and
//! retention. No teacher precedent — grounded on the KV backbone's own
//! `ts_raw_*`/`ts_chunk_*` keyspace helpers and write-batch conventions,
//! with the chunk codec itself in [`super::gorilla`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;
use weave_core::config::{TimeseriesCompression, TimeseriesConfig};
use weave_core::error::{Error, Result};
use weave_core::key;
use weave_storage::{KvStore, WriteBatch};

use super::gorilla::{self, RawPoint};

/// One write into the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    /// Metric name, e.g. `"cpu.load"`.
    pub metric: String,
    /// Entity the point belongs to, e.g. a host or device id.
    pub entity: String,
    /// Milliseconds since the epoch.
    pub ts_ms: i64,
    /// The point's value.
    pub value: f64,
    /// Exact-match tags, checked during `query`.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Free-form metadata carried alongside chunked batches. Not indexed.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkValue {
    compression: String,
    count: usize,
    tags: BTreeMap<String, String>,
    metadata: BTreeMap<String, String>,
    data: Vec<u8>,
}

/// Inclusive timestamp bound plus optional tag filter for `query`/`aggregate`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Restrict to one entity; `None` scans every entity for `metric`.
    pub entity: Option<String>,
    /// Inclusive lower bound, milliseconds since the epoch.
    pub from: i64,
    /// Inclusive upper bound, milliseconds since the epoch.
    pub to: i64,
    /// Points must carry every listed tag with an exactly matching value.
    pub tags: BTreeMap<String, String>,
    /// Caps total points emitted across raw and chunked rows.
    pub limit: Option<usize>,
}

/// Aggregate result over a `query` window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    /// Minimum value in the window.
    pub min: f64,
    /// Maximum value in the window.
    pub max: f64,
    /// Arithmetic mean.
    pub avg: f64,
    /// Sum of all values.
    pub sum: f64,
    /// Number of points.
    pub count: usize,
    /// Timestamp of the earliest point.
    pub first_ts: i64,
    /// Timestamp of the latest point.
    pub last_ts: i64,
}

fn validate_name(metric: &str, entity: &str) -> Result<()> {
    if metric.is_empty() {
        return Err(Error::invalid("metric name must not be empty"));
    }
    if entity.is_empty() {
        return Err(Error::invalid("entity must not be empty"));
    }
    Ok(())
}

/// Per-metric/entity point storage layered on the KV backbone.
pub struct TimeseriesStore {
    config: TimeseriesConfig,
}

impl TimeseriesStore {
    /// A store using `config`'s compression mode for `put_points` batches.
    pub fn new(config: TimeseriesConfig) -> Self {
        Self { config }
    }

    /// Write a single raw point.
    pub fn put_point(&self, store: &KvStore, dp: &DataPoint) -> Result<()> {
        validate_name(&dp.metric, &dp.entity)?;
        let key = key::ts_raw_key(&dp.metric, &dp.entity, dp.ts_ms);
        let value = serde_json::to_vec(dp)?;
        store.put(key, value)
    }

    /// Write a batch of points, grouped by `(metric, entity)` and sorted
    /// ascending by timestamp within each group. Each group is written as
    /// raw rows when compression is disabled, or as one Gorilla chunk when
    /// enabled — falling through to raw rows for a single-point group,
    /// since a chunk with one point has nothing to delta-encode against.
    pub fn put_points(&self, store: &KvStore, points: Vec<DataPoint>) -> Result<()> {
        for dp in &points {
            validate_name(&dp.metric, &dp.entity)?;
        }

        let mut groups: BTreeMap<(String, String), Vec<DataPoint>> = BTreeMap::new();
        for dp in points {
            groups.entry((dp.metric.clone(), dp.entity.clone())).or_default().push(dp);
        }

        let mut batch = WriteBatch::new();
        for ((metric, entity), mut group) in groups {
            group.sort_by_key(|dp| dp.ts_ms);

            let use_chunk = matches!(self.config.compression, TimeseriesCompression::Gorilla) && group.len() > 1;
            if !use_chunk {
                for dp in &group {
                    let key = key::ts_raw_key(&metric, &entity, dp.ts_ms);
                    batch.put(key, serde_json::to_vec(dp)?);
                }
                continue;
            }

            let first_ts = group.first().unwrap().ts_ms;
            let last_ts = group.last().unwrap().ts_ms;
            let tags = group.first().unwrap().tags.clone();
            let metadata = group.first().unwrap().metadata.clone();
            let raw_points: Vec<RawPoint> =
                group.iter().map(|dp| RawPoint { ts_ms: dp.ts_ms, value: dp.value }).collect();
            let data = gorilla::encode(&raw_points)?;

            let chunk = ChunkValue { compression: "gorilla".to_string(), count: group.len(), tags, metadata, data };
            let key = key::ts_chunk_key(&metric, &entity, first_ts, last_ts);
            batch.put(key, serde_json::to_vec(&chunk)?);
        }

        store.write_batch(batch)
    }

    fn tags_match(tags: &BTreeMap<String, String>, filter: &BTreeMap<String, String>) -> bool {
        filter.iter().all(|(k, v)| tags.get(k) == Some(v))
    }

    /// Range query over both raw and chunked rows, merged and sorted
    /// ascending by timestamp. Malformed chunks are skipped with a logged
    /// warning rather than failing the whole query.
    pub fn query(&self, store: &KvStore, metric: &str, options: &QueryOptions) -> Result<Vec<DataPoint>> {
        let mut out = Vec::new();

        let raw_prefix = key::ts_raw_prefix(metric, options.entity.as_deref());
        store.scan_prefix(&raw_prefix, |_k, v| {
            if let Ok(dp) = serde_json::from_slice::<DataPoint>(v) {
                if dp.ts_ms >= options.from && dp.ts_ms <= options.to && Self::tags_match(&dp.tags, &options.tags) {
                    out.push(dp);
                }
            }
            true
        })?;

        let chunk_prefix = key::ts_chunk_prefix(metric, options.entity.as_deref());
        let chunks = store.collect_prefix(&chunk_prefix)?;
        for (k, v) in chunks {
            let chunk: ChunkValue = match serde_json::from_slice(&v) {
                Ok(c) => c,
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&k), error = %e, "skipping malformed time-series chunk");
                    continue;
                }
            };
            if !Self::tags_match(&chunk.tags, &options.tags) {
                continue;
            }
            let entity = entity_from_chunk_key(&k, metric);
            let points = match gorilla::decode(&chunk.data) {
                Ok(p) => p,
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&k), error = %e, "skipping malformed time-series chunk");
                    continue;
                }
            };
            for p in points {
                if p.ts_ms >= options.from && p.ts_ms <= options.to {
                    out.push(DataPoint {
                        metric: metric.to_string(),
                        entity: entity.clone(),
                        ts_ms: p.ts_ms,
                        value: p.value,
                        tags: chunk.tags.clone(),
                        metadata: chunk.metadata.clone(),
                    });
                }
            }
        }

        out.sort_by_key(|dp| dp.ts_ms);
        if let Some(limit) = options.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Aggregate statistics over the same window `query` would return.
    pub fn aggregate(&self, store: &KvStore, metric: &str, options: &QueryOptions) -> Result<Option<Aggregate>> {
        let points = self.query(store, metric, options)?;
        if points.is_empty() {
            return Ok(None);
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for p in &points {
            min = min.min(p.value);
            max = max.max(p.value);
            sum += p.value;
        }
        let count = points.len();
        Ok(Some(Aggregate {
            min,
            max,
            avg: sum / count as f64,
            sum,
            count,
            first_ts: points.first().unwrap().ts_ms,
            last_ts: points.last().unwrap().ts_ms,
        }))
    }

    /// Remove raw rows and whole chunks whose last timestamp is strictly
    /// below `cutoff_ms`, across every metric and entity.
    pub fn delete_old(&self, store: &KvStore, cutoff_ms: i64) -> Result<usize> {
        self.delete_old_prefix(store, b"ts:", b"tsc:", cutoff_ms, None)
    }

    /// Same as [`Self::delete_old`], scoped to one metric.
    pub fn delete_old_for_metric(&self, store: &KvStore, metric: &str, cutoff_ms: i64) -> Result<usize> {
        let raw_prefix = key::ts_raw_prefix(metric, None);
        let chunk_prefix = key::ts_chunk_prefix(metric, None);
        self.delete_old_prefix(store, &raw_prefix, &chunk_prefix, cutoff_ms, Some(metric))
    }

    fn delete_old_prefix(
        &self,
        store: &KvStore,
        raw_prefix: &[u8],
        chunk_prefix: &[u8],
        cutoff_ms: i64,
        metric_hint: Option<&str>,
    ) -> Result<usize> {
        let mut batch = WriteBatch::new();
        let mut removed = 0usize;

        store.scan_prefix(raw_prefix, |k, v| {
            if let Ok(dp) = serde_json::from_slice::<DataPoint>(v) {
                if dp.ts_ms < cutoff_ms {
                    batch.delete(k.to_vec());
                    removed += 1;
                }
            }
            true
        })?;

        let chunks = store.collect_prefix(chunk_prefix)?;
        for (k, v) in chunks {
            let last_ts = match last_ts_from_chunk_key(&k, metric_hint) {
                Some(ts) => ts,
                None => continue,
            };
            if last_ts < cutoff_ms {
                batch.delete(k);
                removed += 1;
            }
        }

        store.write_batch(batch)?;
        Ok(removed)
    }
}

fn entity_from_chunk_key(key: &[u8], metric: &str) -> String {
    let s = String::from_utf8_lossy(key);
    let prefix = format!("tsc:{metric}:");
    s.strip_prefix(&prefix)
        .and_then(|rest| rest.split(':').next())
        .unwrap_or_default()
        .to_string()
}

fn last_ts_from_chunk_key(key: &[u8], metric_hint: Option<&str>) -> Option<i64> {
    let s = String::from_utf8_lossy(key);
    let rest = match metric_hint {
        Some(m) => s.strip_prefix(&format!("tsc:{m}:"))?,
        None => s.strip_prefix("tsc:")?,
    };
    let last = rest.rsplit(':').next()?;
    last.parse::<u64>().ok().map(|v| v as i64)
}

/// Computes per-window aggregates over a metric and writes one synthetic
/// point per window into a derived metric, spec-named
/// `"{base}__agg_{window_ms}ms"`, at each window's end.
pub struct ContinuousAggregate {
    base_metric: String,
    window_ms: i64,
}

impl ContinuousAggregate {
    /// A continuous aggregate over `base_metric` with fixed-size windows.
    pub fn new(base_metric: impl Into<String>, window_ms: i64) -> Self {
        Self { base_metric: base_metric.into(), window_ms }
    }

    /// The derived metric name this aggregate writes into.
    pub fn derived_metric(&self) -> String {
        format!("{}__agg_{}ms", self.base_metric, self.window_ms)
    }

    /// Compute windowed aggregates over `[from, to]` for `entity` and write
    /// one point per window into the derived metric.
    pub fn run(&self, store: &KvStore, ts: &TimeseriesStore, entity: &str, from: i64, to: i64) -> Result<usize> {
        if self.window_ms <= 0 {
            return Err(Error::invalid("window_ms must be positive"));
        }
        let options = QueryOptions { entity: Some(entity.to_string()), from, to, tags: BTreeMap::new(), limit: None };
        let points = ts.query(store, &self.base_metric, &options)?;
        if points.is_empty() {
            return Ok(0);
        }

        let mut windows: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for p in &points {
            let window_start = (p.ts_ms - from).div_euclid(self.window_ms) * self.window_ms + from;
            windows.entry(window_start).or_default().push(p.value);
        }

        let derived = self.derived_metric();
        let mut written = Vec::new();
        for (window_start, values) in &windows {
            let count = values.len();
            let sum: f64 = values.iter().sum();
            let avg = sum / count as f64;
            let window_end = window_start + self.window_ms;
            written.push(DataPoint {
                metric: derived.clone(),
                entity: entity.to_string(),
                ts_ms: window_end,
                value: avg,
                tags: BTreeMap::new(),
                metadata: BTreeMap::new(),
            });
        }
        let n = written.len();
        ts.put_points(store, written)?;
        Ok(n)
    }
}
