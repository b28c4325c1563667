//! Enumerated configuration surface (spec §4.1 tuning surface, §6
//! "Configuration"). Loadable from TOML, mirroring the teacher's
//! `strata-engine` use of the `toml` crate for on-disk config.

use serde::{Deserialize, Serialize};

/// Compression codec choice for a storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression.
    None,
    /// LZ4 (fast, used for hot levels by default).
    Lz4,
    /// Zstandard (used for the bottommost level by default).
    Zstd,
    /// Snappy (accepted, degrades to raw bytes — see SPEC_FULL.md §1).
    Snappy,
    /// Zlib/deflate (accepted, degrades to raw bytes — see SPEC_FULL.md §1).
    Zlib,
}

/// Storage tuning surface (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Target size of an in-memory write buffer before a checkpoint is
    /// advisable.
    pub memtable_size_mb: u64,
    /// Advisory size of the read cache.
    pub block_cache_size_mb: u64,
    /// Directory holding the write-ahead log, if split from `db_path`.
    pub wal_dir: Option<String>,
    /// Root data directory.
    pub db_path: String,
    /// Additional data paths (tiering); unused by the single-tier
    /// implementation here but retained in configuration for parity with
    /// the documented surface.
    pub db_paths: Vec<String>,
    /// Compression for hot levels.
    pub compression_default: Compression,
    /// Compression for the bottommost/checkpoint tier.
    pub compression_bottommost: Compression,
    /// Bloom filter bits per key (advisory; honored by the prefix-scan
    /// fast-reject bitmap).
    pub bloom_bits_per_key: u32,
    /// Whether filters are partitioned.
    pub partition_filters: bool,
    /// Whether level byte targets grow dynamically.
    pub dynamic_level_bytes: bool,
    /// Whether to request direct (unbuffered) reads.
    pub use_direct_reads: bool,
    /// Whether to request direct I/O for flush/compaction.
    pub use_direct_io_for_flush_and_compaction: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            memtable_size_mb: 64,
            block_cache_size_mb: 256,
            wal_dir: None,
            db_path: "./data".to_string(),
            db_paths: Vec::new(),
            compression_default: Compression::Lz4,
            compression_bottommost: Compression::Zstd,
            bloom_bits_per_key: 10,
            partition_filters: true,
            dynamic_level_bytes: true,
            use_direct_reads: false,
            use_direct_io_for_flush_and_compaction: false,
        }
    }
}

/// Distance metric for the vector index (spec §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean distance.
    L2,
    /// `1 - cos(theta)`.
    Cosine,
    /// Negative dot product (so ascending distance = descending similarity).
    Dot,
}

/// Vector index configuration (spec §4.3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Collection this index is attached to.
    pub object_name: String,
    /// Fixed vector dimension.
    pub dimension: usize,
    /// Distance metric.
    pub metric: DistanceMetric,
    /// Max connections per HNSW node.
    pub hnsw_m: usize,
    /// Build-time beam width.
    pub hnsw_ef_construction: usize,
    /// Search-time beam width.
    pub ef_search: usize,
    /// Path to persist the HNSW blob, if any.
    pub save_path: Option<String>,
    /// Load from `save_path` on startup if present.
    pub load_on_startup: bool,
    /// Save to `save_path` on shutdown.
    pub save_on_shutdown: bool,
}

impl Default for VectorConfig {
    fn default() -> Self {
        VectorConfig {
            object_name: String::new(),
            dimension: 0,
            metric: DistanceMetric::Cosine,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            ef_search: 50,
            save_path: None,
            load_on_startup: false,
            save_on_shutdown: false,
        }
    }
}

/// Time-series compression mode (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeseriesCompression {
    /// Always write raw rows.
    None,
    /// Batch writes are Gorilla-encoded into chunks.
    Gorilla,
}

/// Time-series store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeseriesConfig {
    /// Compression mode for `put_points` batches.
    pub compression: TimeseriesCompression,
    /// Target chunk span, in hours (advisory grouping hint for callers that
    /// pre-batch points; the store itself chunks by contiguous batch).
    pub chunk_size_hours: u32,
}

impl Default for TimeseriesConfig {
    fn default() -> Self {
        TimeseriesConfig {
            compression: TimeseriesCompression::Gorilla,
            chunk_size_hours: 2,
        }
    }
}

/// CDC log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdcConfig {
    /// Default long-poll wait when a caller doesn't specify one.
    pub long_poll_default_ms: u64,
    /// Maximum events returned from a single `list` call.
    pub max_events_per_poll: usize,
}

impl Default for CdcConfig {
    fn default() -> Self {
        CdcConfig {
            long_poll_default_ms: 0,
            max_events_per_poll: 1000,
        }
    }
}

/// Query engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Byte budget for the materialized-CTE cache (spec §4.6.4).
    pub cte_cache_max_bytes: u64,
    /// Cardinality sampling cap (spec §4.6.2).
    pub sample_probe_cap: usize,
    /// Whether `full_scan_fallback` is permitted when no index applies.
    pub allow_full_scan_default: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            cte_cache_max_bytes: 100 * 1024 * 1024,
            sample_probe_cap: 1000,
            allow_full_scan_default: false,
        }
    }
}

/// The full configuration tree, loadable from a single TOML document with
/// top-level `[storage]`, `[vector_index]`, `[timeseries]`, `[cdc]`,
/// `[query]` tables (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    /// KV backbone tuning.
    pub storage: StorageConfig,
    /// Vector index defaults (per-collection indexes override at `init`).
    pub vector_index: VectorConfig,
    /// Time-series store tuning.
    pub timeseries: TimeseriesConfig,
    /// CDC log tuning.
    pub cdc: CdcConfig,
    /// Query engine tuning.
    pub query: QueryConfig,
}

impl WeaveConfig {
    /// Parse configuration from a TOML document.
    pub fn from_toml(text: &str) -> crate::error::Result<Self> {
        toml::from_str(text)
            .map_err(|e| crate::error::Error::invalid(format!("invalid config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = WeaveConfig::default();
        assert_eq!(cfg.storage.compression_default, Compression::Lz4);
        assert_eq!(cfg.storage.compression_bottommost, Compression::Zstd);
        assert_eq!(cfg.storage.bloom_bits_per_key, 10);
        assert!(cfg.storage.partition_filters);
        assert_eq!(cfg.query.cte_cache_max_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.query.sample_probe_cap, 1000);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = WeaveConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let back = WeaveConfig::from_toml(&text).unwrap();
        assert_eq!(back.storage.bloom_bits_per_key, cfg.storage.bloom_bits_per_key);
    }
}
