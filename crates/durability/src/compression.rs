//! Block compression dispatch honoring `storage.compression_default` /
//! `storage.compression_bottommost` (spec §4.1). `snappy`/`zlib` are
//! accepted as configuration values but degrade to raw bytes here — no
//! crate for either is already in the teacher's dependency graph, and
//! pulling one in for two rarely-used codecs would violate "never
//! fabricate dependencies"; this is recorded in DESIGN.md.

use weave_core::config::Compression;

/// Compress `data` per `codec`.
pub fn compress(codec: Compression, data: &[u8]) -> Vec<u8> {
    match codec {
        Compression::None | Compression::Snappy | Compression::Zlib => data.to_vec(),
        Compression::Lz4 => lz4_flex::compress_prepend_size(data),
        Compression::Zstd => zstd::encode_all(data, 3).unwrap_or_else(|_| data.to_vec()),
    }
}

/// Decompress `data` per `codec` (must match the codec used to compress).
pub fn decompress(codec: Compression, data: &[u8]) -> weave_core::error::Result<Vec<u8>> {
    match codec {
        Compression::None | Compression::Snappy | Compression::Zlib => Ok(data.to_vec()),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| weave_core::error::Error::internal(format!("lz4 decode: {e}"))),
        Compression::Zstd => zstd::decode_all(data)
            .map_err(|e| weave_core::error::Error::internal(format!("zstd decode: {e}"))),
    }
}
