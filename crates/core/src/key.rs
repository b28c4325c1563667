//! Key layout and order-preserving encodings shared by every keyspace that
//! rides on the KV backbone: entities, secondary indexes, the CDC log and
//! the time-series store (spec §3, §4.2, §4.4, §4.5).

use uuid::Uuid;

/// Build the canonical primary key for an entity: `{collection}:{uuid}`.
pub fn entity_pk(collection: &str, uuid: &str) -> String {
    format!("{collection}:{uuid}")
}

/// Generate a fresh UUID-v4 string for a new entity.
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Raw entity row key: `ent:{collection}:{uuid}`.
pub fn entity_key(collection: &str, uuid: &str) -> Vec<u8> {
    format!("ent:{collection}:{uuid}").into_bytes()
}

/// Prefix over every entity in a collection.
pub fn entity_prefix(collection: &str) -> Vec<u8> {
    format!("ent:{collection}:").into_bytes()
}

/// Equality-index key: `idx:eq:{collection}:{column}:{encoded_value}:{pk}`.
pub fn equality_index_key(collection: &str, column: &str, value_bytes: &[u8], pk: &str) -> Vec<u8> {
    let mut k = format!("idx:eq:{collection}:{column}:").into_bytes();
    k.extend_from_slice(value_bytes);
    k.push(0u8);
    k.extend_from_slice(pk.as_bytes());
    k
}

/// Prefix selecting all entries for one equality value.
pub fn equality_index_prefix(collection: &str, column: &str, value_bytes: &[u8]) -> Vec<u8> {
    let mut k = format!("idx:eq:{collection}:{column}:").into_bytes();
    k.extend_from_slice(value_bytes);
    k.push(0u8);
    k
}

/// Prefix selecting the whole equality index (used for `drop`/rebuild).
pub fn equality_index_scope(collection: &str, column: &str) -> Vec<u8> {
    format!("idx:eq:{collection}:{column}:").into_bytes()
}

/// Range-index key: `idx:rg:{collection}:{column}:{encoded_value}:{pk}`.
pub fn range_index_key(collection: &str, column: &str, value_bytes: &[u8], pk: &str) -> Vec<u8> {
    let mut k = format!("idx:rg:{collection}:{column}:").into_bytes();
    k.extend_from_slice(value_bytes);
    k.push(0u8);
    k.extend_from_slice(pk.as_bytes());
    k
}

/// Prefix selecting the whole range index.
pub fn range_index_scope(collection: &str, column: &str) -> Vec<u8> {
    format!("idx:rg:{collection}:{column}:").into_bytes()
}

/// Composite-index key: `idx:cm:{collection}:{columns_joined}:{values}:{pk}`.
pub fn composite_index_key(
    collection: &str,
    columns: &[String],
    encoded_values: &[u8],
    pk: &str,
) -> Vec<u8> {
    let mut k = format!("idx:cm:{collection}:{}:", columns.join(",")).into_bytes();
    k.extend_from_slice(encoded_values);
    k.push(0u8);
    k.extend_from_slice(pk.as_bytes());
    k
}

/// Prefix for one composite value tuple.
pub fn composite_index_prefix(collection: &str, columns: &[String], encoded_values: &[u8]) -> Vec<u8> {
    let mut k = format!("idx:cm:{collection}:{}:", columns.join(",")).into_bytes();
    k.extend_from_slice(encoded_values);
    k.push(0u8);
    k
}

/// Scope of the whole composite index.
pub fn composite_index_scope(collection: &str, columns: &[String]) -> Vec<u8> {
    format!("idx:cm:{collection}:{}:", columns.join(",")).into_bytes()
}

/// Separator byte between concatenated composite column values; chosen so
/// that it never appears inside an individual column's encoded bytes
/// (column encodings never emit `0x00` as an interior byte — see
/// `encode_sortable`).
pub const COMPOSITE_SEPARATOR: u8 = 0x00;

/// CDC event key: `cdc:{20-digit zero-padded sequence}`.
pub fn cdc_event_key(sequence: u64) -> Vec<u8> {
    format!("cdc:{sequence:020}").into_bytes()
}

/// Prefix over the whole CDC log.
pub fn cdc_prefix() -> Vec<u8> {
    b"cdc:".to_vec()
}

/// Raw time-series row key: `ts:{metric}:{entity}:{padded_timestamp}`.
pub fn ts_raw_key(metric: &str, entity: &str, ts_ms: i64) -> Vec<u8> {
    format!("ts:{metric}:{entity}:{:020}", ts_ms as u64).into_bytes()
}

/// Prefix over the raw rows of one metric, optionally scoped to one entity.
pub fn ts_raw_prefix(metric: &str, entity: Option<&str>) -> Vec<u8> {
    match entity {
        Some(e) => format!("ts:{metric}:{e}:").into_bytes(),
        None => format!("ts:{metric}:").into_bytes(),
    }
}

/// Chunked time-series key: `tsc:{metric}:{entity}:{first_ts}:{last_ts}`.
pub fn ts_chunk_key(metric: &str, entity: &str, first_ts: i64, last_ts: i64) -> Vec<u8> {
    format!(
        "tsc:{metric}:{entity}:{:020}:{:020}",
        first_ts as u64, last_ts as u64
    )
    .into_bytes()
}

/// Prefix over the chunked rows of one metric, optionally scoped to one
/// entity.
pub fn ts_chunk_prefix(metric: &str, entity: Option<&str>) -> Vec<u8> {
    match entity {
        Some(e) => format!("tsc:{metric}:{e}:").into_bytes(),
        None => format!("tsc:{metric}:").into_bytes(),
    }
}

/// Graph adjacency key: `graph:out:{vertex}:{edge_pk}` / `graph:in:...`.
pub fn graph_adjacency_key(direction: &str, vertex: &str, edge_pk: &str) -> Vec<u8> {
    format!("graph:{direction}:{vertex}:{edge_pk}").into_bytes()
}

/// Prefix selecting all adjacency entries for one vertex/direction.
pub fn graph_adjacency_prefix(direction: &str, vertex: &str) -> Vec<u8> {
    format!("graph:{direction}:{vertex}:").into_bytes()
}

/// Order-preserving byte encoding so that lexicographic byte order equals
/// semantic order across mixed numeric/string values (spec §4.2).
pub mod sortable {
    /// Encode a string so it sorts below any continuation of itself: a
    /// terminating `0x00` byte with no interior zero bytes (UTF-8 strings
    /// never contain an embedded NUL as a content byte when used as a
    /// column value in this core, so `0x00` is safe as a sentinel).
    pub fn encode_string(s: &str) -> Vec<u8> {
        let mut out = s.as_bytes().to_vec();
        out.push(0x00);
        out
    }

    /// Sign-preserving big-endian encoding for `i64`: flip the sign bit so
    /// that negative numbers sort before positive ones under unsigned byte
    /// comparison.
    pub fn encode_i64(v: i64) -> Vec<u8> {
        let flipped = (v as u64) ^ (1u64 << 63);
        flipped.to_be_bytes().to_vec()
    }

    /// Standard IEEE-754-to-sortable-bytes mapping for `f64`: if the sign
    /// bit is set, flip every bit (reverses ordering of negatives); else
    /// flip only the sign bit.
    pub fn encode_f64(v: f64) -> Vec<u8> {
        let bits = v.to_bits();
        let mapped = if bits & (1u64 << 63) != 0 {
            !bits
        } else {
            bits | (1u64 << 63)
        };
        mapped.to_be_bytes().to_vec()
    }

    /// Decode bytes produced by `encode_i64`.
    pub fn decode_i64(bytes: &[u8]) -> Option<i64> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        let flipped = u64::from_be_bytes(arr);
        Some((flipped ^ (1u64 << 63)) as i64)
    }

    /// Decode bytes produced by `encode_f64`.
    pub fn decode_f64(bytes: &[u8]) -> Option<f64> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        let mapped = u64::from_be_bytes(arr);
        let bits = if mapped & (1u64 << 63) != 0 {
            mapped & !(1u64 << 63)
        } else {
            !mapped
        };
        Some(f64::from_bits(bits))
    }

}

/// Encode a [`crate::value::Value`] into sortable bytes for a range index,
/// per spec §4.2. Only scalar types are supported; anything else is an
/// `InvalidArgument`.
pub fn encode_sortable(value: &crate::value::Value) -> crate::error::Result<Vec<u8>> {
    use crate::value::Value;
    match value {
        Value::String(s) => Ok(sortable::encode_string(s)),
        Value::Int(i) => Ok(sortable::encode_i64(*i)),
        Value::Double(d) => Ok(sortable::encode_f64(*d)),
        Value::Bool(b) => Ok(sortable::encode_i64(if *b { 1 } else { 0 })),
        other => Err(crate::error::Error::invalid(format!(
            "cannot range-encode value of type {}",
            other.type_name()
        ))),
    }
}

/// Encode a value for an equality index: user bytes as-is (stable
/// `serde_json` text for composite/array/object values).
pub fn encode_equality(value: &crate::value::Value) -> Vec<u8> {
    use crate::value::Value;
    match value {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Int(i) => i.to_string().into_bytes(),
        Value::Double(d) => d.to_string().into_bytes(),
        Value::Bool(b) => vec![if *b { 1 } else { 0 }],
        other => serde_json::to_vec(other).unwrap_or_default(),
    }
}
