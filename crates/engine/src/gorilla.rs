//! Gorilla-style time-series compression (spec §4.4). No teacher precedent
//! exists for this — the teacher has no time-series store — so this is
//! grounded more loosely on the byte-level framing conventions used
//! elsewhere in this workspace (length-prefixed, explicit bit-level control
//! codes, decode stops cleanly at EOF rather than panicking) rather than on
//! any single teacher file.
//!
//! Timestamps are delta-of-delta, ZigZag-varint encoded, byte-aligned at
//! point boundaries. Values are XOR-packed IEEE-754 bit patterns with a
//! leading control bit selecting "identical to previous" versus an encoded
//! tail of leading-zero-count, significant-bit-count, and the significant
//! bits themselves.

use weave_core::error::{Error, Result};

/// One decoded point out of a chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    /// Milliseconds since the epoch.
    pub ts_ms: i64,
    /// The point's value.
    pub value: f64,
}

struct BitWriter {
    bytes: Vec<u8>,
    cur: u8,
    nbits: u8,
}

impl BitWriter {
    fn new() -> Self {
        Self { bytes: Vec::new(), cur: 0, nbits: 0 }
    }

    fn push_bit(&mut self, bit: bool) {
        self.cur = (self.cur << 1) | (bit as u8);
        self.nbits += 1;
        if self.nbits == 8 {
            self.bytes.push(self.cur);
            self.cur = 0;
            self.nbits = 0;
        }
    }

    fn push_bits(&mut self, value: u64, count: u8) {
        for i in (0..count).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
    }

    fn push_byte_aligned(&mut self, byte: u8) {
        debug_assert_eq!(self.nbits, 0, "byte-aligned write while mid-byte");
        self.bytes.push(byte);
    }

    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.cur <<= 8 - self.nbits;
            self.bytes.push(self.cur);
        }
        self.bytes
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, byte_pos: 0, bit_pos: 0 }
    }

    fn at_eof(&self) -> bool {
        self.byte_pos >= self.bytes.len()
    }

    fn read_bit(&mut self) -> Option<bool> {
        if self.byte_pos >= self.bytes.len() {
            return None;
        }
        let byte = self.bytes[self.byte_pos];
        let bit = (byte >> (7 - self.bit_pos)) & 1 == 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
        Some(bit)
    }

    fn read_bits(&mut self, count: u8) -> Option<u64> {
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Some(value)
    }

    fn align_to_byte(&mut self) {
        if self.bit_pos != 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    fn read_byte_aligned(&mut self) -> Option<u8> {
        debug_assert_eq!(self.bit_pos, 0, "byte-aligned read while mid-byte");
        if self.byte_pos >= self.bytes.len() {
            return None;
        }
        let b = self.bytes[self.byte_pos];
        self.byte_pos += 1;
        Some(b)
    }
}

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let mut byte = (v & 0x7F) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if v == 0 {
            break;
        }
    }
}

fn read_varint(reader: &mut BitReader) -> Option<u64> {
    let mut result = 0u64;
    let mut shift = 0;
    loop {
        let byte = reader.read_byte_aligned()?;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
}

/// Encode `points` (already sorted ascending by timestamp) into a Gorilla
/// chunk body.
pub fn encode(points: &[RawPoint]) -> Result<Vec<u8>> {
    if points.is_empty() {
        return Err(Error::invalid("cannot encode an empty chunk"));
    }

    let mut ts_bytes = Vec::new();
    write_varint(&mut ts_bytes, zigzag_encode(points[0].ts_ms));
    let mut prev_ts = points[0].ts_ms;
    let mut prev_delta: i64 = 0;
    for p in &points[1..] {
        let delta = p.ts_ms - prev_ts;
        let dod = delta - prev_delta;
        write_varint(&mut ts_bytes, zigzag_encode(dod));
        prev_delta = delta;
        prev_ts = p.ts_ms;
    }

    let mut values = BitWriter::new();
    values.push_byte_aligned(0);
    let first_bits = points[0].value.to_bits();
    for i in (0..64).rev() {
        values.push_bit((first_bits >> i) & 1 == 1);
    }
    let mut prev_bits = first_bits;
    let mut prev_leading: u32 = 64;
    let mut prev_trailing: u32 = 0;
    for p in &points[1..] {
        let bits = p.value.to_bits();
        let xor = bits ^ prev_bits;
        if xor == 0 {
            values.push_bit(false);
        } else {
            values.push_bit(true);
            let leading = xor.leading_zeros().min(63);
            let trailing = xor.trailing_zeros();
            let significant = 64 - leading - trailing;
            if leading >= prev_leading && trailing >= prev_trailing && significant <= (64 - prev_leading - prev_trailing) {
                values.push_bit(false);
                let prev_significant = 64 - prev_leading - prev_trailing;
                let shifted = xor >> prev_trailing;
                values.push_bits(shifted, prev_significant as u8);
            } else {
                values.push_bit(true);
                values.push_bits(leading as u64, 6);
                let sig_field = if significant == 64 { 0 } else { significant };
                values.push_bits(sig_field as u64, 6);
                let shifted = xor >> trailing;
                values.push_bits(shifted, significant as u8);
                prev_leading = leading;
                prev_trailing = trailing;
            }
        }
        prev_bits = bits;
    }

    let value_bytes = values.finish();

    let mut out = Vec::new();
    write_varint(&mut out, points.len() as u64);
    write_varint(&mut out, ts_bytes.len() as u64);
    out.extend_from_slice(&ts_bytes);
    out.extend_from_slice(&value_bytes);
    Ok(out)
}

/// Decode a Gorilla chunk body produced by [`encode`]. Malformed input
/// yields an `Internal` error rather than a panic; callers at the store
/// layer turn that into "skip this chunk, log a warning" per the read-path
/// contract.
pub fn decode(chunk: &[u8]) -> Result<Vec<RawPoint>> {
    let mut header_reader = BitReader::new(chunk);
    let count = read_varint(&mut header_reader)
        .ok_or_else(|| Error::internal("truncated chunk: missing point count"))? as usize;
    let ts_len = read_varint(&mut header_reader)
        .ok_or_else(|| Error::internal("truncated chunk: missing timestamp section length"))? as usize;
    header_reader.align_to_byte();
    let ts_start = header_reader.byte_pos;
    let ts_end = ts_start
        .checked_add(ts_len)
        .filter(|&e| e <= chunk.len())
        .ok_or_else(|| Error::internal("truncated chunk: timestamp section overruns buffer"))?;

    if count == 0 {
        return Ok(Vec::new());
    }

    let mut ts_reader = BitReader::new(&chunk[ts_start..ts_end]);
    let first_ts = zigzag_decode(
        read_varint(&mut ts_reader).ok_or_else(|| Error::internal("truncated chunk: missing first timestamp"))?,
    );
    let mut timestamps = Vec::with_capacity(count);
    timestamps.push(first_ts);
    let mut prev_ts = first_ts;
    let mut prev_delta: i64 = 0;
    for _ in 1..count {
        let dod = zigzag_decode(
            read_varint(&mut ts_reader).ok_or_else(|| Error::internal("truncated chunk: missing delta-of-delta"))?,
        );
        let delta = prev_delta + dod;
        let ts = prev_ts + delta;
        timestamps.push(ts);
        prev_delta = delta;
        prev_ts = ts;
    }

    let mut values_reader = BitReader::new(&chunk[ts_end..]);
    let mut values = Vec::with_capacity(count);
    let first_bits = values_reader
        .read_bits(64)
        .ok_or_else(|| Error::internal("truncated chunk: missing first value"))?;
    values.push(f64::from_bits(first_bits));
    let mut prev_bits = first_bits;
    let mut prev_leading: u32 = 64;
    let mut prev_trailing: u32 = 0;
    for _ in 1..count {
        if values_reader.at_eof() {
            return Err(Error::internal("truncated chunk: missing value"));
        }
        let same = !values_reader.read_bit().ok_or_else(|| Error::internal("truncated chunk: missing control bit"))?;
        if same {
            values.push(f64::from_bits(prev_bits));
            continue;
        }
        let reused = !values_reader
            .read_bit()
            .ok_or_else(|| Error::internal("truncated chunk: missing reuse bit"))?;
        let (leading, trailing, significant) = if reused {
            let significant = 64 - prev_leading - prev_trailing;
            (prev_leading, prev_trailing, significant)
        } else {
            let leading = values_reader
                .read_bits(6)
                .ok_or_else(|| Error::internal("truncated chunk: missing leading-zero count"))? as u32;
            let sig_field = values_reader
                .read_bits(6)
                .ok_or_else(|| Error::internal("truncated chunk: missing significant-bit count"))? as u32;
            let significant = if sig_field == 0 { 64 } else { sig_field };
            let trailing = 64 - leading - significant;
            (leading, trailing, significant)
        };
        let shifted = values_reader
            .read_bits(significant as u8)
            .ok_or_else(|| Error::internal("truncated chunk: missing significant bits"))?;
        let xor = shifted << trailing;
        let bits = xor ^ prev_bits;
        values.push(f64::from_bits(bits));
        prev_bits = bits;
        prev_leading = leading;
        prev_trailing = trailing;
    }

    Ok(timestamps
        .into_iter()
        .zip(values)
        .map(|(ts_ms, value)| RawPoint { ts_ms, value })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(pairs: &[(i64, f64)]) -> Vec<RawPoint> {
        pairs.iter().map(|&(ts_ms, value)| RawPoint { ts_ms, value }).collect()
    }

    #[test]
    fn round_trips_a_single_point() {
        let pts = points(&[(1_000, 42.5)]);
        let encoded = encode(&pts).unwrap();
        assert_eq!(decode(&encoded).unwrap(), pts);
    }

    #[test]
    fn round_trips_constant_delta_and_identical_values() {
        let pts = points(&[(0, 1.0), (1000, 1.0), (2000, 1.0), (3000, 1.0)]);
        let encoded = encode(&pts).unwrap();
        assert_eq!(decode(&encoded).unwrap(), pts);
    }

    #[test]
    fn round_trips_varying_deltas_and_values() {
        let pts = points(&[
            (0, 10.5),
            (1000, 10.6),
            (2500, 9.9),
            (2600, 9.9),
            (9000, -3.25),
            (9001, 1e10),
        ]);
        let encoded = encode(&pts).unwrap();
        assert_eq!(decode(&encoded).unwrap(), pts);
    }

    #[test]
    fn encoding_empty_points_is_rejected() {
        assert!(encode(&[]).is_err());
    }

    #[test]
    fn decoding_truncated_chunk_errors_instead_of_panicking() {
        let pts = points(&[(0, 1.0), (1000, 2.0), (2000, 3.0)]);
        let encoded = encode(&pts).unwrap();
        let truncated = &encoded[..encoded.len() / 2];
        assert!(decode(truncated).is_err());
    }
}
