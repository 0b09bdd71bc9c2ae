//! Packed on-arena record layout:
//! `| next_offset u32 BE | header(20 B) | body |`
//! header = `| total_len | float_n | int_n | string_n | cell_idx |` (all BE u32)
//! body   = floats (f64 LE) ‖ ints (i32 BE, 4 B each) ‖ strings, each
//!          followed by a `\t` terminator
//!
//! Ints are stored as fixed 4-byte big-endian integers rather than their
//! JSON text form — a JSON-encoded i32 does not generally fit a 4-byte
//! slot, so the fixed-width contract only round-trips correctly this way.

use crate::error::{GeocubeError, Result};
use crate::point::DataPoint;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub const HEADER_LEN: usize = 20;
pub const NEXT_OFFSET_LEN: usize = 4;

#[derive(Debug)]
pub struct Record {
    pub next_offset: u32,
    pub cell_idx: u32,
    pub point: DataPoint,
}

pub struct EncodedRecord {
    pub bytes: Vec<u8>,
}

impl EncodedRecord {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn patch_next_offset(&mut self, next_offset: u32) {
        BigEndian::write_u32(&mut self.bytes[0..4], next_offset);
    }
}

pub fn encode(point: &DataPoint, cell_idx: u32) -> EncodedRecord {
    let float_n = point.floats.len() as u32;
    let int_n = point.ints.len() as u32;
    let string_n = point.strings.len() as u32;

    let mut string_bytes = Vec::new();
    for s in &point.strings {
        string_bytes.extend_from_slice(s.as_bytes());
        string_bytes.push(b'\t');
    }
    let body_len = (float_n as usize) * 8 + (int_n as usize) * 4 + string_bytes.len();

    let mut bytes = Vec::with_capacity(NEXT_OFFSET_LEN + HEADER_LEN + body_len);
    bytes.extend_from_slice(&[0u8; 4]); // next_offset, patched later

    let mut header = [0u8; HEADER_LEN];
    BigEndian::write_u32(&mut header[0..4], body_len as u32);
    BigEndian::write_u32(&mut header[4..8], float_n);
    BigEndian::write_u32(&mut header[8..12], int_n);
    BigEndian::write_u32(&mut header[12..16], string_n);
    BigEndian::write_u32(&mut header[16..20], cell_idx);
    bytes.extend_from_slice(&header);

    for &f in &point.floats {
        let mut buf = [0u8; 8];
        LittleEndian::write_f64(&mut buf, f);
        bytes.extend_from_slice(&buf);
    }
    for &i in &point.ints {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, i);
        bytes.extend_from_slice(&buf);
    }
    bytes.extend_from_slice(&string_bytes);

    EncodedRecord { bytes }
}

/// Decodes one record starting at `arena[offset..]`. Returns the record
/// and the offset one past its end.
pub fn decode(arena: &[u8], offset: usize, cube_id: i32) -> Result<(Record, usize)> {
    let corrupt = |reason: &str| GeocubeError::Corrupted {
        cube_id,
        reason: reason.to_string(),
    };

    if offset + NEXT_OFFSET_LEN + HEADER_LEN > arena.len() {
        return Err(corrupt("record header runs past end of arena"));
    }
    let next_offset = BigEndian::read_u32(&arena[offset..offset + 4]);
    let header = &arena[offset + 4..offset + 4 + HEADER_LEN];
    let total_len = BigEndian::read_u32(header[0..4].try_into().unwrap()) as usize;
    let float_n = BigEndian::read_u32(header[4..8].try_into().unwrap()) as usize;
    let int_n = BigEndian::read_u32(header[8..12].try_into().unwrap()) as usize;
    let string_n = BigEndian::read_u32(header[12..16].try_into().unwrap()) as usize;

    let body_start = offset + NEXT_OFFSET_LEN + HEADER_LEN;
    let body_end = body_start + total_len;
    if body_end > arena.len() {
        return Err(corrupt("record body runs past end of arena"));
    }
    let body = &arena[body_start..body_end];

    let expected_fixed = float_n * 8 + int_n * 4;
    if body.len() < expected_fixed {
        return Err(corrupt("body shorter than float/int payload"));
    }

    let mut floats = Vec::with_capacity(float_n);
    for i in 0..float_n {
        floats.push(LittleEndian::read_f64(&body[i * 8..i * 8 + 8]));
    }
    let int_start = float_n * 8;
    let mut ints = Vec::with_capacity(int_n);
    for i in 0..int_n {
        let s = int_start + i * 4;
        ints.push(BigEndian::read_i32(&body[s..s + 4]));
    }
    let string_bytes = &body[expected_fixed..];
    let strings: Vec<String> = if string_n == 0 {
        Vec::new()
    } else {
        let joined = std::str::from_utf8(string_bytes)
            .map_err(|_| corrupt("string payload is not valid utf8"))?;
        let joined = joined.strip_suffix('\t').unwrap_or(joined);
        joined.split('\t').map(|s| s.to_string()).collect()
    };
    if strings.len() != string_n {
        return Err(corrupt("string_n does not match decoded string count"));
    }

    let point = DataPoint::new(floats, ints, strings);
    Ok((
        Record {
            next_offset,
            cell_idx: BigEndian::read_u32(header[16..20].try_into().unwrap()),
            point,
        },
        body_end,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let p = DataPoint::new(
            vec![1.5, -2.25],
            vec![7, -9],
            vec!["hello".into(), "world".into()],
        );
        let mut enc = encode(&p, 3);
        enc.patch_next_offset(0);
        let (record, end) = decode(&enc.bytes, 0, 0).unwrap();
        assert_eq!(end, enc.len());
        assert_eq!(record.cell_idx, 3);
        assert_eq!(record.point.floats, p.floats);
        assert_eq!(record.point.ints, p.ints);
        assert_eq!(record.point.strings, p.strings);
    }

    #[test]
    fn empty_point_round_trips() {
        let p = DataPoint::new(vec![], vec![], vec![]);
        let enc = encode(&p, 0);
        let (record, end) = decode(&enc.bytes, 0, 0).unwrap();
        assert_eq!(end, enc.len());
        assert!(record.point.floats.is_empty());
        assert!(record.point.strings.is_empty());
    }

    #[test]
    fn seed_scenario_s6_total_len_is_24() {
        let p = DataPoint::new(vec![1.5, -2.25], vec![42], vec!["a".into(), "b".into()]);
        let mut enc = encode(&p, 0);
        enc.patch_next_offset(0);
        let total_len = BigEndian::read_u32(&enc.bytes[4..8]);
        assert_eq!(total_len, 24);

        let (record, end) = decode(&enc.bytes, 0, 0).unwrap();
        assert_eq!(end, enc.len());
        assert_eq!(record.point.floats, p.floats);
        assert_eq!(record.point.ints, p.ints);
        assert_eq!(record.point.strings, p.strings);
    }

    #[test]
    fn truncated_arena_is_corrupted() {
        let p = DataPoint::new(vec![1.0], vec![], vec![]);
        let enc = encode(&p, 0);
        let truncated = &enc.bytes[..enc.len() - 2];
        let err = decode(truncated, 0, 42).unwrap_err();
        assert!(matches!(err, GeocubeError::Corrupted { cube_id: 42, .. }));
    }
}
