//! Record (row) codec (§4.6).
//!
//! Grounded on the teacher's `record.rs` (`HeaderIterator`,
//! `ValueIterator`, both built on the external `sqlite_varint` crate)
//! and `serial_type.rs::to_sql_value` for the serial-type-to-value
//! mapping. **Redesign**: the teacher's iterators borrow raw
//! `(serial_type, &[u8])` pairs and leave conversion to an owned
//! `SqlValue` to a separate pass; this module decodes straight into
//! [`ColumnValue`], a tagged union with inline storage for primitives
//! and a borrowed slice for text/blob (§9 "Tagged unions" -
//! specifically chosen to avoid a heap allocation per cell on the hot
//! decode path). The teacher has no encode direction at all (it never
//! needed to write records); `compute_encoded_size`/`encode_record`
//! here are new, needed by the ledger's `Append` (§4.13) and by the
//! transaction buffer's insert path (§4.16). Depends on
//! [`crate::varint`] instead of the teacher's `sqlite_varint` crate
//! (see DESIGN.md).

use crate::error::{self, Error};
use crate::serial_type::{self, StorageClass};
use crate::varint;

/// A decoded record column. Primitives are stored inline; `Text`/`Blob`
/// borrow from the record's payload buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnValue<'a> {
    Null,
    Int(i64),
    Real(f64),
    Text(&'a [u8]),
    Blob(&'a [u8]),
}

impl<'a> ColumnValue<'a> {
    pub fn storage_class(&self) -> StorageClass {
        match self {
            ColumnValue::Null => StorageClass::Null,
            ColumnValue::Int(_) => StorageClass::Integer,
            ColumnValue::Real(_) => StorageClass::Real,
            ColumnValue::Text(_) => StorageClass::Text,
            ColumnValue::Blob(_) => StorageClass::Blob,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Real(v) => Some(*v),
            ColumnValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            ColumnValue::Text(b) | ColumnValue::Blob(b) => Some(b),
            _ => None,
        }
    }
}

/// Decodes one column's content bytes given its serial type. `pub(crate)`
/// so the filter pipeline's offset-hoisted evaluator (§4.10(c)) can
/// decode a single column from a precomputed offset without repeating
/// [`decode_all`]'s header walk.
pub(crate) fn decode_from_content(serial_type: i64, body: &[u8]) -> Result<ColumnValue<'_>, Error> {
    match serial_type {
        0 => Ok(ColumnValue::Null),
        8 => Ok(ColumnValue::Int(0)),
        9 => Ok(ColumnValue::Int(1)),
        1 => Ok(ColumnValue::Int(body[0] as i8 as i64)),
        2 => Ok(ColumnValue::Int(i16::from_be_bytes([body[0], body[1]]) as i64)),
        3 => {
            let sign_extend = if body[0] & 0x80 != 0 { 0xff } else { 0x00 };
            Ok(ColumnValue::Int(i32::from_be_bytes([
                sign_extend,
                body[0],
                body[1],
                body[2],
            ]) as i64))
        }
        4 => Ok(ColumnValue::Int(i32::from_be_bytes([
            body[0], body[1], body[2], body[3],
        ]) as i64)),
        5 => {
            let sign_extend = if body[0] & 0x80 != 0 { 0xff } else { 0x00 };
            let mut b = [sign_extend, sign_extend, 0, 0, 0, 0, 0, 0];
            b[2..8].copy_from_slice(&body[0..6]);
            Ok(ColumnValue::Int(i64::from_be_bytes(b)))
        }
        6 => Ok(ColumnValue::Int(i64::from_be_bytes(body[0..8].try_into().unwrap()))),
        7 => Ok(ColumnValue::Real(f64::from_bits(u64::from_be_bytes(
            body[0..8].try_into().unwrap(),
        )))),
        st if st >= 12 && st % 2 == 0 => Ok(ColumnValue::Blob(body)),
        st if st >= 13 => Ok(ColumnValue::Text(body)),
        st => Err(error::corrupt(format!("unhandled serial type {st}"))),
    }
}

/// Header-only scan: returns the number of columns in `payload`
/// without decoding any value (§4.6 `GetColumnCount`).
pub fn column_count(payload: &[u8]) -> Result<usize, Error> {
    let (header_len, header_len_bytes) = varint::read_varint(payload)?;
    let header_len = header_len as usize;
    if header_len > payload.len() {
        return Err(error::corrupt("record header longer than payload"));
    }
    let mut offset = header_len_bytes;
    let mut count = 0usize;
    while offset < header_len {
        let (_, n) = varint::read_varint(&payload[offset..])?;
        offset += n;
        count += 1;
    }
    Ok(count)
}

/// Fills `dest` with the record's serial types and returns the offset
/// at which the body begins (§4.6 `ReadSerialTypes`).
pub fn read_serial_types(payload: &[u8], dest: &mut Vec<i64>) -> Result<usize, Error> {
    dest.clear();
    let (header_len, header_len_bytes) = varint::read_varint(payload)?;
    let header_len = header_len as usize;
    if header_len > payload.len() {
        return Err(error::corrupt("record header longer than payload"));
    }
    let mut offset = header_len_bytes;
    while offset < header_len {
        let (serial_type, n) = varint::read_varint(&payload[offset..])?;
        serial_type::content_size(serial_type)?;
        dest.push(serial_type);
        offset += n;
    }
    Ok(header_len)
}

/// Decodes every column in `payload`, allocating a fresh `Vec`
/// (§4.6's "allocating overload").
pub fn decode_all(payload: &[u8]) -> Result<Vec<ColumnValue<'_>>, Error> {
    let mut serial_types = Vec::new();
    let body_start = read_serial_types(payload, &mut serial_types)?;
    let mut offset = body_start;
    let mut out = Vec::with_capacity(serial_types.len());
    for st in serial_types {
        let size = serial_type::content_size(st)?;
        if offset + size > payload.len() {
            return Err(error::corrupt("record body shorter than declared"));
        }
        out.push(decode_from_content(st, &payload[offset..offset + size])?);
        offset += size;
    }
    Ok(out)
}

/// Decodes every column into a caller-provided destination
/// (§4.6's "buffer-reusing overload"), avoiding a fresh allocation per
/// row when `dest` is reused across calls.
pub fn decode_all_into<'a>(payload: &'a [u8], dest: &mut Vec<ColumnValue<'a>>) -> Result<(), Error> {
    dest.clear();
    let mut serial_types = Vec::new();
    let body_start = read_serial_types(payload, &mut serial_types)?;
    let mut offset = body_start;
    for st in serial_types {
        let size = serial_type::content_size(st)?;
        if offset + size > payload.len() {
            return Err(error::corrupt("record body shorter than declared"));
        }
        dest.push(decode_from_content(st, &payload[offset..offset + size])?);
        offset += size;
    }
    Ok(())
}

/// Decodes a single column by index, walking only the serial types
/// that precede it (§4.6 `DecodeColumn`).
pub fn decode_column(payload: &[u8], index: usize) -> Result<ColumnValue<'_>, Error> {
    let (header_len, header_len_bytes) = varint::read_varint(payload)?;
    let header_len = header_len as usize;
    if header_len > payload.len() {
        return Err(error::corrupt("record header longer than payload"));
    }
    let mut hdr_offset = header_len_bytes;
    let mut body_offset = header_len;
    let mut current = 0usize;
    while hdr_offset < header_len {
        let (st, n) = varint::read_varint(&payload[hdr_offset..])?;
        hdr_offset += n;
        let size = serial_type::content_size(st)?;
        if current == index {
            if body_offset + size > payload.len() {
                return Err(error::corrupt("record body shorter than declared"));
            }
            return decode_from_content(st, &payload[body_offset..body_offset + size]);
        }
        body_offset += size;
        current += 1;
    }
    Err(error::invalid_arg(format!(
        "column index {index} out of range ({current} columns)"
    )))
}

fn serial_type_for(value: &ColumnValue) -> i64 {
    match value {
        ColumnValue::Null => 0,
        ColumnValue::Int(v) => serial_type::serial_type_for_int(*v),
        ColumnValue::Real(_) => 7,
        ColumnValue::Text(b) => serial_type::serial_type_for_text(b.len()),
        ColumnValue::Blob(b) => serial_type::serial_type_for_blob(b.len()),
    }
}

fn content_bytes(value: &ColumnValue, st: i64, out: &mut Vec<u8>) {
    match value {
        ColumnValue::Null => {}
        ColumnValue::Int(v) => {
            let size = serial_type::content_size(st).unwrap();
            let full = v.to_be_bytes();
            out.extend_from_slice(&full[8 - size..]);
        }
        ColumnValue::Real(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        ColumnValue::Text(b) | ColumnValue::Blob(b) => out.extend_from_slice(b),
    }
}

/// Computes the total encoded record size in bytes, without writing
/// anything (§4.6 `ComputeEncodedSize`).
pub fn compute_encoded_size(values: &[ColumnValue]) -> usize {
    let serial_types: Vec<i64> = values.iter().map(serial_type_for).collect();
    let header_body_len: usize = serial_types.iter().map(|&st| varint::encoded_len(st)).sum();
    let mut header_len = header_body_len + varint::encoded_len(header_body_len as i64);
    loop {
        let candidate = header_body_len + varint::encoded_len(header_len as i64);
        if candidate == header_len {
            break;
        }
        header_len = candidate;
    }
    let body_len: usize = serial_types
        .iter()
        .map(|&st| serial_type::content_size(st).unwrap())
        .sum();
    header_len + body_len
}

/// Encodes `values` into `dest` as `[header_len_varint,
/// serial_type_varints..., body...]` (§4.6 `EncodeRecord`). `dest` is
/// cleared first.
pub fn encode_record(values: &[ColumnValue], dest: &mut Vec<u8>) {
    dest.clear();
    let serial_types: Vec<i64> = values.iter().map(serial_type_for).collect();
    let header_body_len: usize = serial_types.iter().map(|&st| varint::encoded_len(st)).sum();
    let mut header_len = header_body_len + varint::encoded_len(header_body_len as i64);
    loop {
        let candidate = header_body_len + varint::encoded_len(header_len as i64);
        if candidate == header_len {
            break;
        }
        header_len = candidate;
    }

    let mut header_varint = [0u8; varint::MAX_VARINT_LEN];
    let n = varint::write_varint(header_len as i64, &mut header_varint);
    dest.extend_from_slice(&header_varint[..n]);
    for &st in &serial_types {
        let n = varint::write_varint(st, &mut header_varint);
        dest.extend_from_slice(&header_varint[..n]);
    }
    for (value, &st) in values.iter().zip(&serial_types) {
        content_bytes(value, st, dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_literal_zero_and_one() {
        let record: &[u8] = &[0x03, 0x08, 0x09];
        let values = decode_all(record).unwrap();
        assert_eq!(values, vec![ColumnValue::Int(0), ColumnValue::Int(1)]);
    }

    #[test]
    fn decodes_text_and_float() {
        let record: &[u8] = &[
            0x06, 0x08, 0x09, 0x07, 0x13, 0x00, 0x40, 0x09, 0x21, 0xca, 0xc0, 0x83, 0x12, 0x6f,
            0x54, 0x65, 0x6e,
        ];
        let values = decode_all(record).unwrap();
        assert_eq!(values.len(), 5);
        assert_eq!(values[0], ColumnValue::Int(0));
        assert_eq!(values[1], ColumnValue::Int(1));
        assert!(matches!(values[2], ColumnValue::Real(f) if (f - 3.1415).abs() < 1e-6));
        assert_eq!(values[3], ColumnValue::Text(b"Ten"));
        assert_eq!(values[4], ColumnValue::Null);
    }

    #[test]
    fn column_count_matches_header_entries() {
        let record: &[u8] = &[0x03, 0x08, 0x09];
        assert_eq!(column_count(record).unwrap(), 2);
    }

    #[test]
    fn decode_column_matches_decode_all() {
        let record: &[u8] = &[
            0x06, 0x08, 0x09, 0x07, 0x13, 0x00, 0x40, 0x09, 0x21, 0xca, 0xc0, 0x83, 0x12, 0x6f,
            0x54, 0x65, 0x6e,
        ];
        let all = decode_all(record).unwrap();
        for i in 0..all.len() {
            assert_eq!(decode_column(record, i).unwrap(), all[i]);
        }
        assert!(decode_column(record, 99).is_err());
    }

    #[test]
    fn encode_then_decode_round_trips_mixed_row() {
        let values = vec![
            ColumnValue::Null,
            ColumnValue::Int(0),
            ColumnValue::Int(1),
            ColumnValue::Int(-42),
            ColumnValue::Int(70_000),
            ColumnValue::Real(2.5),
            ColumnValue::Text(b"hello"),
            ColumnValue::Blob(b"\x01\x02\x03"),
        ];
        let mut buf = Vec::new();
        encode_record(&values, &mut buf);
        assert_eq!(buf.len(), compute_encoded_size(&values));
        let decoded = decode_all(&buf).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn reserved_serial_type_in_header_is_rejected() {
        let record: &[u8] = &[0x02, 0x0a];
        assert!(decode_all(record).is_err());
    }

    #[test]
    fn truncated_body_is_rejected() {
        let record: &[u8] = &[0x03, 0x04];
        assert!(decode_all(record).is_err());
    }
}
