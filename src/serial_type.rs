//! Serial-type arithmetic (§3.4, §4.2).
//!
//! Pure arithmetic mapping between a record's serial-type code and the
//! storage class / content-byte length it denotes. Grounded on the
//! teacher's `serial_type.rs`, whose `to_sql_value` function walks this
//! same table but mixes in decoding; this module keeps only the
//! arithmetic, so it can be reused by the record decoder, the record
//! encoder, and the filter pipeline's offset-hoisting pass without
//! pulling in value decoding.

use crate::error::Error;

/// Coarse storage class a serial type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

/// Returns the number of content bytes following the serial type in the
/// record body. Fails with [`Error::UnsupportedFeature`] for the two
/// reserved codes (10, 11), and with [`Error::CorruptPage`] if a
/// text/blob serial type's implied byte length would overflow usize
/// (pathologically large serial type values).
pub fn content_size(serial_type: i64) -> Result<usize, Error> {
    match serial_type {
        0 => Ok(0),
        1 => Ok(1),
        2 => Ok(2),
        3 => Ok(3),
        4 => Ok(4),
        5 => Ok(6),
        6 | 7 => Ok(8),
        8 | 9 => Ok(0),
        10 | 11 => Err(Error::UnsupportedFeature(format!(
            "reserved serial type {serial_type}"
        ))),
        st if st < 0 => Err(Error::CorruptPage(format!("negative serial type {st}"))),
        st => {
            let n = st - 12;
            let byte_len = n / 2;
            if byte_len < 0 || byte_len > i64::from(u32::MAX) {
                return Err(Error::CorruptPage(format!(
                    "serial type {st} implies an out-of-range byte length"
                )));
            }
            Ok(byte_len as usize)
        }
    }
}

/// Returns the storage class a serial type belongs to. Reserved codes
/// are rejected the same way as in [`content_size`].
pub fn storage_class(serial_type: i64) -> Result<StorageClass, Error> {
    match serial_type {
        0 => Ok(StorageClass::Null),
        1..=6 | 8 | 9 => Ok(StorageClass::Integer),
        7 => Ok(StorageClass::Real),
        10 | 11 => Err(Error::UnsupportedFeature(format!(
            "reserved serial type {serial_type}"
        ))),
        st if st < 12 => Err(Error::CorruptPage(format!(
            "negative or out-of-range serial type {st}"
        ))),
        st if st % 2 == 0 => Ok(StorageClass::Blob),
        _ => Ok(StorageClass::Text),
    }
}

/// Smallest valid serial type for a decoded integer value (the inverse
/// of `content_size` for the integer tiers): picks the literal-0/1
/// codes, then the narrowest sign-extending width that holds `v`.
pub fn serial_type_for_int(v: i64) -> i64 {
    match v {
        0 => 8,
        1 => 9,
        -128..=127 => 1,
        -32768..=32767 => 2,
        -8_388_608..=8_388_607 => 3,
        -2_147_483_648..=2_147_483_647 => 4,
        _ if (-140_737_488_355_328..=140_737_488_355_327).contains(&v) => 5,
        _ => 6,
    }
}

/// Serial type for a BLOB payload of `byte_len` bytes.
pub fn serial_type_for_blob(byte_len: usize) -> i64 {
    12 + 2 * byte_len as i64
}

/// Serial type for a TEXT payload of `byte_len` bytes.
pub fn serial_type_for_text(byte_len: usize) -> i64 {
    13 + 2 * byte_len as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_size_matches_table() {
        let cases: &[(i64, usize)] = &[
            (0, 0),
            (1, 1),
            (2, 2),
            (3, 3),
            (4, 4),
            (5, 6),
            (6, 8),
            (7, 8),
            (8, 0),
            (9, 0),
            (12, 0),
            (13, 0),
            (14, 1),
            (19, 3),
        ];
        for &(st, expected) in cases {
            assert_eq!(content_size(st).unwrap(), expected, "serial type {st}");
        }
    }

    #[test]
    fn reserved_types_are_unsupported() {
        assert!(matches!(content_size(10), Err(Error::UnsupportedFeature(_))));
        assert!(matches!(content_size(11), Err(Error::UnsupportedFeature(_))));
    }

    #[test]
    fn int_serial_type_round_trips_through_content_size() {
        for v in [0i64, 1, -1, 127, -128, 128, 32767, -32768, 70000, i64::MAX, i64::MIN] {
            let st = serial_type_for_int(v);
            assert!(content_size(st).unwrap() <= 8);
        }
    }

    #[test]
    fn zero_and_one_use_literal_codes() {
        assert_eq!(serial_type_for_int(0), 8);
        assert_eq!(serial_type_for_int(1), 9);
    }

    #[test]
    fn byte_range_int_uses_narrowest_tier() {
        assert_eq!(serial_type_for_int(127), 1);
        assert_eq!(serial_type_for_int(-128), 1);
        assert_eq!(serial_type_for_int(128), 2);
    }
}
