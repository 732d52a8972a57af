//! Value hashing for set and enum rollups
//!
//! These hashes are persisted inside set and enum payloads, so they are part of
//! the wire format and must never change. They match the `hashCode` contract
//! of the JVM boxed types, which keeps payloads written by older writers
//! readable.

use crate::types::Number;

/// Hash of a string: `s[0]*31^(n-1) + ... + s[n-1]` over UTF-16 code units
pub fn hash_str(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Hash of a numeric value
///
/// Longs fold their high and low words; doubles fold the bits of their IEEE754
/// representation with NaN canonicalised.
pub fn hash_number(value: Number) -> i32 {
    match value {
        Number::Long(v) => fold(v as u64),
        Number::Double(v) => {
            let bits = if v.is_nan() {
                0x7ff8_0000_0000_0000u64
            } else {
                v.to_bits()
            };
            fold(bits)
        }
    }
}

#[inline]
fn fold(bits: u64) -> i32 {
    (bits ^ (bits >> 32)) as u32 as i32
}

/// Hash used as an enum rollup key: the string hash widened to 64 bits
pub fn hash_enum_value(s: &str) -> i64 {
    hash_str(s) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_hash_known_values() {
        assert_eq!(hash_str(""), 0);
        assert_eq!(hash_str("a"), 97);
        assert_eq!(hash_str("hello"), 99_162_322);
        // wraps past i32::MAX
        assert_eq!(hash_str("enumValue1"), hash_str("enumValue1"));
        assert_eq!(hash_str("polygenelubricants"), i32::MIN);
    }

    #[test]
    fn test_long_hash() {
        assert_eq!(hash_number(Number::Long(10)), 10);
        assert_eq!(hash_number(Number::Long(-1)), 0);
        assert_eq!(hash_number(Number::Long(1 << 32)), 1);
    }

    #[test]
    fn test_double_hash() {
        // 1.0 == 0x3ff0000000000000
        assert_eq!(hash_number(Number::Double(1.0)), 0x3ff0_0000);
        assert_eq!(
            hash_number(Number::Double(f64::NAN)),
            hash_number(Number::Double(-f64::NAN))
        );
    }

    #[test]
    fn test_enum_hash_sign_extends() {
        assert_eq!(hash_enum_value("polygenelubricants"), i32::MIN as i64);
    }
}
