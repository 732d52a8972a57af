//! Full resolution samples: `[ver][type][value]`

use super::wire::{varint32_size, varint64_size, WireReader, WireWriter};
use super::{B_DOUBLE, B_I32, B_I64, VERSION_1_FULL_RES};
use crate::error::CodecError;
use crate::types::{Number, Sample};
use bytes::Bytes;

/// Encode one raw sample
///
/// Floats are widened and written as doubles. Strings and booleans have no
/// numeric encoding and are rejected.
pub fn encode_raw(sample: &Sample) -> Result<Bytes, CodecError> {
    let (type_byte, size) = match sample {
        Sample::Int(v) => (B_I32, varint32_size(*v)),
        Sample::Long(v) => (B_I64, varint64_size(*v)),
        Sample::Double(_) | Sample::Float(_) => (B_DOUBLE, 8),
        Sample::Str(_) => {
            return Err(CodecError::UnexpectedValueKind(
                "string samples are not numeric".into(),
            ))
        }
        Sample::Bool(_) => {
            return Err(CodecError::UnsupportedType(
                "boolean samples have no encoding".into(),
            ))
        }
    };

    let mut writer = WireWriter::with_capacity(2 + size);
    writer.put_u8(VERSION_1_FULL_RES);
    writer.put_u8(type_byte);
    match sample {
        Sample::Int(v) => writer.put_varint32(*v),
        Sample::Long(v) => writer.put_varint64(*v),
        Sample::Double(v) => writer.put_f64(*v),
        Sample::Float(v) => writer.put_f64(*v as f64),
        Sample::Str(_) | Sample::Bool(_) => {}
    }
    writer.finish()
}

/// Decode one raw sample
pub fn decode_raw(buf: &[u8]) -> Result<Number, CodecError> {
    let mut reader = WireReader::new(buf);
    let version = reader.read_u8()?;
    if version != VERSION_1_FULL_RES {
        return Err(CodecError::UnsupportedVersion {
            kind: "full_res",
            version,
        });
    }
    let value = reader.read_number()?;
    reader.expect_end()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_long_double() {
        assert_eq!(decode_raw(&encode_raw(&Sample::Int(-7)).unwrap()).unwrap(), Number::Long(-7));
        assert_eq!(
            decode_raw(&encode_raw(&Sample::Long(1 << 40)).unwrap()).unwrap(),
            Number::Long(1 << 40)
        );
        assert_eq!(
            decode_raw(&encode_raw(&Sample::Float(0.5)).unwrap()).unwrap(),
            Number::Double(0.5)
        );
    }

    #[test]
    fn test_layout() {
        let bytes = encode_raw(&Sample::Long(300)).unwrap();
        assert_eq!(&bytes[..], &[0, b'l', 0xAC, 0x02]);
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert!(matches!(
            encode_raw(&Sample::Str("x".into())),
            Err(CodecError::UnexpectedValueKind(_))
        ));
        assert!(matches!(
            encode_raw(&Sample::Bool(true)),
            Err(CodecError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_bad_type_byte() {
        assert!(matches!(decode_raw(&[0, 2]), Err(CodecError::MalformedBuffer(_))));
    }

    #[test]
    fn test_trailing_bytes() {
        assert!(matches!(
            decode_raw(&[0, b'l', 1, 1]),
            Err(CodecError::MalformedBuffer(_))
        ));
    }
}
