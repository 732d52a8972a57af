//! String metadata values: `[4][len][utf8]`

use super::wire::{string_size, WireReader, WireWriter};
use super::METADATA_STRING_TYPE;
use crate::error::CodecError;
use bytes::Bytes;

/// Encode a metadata string
pub fn encode(value: &str) -> Result<Bytes, CodecError> {
    let mut writer = WireWriter::with_capacity(1 + string_size(value));
    writer.put_u8(METADATA_STRING_TYPE);
    writer.put_str(value);
    writer.finish()
}

/// Decode a metadata string
pub fn decode(buf: &[u8]) -> Result<String, CodecError> {
    let mut reader = WireReader::new(buf);
    let type_byte = reader.read_u8()?;
    if type_byte != METADATA_STRING_TYPE {
        return Err(CodecError::UnexpectedValueKind(format!(
            "metadata type {}",
            type_byte
        )));
    }
    let value = reader.read_string()?;
    reader.expect_end()?;
    Ok(value)
}
