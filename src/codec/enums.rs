//! Enum payload: `[ver][n]{hash,count}` in ascending hash order

use super::wire::{varint32_size, varint64_size, WireReader, WireWriter};
use super::{WireFormat, VERSION_1_ENUM_ROLLUP};
use crate::error::CodecError;
use crate::rollup::EnumRollup;

impl WireFormat for EnumRollup {
    const KIND: &'static str = "enum";
    const CURRENT_VERSION: u8 = VERSION_1_ENUM_ROLLUP;

    fn body_len(&self) -> usize {
        varint32_size(self.count() as i32)
            + self
                .counts()
                .iter()
                .map(|(h, c)| varint64_size(*h) + varint64_size(*c as i64))
                .sum::<usize>()
    }

    fn write_body(&self, writer: &mut WireWriter) {
        writer.put_varint32(self.count() as i32);
        for (hash, count) in self.counts() {
            writer.put_varint64(*hash);
            writer.put_varint64(*count as i64);
        }
    }

    fn read_body(reader: &mut WireReader<'_>, _version: u8) -> Result<Self, CodecError> {
        let n = reader.read_varint32()? as u32;
        let mut rollup = EnumRollup::new();
        for _ in 0..n {
            let hash = reader.read_varint64()?;
            let count = reader.read_varint64()? as u64;
            rollup = rollup.with_hashed_value(hash, count);
        }
        Ok(rollup)
    }
}
