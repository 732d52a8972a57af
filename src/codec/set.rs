//! Set payload: `[ver][n]{hash}` in ascending hash order

use super::wire::{varint32_size, WireReader, WireWriter};
use super::{WireFormat, VERSION_1_SET_ROLLUP};
use crate::error::CodecError;
use crate::rollup::SetRollup;

impl WireFormat for SetRollup {
    const KIND: &'static str = "set";
    const CURRENT_VERSION: u8 = VERSION_1_SET_ROLLUP;

    fn body_len(&self) -> usize {
        varint32_size(self.count() as i32)
            + self.hashes().iter().map(|h| varint32_size(*h)).sum::<usize>()
    }

    fn write_body(&self, writer: &mut WireWriter) {
        writer.put_varint32(self.count() as i32);
        for hash in self.hashes() {
            writer.put_varint32(*hash);
        }
    }

    fn read_body(reader: &mut WireReader<'_>, _version: u8) -> Result<Self, CodecError> {
        let n = reader.read_varint32()? as u32;
        (0..n).map(|_| reader.read_varint32()).collect()
    }
}
