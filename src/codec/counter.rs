//! Counter payload: `[ver][type][count][rate][sample_count]`

use super::wire::{number_size, varint32_size, WireReader, WireWriter};
use super::{WireFormat, VERSION_1_COUNTER_ROLLUP};
use crate::error::CodecError;
use crate::rollup::CounterRollup;

impl WireFormat for CounterRollup {
    const KIND: &'static str = "counter";
    const CURRENT_VERSION: u8 = VERSION_1_COUNTER_ROLLUP;

    fn body_len(&self) -> usize {
        number_size(self.count()) + 8 + varint32_size(self.sample_count() as i32)
    }

    fn write_body(&self, writer: &mut WireWriter) {
        writer.put_number(self.count());
        writer.put_f64(self.rate());
        writer.put_varint32(self.sample_count() as i32);
    }

    fn read_body(reader: &mut WireReader<'_>, _version: u8) -> Result<Self, CodecError> {
        let count = reader.read_number()?;
        let rate = reader.read_f64()?;
        let sample_count = reader.read_varint32()? as u32;
        Ok(CounterRollup::new(count, rate, sample_count))
    }
}
