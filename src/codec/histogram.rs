//! Histogram payload: `[ver]{count,mean}` repeated to the end of the buffer

use super::wire::{varint64_size, WireReader, WireWriter};
use super::{WireFormat, VERSION_1_HISTOGRAM};
use crate::error::CodecError;
use crate::rollup::{Bin, HistogramRollup};

impl WireFormat for HistogramRollup {
    const KIND: &'static str = "histogram";
    const CURRENT_VERSION: u8 = VERSION_1_HISTOGRAM;
    const READS_TO_END: bool = true;

    fn body_len(&self) -> usize {
        self.bins()
            .iter()
            .filter(|b| b.count > 0)
            .map(|b| varint64_size(b.count as i64) + 8)
            .sum()
    }

    fn write_body(&self, writer: &mut WireWriter) {
        for bin in self.bins().iter().filter(|b| b.count > 0) {
            writer.put_varint64(bin.count as i64);
            writer.put_f64(bin.mean);
        }
    }

    fn read_body(reader: &mut WireReader<'_>, _version: u8) -> Result<Self, CodecError> {
        let mut bins = Vec::new();
        while !reader.is_empty() {
            let count = reader.read_varint64()? as u64;
            let mean = reader.read_f64()?;
            bins.push(Bin::new(mean, count));
        }
        Ok(HistogramRollup::from_bins(bins))
    }
}
