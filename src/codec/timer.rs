//! Timer payload
//!
//! ```text
//! [ver][sum][count][rate][sample_count][avg][max][min][var][n]{name,[type][value]}
//! ```
//!
//! Version 1 stored the sum as an integral varint; version 2 stores a double.
//! Both are readable, only version 2 is written.

use super::basic::{put_stat, read_stats, stat_block_size};
use super::wire::{number_size, string_size, varint32_size, varint64_size, WireReader, WireWriter};
use super::{WireFormat, VERSION_1_TIMER, VERSION_2_TIMER};
use crate::error::CodecError;
use crate::rollup::{StatType, TimerRollup};
use bytes::Bytes;

const TIMER_ORDER: [StatType; 4] = [
    StatType::Average,
    StatType::Max,
    StatType::Min,
    StatType::Variance,
];

fn tail_len(timer: &TimerRollup) -> usize {
    varint64_size(timer.count() as i64)
        + 8
        + varint32_size(timer.sample_count() as i32)
        + TIMER_ORDER
            .iter()
            .map(|s| stat_block_size(timer.stats().get(*s)))
            .sum::<usize>()
        + varint32_size(timer.percentiles().len() as i32)
        + timer
            .percentiles()
            .iter()
            .map(|(name, value)| string_size(name) + number_size(*value))
            .sum::<usize>()
}

fn write_tail(timer: &TimerRollup, writer: &mut WireWriter) {
    writer.put_varint64(timer.count() as i64);
    writer.put_f64(timer.rate());
    writer.put_varint32(timer.sample_count() as i32);
    for stat in TIMER_ORDER {
        put_stat(writer, stat, timer.stats().get(stat));
    }
    writer.put_varint32(timer.percentiles().len() as i32);
    for (name, value) in timer.percentiles() {
        writer.put_str(name);
        writer.put_number(*value);
    }
}

/// Encode a timer in the legacy version 1 layout
///
/// The sum is truncated to an integer. Kept so that readers can be checked
/// against payloads from older writers.
pub fn encode_timer_v1(timer: &TimerRollup) -> Result<Bytes, CodecError> {
    let sum = timer.sum() as i64;
    let mut writer = WireWriter::with_capacity(1 + varint64_size(sum) + tail_len(timer));
    writer.put_u8(VERSION_1_TIMER);
    writer.put_varint64(sum);
    write_tail(timer, &mut writer);
    writer.finish()
}

impl WireFormat for TimerRollup {
    const KIND: &'static str = "timer";
    const CURRENT_VERSION: u8 = VERSION_2_TIMER;

    fn supports_version(version: u8) -> bool {
        version == VERSION_1_TIMER || version == VERSION_2_TIMER
    }

    fn body_len(&self) -> usize {
        8 + tail_len(self)
    }

    fn write_body(&self, writer: &mut WireWriter) {
        writer.put_f64(self.sum());
        write_tail(self, writer);
    }

    fn read_body(reader: &mut WireReader<'_>, version: u8) -> Result<Self, CodecError> {
        let sum = if version == VERSION_1_TIMER {
            reader.read_varint64()? as f64
        } else {
            reader.read_f64()?
        };
        let count = reader.read_varint64()? as u64;
        let rate = reader.read_f64()?;
        let sample_count = reader.read_varint32()? as u32;
        let stats = read_stats(reader, count.max(1))?;

        let mut builder = TimerRollup::builder()
            .sum(sum)
            .count(count)
            .rate(rate)
            .sample_count(sample_count)
            .average(stats.average)
            .max(stats.max)
            .min(stats.min)
            .variance(stats.variance);

        let n = reader.read_varint32()? as u32;
        for _ in 0..n {
            let name = reader.read_string()?;
            let value = reader.read_number()?;
            builder = builder.percentile(name, value);
        }
        Ok(builder.build())
    }
}
