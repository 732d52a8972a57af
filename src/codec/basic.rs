//! Basic and gauge payloads, plus the stat blocks shared with timers

use super::wire::{number_size, varint64_size, WireReader, WireWriter};
use super::{WireFormat, VERSION_1_ROLLUP};
use crate::error::CodecError;
use crate::rollup::{BasicRollup, GaugeRollup, StatSummary, StatType};
use crate::types::Number;

/// Size of one `[stat][type][value]` block
#[inline]
pub(crate) fn stat_block_size(value: Number) -> usize {
    1 + number_size(value)
}

/// Write `[stat][type][value]`
pub(crate) fn put_stat(writer: &mut WireWriter, stat: StatType, value: Number) {
    writer.put_u8(stat.as_byte());
    writer.put_number(value);
}

/// Read `n` stat blocks, routing each by its stat byte
///
/// All four stats must be present.
pub(crate) fn read_stats(
    reader: &mut WireReader<'_>,
    count: u64,
) -> Result<StatSummary, CodecError> {
    let mut values: [Option<Number>; 4] = [None; 4];
    for _ in 0..4 {
        let stat_byte = reader.read_u8()?;
        let stat = StatType::from_byte(stat_byte).ok_or_else(|| {
            CodecError::MalformedBuffer(format!("unknown stat type {}", stat_byte))
        })?;
        values[stat.as_byte() as usize] = Some(reader.read_number()?);
    }
    match values {
        [Some(average), Some(variance), Some(min), Some(max)] => {
            Ok(StatSummary::new(count, average, variance, min, max))
        }
        _ => Err(CodecError::MalformedBuffer("missing stat block".into())),
    }
}

const BASIC_ORDER: [StatType; 4] = [
    StatType::Average,
    StatType::Variance,
    StatType::Min,
    StatType::Max,
];

fn basic_body_len(rollup: &BasicRollup) -> usize {
    let count = rollup.count();
    let mut size = varint64_size(count as i64);
    if count > 0 {
        size += BASIC_ORDER
            .iter()
            .map(|s| stat_block_size(rollup.stats().get(*s)))
            .sum::<usize>();
    }
    size
}

fn write_basic_body(rollup: &BasicRollup, writer: &mut WireWriter) {
    writer.put_varint64(rollup.count() as i64);
    if rollup.count() > 0 {
        for stat in BASIC_ORDER {
            put_stat(writer, stat, rollup.stats().get(stat));
        }
    }
}

fn read_basic_body(reader: &mut WireReader<'_>) -> Result<BasicRollup, CodecError> {
    let count = reader.read_varint64()? as u64;
    if count == 0 {
        return Ok(BasicRollup::empty());
    }
    Ok(BasicRollup::new(read_stats(reader, count)?))
}

impl WireFormat for BasicRollup {
    const KIND: &'static str = "basic";
    const CURRENT_VERSION: u8 = VERSION_1_ROLLUP;

    fn body_len(&self) -> usize {
        basic_body_len(self)
    }

    fn write_body(&self, writer: &mut WireWriter) {
        write_basic_body(self, writer);
    }

    fn read_body(reader: &mut WireReader<'_>, _version: u8) -> Result<Self, CodecError> {
        read_basic_body(reader)
    }
}

impl WireFormat for GaugeRollup {
    const KIND: &'static str = "gauge";
    const CURRENT_VERSION: u8 = VERSION_1_ROLLUP;

    fn body_len(&self) -> usize {
        basic_body_len(self.basic())
            + varint64_size(self.latest_timestamp())
            + number_size(self.latest_value())
    }

    fn write_body(&self, writer: &mut WireWriter) {
        write_basic_body(self.basic(), writer);
        writer.put_varint64(self.latest_timestamp());
        writer.put_number(self.latest_value());
    }

    fn read_body(reader: &mut WireReader<'_>, _version: u8) -> Result<Self, CodecError> {
        let basic = read_basic_body(reader)?;
        let timestamp = reader.read_varint64()?;
        let latest = reader.read_number()?;
        Ok(GaugeRollup::new(basic, timestamp, latest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Points;

    fn raw(values: &[(i64, Number)]) -> Points<Number> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_empty_basic_is_two_bytes() {
        let bytes = BasicRollup::empty().encode().unwrap();
        assert_eq!(&bytes[..], &[0, 0]);
        assert_eq!(BasicRollup::decode(&bytes).unwrap(), BasicRollup::empty());
    }

    #[test]
    fn test_basic_layout() {
        let rollup = BasicRollup::from_raw(&raw(&[(0, Number::Long(2)), (1, Number::Long(2))]));
        let bytes = rollup.encode().unwrap();
        assert_eq!(
            &bytes[..13],
            &[0, 2, 0, b'l', 2, 1, b'n', 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(BasicRollup::decode(&bytes).unwrap(), rollup);
    }

    #[test]
    fn test_stat_blocks_decoded_by_type_not_position() {
        // max, min, var, avg
        let bytes = [
            0, 1, 3, b'l', 9, 2, b'l', 9, 1, b'n', 0, 0, 0, 0, 0, 0, 0, 0, 0, b'l', 9,
        ];
        let rollup = BasicRollup::decode(&bytes).unwrap();
        assert_eq!(rollup.average(), Number::Long(9));
        assert_eq!(rollup.max(), Number::Long(9));
        assert_eq!(rollup.variance(), Number::Double(0.0));
    }

    #[test]
    fn test_missing_stat_is_malformed() {
        let bytes = [0, 1, 0, b'l', 9, 0, b'l', 9, 0, b'l', 9, 0, b'l', 9];
        assert!(matches!(
            BasicRollup::decode(&bytes),
            Err(CodecError::MalformedBuffer(_))
        ));
    }

    #[test]
    fn test_gauge_round_trip_keeps_latest_tag() {
        let gauge = GaugeRollup::from_raw(&raw(&[(10, Number::Long(1)), (20, Number::Double(2.5))]));
        let decoded = GaugeRollup::decode(&gauge.encode().unwrap()).unwrap();
        assert_eq!(decoded, gauge);
        assert_eq!(decoded.latest_value(), Number::Double(2.5));
        assert_eq!(decoded.latest_timestamp(), 20);
    }

    #[test]
    fn test_empty_gauge_round_trip() {
        let gauge = GaugeRollup::empty();
        assert_eq!(GaugeRollup::decode(&gauge.encode().unwrap()).unwrap(), gauge);
    }
}
