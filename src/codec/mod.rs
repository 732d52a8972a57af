//! Versioned binary codec for raw samples and rollups
//!
//! Every payload starts with a version byte. Readers accept every version they
//! know and fail with [`CodecError::UnsupportedVersion`] on any other. Writers
//! always emit the current version.
//!
//! # Payload layouts
//!
//! ```text
//! raw        [ver][type][value]
//! basic      [ver][count]{[stat][type][value]} x4       avg var min max
//! gauge      basic [timestamp][type][value]
//! counter    [ver][type][count][rate][sample_count]
//! timer      [ver][sum][count][rate][sample_count]{stat} x4 [n]{name,[type][value]}
//! set        [ver][n]{hash}
//! enum       [ver][n]{hash,count}
//! histogram  [ver]{count,mean}...                        until end of buffer
//! ```
//!
//! Apart from histograms, trailing bytes after a complete payload are a
//! [`CodecError::MalformedBuffer`].

pub mod basic;
pub mod counter;
pub mod enums;
pub mod histogram;
pub mod metadata;
pub mod raw;
pub mod set;
pub mod timer;
pub mod wire;

pub use raw::{decode_raw, encode_raw};
pub use timer::encode_timer_v1;

use crate::error::CodecError;
use crate::metrics;
use crate::rollup::{
    BasicRollup, CounterRollup, EnumRollup, GaugeRollup, HistogramRollup, Rollup, RollupType,
    SetRollup, TimerRollup,
};
use crate::types::{Number, Sample};
use bytes::Bytes;
use wire::{WireReader, WireWriter};

// =============================================================================
// Constants
// =============================================================================

/// Raw sample payload version
pub const VERSION_1_FULL_RES: u8 = 0;
/// Basic and gauge payload version
pub const VERSION_1_ROLLUP: u8 = 0;
/// Counter payload version
pub const VERSION_1_COUNTER_ROLLUP: u8 = 0;
/// Timer payload version with an integral sum
pub const VERSION_1_TIMER: u8 = 0;
/// Timer payload version with a floating point sum
pub const VERSION_2_TIMER: u8 = 1;
/// Set payload version
pub const VERSION_1_SET_ROLLUP: u8 = 0;
/// Enum payload version
pub const VERSION_1_ENUM_ROLLUP: u8 = 0;
/// Histogram payload version
pub const VERSION_1_HISTOGRAM: u8 = 0;

/// 32-bit integer value tag
pub const B_I32: u8 = b'i';
/// 64-bit integer value tag
pub const B_I64: u8 = b'l';
/// Double value tag
pub const B_DOUBLE: u8 = b'n';
/// String value tag
pub const B_STR: u8 = b's';

/// Leading byte of string metadata payloads
pub const METADATA_STRING_TYPE: u8 = 4;

// =============================================================================
// WireFormat
// =============================================================================

/// A value with a versioned binary layout
pub trait WireFormat: Sized {
    /// Payload kind, used in errors and metrics
    const KIND: &'static str;

    /// Version written by [`WireFormat::encode`]
    const CURRENT_VERSION: u8;

    /// Whether the payload runs to the end of the buffer
    const READS_TO_END: bool = false;

    /// Whether a version byte can be read
    fn supports_version(version: u8) -> bool {
        version == Self::CURRENT_VERSION
    }

    /// Size of the body at the current version, excluding the version byte
    fn body_len(&self) -> usize;

    /// Write the body at the current version
    fn write_body(&self, writer: &mut WireWriter);

    /// Read a body written at `version`
    fn read_body(reader: &mut WireReader<'_>, version: u8) -> Result<Self, CodecError>;

    /// Encode with the current version byte
    fn encode(&self) -> Result<Bytes, CodecError> {
        let mut writer = WireWriter::with_capacity(1 + self.body_len());
        writer.put_u8(Self::CURRENT_VERSION);
        self.write_body(&mut writer);
        writer.finish()
    }

    /// Decode a complete payload
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = WireReader::new(buf);
        let version = reader.read_u8()?;
        if !Self::supports_version(version) {
            return Err(CodecError::UnsupportedVersion {
                kind: Self::KIND,
                version,
            });
        }
        let value = Self::read_body(&mut reader, version)?;
        if !Self::READS_TO_END {
            reader.expect_end()?;
        }
        Ok(value)
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Encode any rollup
pub fn encode(rollup: &Rollup) -> Result<Bytes, CodecError> {
    match rollup {
        Rollup::Basic(r) => r.encode(),
        Rollup::Gauge(r) => r.encode(),
        Rollup::Counter(r) => r.encode(),
        Rollup::Timer(r) => r.encode(),
        Rollup::Set(r) => r.encode(),
        Rollup::Enum(r) => r.encode(),
        Rollup::Histogram(r) => r.encode(),
    }
}

/// Decode a rollup of a known type
pub fn decode(rollup_type: RollupType, buf: &[u8]) -> Result<Rollup, CodecError> {
    Ok(match rollup_type {
        RollupType::Basic => Rollup::Basic(BasicRollup::decode(buf)?),
        RollupType::Gauge => Rollup::Gauge(GaugeRollup::decode(buf)?),
        RollupType::Counter => Rollup::Counter(CounterRollup::decode(buf)?),
        RollupType::Timer => Rollup::Timer(TimerRollup::decode(buf)?),
        RollupType::Set => Rollup::Set(SetRollup::decode(buf)?),
        RollupType::Enum => Rollup::Enum(EnumRollup::decode(buf)?),
        RollupType::Histogram => Rollup::Histogram(HistogramRollup::decode(buf)?),
    })
}

/// Decode a rollup identified by its single-byte type tag
pub fn decode_by_tag(type_byte: u8, buf: &[u8]) -> Result<Rollup, CodecError> {
    decode(RollupType::from_type_byte(type_byte)?, buf)
}

// =============================================================================
// RollupCodec
// =============================================================================

/// Codec entry point that records byte counts and failures
///
/// Holds no state; clone freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollupCodec;

impl RollupCodec {
    /// Create a codec
    pub fn new() -> Self {
        Self
    }

    /// Encode a rollup
    pub fn encode(&self, rollup: &Rollup) -> Result<Bytes, CodecError> {
        let label = rollup.rollup_type().name();
        Self::observe(label, "encode", encode(rollup), |b| b.len())
    }

    /// Decode a rollup
    pub fn decode(&self, rollup_type: RollupType, buf: &[u8]) -> Result<Rollup, CodecError> {
        let result = decode(rollup_type, buf);
        Self::observe(rollup_type.name(), "decode", result, |_| buf.len())
    }

    /// Encode a raw sample
    pub fn encode_raw(&self, sample: &Sample) -> Result<Bytes, CodecError> {
        Self::observe("raw", "encode", encode_raw(sample), |b| b.len())
    }

    /// Decode a raw sample
    pub fn decode_raw(&self, buf: &[u8]) -> Result<Number, CodecError> {
        Self::observe("raw", "decode", decode_raw(buf), |_| buf.len())
    }

    fn observe<T>(
        label: &str,
        direction: &str,
        result: Result<T, CodecError>,
        size: impl FnOnce(&T) -> usize,
    ) -> Result<T, CodecError> {
        match &result {
            Ok(value) => metrics::record_codec_bytes(label, direction, size(value)),
            Err(e) => {
                tracing::debug!(rollup_type = label, direction, error = %e, "Codec failure");
                metrics::record_codec_error(label, e.kind());
            }
        }
        result
    }
}
