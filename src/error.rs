//! Error types for the rollup store

use thiserror::Error;

/// Main error type for the rollup store
#[derive(Error, Debug)]
pub enum Error {
    /// Codec error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Locator, granularity or slot model error
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Rollup computation error
    #[error("Rollup error: {0}")]
    Rollup(#[from] RollupError),

    /// Storage collaborator error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// General error
    #[error("{0}")]
    General(String),
}

/// Codec errors
///
/// Every decode failure is surfaced to the caller. A payload that cannot be
/// decoded is never treated as an empty rollup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Encode requested for a value that has no codec
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Decode found a version byte this build does not understand
    #[error("Unsupported {kind} serialization version: {version}")]
    UnsupportedVersion {
        /// Payload kind being decoded
        kind: &'static str,
        /// Version byte found in the buffer
        version: u8,
    },

    /// Truncated or corrupt byte buffer
    #[error("Malformed buffer: {0}")]
    MalformedBuffer(String),

    /// Value kind explicitly disallowed by this codec (strings through the numeric codec)
    #[error("Unexpected value kind: {0}")]
    UnexpectedValueKind(String),

    /// Encoder wrote a different number of bytes than it pre-computed
    #[error("Encoded size mismatch: expected {expected} bytes, wrote {actual}")]
    SizeMismatch {
        /// Pre-computed size
        expected: usize,
        /// Bytes actually written
        actual: usize,
    },
}

impl CodecError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CodecError::UnsupportedType(_) => "unsupported_type",
            CodecError::UnsupportedVersion { .. } => "unsupported_version",
            CodecError::MalformedBuffer(_) => "malformed_buffer",
            CodecError::UnexpectedValueKind(_) => "unexpected_value_kind",
            CodecError::SizeMismatch { .. } => "size_mismatch",
        }
    }
}

/// Errors from the locator / granularity / slot model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Time range whose start is after its stop
    #[error("Invalid time range: start {start} > stop {stop}")]
    InvalidRange {
        /// Range start (ms)
        start: i64,
        /// Range stop (ms)
        stop: i64,
    },

    /// Shard outside `[0, NUM_SHARDS)`
    #[error("Invalid shard {shard}")]
    InvalidShard {
        /// Offending shard
        shard: u32,
    },

    /// Slot outside the granularity's rotation
    #[error("Invalid slot {slot} for granularity {granularity} ({num_slots} slots)")]
    InvalidSlot {
        /// Granularity name
        granularity: &'static str,
        /// Offending slot
        slot: u32,
        /// Slots per rotation for that granularity
        num_slots: u32,
    },

    /// Unknown granularity name
    #[error("Unknown granularity: {0}")]
    UnknownGranularity(String),

    /// Requested the coarser neighbour of the coarsest granularity
    #[error("No granularity coarser than {0}")]
    NoCoarserGranularity(&'static str),

    /// Requested the finer neighbour of full resolution
    #[error("No granularity finer than {0}")]
    NoFinerGranularity(&'static str),

    /// Locator key could not be parsed
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    /// Slot key string could not be parsed
    #[error("Invalid slot key: {0}")]
    InvalidSlotKey(String),
}

/// Errors from the rollup algebra
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RollupError {
    /// Merge called with no inputs and no way to infer the variant
    #[error("Cannot merge an empty set of rollups")]
    EmptyInput,

    /// Inputs to a merge were not all the same variant
    #[error("Cannot merge {found} into {expected} rollup")]
    MixedVariants {
        /// Variant of the first input
        expected: String,
        /// Variant that did not match
        found: String,
    },

    /// The rollup type cannot be computed from this kind of input
    #[error("{rollup_type} rollup cannot be built from {input}")]
    UnsupportedInput {
        /// Target rollup type
        rollup_type: String,
        /// Description of the rejected input
        input: String,
    },
}

/// Storage collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend could not be reached or refused the request
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Requested row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Read or write failed part way
    #[error("IO error: {0}")]
    Io(String),
}

/// Result type alias for the rollup store
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_converts() {
        let err: Error = CodecError::UnsupportedVersion {
            kind: "timer",
            version: 99,
        }
        .into();
        assert!(err.to_string().contains("99"));
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn test_codec_error_kind_labels() {
        assert_eq!(
            CodecError::MalformedBuffer("short".into()).kind(),
            "malformed_buffer"
        );
        assert_eq!(
            CodecError::UnexpectedValueKind("string".into()).kind(),
            "unexpected_value_kind"
        );
    }

    #[test]
    fn test_invalid_range_message() {
        let err = ModelError::InvalidRange { start: 10, stop: 5 };
        assert_eq!(err.to_string(), "Invalid time range: start 10 > stop 5");
    }
}
