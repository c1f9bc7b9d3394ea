//! Error types for mfm-codec.

use thiserror::Error;

/// Main error type for all frame operations.
#[derive(Debug, Error)]
pub enum MfmError {
    /// I/O error while reading or writing a byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading the format catalog.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The stream or buffer ended before the declared number of bytes.
    #[error("Truncated data: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Malformed primary header or header.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Access outside of a buffer's valid region.
    #[error("Out of bounds: {len} bytes at offset {offset} exceed size {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// A buffer window was used after its owning storage was reallocated.
    #[error("Stale buffer window: owning storage was reallocated")]
    StaleWindow,

    /// Item or sub-frame index past the frame's item count.
    #[error("Item {index} not found (frame has {count} items)")]
    ItemNotFound { index: usize, count: usize },

    /// Operation not applicable to this kind of frame or buffer.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Unknown field name in a frame format.
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    /// Bit-field request outside of its byte window.
    #[error("Bit range {offset}+{width} exceeds field width of {field_bits} bits")]
    BitFieldRange {
        offset: u32,
        width: u32,
        field_bits: u32,
    },

    /// Value does not fit in the target field.
    #[error("Value {value:#x} does not fit in {bits} bits")]
    ValueOverflow { value: u64, bits: u32 },

    /// Frame type missing from the catalog.
    #[error("Format not found for frame type {frame_type:#06x}")]
    FormatNotFound { frame_type: u16 },

    /// Exact revision missing from the catalog (the type itself is known).
    #[error("Revision {revision} not found for frame type {frame_type:#06x}")]
    FormatRevisionNotFound { frame_type: u16, revision: u8 },

    /// Invalid catalog configuration.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Frame size cannot be represented by the header or exceeds the configured limit.
    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: u64, limit: u64 },

    /// No process-wide catalog has been installed.
    #[error("Format catalog not installed")]
    CatalogNotInstalled,

    /// The process-wide catalog can only be installed once.
    #[error("Format catalog already installed")]
    CatalogAlreadyInstalled,

    /// Error raised by a frame consumer hook.
    #[error("Frame handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl MfmError {
    /// Whether this error belongs to the decode/truncation family.
    ///
    /// Stream consumers typically `reset()` the builder and resynchronize on these.
    pub fn is_decode(&self) -> bool {
        matches!(self, MfmError::Decode(_) | MfmError::Truncated { .. })
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        MfmError::Decode(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        MfmError::Unsupported(msg.into())
    }

    /// Wrap an arbitrary consumer error.
    pub fn handler<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        MfmError::Handler(err.into())
    }
}

/// Result type alias using MfmError.
pub type Result<T> = std::result::Result<T, MfmError>;

/// Convert a wire-level size to a memory offset.
pub(crate) fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| MfmError::FrameTooLarge {
        size: value,
        limit: usize::MAX as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_family() {
        assert!(MfmError::decode("bad prefix").is_decode());
        assert!(MfmError::Truncated {
            needed: 8,
            available: 3
        }
        .is_decode());
        assert!(!MfmError::FieldNotFound("x".into()).is_decode());
        assert!(!MfmError::StaleWindow.is_decode());
    }

    #[test]
    fn test_messages() {
        let err = MfmError::ItemNotFound { index: 4, count: 4 };
        assert_eq!(err.to_string(), "Item 4 not found (frame has 4 items)");

        let err = MfmError::FormatNotFound { frame_type: 0x1 };
        assert!(err.to_string().contains("0x0001"));
    }

    #[test]
    fn test_handler_wraps_message() {
        let err = MfmError::handler("consumer failed");
        assert!(err.to_string().contains("consumer failed"));
    }
}
