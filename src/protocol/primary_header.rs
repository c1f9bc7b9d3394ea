//! Primary header encoding and decoding.
//!
//! Every frame starts with the same 8-byte prefix:
//! ```text
//! ┌──────────┬────────────┬─────────────┬────────────┬──────────┐
//! │ MetaType │ Frame size │ Data source │ Frame type │ Revision │
//! │ 1 byte   │ 3 bytes    │ 1 byte      │ 2 bytes    │ 1 byte   │
//! └──────────┴────────────┴─────────────┴────────────┴──────────┘
//! ```
//!
//! The frame size counts unit blocks of `2^(metaType & 0x0F)` bytes. All
//! multi-byte integers use the byte order selected by the metaType
//! endianness bit, so the prefix can be decoded without knowing anything
//! else about the frame.

use bytes::{Buf, BufMut};

use super::header::STANDARD_HEADER_SIZE_B;
use crate::buffer::{ensure_remaining, Endianness};
use crate::error::{MfmError, Result};

/// Primary header size in bytes (fixed, exactly 8).
pub const PRIMARY_HEADER_SIZE_B: usize = 8;

/// Largest frame size representable in the 24-bit size field, in unit blocks.
pub const MAX_FRAME_SIZE_BLOCKS: u64 = 0x00FF_FFFF;

/// Largest unit block exponent (4-bit field).
pub const MAX_UNIT_BLOCK_EXPONENT: u8 = 0x0F;

/// Bit layout of the metaType byte.
pub mod meta_type {
    /// Endianness: little (1) or big (0).
    pub const LITTLE_ENDIAN: u8 = 0b1000_0000;
    /// Opaque (blob) frame: schema-less payload.
    pub const OPAQUE: u8 = 0b0100_0000;
    /// Reserved bits (must be 0).
    pub const RESERVED_MASK: u8 = 0b0011_0000;
    /// log2 of the unit block size.
    pub const UNIT_BLOCK_MASK: u8 = 0b0000_1111;

    /// Check if a specific bit is set.
    #[inline]
    pub fn has_flag(meta_type: u8, flag: u8) -> bool {
        meta_type & flag != 0
    }
}

/// Decoded primary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryHeader {
    /// Byte order of the whole frame.
    pub endianness: Endianness,
    /// Opaque (blob) frame flag.
    pub opaque: bool,
    /// log2 of the unit block size.
    pub unit_block_exponent: u8,
    /// Total frame size in bytes (header and data).
    pub frame_size_b: u64,
    /// Identifier of the producing data source.
    pub data_source: u8,
    /// Frame type, the catalog key.
    pub frame_type: u16,
    /// Format revision of the frame type.
    pub revision: u8,
}

impl PrimaryHeader {
    /// Create a primary header for a frame of `frame_size_b` bytes with unit blocks of 1 byte.
    pub fn new(endianness: Endianness, opaque: bool, frame_size_b: u64) -> Self {
        Self {
            endianness,
            opaque,
            unit_block_exponent: 0,
            frame_size_b,
            data_source: 0,
            frame_type: 0,
            revision: 0,
        }
    }

    /// Decode a primary header from the front of `buf`.
    ///
    /// Consumes exactly [`PRIMARY_HEADER_SIZE_B`] bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use mfm_codec::protocol::PrimaryHeader;
    ///
    /// let bytes = [0x00, 0x00, 0x00, 0x10, 0x07, 0x00, 0x01, 0x04];
    /// let header = PrimaryHeader::decode(&mut &bytes[..]).unwrap();
    /// assert_eq!(header.frame_size_b, 16);
    /// assert_eq!(header.data_source, 7);
    /// assert_eq!(header.frame_type, 1);
    /// assert_eq!(header.revision, 4);
    /// ```
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, PRIMARY_HEADER_SIZE_B)?;

        let meta = buf.get_u8();
        if meta & meta_type::RESERVED_MASK != 0 {
            return Err(MfmError::decode(format!(
                "reserved metaType bits set in {meta:#04x}"
            )));
        }
        let endianness = if meta_type::has_flag(meta, meta_type::LITTLE_ENDIAN) {
            Endianness::Little
        } else {
            Endianness::Big
        };
        let unit_block_exponent = meta & meta_type::UNIT_BLOCK_MASK;

        let (frame_blocks, data_source, frame_type, revision) = match endianness {
            Endianness::Big => (buf.get_uint(3), buf.get_u8(), buf.get_u16(), buf.get_u8()),
            Endianness::Little => (
                buf.get_uint_le(3),
                buf.get_u8(),
                buf.get_u16_le(),
                buf.get_u8(),
            ),
        };

        let frame_size_b = frame_blocks << unit_block_exponent;
        if frame_size_b < PRIMARY_HEADER_SIZE_B as u64 {
            return Err(MfmError::decode(format!(
                "declared frame size {frame_size_b} B is below the {PRIMARY_HEADER_SIZE_B} B primary header"
            )));
        }

        Ok(Self {
            endianness,
            opaque: meta_type::has_flag(meta, meta_type::OPAQUE),
            unit_block_exponent,
            frame_size_b,
            data_source,
            frame_type,
            revision,
        })
    }

    /// Encode into the front of `buf`, writing exactly [`PRIMARY_HEADER_SIZE_B`] bytes.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if buf.remaining_mut() < PRIMARY_HEADER_SIZE_B {
            return Err(MfmError::OutOfBounds {
                offset: 0,
                len: PRIMARY_HEADER_SIZE_B,
                size: buf.remaining_mut(),
            });
        }
        let frame_blocks = to_blocks(self.frame_size_b, self.unit_block_exponent)?;
        if frame_blocks > MAX_FRAME_SIZE_BLOCKS {
            return Err(MfmError::FrameTooLarge {
                size: self.frame_size_b,
                limit: MAX_FRAME_SIZE_BLOCKS << self.unit_block_exponent,
            });
        }

        buf.put_u8(self.meta_type());
        match self.endianness {
            Endianness::Big => {
                buf.put_uint(frame_blocks, 3);
                buf.put_u8(self.data_source);
                buf.put_u16(self.frame_type);
            }
            Endianness::Little => {
                buf.put_uint_le(frame_blocks, 3);
                buf.put_u8(self.data_source);
                buf.put_u16_le(self.frame_type);
            }
        }
        buf.put_u8(self.revision);
        Ok(())
    }

    /// Encode to a fixed-size array.
    pub fn encode(&self) -> Result<[u8; PRIMARY_HEADER_SIZE_B]> {
        let mut out = [0u8; PRIMARY_HEADER_SIZE_B];
        self.encode_into(&mut &mut out[..])?;
        Ok(out)
    }

    /// The metaType byte for this header.
    pub fn meta_type(&self) -> u8 {
        let mut meta = self.unit_block_exponent & meta_type::UNIT_BLOCK_MASK;
        if self.endianness == Endianness::Little {
            meta |= meta_type::LITTLE_ENDIAN;
        }
        if self.opaque {
            meta |= meta_type::OPAQUE;
        }
        meta
    }

    /// Check if this prefix starts an opaque (blob) frame.
    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    /// Unit block size in bytes.
    #[inline]
    pub fn unit_block_size_b(&self) -> u64 {
        1 << self.unit_block_exponent
    }

    /// Size of the mandatory header part announced by this prefix.
    #[inline]
    pub fn mandatory_header_size_b(&self) -> usize {
        if self.opaque {
            PRIMARY_HEADER_SIZE_B
        } else {
            STANDARD_HEADER_SIZE_B
        }
    }
}

/// Decode a primary header from bytes (standalone function).
#[inline]
pub fn decode_primary_header(buf: &[u8]) -> Result<PrimaryHeader> {
    PrimaryHeader::decode(&mut &buf[..])
}

/// Round `size_b` up to a whole number of unit blocks.
#[inline]
pub(crate) fn round_up_to_block(size_b: u64, exponent: u8) -> u64 {
    let mask = (1u64 << exponent) - 1;
    (size_b + mask) & !mask
}

/// Express `size_b` in unit blocks, failing if it is not block-aligned.
pub(crate) fn to_blocks(size_b: u64, exponent: u8) -> Result<u64> {
    if exponent > MAX_UNIT_BLOCK_EXPONENT {
        return Err(MfmError::decode(format!(
            "unit block exponent {exponent} exceeds {MAX_UNIT_BLOCK_EXPONENT}"
        )));
    }
    if size_b & ((1u64 << exponent) - 1) != 0 {
        return Err(MfmError::unsupported(format!(
            "size {size_b} B is not a multiple of the {} B unit block",
            1u64 << exponent
        )));
    }
    Ok(size_b >> exponent)
}
