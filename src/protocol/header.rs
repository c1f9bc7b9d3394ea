//! Frame headers: fixed-item, nested and opaque variants.
//!
//! Fixed-item and nested frames share the 16-byte standard header:
//! ```text
//! ┌────────────────┬─────────────┬───────────┬────────────┐
//! │ Primary header │ Header size │ Item size │ Item count │
//! │ 8 bytes        │ 2 bytes     │ 2 bytes   │ 4 bytes    │
//! └────────────────┴─────────────┴───────────┴────────────┘
//! ```
//! An item size of 0 marks a nested frame. Opaque frames carry only the
//! primary header. Any header bytes past the mandatory part form the
//! header reserve, which belongs to the frame buffer rather than to the
//! decoded header.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::primary_header::{
    round_up_to_block, to_blocks, PrimaryHeader, MAX_FRAME_SIZE_BLOCKS, PRIMARY_HEADER_SIZE_B,
};
use crate::buffer::{ensure_remaining, Endianness};
use crate::error::{to_usize, MfmError, Result};
use crate::format::FrameFormat;

/// Mandatory header size of fixed-item and nested frames.
pub const STANDARD_HEADER_SIZE_B: usize = 16;

/// The closed set of frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Payload is an array of identical fixed-size items.
    FixedItem,
    /// Payload is a sequence of self-sized sub-frames.
    Nested,
    /// Payload is raw, schema-less data.
    Opaque,
}

/// Standard header shared by fixed-item and nested frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardHeader {
    primary: PrimaryHeader,
    header_size_b: u64,
    item_size_b: u16,
    item_count: u32,
}

/// Opaque frame header: the primary header alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpaqueHeader {
    primary: PrimaryHeader,
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    FixedItem(StandardHeader),
    Nested(StandardHeader),
    Opaque(OpaqueHeader),
}

impl Header {
    /// Minimal header (no items, no reserve, empty data section).
    ///
    /// Fixed-item headers start with an item size of 1 byte.
    pub fn new(kind: FrameKind, endianness: Endianness) -> Self {
        let standard = |item_size_b| StandardHeader {
            primary: PrimaryHeader::new(endianness, false, STANDARD_HEADER_SIZE_B as u64),
            header_size_b: STANDARD_HEADER_SIZE_B as u64,
            item_size_b,
            item_count: 0,
        };
        match kind {
            FrameKind::FixedItem => Header::FixedItem(standard(1)),
            FrameKind::Nested => Header::Nested(standard(0)),
            FrameKind::Opaque => Header::Opaque(OpaqueHeader {
                primary: PrimaryHeader::new(endianness, true, PRIMARY_HEADER_SIZE_B as u64),
            }),
        }
    }

    /// Minimal header (no items) described by a catalog format.
    pub fn for_format(format: &FrameFormat, endianness: Endianness) -> Result<Self> {
        let mut header = Header::new(format.kind(), endianness);
        header.primary_mut().frame_type = format.frame_type();
        header.primary_mut().revision = format.revision();
        match &mut header {
            Header::FixedItem(h) => {
                h.item_size_b = format.item_size_b();
                h.set_header_size_b(format.header_size_b())?;
            }
            Header::Nested(h) => h.set_header_size_b(format.header_size_b())?,
            Header::Opaque(_) => {}
        }
        Ok(header)
    }

    /// Decode the mandatory part of a header from the front of `buf`.
    ///
    /// Peeks the primary header to find the kind, then reads the rest of
    /// that variant's mandatory part.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let primary = PrimaryHeader::decode(buf)?;
        if primary.is_opaque() {
            return Ok(Header::Opaque(OpaqueHeader { primary }));
        }

        ensure_remaining(buf, STANDARD_HEADER_SIZE_B - PRIMARY_HEADER_SIZE_B)?;
        let (header_blocks, item_size_b, item_count) = match primary.endianness {
            Endianness::Big => (buf.get_u16(), buf.get_u16(), buf.get_u32()),
            Endianness::Little => (buf.get_u16_le(), buf.get_u16_le(), buf.get_u32_le()),
        };

        let standard = StandardHeader {
            primary,
            header_size_b: u64::from(header_blocks) << primary.unit_block_exponent,
            item_size_b,
            item_count,
        };
        standard.validate()?;

        Ok(if item_size_b == 0 {
            Header::Nested(standard)
        } else {
            Header::FixedItem(standard)
        })
    }

    /// Encode the mandatory part into the front of `buf`.
    ///
    /// Header reserve bytes are left untouched.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Header::FixedItem(h) | Header::Nested(h) => h.encode_into(buf),
            Header::Opaque(h) => h.primary.encode_into(buf),
        }
    }

    /// Encode the whole header (`header_size_b` bytes, zeroed reserve).
    pub fn encode(&self) -> Result<BytesMut> {
        let mut out = BytesMut::zeroed(to_usize(self.header_size_b())?);
        self.encode_into(&mut &mut out[..])?;
        Ok(out)
    }

    /// Kind of frame described by this header.
    pub fn kind(&self) -> FrameKind {
        match self {
            Header::FixedItem(_) => FrameKind::FixedItem,
            Header::Nested(_) => FrameKind::Nested,
            Header::Opaque(_) => FrameKind::Opaque,
        }
    }

    /// Primary header as it would be encoded.
    pub fn primary(&self) -> &PrimaryHeader {
        match self {
            Header::FixedItem(h) | Header::Nested(h) => &h.primary,
            Header::Opaque(h) => &h.primary,
        }
    }

    fn primary_mut(&mut self) -> &mut PrimaryHeader {
        match self {
            Header::FixedItem(h) | Header::Nested(h) => &mut h.primary,
            Header::Opaque(h) => &mut h.primary,
        }
    }

    #[inline]
    pub fn is_fixed_item(&self) -> bool {
        matches!(self, Header::FixedItem(_))
    }

    #[inline]
    pub fn is_nested(&self) -> bool {
        matches!(self, Header::Nested(_))
    }

    #[inline]
    pub fn is_opaque(&self) -> bool {
        matches!(self, Header::Opaque(_))
    }

    /// Total frame size in bytes.
    #[inline]
    pub fn frame_size_b(&self) -> u64 {
        self.primary().frame_size_b
    }

    /// Header size in bytes, mandatory part and reserve.
    pub fn header_size_b(&self) -> u64 {
        match self {
            Header::FixedItem(h) | Header::Nested(h) => h.header_size_b,
            Header::Opaque(_) => PRIMARY_HEADER_SIZE_B as u64,
        }
    }

    /// Size of the mandatory header part.
    pub fn mandatory_size_b(&self) -> u64 {
        self.primary().mandatory_header_size_b() as u64
    }

    /// Size of the optional header reserve.
    pub fn header_reserve_size_b(&self) -> u64 {
        self.header_size_b() - self.mandatory_size_b()
    }

    /// Size of the data section.
    pub fn data_size_b(&self) -> u64 {
        self.frame_size_b() - self.header_size_b()
    }

    #[inline]
    pub fn endianness(&self) -> Endianness {
        self.primary().endianness
    }

    #[inline]
    pub fn unit_block_exponent(&self) -> u8 {
        self.primary().unit_block_exponent
    }

    #[inline]
    pub fn data_source(&self) -> u8 {
        self.primary().data_source
    }

    /// Frame type; opaque frames have none.
    pub fn frame_type(&self) -> Option<u16> {
        match self {
            Header::FixedItem(h) | Header::Nested(h) => Some(h.primary.frame_type),
            Header::Opaque(_) => None,
        }
    }

    /// Format revision; opaque frames have none.
    pub fn revision(&self) -> Option<u8> {
        match self {
            Header::FixedItem(h) | Header::Nested(h) => Some(h.primary.revision),
            Header::Opaque(_) => None,
        }
    }

    /// Number of items (fixed-item) or sub-frames (nested); 0 for opaque frames.
    pub fn item_count(&self) -> u32 {
        match self {
            Header::FixedItem(h) | Header::Nested(h) => h.item_count,
            Header::Opaque(_) => 0,
        }
    }

    /// Item size; only fixed-item frames have a header-level item size.
    pub fn item_size_b(&self) -> Option<u64> {
        match self {
            Header::FixedItem(h) => Some(u64::from(h.item_size_b)),
            _ => None,
        }
    }

    /// End of the last item or sub-frame as declared by the header, for fixed-item frames.
    pub(crate) fn items_end_b(&self) -> Option<u64> {
        match self {
            Header::FixedItem(h) => Some(h.items_end_b()),
            _ => None,
        }
    }

    /// Record one more item of `size_b` bytes.
    ///
    /// Metadata only: the caller grows the buffer and copies the payload.
    /// On fixed-item headers `size_b` must equal the item size.
    pub fn add_item(&mut self, size_b: u64) -> Result<()> {
        match self {
            Header::FixedItem(h) => {
                if size_b != u64::from(h.item_size_b) {
                    return Err(MfmError::unsupported(format!(
                        "item of {size_b} B added to frame with {} B items",
                        h.item_size_b
                    )));
                }
                h.add_items(1)
            }
            Header::Nested(h) => h.add_frame(size_b),
            Header::Opaque(_) => Err(MfmError::unsupported("opaque frames have no items")),
        }
    }

    /// Record `n` more fixed-size items. Metadata only.
    pub fn add_items(&mut self, n: usize) -> Result<()> {
        match self {
            Header::FixedItem(h) => h.add_items(n),
            Header::Nested(_) => Err(MfmError::unsupported(
                "nested frames need the size of each added sub-frame",
            )),
            Header::Opaque(_) => Err(MfmError::unsupported("opaque frames have no items")),
        }
    }

    pub fn set_data_source(&mut self, data_source: u8) {
        self.primary_mut().data_source = data_source;
    }

    pub fn set_frame_type(&mut self, frame_type: u16) -> Result<()> {
        self.ensure_standard("frame type")?;
        self.primary_mut().frame_type = frame_type;
        Ok(())
    }

    pub fn set_revision(&mut self, revision: u8) -> Result<()> {
        self.ensure_standard("revision")?;
        self.primary_mut().revision = revision;
        Ok(())
    }

    /// Change the item size of a fixed-item header that has no items yet.
    pub fn set_item_size_b(&mut self, item_size_b: u16) -> Result<()> {
        match self {
            Header::FixedItem(h) if h.item_count == 0 && item_size_b > 0 => {
                h.item_size_b = item_size_b;
                Ok(())
            }
            Header::FixedItem(_) => Err(MfmError::unsupported(
                "item size can only be set to a non-zero value before items are added",
            )),
            _ => Err(MfmError::unsupported(
                "only fixed-item frames have an item size",
            )),
        }
    }

    /// Resize the header reserve, moving the data section accordingly.
    pub fn set_header_reserve_size_b(&mut self, reserve_b: u64) -> Result<()> {
        match self {
            Header::FixedItem(h) | Header::Nested(h) => {
                h.set_header_size_b(STANDARD_HEADER_SIZE_B as u64 + reserve_b)
            }
            Header::Opaque(_) => Err(MfmError::unsupported(
                "opaque frames have no header reserve",
            )),
        }
    }

    /// Set the data section size of an opaque header.
    pub fn set_data_size_b(&mut self, data_size_b: u64) -> Result<()> {
        match self {
            Header::Opaque(h) => {
                let frame_size_b = PRIMARY_HEADER_SIZE_B as u64 + data_size_b;
                check_frame_size(frame_size_b, h.primary.unit_block_exponent)?;
                h.primary.frame_size_b =
                    round_up_to_block(frame_size_b, h.primary.unit_block_exponent);
                Ok(())
            }
            _ => Err(MfmError::unsupported(
                "data size of structured frames follows their items",
            )),
        }
    }

    fn ensure_standard(&self, what: &str) -> Result<()> {
        if self.is_opaque() {
            return Err(MfmError::unsupported(format!("opaque frames have no {what}")));
        }
        Ok(())
    }
}

impl StandardHeader {
    fn items_end_b(&self) -> u64 {
        self.header_size_b + u64::from(self.item_count) * u64::from(self.item_size_b)
    }

    fn validate(&self) -> Result<()> {
        if self.header_size_b < STANDARD_HEADER_SIZE_B as u64 {
            return Err(MfmError::decode(format!(
                "header size {} B is below the {STANDARD_HEADER_SIZE_B} B standard header",
                self.header_size_b
            )));
        }
        if self.header_size_b > self.primary.frame_size_b {
            return Err(MfmError::decode(format!(
                "header size {} B exceeds frame size {} B",
                self.header_size_b, self.primary.frame_size_b
            )));
        }
        if self.item_size_b == 0 {
            return Ok(());
        }
        let items_end_b = self.items_end_b();
        if items_end_b > self.primary.frame_size_b {
            return Err(MfmError::decode(format!(
                "{} items of {} B overflow frame of {} B",
                self.item_count, self.item_size_b, self.primary.frame_size_b
            )));
        }
        // Only block padding may follow the last item.
        let padded_end_b = round_up_to_block(items_end_b, self.primary.unit_block_exponent);
        if self.primary.frame_size_b > padded_end_b {
            return Err(MfmError::decode(format!(
                "{} B of data follow {} items of {} B in frame of {} B",
                self.primary.frame_size_b - padded_end_b,
                self.item_count,
                self.item_size_b,
                self.primary.frame_size_b
            )));
        }
        Ok(())
    }

    fn encode_into<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if buf.remaining_mut() < STANDARD_HEADER_SIZE_B {
            return Err(MfmError::OutOfBounds {
                offset: 0,
                len: STANDARD_HEADER_SIZE_B,
                size: buf.remaining_mut(),
            });
        }
        let header_blocks = to_blocks(self.header_size_b, self.primary.unit_block_exponent)?;
        let header_blocks = u16::try_from(header_blocks).map_err(|_| {
            MfmError::unsupported(format!(
                "header size {} B does not fit the header size field",
                self.header_size_b
            ))
        })?;

        self.primary.encode_into(buf)?;
        match self.primary.endianness {
            Endianness::Big => {
                buf.put_u16(header_blocks);
                buf.put_u16(self.item_size_b);
                buf.put_u32(self.item_count);
            }
            Endianness::Little => {
                buf.put_u16_le(header_blocks);
                buf.put_u16_le(self.item_size_b);
                buf.put_u32_le(self.item_count);
            }
        }
        Ok(())
    }

    fn add_items(&mut self, n: usize) -> Result<()> {
        let item_count = u32::try_from(n)
            .ok()
            .and_then(|n| self.item_count.checked_add(n))
            .ok_or_else(|| MfmError::unsupported(format!("cannot add {n} items")))?;
        let items_end_b =
            self.header_size_b + u64::from(item_count) * u64::from(self.item_size_b);
        let exponent = self.primary.unit_block_exponent;
        let frame_size_b = self
            .primary
            .frame_size_b
            .max(round_up_to_block(items_end_b, exponent));
        check_frame_size(frame_size_b, exponent)?;

        self.item_count = item_count;
        self.primary.frame_size_b = frame_size_b;
        Ok(())
    }

    fn add_frame(&mut self, size_b: u64) -> Result<()> {
        let exponent = self.primary.unit_block_exponent;
        if size_b & ((1u64 << exponent) - 1) != 0 {
            return Err(MfmError::unsupported(format!(
                "sub-frame of {size_b} B is not a multiple of the {} B unit block",
                1u64 << exponent
            )));
        }
        let item_count = self
            .item_count
            .checked_add(1)
            .ok_or_else(|| MfmError::unsupported("sub-frame count overflow"))?;
        let frame_size_b = self.primary.frame_size_b + size_b;
        check_frame_size(frame_size_b, exponent)?;

        self.item_count = item_count;
        self.primary.frame_size_b = frame_size_b;
        Ok(())
    }

    fn set_header_size_b(&mut self, header_size_b: u64) -> Result<()> {
        if header_size_b < STANDARD_HEADER_SIZE_B as u64 {
            return Err(MfmError::unsupported(format!(
                "header size {header_size_b} B is below the {STANDARD_HEADER_SIZE_B} B standard header"
            )));
        }
        let exponent = self.primary.unit_block_exponent;
        let header_size_b = round_up_to_block(header_size_b, exponent);
        let frame_size_b = self.primary.frame_size_b - self.header_size_b + header_size_b;
        check_frame_size(frame_size_b, exponent)?;

        self.header_size_b = header_size_b;
        self.primary.frame_size_b = frame_size_b;
        Ok(())
    }
}

fn check_frame_size(frame_size_b: u64, exponent: u8) -> Result<()> {
    let limit = MAX_FRAME_SIZE_BLOCKS << exponent;
    if frame_size_b > limit {
        return Err(MfmError::FrameTooLarge {
            size: frame_size_b,
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(header: &Header) -> Header {
        let encoded = header.encode().unwrap();
        Header::decode(&mut &encoded[..]).unwrap()
    }

    #[test]
    fn test_minimal_headers() {
        let fixed = Header::new(FrameKind::FixedItem, Endianness::Big);
        assert_eq!(fixed.frame_size_b(), 16);
        assert_eq!(fixed.header_size_b(), 16);
        assert_eq!(fixed.data_size_b(), 0);
        assert_eq!(fixed.item_size_b(), Some(1));
        assert_eq!(fixed.item_count(), 0);

        let nested = Header::new(FrameKind::Nested, Endianness::Little);
        assert_eq!(nested.item_size_b(), None);
        assert_eq!(nested.frame_type(), Some(0));

        let opaque = Header::new(FrameKind::Opaque, Endianness::Big);
        assert_eq!(opaque.frame_size_b(), 8);
        assert_eq!(opaque.header_size_b(), 8);
        assert_eq!(opaque.header_reserve_size_b(), 0);
        assert_eq!(opaque.frame_type(), None);
        assert_eq!(opaque.revision(), None);
    }

    #[test]
    fn test_roundtrip_each_kind() {
        for endianness in [Endianness::Big, Endianness::Little] {
            for kind in [FrameKind::FixedItem, FrameKind::Nested, FrameKind::Opaque] {
                let header = Header::new(kind, endianness);
                assert_eq!(roundtrip(&header), header);
            }
        }
    }

    #[test]
    fn test_standard_layout_big_endian() {
        let mut header = Header::new(FrameKind::FixedItem, Endianness::Big);
        header.set_item_size_b(4).unwrap();
        header.set_frame_type(0x0102).unwrap();
        header.set_revision(5).unwrap();
        header.add_items(3).unwrap();

        let bytes = header.encode().unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x00, 0x00, 0x00, 0x1C, // metaType, frame size 28
                0x00, 0x01, 0x02, 0x05, // source, type, revision
                0x00, 0x10, 0x00, 0x04, // header size 16, item size 4
                0x00, 0x00, 0x00, 0x03, // item count
            ]
        );
    }

    #[test]
    fn test_add_items_is_metadata_only() {
        let mut header = Header::new(FrameKind::FixedItem, Endianness::Big);
        header.set_item_size_b(6).unwrap();
        header.add_items(5).unwrap();
        assert_eq!(header.item_count(), 5);
        assert_eq!(header.frame_size_b(), 16 + 30);
        assert_eq!(header.data_size_b(), 30);

        header.add_item(6).unwrap();
        assert_eq!(header.item_count(), 6);
        assert!(header.add_item(4).is_err());
    }

    #[test]
    fn test_nested_add_item_uses_given_size() {
        let mut header = Header::new(FrameKind::Nested, Endianness::Big);
        header.add_item(40).unwrap();
        header.add_item(24).unwrap();
        assert_eq!(header.item_count(), 2);
        assert_eq!(header.frame_size_b(), 16 + 64);
        assert!(matches!(
            header.add_items(1),
            Err(MfmError::Unsupported(_))
        ));
    }

    #[test]
    fn test_opaque_rejects_items() {
        let mut header = Header::new(FrameKind::Opaque, Endianness::Big);
        assert!(header.add_item(4).is_err());
        assert!(header.add_items(1).is_err());
        assert!(header.set_frame_type(1).is_err());

        header.set_data_size_b(100).unwrap();
        assert_eq!(header.frame_size_b(), 108);
        assert_eq!(header.data_size_b(), 100);
        assert_eq!(roundtrip(&header), header);
    }

    #[test]
    fn test_header_reserve() {
        let mut header = Header::new(FrameKind::Nested, Endianness::Big);
        header.set_header_reserve_size_b(112).unwrap();
        assert_eq!(header.header_size_b(), 128);
        assert_eq!(header.header_reserve_size_b(), 112);
        assert_eq!(header.frame_size_b(), 128);

        let encoded = header.encode().unwrap();
        assert_eq!(encoded.len(), 128);
        assert!(encoded[16..].iter().all(|&b| b == 0));
        assert_eq!(roundtrip(&header), header);
    }

    #[test]
    fn test_decode_dispatches_on_item_size() {
        let mut fixed = Header::new(FrameKind::FixedItem, Endianness::Big);
        fixed.set_item_size_b(2).unwrap();
        assert!(roundtrip(&fixed).is_fixed_item());

        let nested = Header::new(FrameKind::Nested, Endianness::Big);
        assert!(roundtrip(&nested).is_nested());
    }

    #[test]
    fn test_decode_truncated_standard_header() {
        let header = Header::new(FrameKind::Nested, Endianness::Big);
        let encoded = header.encode().unwrap();
        let err = Header::decode(&mut &encoded[..12]).unwrap_err();
        assert!(matches!(err, MfmError::Truncated { needed: 8, available: 4 }));
    }

    #[test]
    fn test_decode_rejects_inconsistent_sizes() {
        // Header size 32 B in a 16 B frame.
        let bytes = [0, 0, 0, 16, 0, 0, 1, 0, 0, 32, 0, 0, 0, 0, 0, 0];
        assert!(Header::decode(&mut &bytes[..]).unwrap_err().is_decode());

        // Three 4 B items in a 16 B frame.
        let bytes = [0, 0, 0, 16, 0, 0, 1, 0, 0, 16, 0, 4, 0, 0, 0, 3];
        assert!(Header::decode(&mut &bytes[..]).unwrap_err().is_decode());

        // Header size below the mandatory part.
        let bytes = [0, 0, 0, 16, 0, 0, 1, 0, 0, 8, 0, 0, 0, 0, 0, 0];
        assert!(Header::decode(&mut &bytes[..]).unwrap_err().is_decode());
    }

    #[test]
    fn test_decode_allows_only_block_padding_after_items() {
        // 4 B of data after a single 4 B item.
        let bytes = [0, 0, 0, 24, 0, 0, 1, 0, 0, 16, 0, 4, 0, 0, 0, 1];
        assert!(Header::decode(&mut &bytes[..]).unwrap_err().is_decode());

        // 4 B blocks: one 3 B item ends at 19 B, padded to 20 B.
        let bytes = [0x02, 0, 0, 5, 0, 0, 1, 0, 0, 4, 0, 3, 0, 0, 0, 1];
        let header = Header::decode(&mut &bytes[..]).unwrap();
        assert_eq!(header.frame_size_b(), 20);

        // Same items in 24 B: a whole block past the padding.
        let bytes = [0x02, 0, 0, 6, 0, 0, 1, 0, 0, 4, 0, 3, 0, 0, 0, 1];
        assert!(Header::decode(&mut &bytes[..]).unwrap_err().is_decode());
    }

    #[test]
    fn test_unit_blocks_scale_sizes() {
        // 64 B blocks: frame of 2 blocks, header of 1 block, 4 items of 8 B.
        let bytes = [0x06, 0, 0, 2, 0, 0, 3, 1, 0, 1, 0, 8, 0, 0, 0, 4];
        let header = Header::decode(&mut &bytes[..]).unwrap();
        assert_eq!(header.frame_size_b(), 128);
        assert_eq!(header.header_size_b(), 64);
        assert_eq!(header.header_reserve_size_b(), 48);
        assert_eq!(header.item_count(), 4);

        let mut grown = header;
        grown.add_items(5).unwrap();
        // 64 + 9 * 8 = 136 B, rounded up to 192 B.
        assert_eq!(grown.frame_size_b(), 192);
        assert_eq!(roundtrip(&grown), grown);
    }

    #[test]
    fn test_add_items_overflow_leaves_header_unchanged() {
        let mut header = Header::new(FrameKind::FixedItem, Endianness::Big);
        header.set_item_size_b(u16::MAX).unwrap();
        let before = header;
        assert!(matches!(
            header.add_items(1 << 10),
            Err(MfmError::FrameTooLarge { .. })
        ));
        assert_eq!(header, before);
    }

    #[test]
    fn test_item_size_locked_after_items() {
        let mut header = Header::new(FrameKind::FixedItem, Endianness::Big);
        header.add_items(1).unwrap();
        assert!(header.set_item_size_b(4).is_err());

        let mut nested = Header::new(FrameKind::Nested, Endianness::Big);
        assert!(nested.set_item_size_b(4).is_err());
    }

    proptest! {
        #[test]
        fn fixed_item_roundtrip(
            little in any::<bool>(),
            item_size in 1u16..512,
            count in 0usize..2000,
            reserve in 0u64..256,
            frame_type in any::<u16>(),
            revision in any::<u8>(),
        ) {
            let endianness = if little { Endianness::Little } else { Endianness::Big };
            let mut header = Header::new(FrameKind::FixedItem, endianness);
            header.set_item_size_b(item_size).unwrap();
            header.set_header_reserve_size_b(reserve).unwrap();
            header.set_frame_type(frame_type).unwrap();
            header.set_revision(revision).unwrap();
            header.add_items(count).unwrap();

            prop_assert_eq!(roundtrip(&header), header);
            prop_assert_eq!(header.data_size_b(), count as u64 * u64::from(item_size));
        }

        #[test]
        fn nested_roundtrip(
            little in any::<bool>(),
            sizes in proptest::collection::vec(8u64..4096, 0..32),
        ) {
            let endianness = if little { Endianness::Little } else { Endianness::Big };
            let mut header = Header::new(FrameKind::Nested, endianness);
            for size in &sizes {
                header.add_item(*size).unwrap();
            }
            prop_assert_eq!(roundtrip(&header), header);
            prop_assert_eq!(header.item_count() as usize, sizes.len());
            prop_assert_eq!(header.data_size_b(), sizes.iter().sum::<u64>());
        }
    }
}
