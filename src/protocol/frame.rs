//! Frame: a buffer plus its decoded header.
//!
//! A [`Frame`] keeps the header cached next to the bytes it was decoded
//! from. Every mutating operation (adding items, embedding sub-frames,
//! resizing an opaque payload) computes the new header first, then grows
//! the buffer and re-encodes the mandatory header part, so the cache and
//! the bytes agree whenever a call returns.
//!
//! # Example
//!
//! ```
//! use mfm_codec::buffer::Endianness;
//! use mfm_codec::protocol::{Frame, FrameKind};
//!
//! let mut event = Frame::new(FrameKind::Nested, Endianness::Big).unwrap();
//!
//! let mut samples = Frame::new(FrameKind::FixedItem, Endianness::Big).unwrap();
//! samples.add_items(4).unwrap();
//! event.add_frame(&samples).unwrap();
//!
//! assert_eq!(event.frame_count().unwrap(), 1);
//! assert_eq!(event.frame_offset(0).unwrap(), 16);
//! assert_eq!(event.frame_at(0).unwrap().item_count(), 4);
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use super::field::Field;
use super::header::{FrameKind, Header, STANDARD_HEADER_SIZE_B};
use super::item::Item;
use super::primary_header::{decode_primary_header, PrimaryHeader, PRIMARY_HEADER_SIZE_B};
use crate::buffer::{Buffer, Endianness};
use crate::error::{to_usize, MfmError, Result};
use crate::format::{BitFieldSpec, FieldSpec, FormatCatalog, FormatMatch, FrameFormat};

/// One complete frame.
///
/// Not `Clone`: use [`Frame::share`] for an alias of the same bytes or
/// [`Frame::deep_clone`] for an independent copy.
#[derive(Debug)]
pub struct Frame {
    buffer: Buffer,
    header: Header,
}

impl Frame {
    /// Minimal frame of the given kind: no items, empty data section.
    pub fn new(kind: FrameKind, endianness: Endianness) -> Result<Self> {
        Self::from_header(&Header::new(kind, endianness))
    }

    /// Frame laid out as `header` describes, header encoded and payload zero-filled.
    pub fn from_header(header: &Header) -> Result<Self> {
        let size = to_usize(header.frame_size_b())?;
        let mut buffer = Buffer::with_capacity(size, header.endianness());
        buffer.set_size(size)?;
        write_mandatory_header(&buffer, header)?;
        Ok(Self {
            buffer,
            header: *header,
        })
    }

    /// Minimal frame (no items) for a catalog format.
    pub fn create(format: &FrameFormat, endianness: Endianness) -> Result<Self> {
        Self::from_header(&Header::for_format(format, endianness)?)
    }

    /// Wrap a buffer holding an encoded frame; the header is decoded, nothing is copied.
    ///
    /// Bytes past the declared frame size are dropped from the logical
    /// view: an owned buffer is shrunk, a window is narrowed.
    pub fn from_buffer(mut buffer: Buffer) -> Result<Self> {
        let header = Header::decode(&mut buffer.input_stream(0)?)?;
        let size = to_usize(header.frame_size_b())?;
        let available = buffer.size();
        if available < size {
            return Err(MfmError::Truncated {
                needed: size,
                available,
            });
        }

        buffer.set_endianness(header.endianness());
        let buffer = if available == size {
            buffer
        } else if buffer.is_window() {
            buffer.window(0, size)?
        } else {
            buffer.set_size(size)?;
            buffer
        };
        Ok(Self { buffer, header })
    }

    /// Decode the first frame of `bytes`, copying it.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let primary = decode_primary_header(bytes)?;
        let size = to_usize(primary.frame_size_b)?;
        let frame = bytes.get(..size).ok_or(MfmError::Truncated {
            needed: size,
            available: bytes.len(),
        })?;
        Self::from_buffer(Buffer::from_slice(frame, primary.endianness))
    }

    /// Alias of this frame: both frames act on the same bytes.
    ///
    /// The alias decodes its own header cache from the shared bytes.
    pub fn share(&self) -> Result<Self> {
        Self::from_buffer(self.buffer.share())
    }

    /// Independent copy with its own storage.
    pub fn deep_clone(&self) -> Result<Self> {
        Ok(Self {
            buffer: self.buffer.deep_clone()?,
            header: self.header,
        })
    }

    /// Re-decode the cached header from the bytes, after writes through an alias.
    pub fn reload_header(&mut self) -> Result<()> {
        let header = Header::decode(&mut self.buffer.input_stream(0)?)?;
        self.header = header;
        Ok(())
    }

    /// Read one frame from a byte stream.
    ///
    /// Reads the mandatory header, then everything after it up to the
    /// declared frame size. Storage grows with the bytes actually received,
    /// so a header declaring a huge frame over a short stream yields
    /// [`MfmError::Truncated`] instead of a huge allocation.
    pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut mandatory = [0u8; STANDARD_HEADER_SIZE_B];
        read_full(reader, &mut mandatory[..PRIMARY_HEADER_SIZE_B])?;
        let primary = decode_primary_header(&mandatory[..PRIMARY_HEADER_SIZE_B])?;
        let mandatory_size = primary.mandatory_header_size_b();
        read_full(reader, &mut mandatory[PRIMARY_HEADER_SIZE_B..mandatory_size])?;

        let header = Header::decode(&mut &mandatory[..mandatory_size])?;
        let needed = to_usize(header.frame_size_b())? - mandatory_size;

        let mut data = BytesMut::new();
        data.extend_from_slice(&mandatory[..mandatory_size]);
        let mut writer = data.writer();
        let available = io::copy(&mut Read::take(&mut *reader, needed as u64), &mut writer)?;
        let data = writer.into_inner();
        if available < needed as u64 {
            return Err(MfmError::Truncated {
                needed,
                available: to_usize(available)?,
            });
        }
        trace!(size = data.len(), "Frame read");

        Self::from_buffer(Buffer::from_bytes_mut(data, header.endianness()))
    }

    /// Fill the header reserve from a byte stream.
    pub fn read_header_reserve<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        let start = to_usize(self.header.mandatory_size_b())?;
        let end = to_usize(self.header.header_size_b())?;
        self.read_region(reader, start, end)
    }

    /// Fill the data section from a byte stream.
    pub fn read_data<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        let start = to_usize(self.header.header_size_b())?;
        let end = to_usize(self.header.frame_size_b())?;
        self.read_region(reader, start, end)
    }

    /// Write the whole frame, header first.
    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.buffer.as_slice()?)?;
        Ok(())
    }

    /// Skip `n` encoded frames using only their primary headers.
    ///
    /// Returns the new stream position.
    pub fn seek_frame<R: Read + Seek + ?Sized>(reader: &mut R, n: usize) -> Result<u64> {
        let mut position = reader.stream_position()?;
        for _ in 0..n {
            let mut prefix = [0u8; PRIMARY_HEADER_SIZE_B];
            read_full(reader, &mut prefix)?;
            let primary = decode_primary_header(&prefix)?;
            // At most 2^24 blocks of 2^15 bytes.
            let skip = (primary.frame_size_b - PRIMARY_HEADER_SIZE_B as u64) as i64;
            position = reader.seek(SeekFrom::Current(skip))?;
        }
        Ok(position)
    }

    /// Copy of the encoded frame.
    pub fn to_bytes(&self) -> Result<Bytes> {
        self.buffer.to_bytes()
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    #[inline]
    pub fn kind(&self) -> FrameKind {
        self.header.kind()
    }

    #[inline]
    pub fn endianness(&self) -> Endianness {
        self.header.endianness()
    }

    /// Number of items (fixed-item) or sub-frames (nested).
    #[inline]
    pub fn item_count(&self) -> usize {
        self.header.item_count() as usize
    }

    /// Size of one item: the item size for fixed-item frames, the sub-frame
    /// size for nested frames, the data section for opaque frames.
    pub fn item_size_b(&self, index: usize) -> Result<u64> {
        match self.header.kind() {
            FrameKind::FixedItem => {
                self.check_index(index)?;
                Ok(self.header.item_size_b().unwrap_or_default())
            }
            FrameKind::Nested => self.frame_size_b(index),
            FrameKind::Opaque if index == 0 => Ok(self.header.data_size_b()),
            FrameKind::Opaque => Err(MfmError::ItemNotFound { index, count: 1 }),
        }
    }

    /// Offset of item `index` from the start of the frame.
    ///
    /// Constant time for fixed-item frames; nested frames scan the
    /// preceding sub-frames.
    pub fn item_offset(&self, index: usize) -> Result<usize> {
        match self.header.kind() {
            FrameKind::FixedItem => {
                self.check_index(index)?;
                let header_size = to_usize(self.header.header_size_b())?;
                let item_size = to_usize(self.header.item_size_b().unwrap_or_default())?;
                Ok(header_size + index * item_size)
            }
            FrameKind::Nested => self.frame_offset(index),
            FrameKind::Opaque => Err(MfmError::unsupported(
                "opaque frames have no indexable items",
            )),
        }
    }

    /// View of item `index` of a fixed-item frame.
    pub fn item_at(&self, index: usize) -> Result<Item<'_>> {
        match self.header.kind() {
            FrameKind::FixedItem => {
                let offset = self.item_offset(index)?;
                let size = to_usize(self.header.item_size_b().unwrap_or_default())?;
                Ok(Item::new(self, index, offset, size))
            }
            FrameKind::Nested => Err(MfmError::unsupported(
                "nested frames hold sub-frames, use frame_at",
            )),
            FrameKind::Opaque => Err(MfmError::unsupported("opaque frames have no items")),
        }
    }

    /// Append one zeroed item and return it.
    pub fn add_item(&mut self) -> Result<Item<'_>> {
        self.add_items(1)
    }

    /// Append `n` zeroed items and return the last item.
    pub fn add_items(&mut self, n: usize) -> Result<Item<'_>> {
        let mut header = self.header;
        header.add_items(n)?;
        // New items may land in padding of a block-aligned frame, so zero them explicitly.
        let first_new = to_usize(self.header.items_end_b().unwrap_or_default())?;
        let items_end = to_usize(header.items_end_b().unwrap_or_default())?;
        self.grow(header)?;
        self.buffer.fill(first_new, items_end - first_new, 0)?;

        let count = self.item_count();
        let last = count
            .checked_sub(1)
            .ok_or(MfmError::ItemNotFound { index: 0, count })?;
        self.item_at(last)
    }

    /// Number of embedded sub-frames of a nested frame.
    pub fn frame_count(&self) -> Result<usize> {
        self.ensure_nested("frame_count")?;
        Ok(self.item_count())
    }

    /// Offset of sub-frame `index`, found by walking the preceding sub-frames' primary headers.
    pub fn frame_offset(&self, index: usize) -> Result<usize> {
        self.ensure_nested("frame_offset")?;
        self.check_index(index)?;
        let mut offset = to_usize(self.header.header_size_b())?;
        for _ in 0..index {
            offset += self.sub_frame_size_at(offset)?;
        }
        Ok(offset)
    }

    /// Size of sub-frame `index`, as declared by its own primary header.
    pub fn frame_size_b(&self, index: usize) -> Result<u64> {
        let offset = self.frame_offset(index)?;
        Ok(self.sub_frame_size_at(offset)? as u64)
    }

    /// Sub-frame `index` as a frame over a window of this frame's bytes.
    ///
    /// The window goes stale once this frame grows.
    pub fn frame_at(&self, index: usize) -> Result<Frame> {
        let offset = self.frame_offset(index)?;
        let size = self.sub_frame_size_at(offset)?;
        Frame::from_buffer(self.buffer.window(offset, size)?)
    }

    /// Embed a copy of `frame` at the end of this nested frame.
    ///
    /// The embedded bytes are independent of `frame` afterwards.
    pub fn add_frame(&mut self, frame: &Frame) -> Result<()> {
        self.ensure_nested("add_frame")?;
        // Copy first: `frame` may alias this frame's storage.
        let bytes = frame.to_bytes()?;
        let mut header = self.header;
        header.add_item(bytes.len() as u64)?;

        let offset = self.buffer.size();
        self.grow(header)?;
        self.buffer.write_at(offset, &bytes)?;
        trace!(
            offset,
            size = bytes.len(),
            count = self.item_count(),
            "Sub-frame added"
        );
        Ok(())
    }

    /// Resize the data section of an opaque frame; new bytes are zero.
    pub fn set_data_size_b(&mut self, data_size_b: u64) -> Result<()> {
        let mut header = self.header;
        header.set_data_size_b(data_size_b)?;
        self.grow(header)
    }

    /// Copy of the data section.
    pub fn data_bytes(&self) -> Result<Bytes> {
        let start = to_usize(self.header.header_size_b())?;
        let bytes = self.buffer.as_slice()?;
        Ok(Bytes::copy_from_slice(&bytes[start.min(bytes.len())..]))
    }

    /// Write `bytes` into the data section at `offset` (relative to the data section).
    pub fn write_data(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let data_size = to_usize(self.header.data_size_b())?;
        match offset.checked_add(bytes.len()) {
            Some(end) if end <= data_size => {}
            _ => {
                return Err(MfmError::OutOfBounds {
                    offset,
                    len: bytes.len(),
                    size: data_size,
                })
            }
        }
        let start = to_usize(self.header.header_size_b())?;
        self.buffer.write_at(start + offset, bytes)
    }

    /// Catalog format of this frame, falling back to the latest revision when needed.
    pub fn find_format(&self) -> Result<FormatMatch<'static>> {
        match (self.header.frame_type(), self.header.revision()) {
            (Some(frame_type), Some(revision)) => {
                FormatCatalog::global()?.find_format(frame_type, revision)
            }
            _ => Err(MfmError::unsupported("opaque frames have no format")),
        }
    }

    /// Schema entry of a header field.
    pub fn find_header_field(&self, name: &str) -> Result<&'static FieldSpec> {
        self.find_format()?.format().find_header_field(name)
    }

    /// Schema entry of an item field; only fixed-item frames have an item schema.
    pub fn find_item_field(&self, name: &str) -> Result<&'static FieldSpec> {
        if !self.header.is_fixed_item() {
            return Err(MfmError::unsupported(format!(
                "{:?} frames have no item schema",
                self.kind()
            )));
        }
        self.find_format()?.format().find_item_field(name)
    }

    /// Schema entries of a named bit field inside a header field.
    pub fn find_header_bit_field(
        &self,
        field: &str,
        bit: &str,
    ) -> Result<(&'static FieldSpec, &'static BitFieldSpec)> {
        self.find_format()?.format().find_header_bit_field(field, bit)
    }

    /// Named header field bound to this frame's bytes.
    ///
    /// Fields inside the mandatory header part are read-only.
    pub fn header_field(&self, name: &str) -> Result<Field<'_>> {
        let spec = self.find_header_field(name)?;
        self.bind_header_field(
            Some(spec),
            to_usize(spec.offset_b())?,
            to_usize(spec.size_b())?,
        )
    }

    /// Positional header field; named when the catalog knows the position.
    pub fn header_field_at(&self, offset_b: usize, size_b: usize) -> Result<Field<'_>> {
        let spec = self.field_name(offset_b, size_b).and_then(|name| {
            self.find_header_field(name).ok()
        });
        self.bind_header_field(spec, offset_b, size_b)
    }

    /// Named field of item `index`.
    pub fn item_field(&self, index: usize, name: &str) -> Result<Field<'_>> {
        self.find_item_field(name)?;
        self.item_at(index)?.field(name)
    }

    /// Reverse lookup of a header field name by position. Best effort.
    pub fn field_name(&self, offset_b: usize, size_b: usize) -> Option<&'static str> {
        self.find_format()
            .ok()?
            .format()
            .header_field_name(offset_b as u64, size_b as u64)
    }

    fn bind_header_field(
        &self,
        spec: Option<&'static FieldSpec>,
        offset_b: usize,
        size_b: usize,
    ) -> Result<Field<'_>> {
        let header_size = to_usize(self.header.header_size_b())?;
        match offset_b.checked_add(size_b) {
            Some(end) if end <= header_size => {}
            _ => {
                return Err(MfmError::OutOfBounds {
                    offset: offset_b,
                    len: size_b,
                    size: header_size,
                })
            }
        }
        let read_only = offset_b < to_usize(self.header.mandatory_size_b())?;
        Ok(Field::new(
            &self.buffer,
            spec,
            None,
            offset_b,
            size_b,
            read_only,
        ))
    }

    /// Grow (or shrink) the buffer to match `header`, then encode it.
    ///
    /// Nothing changes if the buffer cannot be resized.
    fn grow(&mut self, header: Header) -> Result<()> {
        let mandatory_size = to_usize(header.mandatory_size_b())?;
        let mut mandatory = [0u8; STANDARD_HEADER_SIZE_B];
        header.encode_into(&mut &mut mandatory[..mandatory_size])?;

        let old_size = self.buffer.size();
        let new_size = to_usize(header.frame_size_b())?;
        if self.buffer.capacity() < new_size {
            self.buffer.set_capacity(new_size)?;
        }
        self.buffer.set_size(new_size)?;
        if new_size > old_size {
            self.buffer.fill(old_size, new_size - old_size, 0)?;
        }
        self.buffer.write_at(0, &mandatory[..mandatory_size])?;
        self.header = header;
        Ok(())
    }

    fn read_region<R: Read + ?Sized>(&self, reader: &mut R, start: usize, end: usize) -> Result<()> {
        let mut bytes = self.buffer.as_mut_slice()?;
        let size = bytes.len();
        let region = bytes.get_mut(start..end).ok_or(MfmError::OutOfBounds {
            offset: start,
            len: end.saturating_sub(start),
            size,
        })?;
        read_full(reader, region)
    }

    fn sub_frame_size_at(&self, offset: usize) -> Result<usize> {
        let primary = PrimaryHeader::decode(&mut self.buffer.input_stream(offset)?)?;
        let size = to_usize(primary.frame_size_b)?;
        let frame_size = self.buffer.size();
        if offset + size > frame_size {
            return Err(MfmError::decode(format!(
                "sub-frame of {size} B at offset {offset} overruns frame of {frame_size} B"
            )));
        }
        Ok(size)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let count = self.item_count();
        if index >= count {
            return Err(MfmError::ItemNotFound { index, count });
        }
        Ok(())
    }

    fn ensure_nested(&self, op: &str) -> Result<()> {
        if !self.header.is_nested() {
            return Err(MfmError::unsupported(format!(
                "{op} on a {:?} frame",
                self.kind()
            )));
        }
        Ok(())
    }
}

fn write_mandatory_header(buffer: &Buffer, header: &Header) -> Result<()> {
    let mut bytes = buffer.as_mut_slice()?;
    header.encode_into(&mut &mut bytes[..])
}

/// `read_exact` that reports how far the stream got.
fn read_full<R: Read + ?Sized>(reader: &mut R, dst: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < dst.len() {
        match reader.read(&mut dst[filled..]) {
            Ok(0) => {
                return Err(MfmError::Truncated {
                    needed: dst.len(),
                    available: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::test_catalog;
    use crate::protocol::{FrameBuilder, FrameCollector};
    use std::io::Cursor;

    fn fixed_frame(item_size: u16, count: usize) -> Frame {
        let mut header = Header::new(FrameKind::FixedItem, Endianness::Big);
        header.set_item_size_b(item_size).unwrap();
        header.add_items(count).unwrap();
        Frame::from_header(&header).unwrap()
    }

    fn opaque_frame(payload: &[u8]) -> Frame {
        let mut frame = Frame::new(FrameKind::Opaque, Endianness::Big).unwrap();
        frame.set_data_size_b(payload.len() as u64).unwrap();
        frame.write_data(0, payload).unwrap();
        frame
    }

    #[test]
    fn test_new_writes_header() {
        let frame = Frame::new(FrameKind::Nested, Endianness::Little).unwrap();
        assert_eq!(frame.buffer().size(), 16);

        let decoded = Header::decode(&mut frame.buffer().input_stream(0).unwrap()).unwrap();
        assert_eq!(&decoded, frame.header());
    }

    #[test]
    fn test_fixed_item_offsets() {
        let frame = fixed_frame(6, 5);
        assert_eq!(frame.item_offset(0).unwrap(), 16);
        assert_eq!(frame.item_offset(4).unwrap(), 16 + 4 * 6);
        assert_eq!(frame.item_size_b(4).unwrap(), 6);
        assert!(matches!(
            frame.item_offset(5),
            Err(MfmError::ItemNotFound { index: 5, count: 5 })
        ));
    }

    #[test]
    fn test_add_items_grows_and_zero_fills() {
        let mut frame = fixed_frame(4, 2);
        frame.buffer().fill(16, 8, 0xFF).unwrap();

        let last = frame.add_items(3).unwrap();
        assert_eq!(last.index(), 4);
        assert_eq!(last.offset_b(), 16 + 16);

        assert_eq!(frame.item_count(), 5);
        assert_eq!(frame.header().frame_size_b(), 16 + 20);
        assert_eq!(frame.buffer().size(), 36);
        let bytes = frame.to_bytes().unwrap();
        assert!(bytes[16..24].iter().all(|&b| b == 0xFF));
        assert!(bytes[24..].iter().all(|&b| b == 0));

        // Header bytes follow the cache.
        let reloaded = Frame::from_slice(&bytes).unwrap();
        assert_eq!(reloaded.header(), frame.header());
    }

    #[test]
    fn test_kind_mismatches_are_unsupported() {
        let mut nested = Frame::new(FrameKind::Nested, Endianness::Big).unwrap();
        assert!(matches!(nested.add_items(1), Err(MfmError::Unsupported(_))));
        assert!(matches!(nested.item_at(0), Err(MfmError::Unsupported(_))));

        let mut fixed = fixed_frame(16, 0);
        let sub = Frame::new(FrameKind::Nested, Endianness::Big).unwrap();
        let before = fixed.to_bytes().unwrap();
        assert!(matches!(fixed.add_frame(&sub), Err(MfmError::Unsupported(_))));
        assert_eq!(fixed.to_bytes().unwrap(), before);
        assert!(fixed.frame_count().is_err());

        let opaque = Frame::new(FrameKind::Opaque, Endianness::Big).unwrap();
        assert!(opaque.item_offset(0).is_err());
        assert!(opaque.item_at(0).is_err());
    }

    #[test]
    fn test_nested_offsets_scan_sub_frames() {
        let subs = [fixed_frame(4, 3), opaque_frame(b"abcdefghij"), fixed_frame(2, 1)];
        let mut event = Frame::new(FrameKind::Nested, Endianness::Big).unwrap();
        for sub in &subs {
            event.add_frame(sub).unwrap();
        }

        assert_eq!(event.frame_count().unwrap(), 3);
        assert_eq!(event.frame_offset(0).unwrap(), 16);
        assert_eq!(event.frame_offset(1).unwrap(), 16 + 28);
        assert_eq!(event.frame_offset(2).unwrap(), 16 + 28 + 18);
        assert_eq!(event.frame_size_b(1).unwrap(), 18);
        assert_eq!(event.item_size_b(2).unwrap(), 18);
        assert_eq!(event.header().frame_size_b(), 16 + 28 + 18 + 18);
        assert!(matches!(
            event.frame_offset(3),
            Err(MfmError::ItemNotFound { index: 3, count: 3 })
        ));

        let second = event.frame_at(1).unwrap();
        assert_eq!(second.kind(), FrameKind::Opaque);
        assert_eq!(&second.data_bytes().unwrap()[..], b"abcdefghij");
    }

    #[test]
    fn test_add_frame_copies_bytes() {
        let mut sub = fixed_frame(2, 2);
        let mut event = Frame::new(FrameKind::Nested, Endianness::Big).unwrap();
        event.add_frame(&sub).unwrap();
        assert_eq!(event.header().frame_size_b(), 16 + 20);

        sub.add_items(4).unwrap();
        sub.item_at(0).unwrap().field_at(0, 2).unwrap().set_value(0xBEEF).unwrap();

        let embedded = event.frame_at(0).unwrap();
        assert_eq!(embedded.item_count(), 2);
        assert_eq!(&embedded.item_at(0).unwrap().bytes().unwrap()[..], &[0, 0]);
    }

    #[test]
    fn test_add_frame_into_itself() {
        let mut event = Frame::new(FrameKind::Nested, Endianness::Big).unwrap();
        event.add_frame(&fixed_frame(1, 1)).unwrap();
        let alias = event.share().unwrap();
        event.add_frame(&alias).unwrap();

        assert_eq!(event.frame_count().unwrap(), 2);
        let inner = event.frame_at(1).unwrap();
        assert_eq!(inner.frame_count().unwrap(), 1);
    }

    #[test]
    fn test_sub_frame_window_goes_stale() {
        let mut event = Frame::new(FrameKind::Nested, Endianness::Big).unwrap();
        event.add_frame(&fixed_frame(1, 1)).unwrap();

        let sub = event.frame_at(0).unwrap();
        assert!(sub.buffer().is_window());
        event.add_frame(&fixed_frame(1, 1)).unwrap();
        assert!(matches!(sub.to_bytes(), Err(MfmError::StaleWindow)));
    }

    #[test]
    fn test_window_frame_cannot_grow() {
        let mut event = Frame::new(FrameKind::Nested, Endianness::Big).unwrap();
        event.add_frame(&fixed_frame(2, 1)).unwrap();

        let mut sub = event.frame_at(0).unwrap();
        let before = *sub.header();
        assert!(matches!(sub.add_items(1), Err(MfmError::Unsupported(_))));
        assert_eq!(sub.header(), &before);
    }

    #[test]
    fn test_share_aliases_and_deep_clone_copies() {
        let frame = fixed_frame(2, 2);
        let alias = frame.share().unwrap();
        let copy = frame.deep_clone().unwrap();

        alias.write_data(0, &[0xAB]).unwrap();
        assert_eq!(frame.data_bytes().unwrap()[0], 0xAB);
        assert_eq!(copy.data_bytes().unwrap()[0], 0);

        copy.write_data(1, &[0xCD]).unwrap();
        assert_eq!(frame.data_bytes().unwrap()[1], 0);
    }

    #[test]
    fn test_reload_header_after_alias_growth() {
        let mut frame = fixed_frame(2, 1);
        let mut alias = frame.share().unwrap();
        alias.add_items(1).unwrap();

        assert_eq!(frame.item_count(), 1);
        frame.reload_header().unwrap();
        assert_eq!(frame.item_count(), 2);
    }

    #[test]
    fn test_write_then_read() {
        let mut frame = fixed_frame(4, 3);
        frame.item_at(2).unwrap().field_at(0, 4).unwrap().set_value(7).unwrap();
        frame.add_item().unwrap();

        let mut stream = Vec::new();
        frame.write(&mut stream).unwrap();
        opaque_frame(b"tail").write(&mut stream).unwrap();

        let mut cursor = Cursor::new(stream);
        let first = Frame::read(&mut cursor).unwrap();
        assert_eq!(first.to_bytes().unwrap(), frame.to_bytes().unwrap());
        let second = Frame::read(&mut cursor).unwrap();
        assert_eq!(&second.data_bytes().unwrap()[..], b"tail");
    }

    #[test]
    fn test_read_preserves_header_reserve() {
        let mut header = Header::new(FrameKind::Nested, Endianness::Little);
        header.set_header_reserve_size_b(8).unwrap();
        let frame = Frame::from_header(&header).unwrap();
        frame.buffer().write_at(16, b"reserved").unwrap();

        let mut stream = Vec::new();
        frame.write(&mut stream).unwrap();
        let read = Frame::read(&mut stream.as_slice()).unwrap();
        assert_eq!(&read.to_bytes().unwrap()[16..24], b"reserved");
        assert_eq!(read.endianness(), Endianness::Little);
    }

    #[test]
    fn test_read_truncated() {
        let bytes = fixed_frame(4, 4).to_bytes().unwrap();

        let err = Frame::read(&mut &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(
            err,
            MfmError::Truncated {
                needed: 16,
                available: 13
            }
        ));

        let err = Frame::read(&mut &bytes[..5]).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_read_huge_declared_size_over_short_stream() {
        // 32 KiB blocks, 0xFFFFFF of them: about 512 GiB declared.
        let mut bytes = vec![0x0F, 0xFF, 0xFF, 0xFF, 0, 0, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(&[0; 32]);

        let err = Frame::read(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, MfmError::Truncated { available: 32, .. }));
    }

    #[test]
    fn test_read_reserve_and_data_into_existing_frame() {
        let mut header = Header::new(FrameKind::FixedItem, Endianness::Big);
        header.set_header_reserve_size_b(4).unwrap();
        header.set_item_size_b(2).unwrap();
        header.add_items(2).unwrap();

        let source = Frame::from_header(&header).unwrap();
        source.buffer().write_at(16, b"abcd").unwrap();
        source.buffer().write_at(20, &[1, 2, 3, 4]).unwrap();
        let bytes = source.to_bytes().unwrap();

        let mut target = Frame::from_header(&header).unwrap();
        let mut stream = &bytes[16..];
        target.read_header_reserve(&mut stream).unwrap();
        target.read_data(&mut stream).unwrap();
        assert!(stream.is_empty());
        assert_eq!(target.to_bytes().unwrap(), bytes);

        let mut short = &bytes[16..22];
        target.read_header_reserve(&mut short).unwrap();
        assert!(matches!(
            target.read_data(&mut short),
            Err(MfmError::Truncated { needed: 4, available: 2 })
        ));
    }

    #[test]
    fn test_seek_frame() {
        let mut stream = Vec::new();
        fixed_frame(4, 2).write(&mut stream).unwrap();
        opaque_frame(b"xyz").write(&mut stream).unwrap();
        fixed_frame(1, 9).write(&mut stream).unwrap();

        let mut cursor = Cursor::new(stream);
        assert_eq!(Frame::seek_frame(&mut cursor, 2).unwrap(), 24 + 11);
        let third = Frame::read(&mut cursor).unwrap();
        assert_eq!(third.item_count(), 9);

        cursor.set_position(0);
        assert_eq!(Frame::seek_frame(&mut cursor, 0).unwrap(), 0);
        assert!(Frame::seek_frame(&mut cursor, 4).is_err());
    }

    #[test]
    fn test_from_buffer_trims_trailing_bytes() {
        let mut bytes = fixed_frame(2, 2).to_bytes().unwrap().to_vec();
        bytes.extend_from_slice(&[9, 9, 9]);

        let frame = Frame::from_buffer(Buffer::from_slice(&bytes, Endianness::Big)).unwrap();
        assert_eq!(frame.buffer().size(), 20);

        let err = Frame::from_buffer(Buffer::from_slice(&bytes[..12], Endianness::Big));
        assert!(err.is_err());
        let err = Frame::from_slice(&bytes[..18]).unwrap_err();
        assert!(matches!(err, MfmError::Truncated { needed: 20, available: 18 }));
    }

    #[test]
    fn test_opaque_data_section() {
        let mut frame = opaque_frame(b"0123456789");
        assert_eq!(frame.header().frame_size_b(), 18);
        assert_eq!(frame.item_size_b(0).unwrap(), 10);
        assert!(matches!(
            frame.write_data(8, b"abc"),
            Err(MfmError::OutOfBounds { .. })
        ));

        frame.set_data_size_b(4).unwrap();
        assert_eq!(&frame.data_bytes().unwrap()[..], b"0123");
        assert!(matches!(frame.find_format(), Err(MfmError::Unsupported(_))));
    }

    #[test]
    fn test_decoded_unit_blocks_with_padding() {
        // 16 B blocks: frame of 2 blocks, header of 1 block, two 5 B items, 6 B padding.
        let mut bytes = vec![0x04, 0, 0, 2, 0, 0, 0, 0, 0, 1, 0, 5, 0, 0, 0, 2];
        bytes.extend((0u8..16).map(|i| i + 1));
        let mut frame = Frame::from_slice(&bytes).unwrap();
        assert_eq!(frame.item_offset(1).unwrap(), 21);

        frame.add_items(3).unwrap();
        // 16 + 5 * 5 = 41 B, rounded up to 48 B.
        assert_eq!(frame.header().frame_size_b(), 48);
        assert_eq!(frame.buffer().size(), 48);
        assert!(frame.item_at(2).unwrap().bytes().unwrap().iter().all(|&b| b == 0));
        assert_eq!(frame.item_at(1).unwrap().bytes().unwrap()[0], 6);
        assert_eq!(Frame::from_slice(&frame.to_bytes().unwrap()).unwrap().item_count(), 5);
    }

    #[test]
    fn test_decoded_trailing_data_rejected() {
        // One 4 B item, then 4 B that are neither an item nor block padding.
        let bytes = [0, 0, 0, 24, 0, 0, 1, 0, 0, 16, 0, 4, 0, 0, 0, 1, 1, 1, 1, 1, 9, 9, 9, 9];
        assert!(Frame::from_slice(&bytes).unwrap_err().is_decode());
        assert!(Frame::read(&mut &bytes[..]).unwrap_err().is_decode());

        let mut builder = FrameBuilder::new(FrameCollector::new());
        assert!(builder.add_data_chunk(&bytes).unwrap_err().is_decode());
        assert!(builder.is_empty());
    }

    #[test]
    fn test_add_items_grows_by_item_size() {
        let bytes = [0, 0, 0, 20, 0, 0, 1, 0, 0, 16, 0, 4, 0, 0, 0, 1, 1, 1, 1, 1];
        let mut frame = Frame::from_slice(&bytes).unwrap();

        frame.add_items(1).unwrap();
        assert_eq!(frame.header().frame_size_b(), 24);
        assert_eq!(frame.item_count(), 2);
        assert_eq!(&frame.item_at(0).unwrap().bytes().unwrap()[..], &[1, 1, 1, 1]);
        assert_eq!(&frame.item_at(1).unwrap().bytes().unwrap()[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_catalog_header_fields() {
        let catalog = test_catalog();
        let format = catalog.find_exact_format(1, 2).unwrap();
        let frame = Frame::create(format, Endianness::Big).unwrap();
        assert_eq!(frame.header().header_size_b(), 24);
        assert_eq!(frame.header().item_size_b(), Some(6));

        let trigger = frame.header_field("trigger").unwrap();
        trigger.set_bit_field("id", 0x12_3456).unwrap();
        trigger.set_bit_field("flags", 0x80).unwrap();
        assert_eq!(trigger.value().unwrap(), 0x8012_3456);
        assert_eq!(
            frame.header_field_at(16, 4).unwrap().bit_field("id").unwrap(),
            0x12_3456
        );

        let frame_type = frame.header_field("frame_type").unwrap();
        assert_eq!(frame_type.value().unwrap(), 1);
        assert!(frame_type.is_read_only());
        assert!(matches!(
            frame_type.set_value(9),
            Err(MfmError::Unsupported(_))
        ));

        assert_eq!(frame.field_name(20, 2), Some("run_number"));
        assert_eq!(frame.field_name(20, 1), None);
        assert!(matches!(
            frame.header_field("missing"),
            Err(MfmError::FieldNotFound(_))
        ));
        let (_, flags) = frame.find_header_bit_field("trigger", "flags").unwrap();
        assert_eq!(flags.offset(), 24);
    }

    #[test]
    fn test_catalog_revision_fallback() {
        test_catalog();
        let mut header = Header::new(FrameKind::FixedItem, Endianness::Big);
        header.set_frame_type(1).unwrap();
        header.set_revision(7).unwrap();
        let frame = Frame::from_header(&header).unwrap();

        let found = frame.find_format().unwrap();
        assert!(found.is_fallback());
        assert_eq!(found.format().revision(), 2);

        // The fallback format's header is longer than this frame's.
        assert!(matches!(
            frame.header_field("trigger"),
            Err(MfmError::OutOfBounds { .. })
        ));

        header.set_frame_type(0x7777).unwrap();
        let unknown = Frame::from_header(&header).unwrap();
        assert!(matches!(
            unknown.find_format(),
            Err(MfmError::FormatNotFound { frame_type: 0x7777 })
        ));
    }

    #[test]
    fn test_nested_frames_have_no_item_schema() {
        let catalog = test_catalog();
        let frame = Frame::create(catalog.find_exact_format(2, 0).unwrap(), Endianness::Big).unwrap();
        assert_eq!(frame.header().header_reserve_size_b(), 4);

        frame.header_field("event_id").unwrap().set_value(42).unwrap();
        assert_eq!(frame.header_field_at(16, 4).unwrap().value().unwrap(), 42);
        assert!(matches!(
            frame.find_item_field("word"),
            Err(MfmError::Unsupported(_))
        ));
    }
}
