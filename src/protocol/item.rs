//! View of one fixed-size item inside a frame.

use bytes::Bytes;

use super::field::Field;
use super::frame::Frame;
use crate::error::{to_usize, MfmError, Result};

/// One element of a fixed-item frame's payload.
///
/// Borrowed from its [`Frame`]; named field lookups resolve against the
/// frame's item schema in the format catalog.
#[derive(Debug, Clone, Copy)]
pub struct Item<'a> {
    frame: &'a Frame,
    index: usize,
    offset_b: usize,
    size_b: usize,
}

impl<'a> Item<'a> {
    pub(crate) fn new(frame: &'a Frame, index: usize, offset_b: usize, size_b: usize) -> Self {
        Self {
            frame,
            index,
            offset_b,
            size_b,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Offset from the start of the frame.
    #[inline]
    pub fn offset_b(&self) -> usize {
        self.offset_b
    }

    #[inline]
    pub fn size_b(&self) -> usize {
        self.size_b
    }

    /// Named field of this item.
    pub fn field(&self, name: &str) -> Result<Field<'a>> {
        let format = self.frame.find_format()?.format();
        let spec = format.find_item_field(name)?;
        let offset_b = to_usize(spec.offset_b())?;
        let size_b = to_usize(spec.size_b())?;
        // The frame may have been decoded with a fallback revision whose items are wider.
        self.check_window(offset_b, size_b)?;
        Ok(Field::new(
            self.frame.buffer(),
            Some(spec),
            None,
            self.offset_b + offset_b,
            size_b,
            false,
        ))
    }

    /// Positional field of this item; the name is looked up in the item schema when known.
    pub fn field_at(&self, offset_b: usize, size_b: usize) -> Result<Field<'a>> {
        self.check_window(offset_b, size_b)?;
        let spec = self.frame.find_format().ok().and_then(|found| {
            let format = found.format();
            let name = format.item_field_name(offset_b as u64, size_b as u64)?;
            format.find_item_field(name).ok()
        });
        Ok(Field::new(
            self.frame.buffer(),
            spec,
            None,
            self.offset_b + offset_b,
            size_b,
            false,
        ))
    }

    /// Copy of the item's bytes.
    pub fn bytes(&self) -> Result<Bytes> {
        let bytes = self.frame.buffer().as_slice()?;
        let item = bytes
            .get(self.offset_b..self.offset_b + self.size_b)
            .ok_or(MfmError::OutOfBounds {
                offset: self.offset_b,
                len: self.size_b,
                size: bytes.len(),
            })?;
        Ok(Bytes::copy_from_slice(item))
    }

    fn check_window(&self, offset_b: usize, size_b: usize) -> Result<()> {
        match offset_b.checked_add(size_b) {
            Some(end) if end <= self.size_b => Ok(()),
            _ => Err(MfmError::OutOfBounds {
                offset: offset_b,
                len: size_b,
                size: self.size_b,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::Endianness;
    use crate::error::MfmError;
    use crate::format::test_catalog;
    use crate::protocol::Frame;

    fn sample_frame(items: usize) -> Frame {
        let format = test_catalog().find_exact_format(1, 2).unwrap();
        let mut frame = Frame::create(format, Endianness::Big).unwrap();
        frame.add_items(items).unwrap();
        frame
    }

    #[test]
    fn test_item_geometry() {
        let frame = sample_frame(3);
        let item = frame.item_at(2).unwrap();
        assert_eq!(item.index(), 2);
        assert_eq!(item.offset_b(), 24 + 2 * 6);
        assert_eq!(item.size_b(), 6);
    }

    #[test]
    fn test_named_item_fields() {
        let frame = sample_frame(2);
        let item = frame.item_at(1).unwrap();

        let word = item.field("word").unwrap();
        assert_eq!(word.offset_b(), 30);
        word.set_bit_field("channel", 0xC).unwrap();
        word.set_bit_field("adc", 0x0ABC).unwrap();
        item.field("time").unwrap().set_value(0x0102).unwrap();

        assert_eq!(
            &item.bytes().unwrap()[..],
            &[0xC0, 0x00, 0x0A, 0xBC, 0x01, 0x02]
        );
        assert_eq!(frame.item_field(1, "word").unwrap().bit_field("channel").unwrap(), 0xC);
        assert!(frame.item_at(0).unwrap().bytes().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_positional_item_field_is_named() {
        let frame = sample_frame(1);
        let item = frame.item_at(0).unwrap();

        let field = item.field_at(4, 2).unwrap();
        assert_eq!(field.name(), Some("time"));
        assert_eq!(field.offset_b(), 28);
        assert_eq!(item.field_at(1, 2).unwrap().name(), None);
        assert!(matches!(
            item.field_at(5, 2),
            Err(MfmError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_unknown_item_field() {
        let frame = sample_frame(1);
        assert!(matches!(
            frame.item_at(0).unwrap().field("missing"),
            Err(MfmError::FieldNotFound(_))
        ));
        assert!(matches!(
            frame.item_field(1, "word"),
            Err(MfmError::ItemNotFound { index: 1, count: 1 })
        ));
    }

    #[test]
    fn test_little_endian_item_field() {
        let format = test_catalog().find_exact_format(1, 2).unwrap();
        let mut frame = Frame::create(format, Endianness::Little).unwrap();
        frame.add_item().unwrap();

        frame.item_field(0, "time").unwrap().set_value(0x0102).unwrap();
        assert_eq!(&frame.item_at(0).unwrap().bytes().unwrap()[4..], &[0x02, 0x01]);
    }
}
