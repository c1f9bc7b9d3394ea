//! Byte and bit windows inside a frame.

use bytes::Bytes;

use crate::buffer::Buffer;
use crate::error::{MfmError, Result};
use crate::format::{BitFieldSpec, FieldSpec};

/// A byte window over a frame's buffer, optionally described by a catalog field.
///
/// Integer access follows the frame's endianness. Bit offsets count from
/// the least significant bit of the field's integer value.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    buffer: &'a Buffer,
    spec: Option<&'a FieldSpec>,
    name: Option<&'a str>,
    offset_b: usize,
    size_b: usize,
    read_only: bool,
}

impl<'a> Field<'a> {
    pub(crate) fn new(
        buffer: &'a Buffer,
        spec: Option<&'a FieldSpec>,
        name: Option<&'a str>,
        offset_b: usize,
        size_b: usize,
        read_only: bool,
    ) -> Self {
        Self {
            buffer,
            spec,
            name: name.or_else(|| spec.map(FieldSpec::name)),
            offset_b,
            size_b,
            read_only,
        }
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

    /// Catalog name, when the window matches a known field.
    #[inline]
    pub fn name(&self) -> Option<&'a str> {
        self.name
    }

    /// Whether writes are refused (fields inside the mandatory header part).
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The field as an unsigned integer (1 to 8 bytes).
    pub fn value(&self) -> Result<u64> {
        self.buffer.read_uint(self.offset_b, self.size_b)
    }

    pub fn set_value(&self, value: u64) -> Result<()> {
        self.ensure_writable()?;
        self.buffer.write_uint(self.offset_b, self.size_b, value)
    }

    /// Extract `width` bits starting at bit `offset`.
    pub fn bit_value(&self, offset: u32, width: u32) -> Result<u64> {
        self.check_bits(offset, width)?;
        Ok((self.value()? >> offset) & mask(width))
    }

    /// Replace `width` bits starting at bit `offset`, leaving the other bits intact.
    pub fn set_bit_value(&self, offset: u32, width: u32, value: u64) -> Result<()> {
        self.ensure_writable()?;
        self.check_bits(offset, width)?;
        let mask = mask(width);
        if value & !mask != 0 {
            return Err(MfmError::ValueOverflow { value, bits: width });
        }
        let current = self.value()?;
        self.set_value((current & !(mask << offset)) | (value << offset))
    }

    /// Value of a named bit field of this catalog field.
    pub fn bit_field(&self, name: &str) -> Result<u64> {
        let bits = self.find_bit_field(name)?;
        self.bit_value(bits.offset(), bits.width())
    }

    pub fn set_bit_field(&self, name: &str, value: u64) -> Result<()> {
        let bits = self.find_bit_field(name)?;
        self.set_bit_value(bits.offset(), bits.width(), value)
    }

    /// Copy of the raw bytes.
    pub fn bytes(&self) -> Result<Bytes> {
        let bytes = self.buffer.as_slice()?;
        let end = self.offset_b + self.size_b;
        if end > bytes.len() {
            return Err(MfmError::OutOfBounds {
                offset: self.offset_b,
                len: self.size_b,
                size: bytes.len(),
            });
        }
        Ok(Bytes::copy_from_slice(&bytes[self.offset_b..end]))
    }

    fn find_bit_field(&self, name: &str) -> Result<&'a BitFieldSpec> {
        match self.spec {
            Some(spec) => spec.find_bit_field(name),
            None => Err(MfmError::FieldNotFound(name.to_string())),
        }
    }

    fn check_bits(&self, offset: u32, width: u32) -> Result<()> {
        let field_bits = (self.size_b.min(8) * 8) as u32;
        match offset.checked_add(width) {
            Some(end) if width > 0 && end <= field_bits => Ok(()),
            _ => Err(MfmError::BitFieldRange {
                offset,
                width,
                field_bits,
            }),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(MfmError::unsupported(format!(
                "field at offset {} lies in the mandatory header and is managed by the frame",
                self.offset_b
            )));
        }
        Ok(())
    }
}

#[inline]
fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}
