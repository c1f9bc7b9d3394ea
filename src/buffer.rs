//! Byte buffers with shared, windowed views.
//!
//! A [`Buffer`] either owns its storage or is a *window* onto a region of
//! another buffer's storage. Windows read and write the parent's bytes
//! directly; they carry the storage generation observed when they were
//! created, and every reallocation of the owning storage (growth, front
//! consumption) bumps that generation. Accessing a window after such a
//! reallocation fails with [`MfmError::StaleWindow`] instead of reading
//! moved bytes.
//!
//! Storage is shared through `Arc<RwLock<_>>`, so [`Buffer::share`] gives a
//! cheap alias (writes through one handle are visible through the other)
//! while [`Buffer::deep_clone`] copies the logical bytes into fresh storage.
//!
//! # Example
//!
//! ```
//! use mfm_codec::buffer::{Buffer, Endianness};
//!
//! let mut parent = Buffer::from_slice(&[0u8; 8], Endianness::Big);
//! let window = parent.window(4, 4).unwrap();
//! window.write_uint(0, 4, 0xCAFE_BABE).unwrap();
//! assert_eq!(parent.read_uint(4, 4).unwrap(), 0xCAFE_BABE);
//!
//! // Growing the parent invalidates the window.
//! parent.set_capacity(64).unwrap();
//! assert!(window.as_slice().is_err());
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use serde::{Deserialize, Serialize};

use crate::error::{MfmError, Result};

/// Byte order of multi-byte integers in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

#[derive(Debug)]
struct Storage {
    /// Allocated bytes; `data.len()` is the capacity.
    data: BytesMut,
    /// Logical size, always `<= data.len()`.
    size: usize,
    /// Bumped on every reallocation.
    generation: u64,
}

impl Storage {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::zeroed(capacity),
            size: 0,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    offset: usize,
    len: usize,
    generation: u64,
}

/// Owned or windowed byte storage.
pub struct Buffer {
    storage: Arc<RwLock<Storage>>,
    window: Option<Window>,
    endianness: Endianness,
}

impl Buffer {
    /// Create an empty owned buffer.
    pub fn new(endianness: Endianness) -> Self {
        Self::with_capacity(0, endianness)
    }

    /// Create an owned buffer with `capacity` zeroed bytes and a logical size of 0.
    pub fn with_capacity(capacity: usize, endianness: Endianness) -> Self {
        Self {
            storage: Arc::new(RwLock::new(Storage::with_capacity(capacity))),
            window: None,
            endianness,
        }
    }

    /// Create an owned buffer holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8], endianness: Endianness) -> Self {
        Self::from_bytes_mut(BytesMut::from(bytes), endianness)
    }

    /// Create an owned buffer taking over `data`; all of it is logical content.
    pub fn from_bytes_mut(data: BytesMut, endianness: Endianness) -> Self {
        let size = data.len();
        Self {
            storage: Arc::new(RwLock::new(Storage {
                data,
                size,
                generation: 0,
            })),
            window: None,
            endianness,
        }
    }

    /// Byte order used by integer accessors.
    #[inline]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Change the byte order of this handle (other handles are unaffected).
    #[inline]
    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    /// Whether this buffer is a window onto another buffer's storage.
    #[inline]
    pub fn is_window(&self) -> bool {
        self.window.is_some()
    }

    /// Whether this handle can still access its bytes.
    pub fn is_valid(&self) -> bool {
        let storage = self.storage.read();
        self.region(&storage).is_ok()
    }

    /// Allocated size in bytes. A window's capacity is its length.
    pub fn capacity(&self) -> usize {
        match self.window {
            Some(w) => w.len,
            None => self.storage.read().data.len(),
        }
    }

    /// Logical size in bytes.
    pub fn size(&self) -> usize {
        match self.window {
            Some(w) => w.len,
            None => self.storage.read().size,
        }
    }

    /// Reallocate to exactly `capacity` bytes.
    ///
    /// Existing bytes are preserved up to `min(old, new)`; new bytes are zero.
    /// The logical size is clamped to the new capacity. Outstanding windows
    /// onto this storage become stale.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<()> {
        self.ensure_owned("set_capacity")?;
        let mut storage = self.storage.write();
        if storage.data.len() != capacity {
            storage.data.resize(capacity, 0);
            storage.size = storage.size.min(capacity);
            storage.generation += 1;
        }
        Ok(())
    }

    /// Set the logical size, which must not exceed the capacity.
    pub fn set_size(&mut self, size: usize) -> Result<()> {
        if let Some(w) = self.window {
            if size == w.len {
                return Ok(());
            }
            return Err(MfmError::unsupported("a buffer window cannot be resized"));
        }
        let mut storage = self.storage.write();
        let capacity = storage.data.len();
        if size > capacity {
            return Err(MfmError::OutOfBounds {
                offset: 0,
                len: size,
                size: capacity,
            });
        }
        storage.size = size;
        Ok(())
    }

    /// Append bytes after the logical end, growing the storage when needed.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_owned("append")?;
        let mut storage = self.storage.write();
        let start = storage.size;
        let end = start + bytes.len();
        if end > storage.data.len() {
            storage.data.resize(end, 0);
            storage.generation += 1;
        }
        storage.data[start..end].copy_from_slice(bytes);
        storage.size = end;
        Ok(())
    }

    /// Drop the first `n` logical bytes, shifting the rest to the front.
    pub fn consume(&mut self, n: usize) -> Result<()> {
        self.ensure_owned("consume")?;
        let mut storage = self.storage.write();
        if n > storage.size {
            return Err(MfmError::OutOfBounds {
                offset: 0,
                len: n,
                size: storage.size,
            });
        }
        storage.data.advance(n);
        storage.size -= n;
        storage.generation += 1;
        Ok(())
    }

    /// Borrow `len` bytes starting at `offset` as a window sharing this storage.
    pub fn window(&self, offset: usize, len: usize) -> Result<Buffer> {
        let storage = self.storage.read();
        let (start, end) = self.region(&storage)?;
        check_range(offset, len, end - start)?;
        Ok(Buffer {
            storage: Arc::clone(&self.storage),
            window: Some(Window {
                offset: start + offset,
                len,
                generation: storage.generation,
            }),
            endianness: self.endianness,
        })
    }

    /// Cheap alias of this buffer: both handles act on the same bytes.
    pub fn share(&self) -> Buffer {
        Buffer {
            storage: Arc::clone(&self.storage),
            window: self.window,
            endianness: self.endianness,
        }
    }

    /// Copy the logical bytes into fresh, unaliased storage.
    pub fn deep_clone(&self) -> Result<Buffer> {
        let bytes = self.as_slice()?;
        Ok(Buffer::from_bytes_mut(
            BytesMut::from(&bytes[..]),
            self.endianness,
        ))
    }

    /// Read access to the logical bytes.
    pub fn as_slice(&self) -> Result<MappedRwLockReadGuard<'_, [u8]>> {
        let storage = self.storage.read();
        let (start, end) = self.region(&storage)?;
        Ok(RwLockReadGuard::map(storage, |s| &s.data[start..end]))
    }

    /// Write access to the logical bytes.
    ///
    /// Takes `&self`: aliases created by [`Buffer::share`] and windows all
    /// write through to the same storage.
    pub fn as_mut_slice(&self) -> Result<MappedRwLockWriteGuard<'_, [u8]>> {
        let storage = self.storage.write();
        let (start, end) = self.region(&storage)?;
        Ok(RwLockWriteGuard::map(storage, |s| &mut s.data[start..end]))
    }

    /// Copy the logical bytes out.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(&self.as_slice()?))
    }

    /// Copy `src` into the buffer at `offset`.
    pub fn write_at(&self, offset: usize, src: &[u8]) -> Result<()> {
        let mut bytes = self.as_mut_slice()?;
        check_range(offset, src.len(), bytes.len())?;
        bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Set `len` bytes starting at `offset` to `value`.
    pub fn fill(&self, offset: usize, len: usize, value: u8) -> Result<()> {
        let mut bytes = self.as_mut_slice()?;
        check_range(offset, len, bytes.len())?;
        bytes[offset..offset + len].fill(value);
        Ok(())
    }

    /// Read an unsigned integer of `size` bytes (1 to 8) at `offset`.
    pub fn read_uint(&self, offset: usize, size: usize) -> Result<u64> {
        check_uint_size(size)?;
        let bytes = self.as_slice()?;
        check_range(offset, size, bytes.len())?;
        let mut src = &bytes[offset..offset + size];
        Ok(match self.endianness {
            Endianness::Big => src.get_uint(size),
            Endianness::Little => src.get_uint_le(size),
        })
    }

    /// Write an unsigned integer of `size` bytes (1 to 8) at `offset`.
    pub fn write_uint(&self, offset: usize, size: usize, value: u64) -> Result<()> {
        check_uint_size(size)?;
        let bits = (size * 8) as u32;
        if bits < 64 && value >> bits != 0 {
            return Err(MfmError::ValueOverflow { value, bits });
        }
        let mut bytes = self.as_mut_slice()?;
        check_range(offset, size, bytes.len())?;
        let mut dst = &mut bytes[offset..offset + size];
        match self.endianness {
            Endianness::Big => dst.put_uint(value, size),
            Endianness::Little => dst.put_uint_le(value, size),
        }
        Ok(())
    }

    /// Decode cursor over the logical bytes, starting at `offset`.
    pub fn input_stream(&self, offset: usize) -> Result<InputStream<'_>> {
        let bytes = self.as_slice()?;
        check_range(offset, 0, bytes.len())?;
        Ok(InputStream { bytes, pos: offset })
    }

    fn ensure_owned(&self, op: &str) -> Result<()> {
        if self.window.is_some() {
            return Err(MfmError::unsupported(format!(
                "{op} is not supported on a buffer window"
            )));
        }
        Ok(())
    }

    /// Absolute `[start, end)` range of this handle within the storage.
    fn region(&self, storage: &Storage) -> Result<(usize, usize)> {
        match self.window {
            None => Ok((0, storage.size)),
            Some(w) => {
                if w.generation != storage.generation || w.offset + w.len > storage.data.len() {
                    return Err(MfmError::StaleWindow);
                }
                Ok((w.offset, w.offset + w.len))
            }
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size())
            .field("window", &self.window)
            .field("endianness", &self.endianness)
            .finish()
    }
}

/// Read cursor over a buffer's logical bytes.
///
/// Implements [`bytes::Buf`] for header decoding and [`std::io::Read`] for
/// copying into other sinks. Holds a read lock on the storage while alive.
pub struct InputStream<'a> {
    bytes: MappedRwLockReadGuard<'a, [u8]>,
    pos: usize,
}

impl InputStream<'_> {
    /// Current offset within the buffer.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl Buf for InputStream<'_> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn chunk(&self) -> &[u8] {
        &self.bytes[self.pos..]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.remaining(), "advance past end of input stream");
        self.pos += cnt;
    }
}

impl io::Read for InputStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Fail with a truncation error unless `buf` holds at least `needed` bytes.
pub(crate) fn ensure_remaining<B: Buf>(buf: &B, needed: usize) -> Result<()> {
    let available = buf.remaining();
    if available < needed {
        return Err(MfmError::Truncated { needed, available });
    }
    Ok(())
}

fn check_range(offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(MfmError::OutOfBounds { offset, len, size }),
    }
}

fn check_uint_size(size: usize) -> Result<()> {
    if size == 0 || size > 8 {
        return Err(MfmError::unsupported(format!(
            "integer access needs 1 to 8 bytes, got {size}"
        )));
    }
    Ok(())
}
