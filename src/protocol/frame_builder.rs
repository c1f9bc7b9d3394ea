//! Streaming frame reconstruction.
//!
//! Bytes arrive in arbitrary chunks and are accumulated in a single
//! [`Buffer`]. A two-state machine tracks progress:
//! - `WaitingForHeader`: need at least 8 bytes to decode a primary header
//! - `WaitingForFrame`: primary header decoded, frame size latched, need the rest of the frame
//!
//! Each complete frame is handed to a [`FrameHandler`] as a zero-copy
//! window over the accumulation buffer, then its bytes are consumed.
//!
//! # Example
//!
//! ```
//! use mfm_codec::buffer::Endianness;
//! use mfm_codec::protocol::{Frame, FrameBuilder, FrameCollector, FrameKind};
//!
//! let mut frame = Frame::new(FrameKind::FixedItem, Endianness::Big).unwrap();
//! frame.add_items(10).unwrap();
//! let bytes = frame.to_bytes().unwrap();
//!
//! let mut builder = FrameBuilder::new(FrameCollector::new());
//! assert_eq!(builder.add_data_chunk(&bytes[..5]).unwrap(), 0);
//! assert_eq!(builder.add_data_chunk(&bytes[5..]).unwrap(), 1);
//!
//! let frames = builder.into_handler().into_frames();
//! assert_eq!(frames[0].item_count(), 10);
//! ```

use std::io::{self, Read};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::frame::Frame;
use super::primary_header::{PrimaryHeader, PRIMARY_HEADER_SIZE_B};
use crate::buffer::{Buffer, Endianness};
use crate::error::{to_usize, MfmError, Result};

/// Default maximum accepted frame size (1 GiB).
pub const DEFAULT_MAX_FRAME_SIZE_B: u64 = 1024 * 1024 * 1024;

/// Default initial capacity of the accumulation buffer (64 KiB).
pub const DEFAULT_INITIAL_CAPACITY: usize = 64 * 1024;

/// Receives reconstructed frames.
///
/// Any `FnMut(&Frame) -> Result<()>` closure is a handler.
pub trait FrameHandler {
    /// Called once per frame, as soon as its primary header is buffered.
    fn on_header_observed(&mut self, header: &PrimaryHeader) -> Result<()> {
        let _ = header;
        Ok(())
    }

    /// Called once per complete frame, in arrival order.
    ///
    /// `frame` is a window over the builder's buffer and goes stale when
    /// the call returns; use [`Frame::deep_clone`] to keep it.
    fn on_frame_complete(&mut self, frame: &Frame) -> Result<()>;
}

impl<F> FrameHandler for F
where
    F: FnMut(&Frame) -> Result<()>,
{
    fn on_frame_complete(&mut self, frame: &Frame) -> Result<()> {
        self(frame)
    }
}

/// Handler keeping an independent copy of every completed frame.
#[derive(Debug, Default)]
pub struct FrameCollector {
    frames: Vec<Frame>,
}

impl FrameCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Remove and return the frames collected so far.
    pub fn take(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

impl FrameHandler for FrameCollector {
    fn on_frame_complete(&mut self, frame: &Frame) -> Result<()> {
        self.frames.push(frame.deep_clone()?);
        Ok(())
    }
}

/// Builder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Initial capacity of the accumulation buffer.
    pub initial_capacity: usize,
    /// Frames declaring a larger size are rejected when their header is observed.
    pub max_frame_size_b: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_frame_size_b: DEFAULT_MAX_FRAME_SIZE_B,
        }
    }
}

/// State machine for frame reconstruction.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Need a complete primary header.
    WaitingForHeader,
    /// Primary header decoded, waiting for the rest of the frame.
    WaitingForFrame { header: PrimaryHeader, size: usize },
}

/// Reassembles frames from arbitrarily chunked input.
///
/// Chunking never changes the output: the same bytes split at any points
/// yield the same frames in the same order.
pub struct FrameBuilder<H> {
    /// Bytes not yet consumed.
    buffer: Buffer,
    /// Current parsing state.
    state: State,
    config: BuilderConfig,
    handler: H,
}

impl<H: FrameHandler> FrameBuilder<H> {
    /// Create a builder with default settings.
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, BuilderConfig::default())
    }

    pub fn with_config(handler: H, config: BuilderConfig) -> Self {
        Self {
            buffer: Buffer::with_capacity(config.initial_capacity, Endianness::default()),
            state: State::WaitingForHeader,
            config,
            handler,
        }
    }

    /// Append a chunk and deliver every frame it completes.
    ///
    /// Returns the number of frames delivered. A malformed primary header
    /// fails fast and leaves the buffered bytes in place; call
    /// [`reset`](Self::reset) to resynchronize. A handler error is returned
    /// after the frame's bytes have been consumed, so no frame is delivered
    /// twice; remaining complete frames are delivered by the next call.
    pub fn add_data_chunk(&mut self, chunk: &[u8]) -> Result<usize> {
        debug!(
            len = chunk.len(),
            buffered = self.buffer.size(),
            "Data chunk received"
        );
        self.buffer.append(chunk)?;

        let mut delivered = 0;
        while self.try_deliver_one()? {
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Try to deliver a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(true)` if a frame was delivered
    /// - `Ok(false)` if more data is needed
    /// - `Err(...)` on a malformed or oversized header, or a handler error
    fn try_deliver_one(&mut self) -> Result<bool> {
        match self.state {
            State::WaitingForHeader => {
                if self.buffer.size() < PRIMARY_HEADER_SIZE_B {
                    return Ok(false);
                }

                let header = PrimaryHeader::decode(&mut self.buffer.input_stream(0)?)?;
                if header.frame_size_b > self.config.max_frame_size_b {
                    return Err(MfmError::FrameTooLarge {
                        size: header.frame_size_b,
                        limit: self.config.max_frame_size_b,
                    });
                }
                let size = to_usize(header.frame_size_b)?;
                debug!(
                    expected = size,
                    frame_type = header.frame_type,
                    "Frame header observed"
                );

                self.state = State::WaitingForFrame { header, size };
                self.handler.on_header_observed(&header)?;

                // Try to complete the frame immediately
                self.try_deliver_one()
            }

            State::WaitingForFrame { header, size } => {
                let buffered = self.buffer.size();
                if buffered < size {
                    debug!(missing = size - buffered, "Waiting for frame bytes");
                    return Ok(false);
                }

                let delivered = self.deliver(size);

                self.buffer.consume(size)?;
                self.state = State::WaitingForHeader;
                debug!(
                    size,
                    frame_type = header.frame_type,
                    data_source = header.data_source,
                    leftover = self.buffer.size(),
                    "Frame processed"
                );

                delivered.map(|()| true)
            }
        }
    }

    fn deliver(&mut self, size: usize) -> Result<()> {
        let frame = Frame::from_buffer(self.buffer.window(0, size)?)?;
        self.handler.on_frame_complete(&frame)
    }

    /// Drain `reader` in chunks of `chunk_size` bytes until end of stream.
    ///
    /// Returns the number of frames delivered.
    pub fn feed<R: Read + ?Sized>(&mut self, reader: &mut R, chunk_size: usize) -> Result<usize> {
        let mut chunk = vec![0u8; chunk_size.max(1)];
        let mut delivered = 0;
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => return Ok(delivered),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            delivered += self.add_data_chunk(&chunk[..n])?;
        }
    }

    /// Signal end of stream.
    ///
    /// Fails with [`MfmError::Truncated`] if a partial frame is buffered;
    /// the partial bytes are discarded either way.
    pub fn finish(&mut self) -> Result<()> {
        let available = self.buffer.size();
        if available == 0 {
            return Ok(());
        }
        let needed = self.expected_frame_size().unwrap_or(PRIMARY_HEADER_SIZE_B);
        warn!(needed, available, "Stream ended inside a frame");
        self.reset()?;
        Err(MfmError::Truncated { needed, available })
    }

    /// Discard all buffered bytes and the latched frame size.
    pub fn reset(&mut self) -> Result<()> {
        let buffered = self.buffer.size();
        self.buffer.consume(buffered)?;
        self.state = State::WaitingForHeader;
        Ok(())
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.size()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.size() == 0
    }

    /// Latched size of the frame being assembled, if its header has been seen.
    pub fn expected_frame_size(&self) -> Option<usize> {
        match self.state {
            State::WaitingForHeader => None,
            State::WaitingForFrame { size, .. } => Some(size),
        }
    }

    /// Primary header of the frame being assembled, if it has been seen.
    pub fn pending_header(&self) -> Option<PrimaryHeader> {
        match self.state {
            State::WaitingForHeader => None,
            State::WaitingForFrame { header, .. } => Some(header),
        }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForFrame { .. } => "WaitingForFrame",
        }
    }
}
