//! # mfm-codec
//!
//! Codec for MFM frames, the self-describing binary container used to
//! carry detector-acquisition data.
//!
//! Every frame is a header plus a payload, and frames nest:
//!
//! - **Fixed-item** frames carry an array of identical fixed-size items
//! - **Nested** frames carry a sequence of self-sized sub-frames
//! - **Opaque** frames carry raw, schema-less bytes
//!
//! ## Architecture
//!
//! - [`buffer`]: byte storage with shared, generation-checked windows
//! - [`protocol`]: primary header, headers, [`Frame`] and the streaming [`FrameBuilder`]
//! - [`format`]: named header and item fields loaded from a JSON catalog
//!
//! ## Example
//!
//! ```
//! use mfm_codec::buffer::Endianness;
//! use mfm_codec::{Frame, FrameBuilder, FrameKind};
//!
//! let mut frame = Frame::new(FrameKind::FixedItem, Endianness::Big).unwrap();
//! frame.add_items(3).unwrap();
//! let bytes = frame.to_bytes().unwrap();
//!
//! let mut item_counts = Vec::new();
//! let mut builder = FrameBuilder::new(|frame: &Frame| -> mfm_codec::Result<()> {
//!     item_counts.push(frame.item_count());
//!     Ok(())
//! });
//! for chunk in bytes.chunks(5) {
//!     builder.add_data_chunk(chunk).unwrap();
//! }
//! drop(builder);
//!
//! assert_eq!(item_counts, vec![3]);
//! ```

pub mod buffer;
pub mod error;
pub mod format;
pub mod protocol;

pub use error::{MfmError, Result};
pub use format::{FormatCatalog, FrameFormat};
pub use protocol::{Frame, FrameBuilder, FrameHandler, FrameKind, Header};
