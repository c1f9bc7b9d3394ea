//! Protocol module - frame layout, headers, and streaming reconstruction.
//!
//! This module implements the MFM binary frame format:
//! - 8-byte primary header shared by every frame
//! - Fixed-item, nested and opaque headers
//! - Frame, item and field views over frame bytes
//! - Frame builder for reassembling frames from chunked input

mod field;
mod frame;
mod frame_builder;
mod header;
mod item;
mod primary_header;

pub use field::Field;
pub use frame::Frame;
pub use frame_builder::{
    BuilderConfig, FrameBuilder, FrameCollector, FrameHandler, DEFAULT_INITIAL_CAPACITY,
    DEFAULT_MAX_FRAME_SIZE_B,
};
pub use header::{FrameKind, Header, OpaqueHeader, StandardHeader, STANDARD_HEADER_SIZE_B};
pub use item::Item;
pub use primary_header::{
    decode_primary_header, meta_type, PrimaryHeader, MAX_FRAME_SIZE_BLOCKS,
    MAX_UNIT_BLOCK_EXPONENT, PRIMARY_HEADER_SIZE_B,
};
