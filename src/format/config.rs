//! Catalog configuration, as loaded from JSON.
//!
//! # Example
//!
//! ```
//! use mfm_codec::format::CatalogConfig;
//!
//! let json = r#"{
//!     "formats": [{
//!         "name": "adc_samples",
//!         "frame_type": 1,
//!         "revision": 2,
//!         "kind": "fixed_item",
//!         "item_size_b": 4,
//!         "header_fields": [{ "name": "frame_type", "offset_b": 5, "size_b": 2 }],
//!         "item_fields": [{
//!             "name": "sample",
//!             "offset_b": 0,
//!             "size_b": 4,
//!             "bit_fields": [{ "name": "channel", "offset": 28, "width": 4 }]
//!         }]
//!     }]
//! }"#;
//!
//! let config: CatalogConfig = serde_json::from_str(json).unwrap();
//! assert_eq!(config.formats[0].item_fields[0].bit_fields[0].width, 4);
//! ```

use serde::{Deserialize, Serialize};

use crate::protocol::FrameKind;

/// Top-level catalog document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    #[serde(default)]
    pub formats: Vec<FormatConfig>,
}

/// One `(frame type, revision)` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatConfig {
    /// Human-readable format name (informational).
    #[serde(default)]
    pub name: String,
    pub frame_type: u16,
    pub revision: u8,
    pub kind: FrameKind,
    /// Extra header bytes after the mandatory part.
    #[serde(default)]
    pub header_reserve_size_b: u64,
    /// Item size; required for fixed-item formats, absent otherwise.
    #[serde(default)]
    pub item_size_b: u16,
    /// Header fields, offsets counted from the start of the frame.
    #[serde(default)]
    pub header_fields: Vec<FieldConfig>,
    /// Item fields, offsets counted from the start of each item.
    #[serde(default)]
    pub item_fields: Vec<FieldConfig>,
}

/// Named byte window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    pub offset_b: u64,
    pub size_b: u64,
    #[serde(default)]
    pub bit_fields: Vec<BitFieldConfig>,
}

/// Named bit range, counted from the least significant bit of the field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitFieldConfig {
    pub name: String,
    pub offset: u32,
    pub width: u32,
}
