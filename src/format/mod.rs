//! Format catalog: named header and item fields per `(frame type, revision)`.
//!
//! The catalog is configuration. It is loaded from JSON at startup,
//! validated into [`FrameFormat`]s and, typically, installed once as the
//! process-wide catalog that [`Frame`](crate::protocol::Frame) field
//! lookups resolve against.

mod catalog;
mod config;
mod frame_format;

pub use catalog::{FormatCatalog, FormatMatch};
pub use config::{BitFieldConfig, CatalogConfig, FieldConfig, FormatConfig};
pub use frame_format::{BitFieldSpec, FieldSpec, FieldTable, FrameFormat};

/// Catalog shared by the unit tests of this crate.
#[cfg(test)]
pub(crate) fn test_catalog() -> &'static FormatCatalog {
    const JSON: &str = r#"{ "formats": [
        {
            "name": "adc_samples",
            "frame_type": 1,
            "revision": 2,
            "kind": "fixed_item",
            "header_reserve_size_b": 8,
            "item_size_b": 6,
            "header_fields": [
                { "name": "frame_type", "offset_b": 5, "size_b": 2 },
                { "name": "item_count", "offset_b": 12, "size_b": 4 },
                {
                    "name": "trigger",
                    "offset_b": 16,
                    "size_b": 4,
                    "bit_fields": [
                        { "name": "id", "offset": 0, "width": 24 },
                        { "name": "flags", "offset": 24, "width": 8 }
                    ]
                },
                { "name": "run_number", "offset_b": 20, "size_b": 2 }
            ],
            "item_fields": [
                {
                    "name": "word",
                    "offset_b": 0,
                    "size_b": 4,
                    "bit_fields": [
                        { "name": "adc", "offset": 0, "width": 14 },
                        { "name": "channel", "offset": 28, "width": 4 }
                    ]
                },
                { "name": "time", "offset_b": 4, "size_b": 2 }
            ]
        },
        { "name": "adc_samples_v1", "frame_type": 1, "revision": 1, "kind": "fixed_item", "item_size_b": 4 },
        {
            "name": "event",
            "frame_type": 2,
            "revision": 0,
            "kind": "nested",
            "header_reserve_size_b": 4,
            "header_fields": [{ "name": "event_id", "offset_b": 16, "size_b": 4 }]
        },
        { "name": "raw", "frame_type": 3, "revision": 0, "kind": "opaque" }
    ] }"#;

    match FormatCatalog::get_or_install(|| FormatCatalog::from_json_str(JSON)) {
        Ok(catalog) => catalog,
        Err(err) => panic!("test catalog failed to load: {err}"),
    }
}
