//! Schema of one `(frame type, revision)` pair.

use std::collections::HashMap;

use super::config::{BitFieldConfig, FieldConfig, FormatConfig};
use crate::error::{MfmError, Result};
use crate::protocol::{FrameKind, PRIMARY_HEADER_SIZE_B, STANDARD_HEADER_SIZE_B};

/// Named bit range inside a field.
///
/// `offset` counts from the least significant bit of the field's integer
/// value, so `value = (field >> offset) & mask`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFieldSpec {
    name: String,
    offset: u32,
    width: u32,
}

impl BitFieldSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn width(&self) -> u32 {
        self.width
    }
}

/// Named byte window inside a header or an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    name: String,
    offset_b: u64,
    size_b: u64,
    bit_fields: Vec<BitFieldSpec>,
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset relative to the container (frame start or item start).
    pub fn offset_b(&self) -> u64 {
        self.offset_b
    }

    pub fn size_b(&self) -> u64 {
        self.size_b
    }

    pub fn bit_fields(&self) -> &[BitFieldSpec] {
        &self.bit_fields
    }

    /// Look up a named bit field.
    pub fn find_bit_field(&self, name: &str) -> Result<&BitFieldSpec> {
        self.bit_fields
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| MfmError::FieldNotFound(format!("{}.{name}", self.name)))
    }

    fn from_config(config: FieldConfig, window_b: u64, table: &str) -> Result<Self> {
        if config.size_b == 0 {
            return Err(invalid(table, &config.name, "has zero size"));
        }
        match config.offset_b.checked_add(config.size_b) {
            Some(end) if end <= window_b => {}
            _ => {
                return Err(invalid(
                    table,
                    &config.name,
                    &format!(
                        "({} B at offset {}) exceeds its {window_b} B window",
                        config.size_b, config.offset_b
                    ),
                ))
            }
        }

        let field_bits = (config.size_b * 8).min(64) as u32;
        if !config.bit_fields.is_empty() && config.size_b > 8 {
            return Err(invalid(
                table,
                &config.name,
                "has bit fields but is wider than 8 bytes",
            ));
        }
        let mut bit_fields: Vec<BitFieldSpec> = Vec::with_capacity(config.bit_fields.len());
        for BitFieldConfig {
            name,
            offset,
            width,
        } in config.bit_fields
        {
            if width == 0 || offset.checked_add(width).map_or(true, |end| end > field_bits) {
                return Err(invalid(
                    table,
                    &config.name,
                    &format!("bit field {name:?} ({offset}+{width}) exceeds {field_bits} bits"),
                ));
            }
            if bit_fields.iter().any(|b| b.name == name) {
                return Err(invalid(
                    table,
                    &config.name,
                    &format!("repeats bit field {name:?}"),
                ));
            }
            bit_fields.push(BitFieldSpec {
                name,
                offset,
                width,
            });
        }

        Ok(Self {
            name: config.name,
            offset_b: config.offset_b,
            size_b: config.size_b,
            bit_fields,
        })
    }
}

/// Field table with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTable {
    fields: Vec<FieldSpec>,
    by_name: HashMap<String, usize>,
}

impl FieldTable {
    fn from_configs(configs: Vec<FieldConfig>, window_b: u64, table: &str) -> Result<Self> {
        let mut fields = Vec::with_capacity(configs.len());
        let mut by_name = HashMap::with_capacity(configs.len());
        for config in configs {
            let field = FieldSpec::from_config(config, window_b, table)?;
            if by_name.insert(field.name.clone(), fields.len()).is_some() {
                return Err(invalid(table, &field.name, "is declared twice"));
            }
            fields.push(field);
        }
        Ok(Self { fields, by_name })
    }

    /// Look up a field by name.
    pub fn find(&self, name: &str) -> Result<&FieldSpec> {
        self.by_name
            .get(name)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| MfmError::FieldNotFound(name.to_string()))
    }

    /// Reverse lookup by exact position; `None` when no field matches.
    pub fn name_at(&self, offset_b: u64, size_b: u64) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.offset_b == offset_b && f.size_b == size_b)
            .map(|f| f.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Validated schema for one frame type at one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    name: String,
    frame_type: u16,
    revision: u8,
    kind: FrameKind,
    header_size_b: u64,
    item_size_b: u16,
    header_fields: FieldTable,
    item_fields: FieldTable,
}

impl FrameFormat {
    /// Validate a configuration entry.
    pub fn from_config(config: FormatConfig) -> Result<Self> {
        let what = format!(
            "format {:#06x} revision {}",
            config.frame_type, config.revision
        );

        let mandatory_b = match config.kind {
            FrameKind::Opaque => PRIMARY_HEADER_SIZE_B,
            FrameKind::FixedItem | FrameKind::Nested => STANDARD_HEADER_SIZE_B,
        } as u64;
        match config.kind {
            FrameKind::FixedItem if config.item_size_b == 0 => {
                return Err(MfmError::InvalidFormat(format!(
                    "{what}: fixed-item formats need a non-zero item size"
                )));
            }
            FrameKind::Nested | FrameKind::Opaque if config.item_size_b != 0 => {
                return Err(MfmError::InvalidFormat(format!(
                    "{what}: only fixed-item formats have an item size"
                )));
            }
            FrameKind::Nested | FrameKind::Opaque if !config.item_fields.is_empty() => {
                return Err(MfmError::InvalidFormat(format!(
                    "{what}: only fixed-item formats have item fields"
                )));
            }
            FrameKind::Opaque
                if config.header_reserve_size_b != 0 || !config.header_fields.is_empty() =>
            {
                return Err(MfmError::InvalidFormat(format!(
                    "{what}: opaque formats have no header schema"
                )));
            }
            _ => {}
        }

        let header_size_b = mandatory_b + config.header_reserve_size_b;
        if header_size_b > u64::from(u16::MAX) {
            return Err(MfmError::InvalidFormat(format!(
                "{what}: header of {header_size_b} B does not fit the header size field"
            )));
        }

        let header_fields =
            FieldTable::from_configs(config.header_fields, header_size_b, &format!("{what} header"))?;
        let item_fields = FieldTable::from_configs(
            config.item_fields,
            u64::from(config.item_size_b),
            &format!("{what} item"),
        )?;

        Ok(Self {
            name: config.name,
            frame_type: config.frame_type,
            revision: config.revision,
            kind: config.kind,
            header_size_b,
            item_size_b: config.item_size_b,
            header_fields,
            item_fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame_type(&self) -> u16 {
        self.frame_type
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Header size, mandatory part and reserve.
    pub fn header_size_b(&self) -> u64 {
        self.header_size_b
    }

    /// Item size; 0 unless fixed-item.
    pub fn item_size_b(&self) -> u16 {
        self.item_size_b
    }

    pub fn header_fields(&self) -> &FieldTable {
        &self.header_fields
    }

    pub fn item_fields(&self) -> &FieldTable {
        &self.item_fields
    }

    pub fn find_header_field(&self, name: &str) -> Result<&FieldSpec> {
        self.header_fields.find(name)
    }

    pub fn find_item_field(&self, name: &str) -> Result<&FieldSpec> {
        self.item_fields.find(name)
    }

    pub fn header_field_name(&self, offset_b: u64, size_b: u64) -> Option<&str> {
        self.header_fields.name_at(offset_b, size_b)
    }

    pub fn item_field_name(&self, offset_b: u64, size_b: u64) -> Option<&str> {
        self.item_fields.name_at(offset_b, size_b)
    }

    /// Look up `bit` inside the header field `field`.
    pub fn find_header_bit_field(
        &self,
        field: &str,
        bit: &str,
    ) -> Result<(&FieldSpec, &BitFieldSpec)> {
        let spec = self.header_fields.find(field)?;
        Ok((spec, spec.find_bit_field(bit)?))
    }

    /// Look up `bit` inside the item field `field`.
    pub fn find_item_bit_field(
        &self,
        field: &str,
        bit: &str,
    ) -> Result<(&FieldSpec, &BitFieldSpec)> {
        let spec = self.item_fields.find(field)?;
        Ok((spec, spec.find_bit_field(bit)?))
    }
}

fn invalid(table: &str, field: &str, problem: &str) -> MfmError {
    MfmError::InvalidFormat(format!("{table} field {field:?} {problem}"))
}
