//! Index metadata page codec.

use oxbow_common::types::AttrType;
use oxbow_common::{OxbowError, Result};

/// Maximum length of a relation name stored in the metadata page.
pub const RELATION_NAME_MAX: usize = 20;

/// Contents of the first page of an index file.
///
/// Layout (32 bytes):
/// - relation_name: 20 bytes, zero padded
/// - attr_byte_offset: u32
/// - attr_type: u8 (+ 3 reserved)
/// - root_page_no: u32
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    /// Name of the indexed relation.
    pub relation_name: String,
    /// Byte offset of the indexed attribute within a record.
    pub attr_byte_offset: u32,
    /// Datatype of the indexed attribute.
    pub attr_type: AttrType,
    /// Current root page number.
    pub root_page_no: u32,
}

impl IndexMeta {
    /// Serialized size in bytes.
    pub const SIZE: usize = 32;

    const ROOT_OFFSET: usize = 28;

    /// Serializes the metadata.
    ///
    /// The relation name must fit in RELATION_NAME_MAX bytes; the lifecycle
    /// component validates this before creating the index.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        debug_assert!(self.relation_name.len() <= RELATION_NAME_MAX);

        let mut buf = [0u8; Self::SIZE];
        let name = self.relation_name.as_bytes();
        buf[..name.len()].copy_from_slice(name);
        buf[20..24].copy_from_slice(&self.attr_byte_offset.to_le_bytes());
        buf[24] = self.attr_type as u8;
        buf[Self::ROOT_OFFSET..Self::ROOT_OFFSET + 4]
            .copy_from_slice(&self.root_page_no.to_le_bytes());
        buf
    }

    /// Deserializes the metadata read from an index file's first page.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let name_end = buf[..RELATION_NAME_MAX]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(RELATION_NAME_MAX);
        let relation_name = std::str::from_utf8(&buf[..name_end])
            .map_err(|_| OxbowError::IndexCorrupted("metadata relation name".to_string()))?
            .to_string();

        let attr_byte_offset = u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]);
        let attr_type = AttrType::from_u8(buf[24])
            .ok_or_else(|| OxbowError::IndexCorrupted("metadata attribute type".to_string()))?;
        let root_page_no = u32::from_le_bytes([
            buf[Self::ROOT_OFFSET],
            buf[Self::ROOT_OFFSET + 1],
            buf[Self::ROOT_OFFSET + 2],
            buf[Self::ROOT_OFFSET + 3],
        ]);

        Ok(Self {
            relation_name,
            attr_byte_offset,
            attr_type,
            root_page_no,
        })
    }

    /// Updates the root page number in place on the metadata page.
    pub fn set_root_page_no(data: &mut [u8], root_page_no: u32) {
        data[Self::ROOT_OFFSET..Self::ROOT_OFFSET + 4]
            .copy_from_slice(&root_page_no.to_le_bytes());
    }
}
