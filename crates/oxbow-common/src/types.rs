//! Attribute datatype tags.

use serde::{Deserialize, Serialize};

/// Datatype tag of an indexed attribute.
///
/// The tag is persisted in the index metadata page. Only `Integer` is
/// implemented by the index; the other tags exist so metadata can name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttrType {
    Integer = 0,
    Double = 1,
    Varchar = 2,
}

impl AttrType {
    /// Decodes a tag byte read from the metadata page.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AttrType::Integer),
            1 => Some(AttrType::Double),
            2 => Some(AttrType::Varchar),
            _ => None,
        }
    }

    /// Returns the fixed byte size of attribute values, or None for
    /// variable-length attributes.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            AttrType::Integer => Some(4),
            AttrType::Double => Some(8),
            AttrType::Varchar => None,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Integer => "INTEGER",
            AttrType::Double => "DOUBLE",
            AttrType::Varchar => "VARCHAR",
        };
        write!(f, "{}", name)
    }
}
