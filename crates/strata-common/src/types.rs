//! Type identifiers for Strata column values.

use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};

/// Estimated payload size for variable-length values when sizing pages.
pub const VARIABLE_SIZE_ESTIMATE: usize = 64;

/// Per-value bookkeeping overhead assumed when estimating row sizes.
pub const VALUE_OVERHEAD: usize = 8;

/// Identifier for all column types a tuple may carry.
///
/// Type IDs are written as the tag byte of every encoded value and
/// describe the schema of an STree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeId {
    // Null type
    Null = 0,

    // Boolean
    Boolean = 1,

    // Integer types
    Int32 = 12,
    Int64 = 13,

    // Floating point types
    Float64 = 31,

    // String types
    Varchar = 51,

    // Binary types
    Binary = 60,

    // Date/Time types
    Date = 70,
    Timestamp = 72,
}

impl TypeId {
    /// Returns the fixed byte size for this type, or None for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            TypeId::Null => Some(0),
            TypeId::Boolean => Some(1),
            TypeId::Int32 | TypeId::Date => Some(4),
            TypeId::Int64 | TypeId::Float64 | TypeId::Timestamp => Some(8),
            TypeId::Varchar | TypeId::Binary => None,
        }
    }

    /// Returns true if this type has a fixed byte size.
    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size().is_some()
    }

    /// Returns the in-memory size estimate used to derive page capacities.
    pub fn estimated_size(&self) -> usize {
        self.fixed_size().unwrap_or(VARIABLE_SIZE_ESTIMATE) + VALUE_OVERHEAD
    }

    /// Returns true if this type is a numeric type.
    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeId::Int32 | TypeId::Int64 | TypeId::Float64)
    }

    /// Returns true if this type is a temporal type.
    pub fn is_temporal(&self) -> bool {
        matches!(self, TypeId::Date | TypeId::Timestamp)
    }

    /// Decodes a type tag.
    pub fn from_u8(tag: u8) -> Result<Self> {
        let type_id = match tag {
            0 => TypeId::Null,
            1 => TypeId::Boolean,
            12 => TypeId::Int32,
            13 => TypeId::Int64,
            31 => TypeId::Float64,
            51 => TypeId::Varchar,
            60 => TypeId::Binary,
            70 => TypeId::Date,
            72 => TypeId::Timestamp,
            other => return Err(StrataError::UnsupportedType(other)),
        };
        Ok(type_id)
    }
}

/// Estimates the in-memory size of one row with the given column types.
pub fn estimate_row_size(types: &[TypeId]) -> usize {
    types.iter().map(TypeId::estimated_size).sum::<usize>() + VALUE_OVERHEAD
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeId::Null => "NULL",
            TypeId::Boolean => "BOOLEAN",
            TypeId::Int32 => "INT32",
            TypeId::Int64 => "INT64",
            TypeId::Float64 => "FLOAT64",
            TypeId::Varchar => "VARCHAR",
            TypeId::Binary => "BINARY",
            TypeId::Date => "DATE",
            TypeId::Timestamp => "TIMESTAMP",
        };
        write!(f, "{}", name)
    }
}
