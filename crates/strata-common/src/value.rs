//! Column values, tuples, and key comparators.
//!
//! A tuple is a fixed-arity row of [`Value`]s. The first `key_length`
//! columns form its key; ordering over keys is supplied by a
//! [`TupleComparator`] injected into every structure that sorts tuples.

use crate::error::{Result, StrataError};
use crate::types::{TypeId, VALUE_OVERHEAD};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One row of column values.
pub type Tuple = Vec<Value>;

/// An ordered list of tuples backing one page.
pub type TupleBatch = Vec<Tuple>;

/// A single typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Varchar(String),
    Binary(Vec<u8>),
    /// Days since the Unix epoch.
    Date(i32),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    /// Returns the type identifier of this value.
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Null => TypeId::Null,
            Value::Boolean(_) => TypeId::Boolean,
            Value::Int32(_) => TypeId::Int32,
            Value::Int64(_) => TypeId::Int64,
            Value::Float64(_) => TypeId::Float64,
            Value::Varchar(_) => TypeId::Varchar,
            Value::Binary(_) => TypeId::Binary,
            Value::Date(_) => TypeId::Date,
            Value::Timestamp(_) => TypeId::Timestamp,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the in-memory size of this value, used for cache accounting.
    pub fn estimated_size(&self) -> usize {
        let payload = match self {
            Value::Varchar(s) => s.len(),
            Value::Binary(b) => b.len(),
            other => other.type_id().fixed_size().unwrap_or(0),
        };
        payload + VALUE_OVERHEAD
    }

    /// Returns true if this value may be stored in a column of `type_id`.
    pub fn conforms_to(&self, type_id: TypeId) -> bool {
        self.is_null() || self.type_id() == type_id
    }

    /// Compares two non-null values of the same type.
    fn compare_same_type(&self, other: &Value) -> Result<Ordering> {
        let ordering = match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (a, b) => {
                return Err(StrataError::TypeMismatch {
                    expected: a.type_id().to_string(),
                    actual: b.type_id().to_string(),
                })
            }
        };
        Ok(ordering)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Varchar(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Varchar(v)
    }
}

/// Estimates the in-memory size of a batch of tuples.
pub fn estimate_batch_size(batch: &[Tuple]) -> usize {
    batch
        .iter()
        .map(|t| t.iter().map(Value::estimated_size).sum::<usize>() + VALUE_OVERHEAD)
        .sum()
}

// =============================================================================
// Comparators
// =============================================================================

/// Total order over key prefixes of tuples.
///
/// Implementations must stay consistent for the lifetime of any structure
/// that uses them. Both arguments carry at least the key columns; payload
/// columns beyond the key are ignored.
pub trait TupleComparator: Send + Sync {
    /// Compares the keys of two tuples.
    fn compare(&self, a: &[Value], b: &[Value]) -> Result<Ordering>;
}

/// Sort direction and null placement of one key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub ascending: bool,
    pub nulls_first: bool,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self {
            ascending: true,
            nulls_first: true,
        }
    }
}

impl SortOrder {
    pub fn descending() -> Self {
        Self {
            ascending: false,
            nulls_first: false,
        }
    }
}

/// Column-wise comparator over the first `key_length` columns.
#[derive(Debug, Clone)]
pub struct KeyComparator {
    orders: Vec<SortOrder>,
}

impl KeyComparator {
    /// Creates an ascending, nulls-first comparator over `key_length` columns.
    pub fn new(key_length: usize) -> Self {
        Self {
            orders: vec![SortOrder::default(); key_length],
        }
    }

    /// Creates a comparator with one sort order per key column.
    pub fn with_orders(orders: Vec<SortOrder>) -> Self {
        Self { orders }
    }

    pub fn key_length(&self) -> usize {
        self.orders.len()
    }

    fn compare_column(order: SortOrder, a: &Value, b: &Value) -> Result<Ordering> {
        let ordering = match (a.is_null(), b.is_null()) {
            (true, true) => return Ok(Ordering::Equal),
            (true, false) => {
                return Ok(if order.nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                })
            }
            (false, true) => {
                return Ok(if order.nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                })
            }
            (false, false) => a.compare_same_type(b)?,
        };
        Ok(if order.ascending {
            ordering
        } else {
            ordering.reverse()
        })
    }
}

impl TupleComparator for KeyComparator {
    fn compare(&self, a: &[Value], b: &[Value]) -> Result<Ordering> {
        let key_length = self.orders.len();
        let shorter = a.len().min(b.len());
        if shorter < key_length {
            return Err(StrataError::ArityMismatch {
                expected: key_length,
                actual: shorter,
            });
        }
        for (i, order) in self.orders.iter().enumerate() {
            let ordering = Self::compare_column(*order, &a[i], &b[i])?;
            if ordering != Ordering::Equal {
                return Ok(ordering);
            }
        }
        Ok(Ordering::Equal)
    }
}

/// Binary search over a sorted batch by key.
///
/// Returns `Ok(index)` for an exact match, `Err(insertion_point)` otherwise.
pub fn search_batch(
    comparator: &dyn TupleComparator,
    batch: &[Tuple],
    key: &[Value],
) -> Result<std::result::Result<usize, usize>> {
    let mut low = 0usize;
    let mut high = batch.len();
    while low < high {
        let mid = low + (high - low) / 2;
        match comparator.compare(&batch[mid], key)? {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid,
            Ordering::Equal => return Ok(Ok(mid)),
        }
    }
    Ok(Err(low))
}
