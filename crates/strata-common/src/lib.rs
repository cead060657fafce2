//! Strata common types, errors, and utilities.
//!
//! This crate provides the definitions shared by the buffer and storage
//! crates: column values and comparators, batch identifiers, configuration,
//! and the crate-wide error type.

pub mod batch;
pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use batch::{BatchId, ManagerId};
pub use config::StorageConfig;
pub use error::{Result, StrataError};
pub use types::TypeId;
pub use value::{
    search_batch, KeyComparator, SortOrder, Tuple, TupleBatch, TupleComparator, Value,
};
