//! STree: an ordered index whose pages live in external batches.
//!
//! Pages of level 0 hold tuples, pages above hold key prefixes with links
//! to the pages below. Page contents are read and written through a
//! [`BatchManager`](crate::BatchManager), so a tree can be larger than
//! memory when backed by a spilling manager.

mod browser;
mod config;
mod page;
mod tree;

pub use browser::{Browser, Direction};
pub use config::{STreeConfig, MIN_PAGE_CAPACITY};
pub use page::{Page, PageArena, PageId};
pub use tree::{STree, SearchResult, TreeStats};
