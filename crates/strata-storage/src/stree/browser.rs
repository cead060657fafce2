//! Ordered cursors over an STree.
//!
//! A [`Browser`] walks level 0 of a tree either across a key range or
//! through an explicit list of keys. It holds a snapshot of one page at a
//! time and follows sibling links when the snapshot runs out.

use super::page::PageId;
use super::tree::STree;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use strata_common::{search_batch, Result, StrataError, Tuple, TupleBatch, Value};
use tracing::warn;

/// Scan direction of a browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// A slot on level 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    page: PageId,
    /// May lie one slot outside the page.
    idx: isize,
}

/// The loaded page.
struct Cursor {
    page: PageId,
    values: Arc<TupleBatch>,
    /// Next slot to read.
    idx: isize,
}

enum Source {
    Range {
        lower: Option<Tuple>,
        upper: Option<Tuple>,
    },
    Values(VecDeque<Tuple>),
}

/// Stateful, single-pass cursor over the tuples of an STree.
///
/// [`next_tuple`](Browser::next_tuple) returns tuples in key order (or the
/// reverse) and then None on every later call. The tuple last returned can
/// be replaced with [`update`](Browser::update); updates are written back
/// when the cursor leaves the page, when it is exhausted, on
/// [`close_source`](Browser::close_source), or on drop.
pub struct Browser<'a> {
    tree: &'a STree,
    direction: Direction,
    source: Source,
    cursor: Option<Cursor>,
    /// Last slot to yield in range mode.
    bound: Option<Position>,
    /// Snapshot index of the tuple last returned.
    last: Option<usize>,
    /// Key of the tuple last reported as removed.
    resume_key: Option<Tuple>,
    /// Set when the tree changed under the cursor.
    stale: bool,
    pending: Vec<Tuple>,
    pending_page: Option<PageId>,
    done: bool,
}

impl<'a> Browser<'a> {
    fn new(tree: &'a STree, source: Source, direction: Direction) -> Self {
        Self {
            tree,
            direction,
            source,
            cursor: None,
            bound: None,
            last: None,
            resume_key: None,
            stale: false,
            pending: Vec::new(),
            pending_page: None,
            done: false,
        }
    }

    /// Creates a cursor over keys between `lower` and `upper`, inclusive.
    pub(crate) fn range(
        tree: &'a STree,
        lower: Option<&[Value]>,
        upper: Option<&[Value]>,
        direction: Direction,
    ) -> Result<Self> {
        let source = Source::Range {
            lower: lower.map(<[Value]>::to_vec),
            upper: upper.map(<[Value]>::to_vec),
        };
        let mut browser = Self::new(tree, source, direction);

        if let (Some(lower), Some(upper)) = (lower, upper) {
            if tree.comparator().compare(upper, lower)? == Ordering::Less {
                browser.done = true;
                return Ok(browser);
            }
        }

        let low = low_position(tree, lower)?;
        let high = high_position(tree, upper)?;
        let (start, bound) = match direction {
            Direction::Forward => (low, high),
            Direction::Backward => (high, low),
        };
        browser.cursor = match tree.leaf_page(start.page)? {
            Some(leaf) => Some(Cursor {
                page: start.page,
                values: leaf.values,
                idx: start.idx,
            }),
            None => None,
        };
        browser.bound = Some(bound);
        Ok(browser)
    }

    /// Creates a cursor that looks up each of `keys` in turn.
    pub(crate) fn values(tree: &'a STree, keys: Vec<Tuple>, direction: Direction) -> Self {
        Self::new(tree, Source::Values(keys.into()), direction)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns true once the cursor has returned its last tuple.
    pub fn is_exhausted(&self) -> bool {
        self.done
    }

    /// Returns the next tuple, or None once the cursor is exhausted.
    pub fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        let next = match self.source {
            Source::Range { .. } => self.next_in_range(),
            Source::Values(_) => self.next_value(),
        };
        match next {
            Ok(Some(tuple)) => Ok(Some(tuple)),
            Ok(None) => {
                self.done = true;
                self.cursor = None;
                self.flush()?;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    /// Replaces the tuple last returned by [`next_tuple`](Browser::next_tuple).
    ///
    /// The replacement must keep the key columns unchanged.
    pub fn update(&mut self, tuple: Tuple) -> Result<()> {
        let (Some(cursor), Some(last)) = (self.cursor.as_mut(), self.last) else {
            return Err(StrataError::InvalidParameter {
                name: "update".to_string(),
                value: "no current tuple".to_string(),
            });
        };
        if let Some(slot) = Arc::make_mut(&mut cursor.values).get_mut(last) {
            *slot = tuple.clone();
        }
        let page = cursor.page;
        if self.pending_page != Some(page) {
            self.flush()?;
            self.pending_page = Some(page);
        }
        self.pending.push(tuple);
        Ok(())
    }

    /// Notifies the cursor that the tuple last returned was removed from the
    /// tree by the caller.
    pub fn removed(&mut self) {
        self.stale = true;
        let Some(last) = self.last.take() else {
            return;
        };
        if let Source::Values(_) = self.source {
            return;
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        let values = Arc::make_mut(&mut cursor.values);
        if last >= values.len() {
            return;
        }
        let tuple = values.remove(last);
        self.resume_key = Some(tuple[..self.tree.key_length()].to_vec());

        if self.direction == Direction::Forward {
            cursor.idx -= 1;
        }
        if let Some(bound) = self.bound.as_mut() {
            if bound.page == cursor.page && bound.idx > last as isize {
                bound.idx -= 1;
            }
        }
    }

    /// Writes back pending updates and ends the scan.
    pub fn close_source(&mut self) -> Result<()> {
        self.done = true;
        self.cursor = None;
        self.flush()
    }

    // =========================================================================
    // Range mode
    // =========================================================================

    fn next_in_range(&mut self) -> Result<Option<Tuple>> {
        loop {
            let Some(bound) = self.bound else {
                return Ok(None);
            };
            let Some(cursor) = self.cursor.as_mut() else {
                return Ok(None);
            };

            if cursor.idx >= 0 && (cursor.idx as usize) < cursor.values.len() {
                let past_bound = cursor.page == bound.page
                    && match self.direction {
                        Direction::Forward => cursor.idx > bound.idx,
                        Direction::Backward => cursor.idx < bound.idx,
                    };
                if past_bound {
                    return Ok(None);
                }
                let i = cursor.idx as usize;
                let tuple = cursor.values[i].clone();
                self.last = Some(i);
                cursor.idx += match self.direction {
                    Direction::Forward => 1,
                    Direction::Backward => -1,
                };
                return Ok(Some(tuple));
            }

            if cursor.page == bound.page && !self.stale {
                return Ok(None);
            }
            self.advance_page()?;
        }
    }

    /// Moves to the sibling page in the scan direction, or repositions by
    /// key when the tree changed.
    fn advance_page(&mut self) -> Result<()> {
        self.flush()?;
        self.last = None;
        let Some(cursor) = self.cursor.take() else {
            return Ok(());
        };

        if !self.stale {
            if let Some(leaf) = self.tree.leaf_page(cursor.page)? {
                let target = match self.direction {
                    Direction::Forward => leaf.next,
                    Direction::Backward => leaf.prev,
                };
                let Some(target) = target else {
                    return Ok(());
                };
                if let Some(page) = self.tree.leaf_page(target)? {
                    let idx = match self.direction {
                        Direction::Forward => 0,
                        Direction::Backward => page.values.len() as isize - 1,
                    };
                    self.cursor = Some(Cursor {
                        page: target,
                        values: page.values,
                        idx,
                    });
                    return Ok(());
                }
            }
        }

        // Resume after the last key this snapshot covered.
        let edge = match self.direction {
            Direction::Forward => cursor.values.last(),
            Direction::Backward => cursor.values.first(),
        };
        let key = edge
            .map(|tuple| tuple[..self.tree.key_length()].to_vec())
            .or_else(|| self.resume_key.clone());
        match key {
            Some(key) => self.reposition(&key),
            None => Ok(()),
        }
    }

    fn reposition(&mut self, key: &[Value]) -> Result<()> {
        let found = self.tree.leaf_position(key)?;
        let idx = match (self.direction, found.index) {
            (Direction::Forward, Ok(i)) => i as isize + 1,
            (Direction::Forward, Err(p)) => p as isize,
            (Direction::Backward, Ok(i)) => i as isize - 1,
            (Direction::Backward, Err(p)) => p as isize - 1,
        };
        self.cursor = Some(Cursor {
            page: found.page,
            values: found.values,
            idx,
        });

        if let Source::Range { lower, upper } = &self.source {
            let bound = match self.direction {
                Direction::Forward => high_position(self.tree, upper.as_deref())?,
                Direction::Backward => low_position(self.tree, lower.as_deref())?,
            };
            self.bound = Some(bound);
        }
        self.stale = false;
        Ok(())
    }

    // =========================================================================
    // Value-set mode
    // =========================================================================

    fn next_value(&mut self) -> Result<Option<Tuple>> {
        loop {
            let key = match &mut self.source {
                Source::Values(keys) => match self.direction {
                    Direction::Forward => keys.pop_front(),
                    Direction::Backward => keys.pop_back(),
                },
                Source::Range { .. } => None,
            };
            let Some(key) = key else {
                return Ok(None);
            };

            if !self.stale {
                if let Some(cursor) = self.cursor.as_mut() {
                    if covers(self.tree, &cursor.values, &key)? {
                        let comparator = self.tree.comparator().as_ref();
                        match search_batch(comparator, &cursor.values, &key)? {
                            Ok(i) => {
                                cursor.idx = i as isize;
                                self.last = Some(i);
                                return Ok(Some(cursor.values[i].clone()));
                            }
                            Err(_) => {
                                self.last = None;
                                continue;
                            }
                        }
                    }
                }
            }

            self.flush()?;
            let found = self.tree.leaf_position(&key)?;
            self.stale = false;
            let hit = found.index.ok();
            self.cursor = Some(Cursor {
                page: found.page,
                idx: hit.map_or(0, |i| i as isize),
                values: found.values,
            });
            self.last = hit;
            if let (Some(i), Some(cursor)) = (hit, self.cursor.as_ref()) {
                return Ok(Some(cursor.values[i].clone()));
            }
        }
    }

    // =========================================================================
    // Write-back
    // =========================================================================

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let updates = std::mem::take(&mut self.pending);
        match self.pending_page.take() {
            Some(page) => self.tree.write_back(page, updates),
            None => Ok(()),
        }
    }
}

impl Iterator for Browser<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_tuple().transpose()
    }
}

impl Drop for Browser<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to write back browser updates");
        }
    }
}

impl std::fmt::Debug for Browser<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Browser")
            .field("direction", &self.direction)
            .field("page", &self.cursor.as_ref().map(|c| c.page))
            .field("bound", &self.bound)
            .field("pending", &self.pending.len())
            .field("done", &self.done)
            .finish()
    }
}

/// First slot with a key not below `lower`.
fn low_position(tree: &STree, lower: Option<&[Value]>) -> Result<Position> {
    match lower {
        Some(key) => {
            let found = tree.leaf_position(key)?;
            let idx = match found.index {
                Ok(i) | Err(i) => i as isize,
            };
            Ok(Position {
                page: found.page,
                idx,
            })
        }
        None => {
            let (page, _) = tree.head_leaf()?;
            Ok(Position { page, idx: 0 })
        }
    }
}

/// Last slot with a key not above `upper`.
fn high_position(tree: &STree, upper: Option<&[Value]>) -> Result<Position> {
    match upper {
        Some(key) => {
            let found = tree.leaf_position(key)?;
            let idx = match found.index {
                Ok(i) => i as isize,
                Err(p) => p as isize - 1,
            };
            Ok(Position {
                page: found.page,
                idx,
            })
        }
        None => {
            let (page, values) = tree.tail_leaf()?;
            Ok(Position {
                page,
                idx: values.len() as isize - 1,
            })
        }
    }
}

/// Returns true if `key` lies between the first and last entries of `values`.
fn covers(tree: &STree, values: &[Tuple], key: &[Value]) -> Result<bool> {
    let (Some(first), Some(last)) = (values.first(), values.last()) else {
        return Ok(false);
    };
    let comparator = tree.comparator();
    Ok(comparator.compare(first, key)? != Ordering::Greater
        && comparator.compare(last, key)? != Ordering::Less)
}
