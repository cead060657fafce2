//! The STree ordered index.
//!
//! An STree keeps tuples ordered by key across a stack of levels. Level 0
//! holds every tuple; each level above holds a subset of the keys of the
//! level below, each paired with the page one level down that holds that
//! key. A key reaches the upper levels either through randomized leveling
//! on insert or by being the first key of a page created by a split.
//!
//! Searches descend from the top level. Within a level a search starts at
//! the page named by the routing entry above and moves right along sibling
//! links while the next page's first key is not greater than the search key.

use super::browser::{Browser, Direction};
use super::config::STreeConfig;
use super::page::{Page, PageArena, PageId};
use crate::manager::BatchManager;
use parking_lot::RwLock;
use std::cmp::Ordering as KeyOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_common::{
    search_batch, Result, StrataError, Tuple, TupleBatch, TupleComparator, TypeId, Value,
};
use tracing::debug;

/// Outcome of searching one level for a key.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Page the search ended on.
    pub page: PageId,
    pub level: usize,
    /// `Ok(i)` if entry `i` has the key, otherwise `Err(i)` with the insertion point.
    pub index: std::result::Result<usize, usize>,
    /// Entries of `page` at the time of the search.
    pub values: Arc<TupleBatch>,
}

impl SearchResult {
    /// Returns the matching entry, if the key was found.
    pub fn found(&self) -> Option<&Tuple> {
        self.index.ok().and_then(|i| self.values.get(i))
    }
}

/// Statistics about an STree.
#[derive(Debug, Clone, Default)]
pub struct TreeStats {
    /// Number of levels.
    pub height: usize,
    /// Number of tuples.
    pub row_count: usize,
    /// Page capacity in entries.
    pub page_size: usize,
    /// Number of pages on each level, level 0 first.
    pub pages_per_level: Vec<usize>,
    /// Number of entries on each level, level 0 first.
    pub entries_per_level: Vec<usize>,
}

impl TreeStats {
    /// Returns the total number of pages.
    pub fn page_count(&self) -> usize {
        self.pages_per_level.iter().sum()
    }
}

struct TreeState {
    /// Leftmost page of each level, level 0 first.
    header: Vec<PageId>,
    arena: PageArena,
    /// Leveling generator state, never zero.
    seed: u32,
    /// Pages touched by the previous insert, one per level.
    last_path: Vec<PageId>,
}

/// External-storage-backed ordered index over tuples.
///
/// Mutations are expected from one thread at a time. They take the tree's
/// internal write lock only to keep the page graph consistent for
/// [`Browser`]s that run alongside them.
pub struct STree {
    config: STreeConfig,
    page_size: usize,
    split_point: usize,
    merge_threshold: usize,
    level_shift: u32,
    level_mask: u32,
    key_length: usize,
    types: Vec<TypeId>,
    comparator: Arc<dyn TupleComparator>,
    leaf_manager: Arc<dyn BatchManager>,
    index_manager: Arc<dyn BatchManager>,
    state: RwLock<TreeState>,
    row_count: AtomicUsize,
}

impl STree {
    /// Creates an empty tree.
    ///
    /// Level 0 batches go to `leaf_manager`, all others to `index_manager`.
    /// The first `key_length` columns of `types` form the key.
    /// The first leaf page is allocated here rather than on the first
    /// insert, so an empty tree already owns one level 0 batch.
    pub fn new(
        leaf_manager: Arc<dyn BatchManager>,
        index_manager: Arc<dyn BatchManager>,
        comparator: Arc<dyn TupleComparator>,
        key_length: usize,
        types: Vec<TypeId>,
        config: STreeConfig,
    ) -> Result<Self> {
        if key_length == 0 || key_length > types.len() {
            return Err(StrataError::InvalidKeyLength {
                key_length,
                columns: types.len(),
            });
        }

        let page_size = config.page_capacity_for(&types);
        let split_point = (page_size / config.split_divisor).clamp(1, page_size - 1);
        let merge_threshold = (page_size / config.merge_divisor).max(1);
        let level_shift = page_size.trailing_zeros();
        let level_mask = (page_size - 1).min(u32::MAX as usize) as u32;
        let seed = match config.seed {
            Some(seed) if seed != 0 => seed,
            _ => rand::random::<u32>().max(1),
        };

        let leaf_batch = leaf_manager.create_batch(0)?;
        let mut arena = PageArena::new();
        let leaf = arena.allocate(Page::new(0, leaf_batch));

        debug!(page_size, key_length, columns = types.len(), "created STree");
        Ok(Self {
            config,
            page_size,
            split_point,
            merge_threshold,
            level_shift,
            level_mask,
            key_length,
            types,
            comparator,
            leaf_manager,
            index_manager,
            state: RwLock::new(TreeState {
                header: vec![leaf],
                arena,
                seed,
                last_path: Vec::new(),
            }),
            row_count: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &STreeConfig {
        &self.config
    }

    /// Returns the page capacity in entries.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    /// Returns the column types of stored tuples.
    pub fn types(&self) -> &[TypeId] {
        &self.types
    }

    pub fn comparator(&self) -> &Arc<dyn TupleComparator> {
        &self.comparator
    }

    /// Returns the number of levels.
    pub fn height(&self) -> usize {
        self.state.read().header.len()
    }

    /// Returns the number of stored tuples.
    pub fn row_count(&self) -> usize {
        self.row_count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    // =========================================================================
    // Validation and helpers
    // =========================================================================

    fn validate_tuple(&self, tuple: &[Value]) -> Result<()> {
        if tuple.len() != self.types.len() {
            return Err(StrataError::ArityMismatch {
                expected: self.types.len(),
                actual: tuple.len(),
            });
        }
        for (value, type_id) in tuple.iter().zip(&self.types) {
            if !value.conforms_to(*type_id) {
                return Err(StrataError::TypeMismatch {
                    expected: type_id.to_string(),
                    actual: value.type_id().to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate_key(&self, key: &[Value]) -> Result<()> {
        if key.len() < self.key_length {
            return Err(StrataError::ArityMismatch {
                expected: self.key_length,
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn key<'t>(&self, tuple: &'t [Value]) -> &'t [Value] {
        &tuple[..self.key_length]
    }

    fn compare(&self, a: &[Value], b: &[Value]) -> Result<KeyOrdering> {
        self.comparator.compare(a, b)
    }

    fn manager(&self, level: usize) -> &dyn BatchManager {
        if level == 0 {
            self.leaf_manager.as_ref()
        } else {
            self.index_manager.as_ref()
        }
    }

    fn load(&self, st: &TreeState, page_id: PageId) -> Result<Arc<TupleBatch>> {
        let page = st.arena.get(page_id)?;
        self.manager(page.level).get_batch(page.batch)
    }

    fn store(&self, st: &TreeState, page_id: PageId, values: TupleBatch) -> Result<()> {
        let page = st.arena.get(page_id)?;
        self.manager(page.level).set_batch(page.batch, values)
    }

    fn new_page(&self, st: &mut TreeState, level: usize) -> Result<PageId> {
        let batch = self.manager(level).create_batch(level)?;
        Ok(st.arena.allocate(Page::new(level, batch)))
    }

    fn free_page(&self, st: &mut TreeState, page_id: PageId) -> Result<()> {
        let page = st.arena.free(page_id)?;
        self.manager(page.level).remove_batch(page.batch)
    }

    /// Detaches a page from its sibling chain.
    fn unlink(&self, st: &mut TreeState, page_id: PageId) -> Result<()> {
        let (prev, next) = {
            let page = st.arena.get(page_id)?;
            (page.prev, page.next)
        };
        if let Some(prev) = prev {
            st.arena.get_mut(prev)?.next = next;
        }
        if let Some(next) = next {
            st.arena.get_mut(next)?.prev = prev;
        }
        Ok(())
    }

    /// Draws the highest level a new key is entered on.
    ///
    /// Each further level requires another group of `log2(page_size)` zero
    /// bits from the xorshift generator. The result never exceeds the
    /// current height, so the header grows by at most one level per insert.
    fn random_level(&self, st: &mut TreeState) -> usize {
        let mut x = st.seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        st.seed = x;

        let max = st.header.len();
        let mut level = 0;
        while level < max && x != 0 && x & self.level_mask == 0 {
            level += 1;
            x >>= self.level_shift;
        }
        level
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Searches one level for `key`, starting at `start` and moving right.
    fn locate(
        &self,
        st: &TreeState,
        level: usize,
        start: PageId,
        key: &[Value],
    ) -> Result<SearchResult> {
        let values = self.load(st, start)?;
        self.locate_from(st, level, start, values, key)
    }

    fn locate_from(
        &self,
        st: &TreeState,
        level: usize,
        start: PageId,
        values: Arc<TupleBatch>,
        key: &[Value],
    ) -> Result<SearchResult> {
        let mut page_id = start;
        let mut values = values;
        loop {
            let index = search_batch(self.comparator.as_ref(), &values, key)?;
            if index == Err(values.len()) {
                if let Some(next) = st.arena.get(page_id)?.next {
                    let next_values = self.load(st, next)?;
                    if let Some(first) = next_values.first() {
                        if self.compare(first, key)? != KeyOrdering::Greater {
                            page_id = next;
                            values = next_values;
                            continue;
                        }
                    }
                }
            }
            return Ok(SearchResult {
                page: page_id,
                level,
                index,
                values,
            });
        }
    }

    /// Returns the page one level down where a search continues.
    fn child_hint(&self, st: &TreeState, result: &SearchResult) -> Result<Option<PageId>> {
        let slot = match result.index {
            Ok(i) => i,
            Err(0) => return Ok(None),
            Err(p) => p - 1,
        };
        let page = st.arena.get(result.page)?;
        page.children.get(slot).copied().map(Some).ok_or_else(|| {
            StrataError::tree_corrupted(format!(
                "page {} on level {} has no child for entry {}",
                result.page, result.level, slot
            ))
        })
    }

    /// Descends from the top level to `target_level`, recording each level's
    /// result in `places` in top-down order when requested.
    fn descend(
        &self,
        st: &TreeState,
        key: &[Value],
        target_level: usize,
        mut places: Option<&mut Vec<SearchResult>>,
    ) -> Result<SearchResult> {
        let mut level = st.header.len() - 1;
        let mut start: Option<PageId> = None;
        loop {
            let from = start.unwrap_or(st.header[level]);
            let result = self.locate(st, level, from, key)?;
            if let Some(places) = places.as_deref_mut() {
                places.push(result.clone());
            }
            if level == target_level {
                return Ok(result);
            }
            start = self.child_hint(st, &result)?;
            level -= 1;
        }
    }

    fn seek(&self, st: &TreeState, level: usize, key: &[Value]) -> Result<SearchResult> {
        self.descend(st, key, level, None)
    }

    /// Returns one search result per level, indexed by level.
    fn find_path(&self, st: &TreeState, key: &[Value]) -> Result<Vec<SearchResult>> {
        let mut places = Vec::with_capacity(st.header.len());
        self.descend(st, key, 0, Some(&mut places))?;
        places.reverse();
        Ok(places)
    }

    /// Searches a level starting from a remembered page when it is still
    /// usable, falling back to a descent from the top.
    fn locate_hinted(
        &self,
        st: &TreeState,
        level: usize,
        hint: Option<PageId>,
        key: &[Value],
    ) -> Result<SearchResult> {
        if let Some(hint) = hint.filter(|h| st.arena.contains(*h)) {
            if st.arena.get(hint)?.level == level {
                let values = self.load(st, hint)?;
                let usable = st.header[level] == hint
                    || match values.first() {
                        Some(first) => self.compare(first, key)? != KeyOrdering::Greater,
                        None => false,
                    };
                if usable {
                    return self.locate_from(st, level, hint, values, key);
                }
            }
        }
        self.seek(st, level, key)
    }

    /// Looks up the tuple with the given key.
    pub fn find(&self, key: &[Value]) -> Result<Option<Tuple>> {
        self.validate_key(key)?;
        let st = self.state.read();
        let leaf = self.seek(&st, 0, key)?;
        Ok(leaf.found().cloned())
    }

    /// Returns the search result of every level for `key`, indexed by level.
    pub fn find_places(&self, key: &[Value]) -> Result<Vec<SearchResult>> {
        self.validate_key(key)?;
        let st = self.state.read();
        self.find_path(&st, key)
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts a tuple.
    ///
    /// If a tuple with the same key exists it is returned; with `replace`
    /// it is also overwritten. Returns None when the tuple was added.
    pub fn insert(&self, tuple: Tuple, replace: bool) -> Result<Option<Tuple>> {
        self.validate_tuple(&tuple)?;
        let mut st = self.state.write();
        let path = self.find_path(&st, self.key(&tuple))?;
        let hints: Vec<PageId> = path.iter().map(|result| result.page).collect();
        let leaf = path.into_iter().next().ok_or_else(|| {
            StrataError::tree_corrupted("search produced no level 0 result")
        })?;
        self.insert_located(&mut st, tuple, replace, leaf, hints)
    }

    /// Inserts a tuple, starting the search from the pages of the previous
    /// insert.
    ///
    /// Ascending bulk loads append to the tail pages without descending
    /// from the top. Otherwise behaves as `insert(tuple, false)`.
    pub fn insert_ordered(&self, tuple: Tuple) -> Result<Option<Tuple>> {
        self.validate_tuple(&tuple)?;
        let mut st = self.state.write();
        let hints = std::mem::take(&mut st.last_path);
        let leaf = self.locate_hinted(&st, 0, hints.first().copied(), self.key(&tuple))?;
        self.insert_located(&mut st, tuple, false, leaf, hints)
    }

    fn insert_located(
        &self,
        st: &mut TreeState,
        tuple: Tuple,
        replace: bool,
        leaf: SearchResult,
        hints: Vec<PageId>,
    ) -> Result<Option<Tuple>> {
        if let Ok(i) = leaf.index {
            let existing = leaf.values[i].clone();
            if replace {
                let mut values = (*leaf.values).clone();
                values[i] = tuple;
                self.store(st, leaf.page, values)?;
            }
            st.last_path = hints;
            return Ok(Some(existing));
        }

        let top = self.random_level(st);
        let key = self.key(&tuple).to_vec();

        let mut child = self.insert_entry(st, 0, tuple, None, leaf)?;
        let mut path = vec![child];
        for level in 1..=top {
            if level == st.header.len() {
                let page_id = self.new_page(st, level)?;
                st.arena.get_mut(page_id)?.children.push(child);
                self.store(st, page_id, vec![key.clone()])?;
                st.header.push(page_id);
                debug!(height = st.header.len(), "grew STree header");
                path.push(page_id);
                break;
            }
            let located = self.locate_hinted(st, level, hints.get(level).copied(), &key)?;
            child = self.insert_entry(st, level, key.clone(), Some(child), located)?;
            path.push(child);
        }
        for level in path.len()..st.header.len() {
            path.push(hints.get(level).copied().unwrap_or(st.header[level]));
        }
        st.last_path = path;

        self.row_count.fetch_add(1, Ordering::AcqRel);
        Ok(None)
    }

    /// Places an entry at the position found by `located`, splitting a full
    /// page first. Returns the page that holds the entry.
    fn insert_entry(
        &self,
        st: &mut TreeState,
        level: usize,
        entry: Tuple,
        child: Option<PageId>,
        located: SearchResult,
    ) -> Result<PageId> {
        let mut pos = match located.index {
            Ok(i) => {
                // Already routed here by a split; only the child changes.
                if let Some(child) = child {
                    let page = st.arena.get_mut(located.page)?;
                    let slot = page.children.get_mut(i).ok_or_else(|| {
                        StrataError::tree_corrupted(format!(
                            "page {} on level {} has no child for entry {}",
                            located.page, level, i
                        ))
                    })?;
                    *slot = child;
                }
                return Ok(located.page);
            }
            Err(pos) => pos,
        };

        let mut page_id = located.page;
        let mut values = (*located.values).clone();
        if values.len() >= self.page_size {
            let (left, right, right_id) = self.split(st, page_id, values)?;
            if pos <= left.len() {
                values = left;
            } else {
                pos -= left.len();
                page_id = right_id;
                values = right;
            }
        }

        values.insert(pos, entry);
        if let Some(child) = child {
            st.arena.get_mut(page_id)?.children.insert(pos, child);
        }
        self.store(st, page_id, values)?;
        Ok(page_id)
    }

    /// Moves the upper part of a full page to a new right sibling and routes
    /// the sibling from the level above. Returns both halves and the sibling.
    fn split(
        &self,
        st: &mut TreeState,
        page_id: PageId,
        mut values: TupleBatch,
    ) -> Result<(TupleBatch, TupleBatch, PageId)> {
        let level = st.arena.get(page_id)?.level;
        let right_values = values.split_off(self.split_point);
        let right_id = self.new_page(st, level)?;

        let (old_next, right_children) = {
            let page = st.arena.get_mut(page_id)?;
            let children = if level > 0 {
                page.children.split_off(self.split_point.min(page.children.len()))
            } else {
                Vec::new()
            };
            let old_next = page.next.replace(right_id);
            (old_next, children)
        };
        {
            let right = st.arena.get_mut(right_id)?;
            right.prev = Some(page_id);
            right.next = old_next;
            right.children = right_children;
        }
        if let Some(next) = old_next {
            st.arena.get_mut(next)?.prev = Some(right_id);
        }

        self.store(st, page_id, values.clone())?;
        self.store(st, right_id, right_values.clone())?;
        debug!(
            level,
            left = values.len(),
            right = right_values.len(),
            "split STree page"
        );

        if level + 1 < st.header.len() {
            self.repoint(st, level + 1, &right_values, right_id)?;
            let first_key = self.key(&right_values[0]).to_vec();
            let located = self.seek(st, level + 1, &first_key)?;
            self.insert_entry(st, level + 1, first_key, Some(right_id), located)?;
        }
        Ok((values, right_values, right_id))
    }

    /// Points every routing entry on `level` whose key is among `moved` at
    /// `target`. `moved` must be a contiguous run of the level below.
    fn repoint(
        &self,
        st: &mut TreeState,
        level: usize,
        moved: &[Tuple],
        target: PageId,
    ) -> Result<()> {
        let (Some(first), Some(last)) = (moved.first(), moved.last()) else {
            return Ok(());
        };
        let last_key = self.key(last);
        let start = self.seek(st, level, self.key(first))?;

        let mut page_id = start.page;
        let mut values = start.values;
        let mut i = match start.index {
            Ok(i) | Err(i) => i,
        };
        loop {
            while i < values.len() {
                if self.compare(&values[i], last_key)? == KeyOrdering::Greater {
                    return Ok(());
                }
                let page = st.arena.get_mut(page_id)?;
                match page.children.get_mut(i) {
                    Some(slot) => *slot = target,
                    None => {
                        return Err(StrataError::tree_corrupted(format!(
                            "page {} on level {} has no child for entry {}",
                            page_id, level, i
                        )))
                    }
                }
                i += 1;
            }
            match st.arena.get(page_id)?.next {
                Some(next) => {
                    values = self.load(st, next)?;
                    page_id = next;
                    i = 0;
                }
                None => return Ok(()),
            }
        }
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Removes the tuple with the given key, returning it.
    pub fn remove(&self, key: &[Value]) -> Result<Option<Tuple>> {
        self.validate_key(key)?;
        let mut st = self.state.write();
        let path = self.find_path(&st, key)?;
        let removed = match path.first().and_then(SearchResult::found) {
            Some(tuple) => tuple.clone(),
            None => return Ok(None),
        };

        let mut truncate_to: Option<usize> = None;
        for result in &path {
            if result.index.is_err() {
                break;
            }
            self.remove_entry(&mut st, result.level, result.page, key, &mut truncate_to)?;
        }
        if let Some(height) = truncate_to {
            st.header.truncate(height);
            debug!(height, "shrank STree header");
        }
        st.last_path.clear();

        self.row_count.fetch_sub(1, Ordering::AcqRel);
        Ok(Some(removed))
    }

    fn remove_entry(
        &self,
        st: &mut TreeState,
        level: usize,
        page_id: PageId,
        key: &[Value],
        truncate_to: &mut Option<usize>,
    ) -> Result<()> {
        let mut values = (*self.load(st, page_id)?).clone();
        let index = search_batch(self.comparator.as_ref(), &values, key)?.map_err(|_| {
            StrataError::tree_corrupted(format!(
                "key missing from page {} on level {}",
                page_id, level
            ))
        })?;
        values.remove(index);
        if level > 0 {
            let page = st.arena.get_mut(page_id)?;
            if index < page.children.len() {
                page.children.remove(index);
            }
        }

        if values.is_empty() {
            return self.release_empty(st, level, page_id, truncate_to);
        }
        let underflow = values.len() < self.merge_threshold;
        self.store(st, page_id, values.clone())?;
        if underflow {
            self.merge(st, level, page_id, values)?;
        }
        Ok(())
    }

    /// Drops a page that lost its last entry.
    fn release_empty(
        &self,
        st: &mut TreeState,
        level: usize,
        page_id: PageId,
        truncate_to: &mut Option<usize>,
    ) -> Result<()> {
        if st.header[level] == page_id {
            match st.arena.get(page_id)?.next {
                Some(next) => st.header[level] = next,
                None if level == 0 => {
                    // Level 0 always keeps a page.
                    return self.store(st, page_id, Vec::new());
                }
                None => {
                    self.free_page(st, page_id)?;
                    *truncate_to = Some(truncate_to.map_or(level, |t| t.min(level)));
                    return Ok(());
                }
            }
        }
        self.unlink(st, page_id)?;
        self.free_page(st, page_id)
    }

    /// Combines an underfull page with a sibling that is also underfull,
    /// checking the next sibling first.
    fn merge(
        &self,
        st: &mut TreeState,
        level: usize,
        page_id: PageId,
        values: TupleBatch,
    ) -> Result<()> {
        let (prev, next) = {
            let page = st.arena.get(page_id)?;
            (page.prev, page.next)
        };

        if let Some(next_id) = next {
            let next_values = self.load(st, next_id)?;
            if next_values.len() < self.merge_threshold {
                return self.absorb(st, level, page_id, values, next_id, &next_values);
            }
        }
        if let Some(prev_id) = prev {
            let prev_values = self.load(st, prev_id)?;
            if prev_values.len() < self.merge_threshold {
                let survivor = (*prev_values).clone();
                return self.absorb(st, level, prev_id, survivor, page_id, &values);
            }
        }
        Ok(())
    }

    /// Appends the entries of `right_id` to its left sibling `left_id` and
    /// frees `right_id`.
    fn absorb(
        &self,
        st: &mut TreeState,
        level: usize,
        left_id: PageId,
        mut left_values: TupleBatch,
        right_id: PageId,
        right_values: &[Tuple],
    ) -> Result<()> {
        let right_children = std::mem::take(&mut st.arena.get_mut(right_id)?.children);
        st.arena.get_mut(left_id)?.children.extend(right_children);
        left_values.extend(right_values.iter().cloned());

        self.unlink(st, right_id)?;
        self.free_page(st, right_id)?;
        let rows = left_values.len();
        self.store(st, left_id, left_values)?;
        debug!(level, rows, "merged STree pages");

        if level + 1 < st.header.len() {
            self.repoint(st, level + 1, right_values, left_id)?;
        }
        Ok(())
    }

    // =========================================================================
    // Truncate and teardown
    // =========================================================================

    /// Removes every tuple and page, leaving a single empty leaf.
    ///
    /// Returns the number of tuples removed.
    pub fn truncate(&self) -> Result<usize> {
        let mut st = self.state.write();
        let mut pages = 0usize;
        for level in 0..st.header.len() {
            let mut current = Some(st.header[level]);
            while let Some(page_id) = current {
                let page = st.arena.free(page_id)?;
                self.manager(page.level).remove_batch(page.batch)?;
                current = page.next;
                pages += 1;
            }
        }
        st.arena.clear();

        let leaf = self.new_page(&mut st, 0)?;
        st.header = vec![leaf];
        st.last_path.clear();

        let previous = self.row_count.swap(0, Ordering::AcqRel);
        debug!(rows = previous, pages, "truncated STree");
        Ok(previous)
    }

    /// Truncates the tree and releases both batch managers.
    pub fn remove_tree(self) -> Result<()> {
        self.truncate()?;
        self.leaf_manager.remove()?;
        self.index_manager.remove()?;
        debug!("removed STree");
        Ok(())
    }

    // =========================================================================
    // Browsing
    // =========================================================================

    /// Creates a cursor over the tuples with keys between `lower` and
    /// `upper`, both inclusive. A missing bound leaves that side open.
    pub fn browse_range(
        &self,
        lower: Option<&[Value]>,
        upper: Option<&[Value]>,
        direction: Direction,
    ) -> Result<Browser<'_>> {
        Browser::range(self, lower, upper, direction)
    }

    /// Creates a cursor that looks up each key of `keys` in turn.
    pub fn browse_values(&self, keys: Vec<Tuple>, direction: Direction) -> Result<Browser<'_>> {
        for key in &keys {
            self.validate_key(key)?;
        }
        Ok(Browser::values(self, keys, direction))
    }

    /// Returns the level 0 search result for `key`.
    pub(crate) fn leaf_position(&self, key: &[Value]) -> Result<SearchResult> {
        self.validate_key(key)?;
        let st = self.state.read();
        self.seek(&st, 0, key)
    }

    /// Returns the first page of level 0 and its entries.
    pub(crate) fn head_leaf(&self) -> Result<(PageId, Arc<TupleBatch>)> {
        let st = self.state.read();
        let head = st.header[0];
        Ok((head, self.load(&st, head)?))
    }

    /// Returns the last page of level 0 and its entries.
    pub(crate) fn tail_leaf(&self) -> Result<(PageId, Arc<TupleBatch>)> {
        let st = self.state.read();
        let mut tail = st.header[0];
        while let Some(next) = st.arena.get(tail)?.next {
            tail = next;
        }
        Ok((tail, self.load(&st, tail)?))
    }

    /// Returns the entries and sibling links of a page, or None if the page
    /// no longer exists.
    pub(crate) fn leaf_page(&self, page_id: PageId) -> Result<Option<LeafPage>> {
        let st = self.state.read();
        if !st.arena.contains(page_id) {
            return Ok(None);
        }
        let page = st.arena.get(page_id)?;
        Ok(Some(LeafPage {
            values: self.load(&st, page_id)?,
            next: page.next,
            prev: page.prev,
        }))
    }

    /// Writes back in-place updates of level 0 tuples, first trying `page_id`.
    ///
    /// Updated tuples keep their keys. A tuple whose key is no longer on
    /// `page_id` is written to the page that now holds it.
    pub(crate) fn write_back(&self, page_id: PageId, updates: Vec<Tuple>) -> Result<()> {
        let st = self.state.write();
        let mut values = if st.arena.contains(page_id) {
            Some((*self.load(&st, page_id)?).clone())
        } else {
            None
        };

        let mut changed = false;
        for tuple in updates {
            self.validate_tuple(&tuple)?;
            let key = self.key(&tuple);
            if let Some(values) = values.as_mut() {
                if let Ok(i) = search_batch(self.comparator.as_ref(), values, key)? {
                    values[i] = tuple;
                    changed = true;
                    continue;
                }
            }
            let leaf = self.seek(&st, 0, key)?;
            if let Ok(i) = leaf.index {
                let mut elsewhere = (*leaf.values).clone();
                elsewhere[i] = tuple;
                self.store(&st, leaf.page, elsewhere)?;
            }
        }

        if let (true, Some(values)) = (changed, values) {
            self.store(&st, page_id, values)?;
        }
        Ok(())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Returns statistics about the tree.
    pub fn stats(&self) -> Result<TreeStats> {
        let st = self.state.read();
        let mut stats = TreeStats {
            height: st.header.len(),
            row_count: self.row_count(),
            page_size: self.page_size,
            ..Default::default()
        };
        for &head in &st.header {
            let (mut pages, mut entries) = (0, 0);
            let mut current = Some(head);
            while let Some(page_id) = current {
                pages += 1;
                entries += self.load(&st, page_id)?.len();
                current = st.arena.get(page_id)?.next;
            }
            stats.pages_per_level.push(pages);
            stats.entries_per_level.push(entries);
        }
        Ok(stats)
    }

    /// Checks every structural invariant of the tree.
    ///
    /// Verifies sibling links, strict key order along each level, page
    /// capacities, routing entries, and the row count.
    pub fn validate_structure(&self) -> Result<()> {
        let st = self.state.read();
        let corrupt = |msg: String| Err(StrataError::tree_corrupted(msg));

        for (level, &head) in st.header.iter().enumerate() {
            if st.arena.get(head)?.prev.is_some() {
                return corrupt(format!("header page {} on level {} has a prev link", head, level));
            }
            let mut previous_key: Option<Tuple> = None;
            let mut entries = 0usize;
            let mut prev: Option<PageId> = None;
            let mut current = Some(head);
            while let Some(page_id) = current {
                let page = st.arena.get(page_id)?;
                let values = self.load(&st, page_id)?;
                if page.level != level {
                    return corrupt(format!("page {} on level {} claims level {}", page_id, level, page.level));
                }
                if page.prev != prev {
                    return corrupt(format!("page {} on level {} has a broken prev link", page_id, level));
                }
                if values.len() > self.page_size {
                    return corrupt(format!("page {} holds {} entries", page_id, values.len()));
                }
                let sole = page.prev.is_none() && page.next.is_none();
                if values.is_empty() && !(level == 0 && sole) {
                    return corrupt(format!("empty page {} on level {}", page_id, level));
                }
                let expected_children = if level == 0 { 0 } else { values.len() };
                if page.children.len() != expected_children {
                    return corrupt(format!(
                        "page {} on level {} has {} children for {} entries",
                        page_id,
                        level,
                        page.children.len(),
                        values.len()
                    ));
                }

                for (i, entry) in values.iter().enumerate() {
                    let key = self.key(entry);
                    if let Some(previous) = &previous_key {
                        if self.compare(previous, key)? != KeyOrdering::Less {
                            return corrupt(format!("keys out of order on level {}", level));
                        }
                    }
                    previous_key = Some(key.to_vec());

                    if level > 0 {
                        let child = page.children[i];
                        let child_page = st.arena.get(child)?;
                        if child_page.level + 1 != level {
                            return corrupt(format!("child {} of page {} is on the wrong level", child, page_id));
                        }
                        let child_values = self.load(&st, child)?;
                        if search_batch(self.comparator.as_ref(), &child_values, key)?.is_err() {
                            return corrupt(format!(
                                "routing entry {} of page {} on level {} does not reach its key",
                                i, page_id, level
                            ));
                        }
                    }
                }

                entries += values.len();
                prev = Some(page_id);
                current = page.next;
            }
            if level == 0 && entries != self.row_count() {
                return corrupt(format!(
                    "level 0 holds {} tuples but the row count is {}",
                    entries,
                    self.row_count()
                ));
            }
        }
        Ok(())
    }
}

/// Entries and sibling links of a level 0 page, as seen by a cursor.
pub(crate) struct LeafPage {
    pub values: Arc<TupleBatch>,
    pub next: Option<PageId>,
    pub prev: Option<PageId>,
}

impl std::fmt::Debug for STree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("STree")
            .field("page_size", &self.page_size)
            .field("key_length", &self.key_length)
            .field("types", &self.types)
            .field("height", &self.height())
            .field("row_count", &self.row_count())
            .finish()
    }
}
