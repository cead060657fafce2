//! STree pages and the arena that owns them.
//!
//! Pages reference each other (siblings, children) by [`PageId`], a
//! generational index into a [`PageArena`]. Freeing a page bumps the
//! generation of its slot, so a stale reference is detected instead of
//! silently reaching whatever page reuses the slot.

use strata_common::{BatchId, Result, StrataError};

/// Stable identifier of a page within one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

/// A node of the tree.
///
/// Entries live in the batch named by `batch`. For a page at level 0 the
/// batch holds full tuples; above level 0 it holds key prefixes, and
/// `children[i]` is the page one level down that holds the key of entry `i`.
#[derive(Debug, Clone)]
pub struct Page {
    pub level: usize,
    pub batch: BatchId,
    pub next: Option<PageId>,
    pub prev: Option<PageId>,
    pub children: Vec<PageId>,
}

impl Page {
    pub fn new(level: usize, batch: BatchId) -> Self {
        Self {
            level,
            batch,
            next: None,
            prev: None,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }
}

struct Slot {
    generation: u32,
    page: Option<Page>,
}

/// Owner of every page of one tree.
#[derive(Default)]
pub struct PageArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl PageArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a page and returns its identifier.
    pub fn allocate(&mut self, page: Page) -> PageId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.page = Some(page);
            return PageId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            page: Some(page),
        });
        PageId {
            index,
            generation: 0,
        }
    }

    /// Returns true if `id` refers to a live page.
    pub fn contains(&self, id: PageId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.generation == id.generation && slot.page.is_some())
    }

    pub fn get(&self, id: PageId) -> Result<&Page> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.page.as_ref())
            .ok_or_else(|| dangling(id))
    }

    pub fn get_mut(&mut self, id: PageId) -> Result<&mut Page> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.page.as_mut())
            .ok_or_else(|| dangling(id))
    }

    /// Removes a page, invalidating every outstanding reference to it.
    pub fn free(&mut self, id: PageId) -> Result<Page> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or_else(|| dangling(id))?;
        let page = slot.page.take().ok_or_else(|| dangling(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(page)
    }

    /// Returns the number of live pages.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Drops every page. Slots are kept so that old identifiers stay invalid.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.page.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(index as u32);
        }
        self.live = 0;
    }
}

fn dangling(id: PageId) -> StrataError {
    StrataError::tree_corrupted(format!("dangling page reference {}", id))
}
