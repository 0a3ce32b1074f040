//! Cell storage
//!
//! Reactive cells for list items (value and memo) live in an arena so
//! opcodes can refer to them by id and hosts can read them during
//! expression evaluation. Slots are recycled when items are destroyed.

use trellis_tags::{Cell, TagId, Tags};

use crate::Value;

/// Cell identifier (index into the cell arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u32);

/// Arena of reactive cells
#[derive(Debug, Default)]
pub struct CellStore {
    slots: Vec<Option<Cell<Value>>>,
    free: Vec<u32>,
}

impl CellStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a cell with a fresh source tag
    pub fn alloc(&mut self, tags: &mut Tags, value: Value) -> CellId {
        let cell = Cell::new(tags, value);
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(cell);
                CellId(index)
            }
            None => {
                let id = CellId(self.slots.len() as u32);
                self.slots.push(Some(cell));
                id
            }
        }
    }

    /// Release a cell's slot for reuse
    pub fn free(&mut self, id: CellId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize)
            && slot.take().is_some()
        {
            self.free.push(id.0);
        }
    }

    /// Read a cell, consuming its tag into the tracking context
    pub fn read<'a>(&'a self, id: CellId, tags: &mut Tags) -> Option<&'a Value> {
        self.slots
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .map(|cell| cell.get(tags))
    }

    /// Write a cell, dirtying its tag only on change.
    /// Returns whether a write happened.
    pub fn write(&mut self, id: CellId, tags: &mut Tags, value: Value) -> bool {
        match self
            .slots
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
        {
            Some(cell) => cell.set(tags, value),
            None => {
                tracing::warn!(?id, "write to a freed cell");
                false
            }
        }
    }

    /// Source tag of a cell
    pub fn tag(&self, id: CellId) -> Option<TagId> {
        self.slots
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .map(|cell| cell.tag())
    }

    /// Number of live cells
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// True iff no cells are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
