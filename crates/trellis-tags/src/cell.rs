//! Reactive cells
//!
//! A cell pairs a value with a dirtyable tag. Reads consume the tag into
//! the active tracking context; writes dirty the tag only when the value
//! actually changed.

use crate::{TagId, Tags};

/// Value with an attached source tag
#[derive(Debug, Clone)]
pub struct Cell<T> {
    tag: TagId,
    value: T,
}

impl<T> Cell<T> {
    /// Create a cell with a fresh source tag
    pub fn new(tags: &mut Tags, value: T) -> Self {
        Self {
            tag: tags.dirtyable(),
            value,
        }
    }

    /// The cell's source tag
    #[inline]
    pub fn tag(&self) -> TagId {
        self.tag
    }

    /// Read the value, consuming the tag into the tracking context
    pub fn get<'a>(&'a self, tags: &mut Tags) -> &'a T {
        tags.consume(self.tag);
        &self.value
    }

    /// Read the value without registering a dependency
    #[inline]
    pub fn peek(&self) -> &T {
        &self.value
    }
}

impl<T: PartialEq> Cell<T> {
    /// Write the value, dirtying the tag only if it changed.
    /// Returns whether a write happened.
    pub fn set(&mut self, tags: &mut Tags, value: T) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        tags.dirty(self.tag);
        true
    }
}
