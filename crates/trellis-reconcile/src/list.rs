//! Single-pass keyed reconciliation
//!
//! One left-to-right pass over the new sequence, a cursor into the
//! previous ordering, and a key map. The fast path (nothing moved) is
//! O(1) per item; forward shifts retain without a physical move; keys
//! passed over while scanning become moves when they reappear and
//! deletes if they never do.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::{ItemKey, KeyDeduper};

/// Receiver for the edit script of one reconciliation pass.
///
/// `before: None` means "at the end, immediately before the trailing
/// boundary marker".
pub trait ReconcileTarget<K, V> {
    /// Stable handle for one list entry (e.g. an opcode id)
    type Handle: Copy + Eq + fmt::Debug;
    /// Error produced by the caller's side of an edit
    type Error;

    /// Keep an entry in place, refreshing its value. `key` is the
    /// disambiguated key the entry is memoized under.
    fn retain(
        &mut self,
        key: &ItemKey<K>,
        handle: Self::Handle,
        value: V,
    ) -> Result<(), Self::Error>;

    /// Relocate an entry's rendered region before `before`
    fn move_item(
        &mut self,
        handle: Self::Handle,
        before: Option<Self::Handle>,
    ) -> Result<(), Self::Error>;

    /// Render a new entry before `before`, returning its handle
    fn insert(
        &mut self,
        key: &ItemKey<K>,
        value: V,
        before: Option<Self::Handle>,
    ) -> Result<Self::Handle, Self::Error>;

    /// Tear an entry down (release resources, clear its region)
    fn remove(&mut self, handle: Self::Handle) -> Result<(), Self::Error>;
}

/// Edit counts for one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub retained: usize,
    pub moved: usize,
    pub inserted: usize,
    pub removed: usize,
}

#[derive(Debug)]
struct Entry<K, H> {
    key: ItemKey<K>,
    handle: H,
    /// Passed over while scanning forward for another key this pass
    seen: bool,
    /// Matched (retained or moved) this pass
    retained: bool,
}

/// Persistent keyed ordering, reconciled in place against new sequences
#[derive(Debug, Default)]
pub struct KeyedList<K, H> {
    entries: Vec<Entry<K, H>>,
    deduper: KeyDeduper<K>,
}

impl<K, H> KeyedList<K, H>
where
    K: Clone + Eq + Hash,
    H: Copy + Eq + fmt::Debug,
{
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            deduper: KeyDeduper::new(),
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True iff no entries are live
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handles of live entries, in rendered order
    pub fn handles(&self) -> impl Iterator<Item = H> + '_ {
        self.entries.iter().map(|entry| entry.handle)
    }

    /// Handle currently associated with a disambiguated key
    pub fn handle_of(&self, key: &ItemKey<K>) -> Option<H> {
        self.entries
            .iter()
            .find(|entry| entry.key == *key)
            .map(|entry| entry.handle)
    }

    /// Reconcile against a freshly observed sequence, emitting edits to
    /// `target`.
    ///
    /// On error the list's bookkeeping is unspecified; callers are
    /// expected to discard the enclosing subtree.
    pub fn sync<V, T>(
        &mut self,
        items: impl IntoIterator<Item = (K, V)>,
        target: &mut T,
    ) -> Result<SyncStats, T::Error>
    where
        T: ReconcileTarget<K, V, Handle = H>,
    {
        self.deduper.reset();
        let index: HashMap<ItemKey<K>, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.key.clone(), position))
            .collect();

        let mut cursor = 0usize;
        let mut next_order: Vec<(ItemKey<K>, H)> = Vec::new();
        let mut stats = SyncStats::default();

        for (raw, value) in items {
            let key = self.deduper.dedupe(raw);

            if cursor < self.entries.len() && self.entries[cursor].key == key {
                // Fast path: same key at the current position
                self.entries[cursor].retained = true;
                let handle = self.entries[cursor].handle;
                target.retain(&key, handle, value)?;
                next_order.push((key, handle));
                stats.retained += 1;
                cursor += 1;
            } else if let Some(&position) = index.get(&key) {
                if !self.entries[position].seen {
                    // Forward shift: consume the cursor up to the match,
                    // leaving the skipped entries undecided until end of
                    // pass (later match => move, no match => delete).
                    while self.entries[cursor].key != key {
                        self.entries[cursor].seen = true;
                        cursor += 1;
                    }
                    self.entries[cursor].retained = true;
                    let handle = self.entries[cursor].handle;
                    target.retain(&key, handle, value)?;
                    next_order.push((key, handle));
                    stats.retained += 1;
                    cursor += 1;
                } else {
                    // Passed over earlier: physically move it here
                    self.entries[position].retained = true;
                    let handle = self.entries[position].handle;
                    let before = self.entries.get(cursor).map(|entry| entry.handle);
                    target.move_item(handle, before)?;
                    target.retain(&key, handle, value)?;
                    next_order.push((key, handle));
                    stats.moved += 1;
                }
            } else {
                let before = self.entries.get(cursor).map(|entry| entry.handle);
                let handle = target.insert(&key, value, before)?;
                next_order.push((key, handle));
                stats.inserted += 1;
            }
        }

        // Everything not matched this pass is deleted, including entries
        // that were scanned over but whose key never reappeared.
        for entry in &self.entries {
            if !entry.retained {
                target.remove(entry.handle)?;
                stats.removed += 1;
            }
        }

        self.entries = next_order
            .into_iter()
            .map(|(key, handle)| Entry {
                key,
                handle,
                seen: false,
                retained: false,
            })
            .collect();

        tracing::debug!(
            retained = stats.retained,
            moved = stats.moved,
            inserted = stats.inserted,
            removed = stats.removed,
            "reconciliation pass complete"
        );
        Ok(stats)
    }
}
