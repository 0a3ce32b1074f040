//! Key disambiguation
//!
//! Duplicate raw keys within one pass are distinguished by an occurrence
//! counter, so the Nth duplicate of a key maps deterministically to the
//! Nth occurrence across passes.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// A raw key plus its occurrence slot within one pass
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey<K> {
    /// The key as produced by the host (identity, index, or path key)
    pub raw: K,
    /// 0 for the first occurrence, N for the Nth duplicate
    pub occurrence: u32,
}

impl<K: fmt::Display> fmt::Display for ItemKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.occurrence == 0 {
            write!(f, "{}", self.raw)
        } else {
            write!(f, "{}#{}", self.raw, self.occurrence)
        }
    }
}

/// Assigns occurrence slots to raw keys for one pass
#[derive(Debug, Default)]
pub struct KeyDeduper<K> {
    counts: HashMap<K, u32>,
}

impl<K: Clone + Eq + Hash> KeyDeduper<K> {
    /// Create a deduper with no keys observed yet
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }

    /// Assign the next occurrence slot for `raw`
    pub fn dedupe(&mut self, raw: K) -> ItemKey<K> {
        let count = self.counts.entry(raw.clone()).or_insert(0);
        let occurrence = *count;
        *count += 1;
        ItemKey { raw, occurrence }
    }

    /// Forget all observed keys, ready for the next pass
    pub fn reset(&mut self) {
        self.counts.clear();
    }
}
