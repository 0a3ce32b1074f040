//! Cached references
//!
//! A memoizing computation wrapper: the value is recomputed only when the
//! tag captured during the last computation fails validation against the
//! revision stored alongside it.

use crate::{Revision, TagId, Tags};

#[derive(Debug, Clone)]
struct CachedState<T> {
    value: T,
    tag: TagId,
    revision: Revision,
}

/// Memoized computation guarded by a captured tag
#[derive(Debug, Clone, Default)]
pub struct CachedRef<T> {
    state: Option<CachedState<T>>,
}

impl<T> CachedRef<T> {
    /// Create an empty reference; the first read always computes
    pub fn new() -> Self {
        Self { state: None }
    }

    /// True iff a cached value exists and its tag still validates
    pub fn is_valid(&self, tags: &Tags) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| tags.validate(state.tag, state.revision))
    }

    /// True iff the cached tag can never invalidate
    pub fn is_const(&self, tags: &Tags) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| tags.is_const_tag(state.tag))
    }

    /// The last computed value, valid or not
    pub fn last_value(&self) -> Option<&T> {
        self.state.as_ref().map(|state| &state.value)
    }

    /// Drop the cached state so the next read recomputes
    pub fn invalidate(&mut self) {
        self.state = None;
    }

    /// Install a value computed externally under a known tag.
    ///
    /// Used when initial render already produced the value inside its own
    /// tracking context and re-running the computation would be wasted.
    pub fn prime(&mut self, tags: &Tags, value: T, tag: TagId) {
        let revision = tags.value_of(tag);
        self.state = Some(CachedState {
            value,
            tag,
            revision,
        });
    }

    /// Return the cached value, recomputing it first if the captured tag
    /// is stale or no computation has happened yet.
    ///
    /// `compute` runs inside a fresh tracking context; every tag it
    /// consumes is combined into the new captured tag. The captured tag is
    /// consumed into the enclosing context on every call, so this
    /// reference's own staleness is observable to outer computations. A
    /// failed compute leaves the cache unset.
    pub fn get_or_compute<E>(
        &mut self,
        tags: &mut Tags,
        compute: impl FnOnce(&mut Tags) -> Result<T, E>,
    ) -> Result<&T, E> {
        let state = match self.state.take() {
            Some(state) if tags.validate(state.tag, state.revision) => state,
            _ => {
                let (result, tag) = tags.track(compute);
                let value = result?;
                let revision = tags.value_of(tag);
                CachedState {
                    value,
                    tag,
                    revision,
                }
            }
        };
        let state = self.state.insert(state);
        tags.consume(state.tag);
        Ok(&state.value)
    }
}
