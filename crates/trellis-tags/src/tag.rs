//! Tags (arena-based dependency handles)
//!
//! A tag is an opaque handle to a dependency source or a combinator over
//! other tags. Tags live in an arena owned by [`Tags`], which also owns
//! the revision clock and the stack of tracking frames. The tracking
//! context is explicit state on [`Tags`], threaded through every
//! computation rather than hidden in a thread-local.

use crate::{Revision, RevisionClock};

/// Tag identifier (index into the tag arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagId(pub(crate) u32);

impl TagId {
    /// The constant tag: reports [`Revision::CONSTANT`] forever
    pub const CONSTANT: TagId = TagId(0);

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
enum TagEntry {
    /// Never invalidates
    Constant,
    /// A leaf source; its revision is set by `dirty`
    Dirtyable { revision: Revision },
    /// Reports the max revision of its children
    Combinator { children: Vec<TagId> },
    /// A dirtyable tag whose tracked child can be replaced wholesale
    Updatable {
        revision: Revision,
        child: Option<TagId>,
    },
}

/// One nested tracking context
#[derive(Debug, Default)]
struct Tracker {
    consumed: Vec<TagId>,
}

/// Tag arena, revision clock, and tracking stack
#[derive(Debug)]
pub struct Tags {
    entries: Vec<TagEntry>,
    clock: RevisionClock,
    trackers: Vec<Tracker>,
}

impl Default for Tags {
    fn default() -> Self {
        Self::new()
    }
}

impl Tags {
    /// Create an empty tag graph (the constant tag is preallocated)
    pub fn new() -> Self {
        Self {
            entries: vec![TagEntry::Constant],
            clock: RevisionClock::new(),
            trackers: Vec::new(),
        }
    }

    fn alloc(&mut self, entry: TagEntry) -> TagId {
        let id = TagId(self.entries.len() as u32);
        self.entries.push(entry);
        id
    }

    /// Current revision of the global clock
    #[inline]
    pub fn current_revision(&self) -> Revision {
        self.clock.current()
    }

    /// Create a leaf source tag
    pub fn dirtyable(&mut self) -> TagId {
        self.alloc(TagEntry::Dirtyable {
            revision: Revision::INITIAL,
        })
    }

    /// Create a tag whose tracked child can be rebound via [`Tags::update`]
    pub fn updatable(&mut self) -> TagId {
        self.alloc(TagEntry::Updatable {
            revision: Revision::INITIAL,
            child: None,
        })
    }

    /// Combine tags into one that tracks the max of its inputs
    ///
    /// Constant tags are filtered out; combining zero tags yields the
    /// constant tag and combining one tag yields that tag unchanged.
    pub fn combine(&mut self, tags: &[TagId]) -> TagId {
        let mut children: Vec<TagId> = Vec::with_capacity(tags.len());
        for &tag in tags {
            if tag != TagId::CONSTANT && !children.contains(&tag) {
                children.push(tag);
            }
        }
        match children.len() {
            0 => TagId::CONSTANT,
            1 => children[0],
            _ => self.alloc(TagEntry::Combinator { children }),
        }
    }

    /// Replace the tracked child of an updatable tag
    pub fn update(&mut self, tag: TagId, child: TagId) {
        match &mut self.entries[tag.index()] {
            TagEntry::Updatable { child: slot, .. } => {
                *slot = if child == TagId::CONSTANT {
                    None
                } else {
                    Some(child)
                };
            }
            _ => {
                tracing::warn!(?tag, "update called on a non-updatable tag");
            }
        }
    }

    /// Mark a source tag as written: advances the clock and records the
    /// new revision on the tag. This is the sole write path.
    pub fn dirty(&mut self, tag: TagId) {
        let next = self.clock.advance();
        match &mut self.entries[tag.index()] {
            TagEntry::Dirtyable { revision } | TagEntry::Updatable { revision, .. } => {
                *revision = next;
                tracing::trace!(?tag, revision = next.value(), "tag dirtied");
            }
            _ => {
                tracing::warn!(?tag, "dirty called on a non-dirtyable tag");
            }
        }
    }

    /// Current revision reported by a tag
    pub fn value_of(&self, tag: TagId) -> Revision {
        match &self.entries[tag.index()] {
            TagEntry::Constant => Revision::CONSTANT,
            TagEntry::Dirtyable { revision } => *revision,
            TagEntry::Combinator { children } => children
                .iter()
                .map(|&child| self.value_of(child))
                .max()
                .unwrap_or(Revision::CONSTANT),
            TagEntry::Updatable { revision, child } => {
                let own = *revision;
                match child {
                    Some(child) => own.max(self.value_of(*child)),
                    None => own,
                }
            }
        }
    }

    /// True iff nothing reachable from `tag` advanced past `revision`
    #[inline]
    pub fn validate(&self, tag: TagId, revision: Revision) -> bool {
        self.value_of(tag) <= revision
    }

    /// True iff the tag can never invalidate
    #[inline]
    pub fn is_const_tag(&self, tag: TagId) -> bool {
        tag == TagId::CONSTANT
    }

    /// Record a dependency edge in the innermost tracking context.
    /// Outside any tracking context this is a no-op.
    pub fn consume(&mut self, tag: TagId) {
        if let Some(tracker) = self.trackers.last_mut()
            && tag != TagId::CONSTANT
            && !tracker.consumed.contains(&tag)
        {
            tracker.consumed.push(tag);
        }
    }

    /// Run `f` in a fresh tracking context and return its result together
    /// with the combination of every tag consumed inside it.
    ///
    /// The context is popped before returning, so `f` returning an error
    /// value cannot leak a half-entered context.
    pub fn track<T>(&mut self, f: impl FnOnce(&mut Tags) -> T) -> (T, TagId) {
        self.trackers.push(Tracker::default());
        let value = f(self);
        let consumed = match self.trackers.pop() {
            Some(tracker) => tracker.consumed,
            None => {
                tracing::error!("tracking stack underflow");
                Vec::new()
            }
        };
        let tag = self.combine(&consumed);
        (value, tag)
    }

    /// Number of active tracking contexts
    #[inline]
    pub fn tracking_depth(&self) -> usize {
        self.trackers.len()
    }

    /// Drop all tracking contexts.
    ///
    /// Called after an unhandled update exception so later unrelated work
    /// never observes a half-entered context.
    pub fn reset(&mut self) {
        if !self.trackers.is_empty() {
            tracing::debug!(depth = self.trackers.len(), "tracking state reset");
            self.trackers.clear();
        }
    }
}
