//! Element builder
//!
//! An insertion cursor over the mutated tree: a parent element plus an
//! optional "insert before" sibling. New list items and re-derived
//! try-block content are rendered through a builder so the core never
//! touches placement directly.

use crate::{LiveRegion, NodeId, TreeMutator};

/// Tree insertion cursor
#[derive(Debug, Clone, Copy)]
pub struct Builder {
    parent: NodeId,
    before: Option<NodeId>,
}

impl Builder {
    /// Cursor for rendering fresh content under `parent`, before
    /// `next_sibling` (`None` appends)
    pub fn for_initial_render(parent: NodeId, next_sibling: Option<NodeId>) -> Self {
        Self {
            parent,
            before: next_sibling,
        }
    }

    /// Cursor positioned immediately after `region`.
    ///
    /// Captured before the region is cleared, so re-derived content lands
    /// exactly where the old content was.
    pub fn resume<D: TreeMutator>(dom: &D, region: &LiveRegion) -> Option<Self> {
        let parent = dom.parent(region.first)?;
        Some(Self {
            parent,
            before: dom.next_sibling(region.last),
        })
    }

    /// The parent element the cursor points into
    #[inline]
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    /// Insert a node at the cursor; subsequent insertions land after it
    pub fn place<D: TreeMutator>(&mut self, dom: &mut D, node: NodeId) {
        dom.insert_before(self.parent, node, self.before);
    }

    /// Create and place a comment marker, returning it
    pub fn comment<D: TreeMutator>(&mut self, dom: &mut D, text: &str) -> NodeId {
        let node = dom.create_comment(text);
        self.place(dom, node);
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlatDom;

    #[test]
    fn test_place_keeps_insertion_order() {
        let mut dom = FlatDom::new();
        let tail = dom.create_text("z");
        dom.insert_before(NodeId::ROOT, tail, None);

        let mut builder = Builder::for_initial_render(NodeId::ROOT, Some(tail));
        let a = dom.create_text("a");
        let b = dom.create_text("b");
        builder.place(&mut dom, a);
        builder.place(&mut dom, b);

        assert_eq!(dom.text_of(NodeId::ROOT), "abz");
    }

    #[test]
    fn test_resume_targets_slot_after_region() {
        let mut dom = FlatDom::new();
        let open = dom.create_comment("");
        let text = dom.create_text("old");
        let close = dom.create_comment("");
        let tail = dom.create_text("t");
        for node in [open, text, close, tail] {
            dom.insert_before(NodeId::ROOT, node, None);
        }

        let region = LiveRegion::between(open, close);
        let mut builder = Builder::resume(&dom, &region).unwrap();
        region.clear(&mut dom);

        let fresh = dom.create_text("new");
        builder.place(&mut dom, fresh);
        assert_eq!(dom.text_of(NodeId::ROOT), "newt");
    }
}
