//! Live regions
//!
//! A region is the contiguous run of siblings between (and including) an
//! opcode's first and last boundary markers. Blocks and list items are
//! delimited by comment markers they own; moving or tearing down an
//! opcode operates on its region as a unit.

use crate::{NodeId, TreeMutator};

/// First/last boundary nodes of an opcode's rendered output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRegion {
    pub first: NodeId,
    pub last: NodeId,
}

impl LiveRegion {
    /// Region spanning a single node
    pub fn single(node: NodeId) -> Self {
        Self {
            first: node,
            last: node,
        }
    }

    /// Region between two boundary nodes (inclusive)
    pub fn between(first: NodeId, last: NodeId) -> Self {
        Self { first, last }
    }

    /// Collect the sibling run `first..=last`, in order.
    ///
    /// Collected eagerly so the caller can mutate the tree while
    /// iterating. Stops early with a warning if the run is broken.
    pub fn nodes<D: TreeMutator>(&self, dom: &D) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.first;
        loop {
            out.push(current);
            if current == self.last {
                return out;
            }
            match dom.next_sibling(current) {
                Some(next) => current = next,
                None => {
                    tracing::warn!(first = ?self.first, last = ?self.last, "broken live region");
                    return out;
                }
            }
        }
    }

    /// Detach every node in the region
    pub fn clear<D: TreeMutator>(&self, dom: &mut D) {
        for node in self.nodes(dom) {
            dom.remove_child(node);
        }
    }

    /// Reinsert the region under `parent`, before `reference`
    pub fn move_before<D: TreeMutator>(
        &self,
        dom: &mut D,
        parent: NodeId,
        reference: Option<NodeId>,
    ) {
        for node in self.nodes(dom) {
            dom.insert_before(parent, node, reference);
        }
    }
}
