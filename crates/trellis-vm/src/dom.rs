//! Tree mutation interface
//!
//! The VM never owns the rendered tree; it drives mutations through
//! [`TreeMutator`]. [`FlatDom`] is an arena-backed in-memory
//! implementation used by hosts and the test suite.

/// Node identifier (index into the host's node arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Root node ID
    pub const ROOT: NodeId = NodeId(0);
}

/// The tree-mutation primitives the update core needs.
///
/// Placement is expressed as "insert before a reference sibling";
/// `None` appends at the end of the parent. The traversal accessors
/// exist so live regions can be moved and cleared through the same
/// three mutation primitives.
pub trait TreeMutator {
    /// Create a detached comment node (boundary markers)
    fn create_comment(&mut self, text: &str) -> NodeId;

    /// Insert `node` under `parent`, before `reference` (detaching it
    /// from its current parent first if attached)
    fn insert_before(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>);

    /// Detach a node from its parent
    fn remove_child(&mut self, node: NodeId);

    /// Parent of an attached node
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Next sibling of an attached node
    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;
}

/// Node payload kinds in the in-memory tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element(String),
    Text(String),
    Comment(String),
}

#[derive(Debug)]
struct MemNode {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-based in-memory tree
#[derive(Debug)]
pub struct FlatDom {
    nodes: Vec<MemNode>,
}

impl Default for FlatDom {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatDom {
    /// Create a tree containing only a root element
    pub fn new() -> Self {
        Self {
            nodes: vec![MemNode {
                kind: NodeKind::Element("root".to_owned()),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(MemNode {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Create a detached element node
    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.alloc(NodeKind::Element(name.to_owned()))
    }

    /// Create a detached text node
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_owned()))
    }

    /// Replace the text of a text node
    pub fn set_text(&mut self, node: NodeId, text: &str) {
        if let Some(mem) = self.nodes.get_mut(node.0 as usize) {
            match &mut mem.kind {
                NodeKind::Text(current) | NodeKind::Comment(current) => {
                    *current = text.to_owned();
                }
                NodeKind::Element(_) => {
                    tracing::warn!(?node, "set_text on an element node");
                }
            }
        }
    }

    /// Kind of a node
    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node.0 as usize).map(|mem| &mem.kind)
    }

    /// Children of a node, in order
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0 as usize)
            .map(|mem| mem.children.as_slice())
            .unwrap_or(&[])
    }

    /// Number of nodes ever allocated
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True iff only the root exists
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.nodes.get(node.0 as usize).and_then(|mem| mem.parent) else {
            return;
        };
        if let Some(mem) = self.nodes.get_mut(parent.0 as usize) {
            mem.children.retain(|&child| child != node);
        }
        if let Some(mem) = self.nodes.get_mut(node.0 as usize) {
            mem.parent = None;
        }
    }

    /// Concatenated text content under a node (markers excluded)
    pub fn text_of(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Some(mem) = self.nodes.get(node.0 as usize) else {
            return;
        };
        match &mem.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(_) => {}
            NodeKind::Element(_) => {
                for &child in &mem.children {
                    self.collect_text(child, out);
                }
            }
        }
    }
}

impl TreeMutator for FlatDom {
    fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Comment(text.to_owned()))
    }

    fn insert_before(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>) {
        self.detach(node);
        let position = match reference {
            Some(reference) => self
                .children(parent)
                .iter()
                .position(|&child| child == reference),
            None => None,
        };
        if let Some(mem) = self.nodes.get_mut(parent.0 as usize) {
            match position {
                Some(position) => mem.children.insert(position, node),
                None => mem.children.push(node),
            }
        }
        if let Some(mem) = self.nodes.get_mut(node.0 as usize) {
            mem.parent = Some(parent);
        }
    }

    fn remove_child(&mut self, node: NodeId) {
        self.detach(node);
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0 as usize).and_then(|mem| mem.parent)
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let position = siblings.iter().position(|&child| child == node)?;
        siblings.get(position + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_sibling_order() {
        let mut dom = FlatDom::new();
        let a = dom.create_text("a");
        let b = dom.create_text("b");
        let c = dom.create_text("c");

        dom.insert_before(NodeId::ROOT, a, None);
        dom.insert_before(NodeId::ROOT, c, None);
        dom.insert_before(NodeId::ROOT, b, Some(c));

        assert_eq!(dom.children(NodeId::ROOT), &[a, b, c]);
        assert_eq!(dom.next_sibling(a), Some(b));
        assert_eq!(dom.next_sibling(c), None);
        assert_eq!(dom.text_of(NodeId::ROOT), "abc");
    }

    #[test]
    fn test_insert_reattaches() {
        let mut dom = FlatDom::new();
        let a = dom.create_text("a");
        let b = dom.create_text("b");
        dom.insert_before(NodeId::ROOT, a, None);
        dom.insert_before(NodeId::ROOT, b, None);

        // Moving a after b is an insert with no reference
        dom.insert_before(NodeId::ROOT, a, None);
        assert_eq!(dom.children(NodeId::ROOT), &[b, a]);
    }

    #[test]
    fn test_remove_detaches() {
        let mut dom = FlatDom::new();
        let a = dom.create_text("a");
        dom.insert_before(NodeId::ROOT, a, None);
        dom.remove_child(a);

        assert!(dom.children(NodeId::ROOT).is_empty());
        assert_eq!(dom.parent(a), None);
    }

    #[test]
    fn test_comments_have_no_text() {
        let mut dom = FlatDom::new();
        let marker = dom.create_comment("");
        let text = dom.create_text("x");
        dom.insert_before(NodeId::ROOT, marker, None);
        dom.insert_before(NodeId::ROOT, text, None);
        assert_eq!(dom.text_of(NodeId::ROOT), "x");
    }
}
