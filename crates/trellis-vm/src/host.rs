//! Host interface
//!
//! The update core is driven through these collaborator interfaces:
//! expression evaluation, value application, collection iteration, and
//! rendering of fresh content (new list items, re-derived try blocks).
//! Initial-render compilation is the host's problem; the core only
//! replays what the host built.

use trellis_tags::Tags;

use crate::{
    Builder, CellId, CellStore, DestroyBag, NodeId, OpArena, OpId, TreeMutator, Value, VmError,
};

/// Host expression identifier (opaque to the core)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Host collection identifier (opaque to the core)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// Saved resumable state for a try-boundary (opaque to the core)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResumePoint(pub u32);

/// One observed entry of an iterated collection
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    /// Stable raw key (disambiguated by the reconciler on duplicates)
    pub key: String,
    /// Item payload
    pub value: Value,
}

impl ListItem {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Context for expression and collection reads
pub struct EvalCx<'a> {
    pub tags: &'a mut Tags,
    pub cells: &'a mut CellStore,
}

impl EvalCx<'_> {
    /// Read a cell, registering the dependency
    pub fn read_cell(&mut self, id: CellId) -> Result<Value, VmError> {
        self.cells
            .read(id, self.tags)
            .cloned()
            .ok_or(VmError::host(format!("cell {id:?} is not live")))
    }
}

/// Context for rendering fresh content into the opcode tree
pub struct RenderCx<'a, D> {
    pub tags: &'a mut Tags,
    pub cells: &'a mut CellStore,
    pub ops: &'a mut OpArena,
    pub dom: &'a mut D,
}

/// The collaborators the update core is driven through
pub trait Host<D: TreeMutator> {
    /// Evaluate an expression; every reactive read must go through `cx`
    /// so the dependency tag is captured
    fn eval(&mut self, expr: ExprId, cx: &mut EvalCx<'_>) -> Result<Value, VmError>;

    /// Apply a freshly computed binding value to its target node
    fn apply(&mut self, dom: &mut D, target: NodeId, value: &Value) -> Result<(), VmError>;

    /// Observe the current entries of a collection; reads go through `cx`
    fn items(&mut self, source: SourceId, cx: &mut EvalCx<'_>) -> Result<Vec<ListItem>, VmError>;

    /// Render one fresh list item through `builder`, returning its child
    /// opcodes. The VM brackets the output with boundary markers; the
    /// item's reactive bindings should read `value_cell`/`memo_cell`,
    /// and cleanup callbacks go into `drops`.
    fn render_item(
        &mut self,
        item: &ListItem,
        value_cell: CellId,
        memo_cell: CellId,
        builder: &mut Builder,
        drops: &mut DestroyBag,
        cx: &mut RenderCx<'_, D>,
    ) -> Result<Vec<OpId>, VmError>;

    /// Re-derive a try-boundary's subtree from its saved state through
    /// `builder`, returning the fresh child opcodes
    fn resume(
        &mut self,
        point: ResumePoint,
        builder: &mut Builder,
        drops: &mut DestroyBag,
        cx: &mut RenderCx<'_, D>,
    ) -> Result<Vec<OpId>, VmError>;
}
