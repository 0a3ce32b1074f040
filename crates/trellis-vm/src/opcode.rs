//! Update opcodes
//!
//! The persistent tree of re-evaluatable update operations. Opcodes are a
//! closed tagged variant stored in an arena and addressed by stable
//! handles; sibling order lives in explicit child lists, so moving an
//! entry is a sequence operation, never pointer surgery.

use std::fmt;

use trellis_reconcile::KeyedList;
use trellis_tags::{CachedRef, Revision, TagId};

use crate::{CellId, ExprId, LiveRegion, NodeId, ResumePoint, SourceId, Value};

/// Opcode identifier (index into the opcode arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(u32);

/// Cleanup callbacks owned by one opcode, run exactly once on destroy
#[derive(Default)]
pub struct DestroyBag {
    hooks: Vec<Box<dyn FnOnce()>>,
}

impl DestroyBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cleanup callback
    pub fn defer(&mut self, hook: impl FnOnce() + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Run and drop every callback
    pub fn run(&mut self) {
        for hook in self.hooks.drain(..) {
            hook();
        }
    }

    /// Number of pending callbacks
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// True iff no callbacks are pending
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for DestroyBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestroyBag")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// A live binding: re-evaluates its expression when the captured tag is
/// stale and applies the result to a target node when it changed
#[derive(Debug)]
pub struct BindingOp {
    pub expr: ExprId,
    pub target: NodeId,
    pub cache: CachedRef<Value>,
}

impl BindingOp {
    pub fn new(expr: ExprId, target: NodeId) -> Self {
        Self {
            expr,
            target,
            cache: CachedRef::new(),
        }
    }
}

/// A scoped block of child opcodes.
///
/// With a guard tag, the whole subtree is skipped while the guard
/// validates against the last recorded revision.
#[derive(Debug)]
pub struct BlockOp {
    pub children: Vec<OpId>,
    pub region: LiveRegion,
    pub guard: Option<TagId>,
    pub last: Revision,
    pub drops: DestroyBag,
}

impl BlockOp {
    pub fn new(children: Vec<OpId>, region: LiveRegion) -> Self {
        Self {
            children,
            region,
            guard: None,
            last: Revision::CONSTANT,
            drops: DestroyBag::new(),
        }
    }

    pub fn guarded(children: Vec<OpId>, region: LiveRegion, guard: TagId) -> Self {
        Self {
            children,
            region,
            guard: Some(guard),
            last: Revision::CONSTANT,
            drops: DestroyBag::new(),
        }
    }
}

/// An exception boundary: registers itself as the handler for the frame
/// its children run in, and can re-derive its subtree from saved state
#[derive(Debug)]
pub struct TryOp {
    pub children: Vec<OpId>,
    pub region: LiveRegion,
    pub resume: ResumePoint,
    pub drops: DestroyBag,
}

impl TryOp {
    pub fn new(children: Vec<OpId>, region: LiveRegion, resume: ResumePoint) -> Self {
        Self {
            children,
            region,
            resume,
            drops: DestroyBag::new(),
        }
    }
}

/// A keyed list block: re-synchronizes its items when the backing
/// collection's tag is stale, then re-evaluates the surviving items.
///
/// The region's first/last nodes are the open/close markers owned by the
/// list; item regions live strictly between them.
#[derive(Debug)]
pub struct ListOp {
    pub source: SourceId,
    /// Updatable tag rebound to the latest tracked `items` read
    pub tag: TagId,
    /// Revision the list was last synchronized at
    pub last: Revision,
    pub keyed: KeyedList<String, OpId>,
    pub region: LiveRegion,
    pub drops: DestroyBag,
}

impl ListOp {
    pub fn new(source: SourceId, tag: TagId, region: LiveRegion) -> Self {
        Self {
            source,
            tag,
            last: Revision::CONSTANT,
            keyed: KeyedList::new(),
            region,
            drops: DestroyBag::new(),
        }
    }
}

/// One rendered, keyed list entry
#[derive(Debug)]
pub struct ItemOp {
    pub value_cell: CellId,
    pub memo_cell: CellId,
    pub children: Vec<OpId>,
    pub region: LiveRegion,
    pub drops: DestroyBag,
}

/// The closed set of update operations
#[derive(Debug)]
pub enum OpKind {
    Binding(BindingOp),
    Block(BlockOp),
    Try(TryOp),
    List(ListOp),
    Item(ItemOp),
}

/// One opcode in the update tree
#[derive(Debug)]
pub struct Op {
    pub kind: OpKind,
}

impl Op {
    pub fn new(kind: OpKind) -> Self {
        Self { kind }
    }

    /// Child opcodes, for transitive destroy (bindings have none)
    pub fn children(&self) -> Vec<OpId> {
        match &self.kind {
            OpKind::Binding(_) => Vec::new(),
            OpKind::Block(block) => block.children.clone(),
            OpKind::Try(try_op) => try_op.children.clone(),
            OpKind::List(list) => list.keyed.handles().collect(),
            OpKind::Item(item) => item.children.clone(),
        }
    }

    /// Rendered region, if this opcode owns one
    pub fn region(&self) -> Option<LiveRegion> {
        match &self.kind {
            OpKind::Binding(_) => None,
            OpKind::Block(block) => Some(block.region),
            OpKind::Try(try_op) => Some(try_op.region),
            OpKind::List(list) => Some(list.region),
            OpKind::Item(item) => Some(item.region),
        }
    }
}

/// Arena of opcodes with stable handles and slot reuse
#[derive(Debug, Default)]
pub struct OpArena {
    slots: Vec<Option<Op>>,
    free: Vec<u32>,
}

impl OpArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an opcode, returning its handle
    pub fn alloc(&mut self, op: Op) -> OpId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(op);
                OpId(index)
            }
            None => {
                let id = OpId(self.slots.len() as u32);
                self.slots.push(Some(op));
                id
            }
        }
    }

    /// Get an opcode by handle
    pub fn get(&self, id: OpId) -> Option<&Op> {
        self.slots.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    /// Get a mutable opcode by handle
    pub fn get_mut(&mut self, id: OpId) -> Option<&mut Op> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
    }

    /// Remove an opcode from its slot for exclusive evaluation.
    /// Pair with [`OpArena::put_back`].
    pub fn take(&mut self, id: OpId) -> Option<Op> {
        self.slots.get_mut(id.0 as usize).and_then(|slot| slot.take())
    }

    /// Return a taken opcode to its slot
    pub fn put_back(&mut self, id: OpId, op: Op) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            if slot.is_some() {
                tracing::warn!(?id, "put_back over a resident opcode");
            }
            *slot = Some(op);
        }
    }

    /// Release a slot for reuse
    pub fn free(&mut self, id: OpId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize)
            && slot.take().is_some()
        {
            self.free.push(id.0);
        }
    }

    /// Number of live opcodes
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// True iff no opcodes are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
