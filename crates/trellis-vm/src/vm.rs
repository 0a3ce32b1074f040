//! The updating VM
//!
//! Walks the persistent opcode tree once per update cycle, re-evaluating
//! only what is stale. Nested blocks run depth-first via an explicit
//! frame stack; evaluation returns `Result` and recovery happens in the
//! loop at the nearest try-boundary, never by unwinding.

use serde::Serialize;
use trellis_tags::Tags;
use trellis_reconcile::{ItemKey, ReconcileTarget};

use crate::{
    Builder, CellStore, DestroyBag, EvalCx, Host, ListItem, LiveRegion, NodeId, Op, OpArena, OpId,
    OpKind, RenderCx, TreeMutator, Value, VmError,
};
use crate::error::VmResult;
use crate::opcode::{ItemOp, ListOp};

/// Shared mutable state of one update engine instance
#[derive(Debug)]
pub struct Runtime<D> {
    pub tags: Tags,
    pub cells: CellStore,
    pub ops: OpArena,
    pub dom: D,
}

impl<D: TreeMutator> Runtime<D> {
    /// Create a runtime around a tree-mutation implementation
    pub fn new(dom: D) -> Self {
        Self {
            tags: Tags::new(),
            cells: CellStore::new(),
            ops: OpArena::new(),
            dom,
        }
    }
}

/// Counters for one VM instance, cumulative across cycles
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VmStats {
    pub ops_evaluated: u64,
    pub bindings_recomputed: u64,
    pub values_applied: u64,
    pub lists_synced: u64,
    pub items_inserted: u64,
    pub items_moved: u64,
    pub items_removed: u64,
    pub frames_pushed: u64,
    pub exceptions_recovered: u64,
}

/// One activation record: a sequence of opcodes being replayed, a cursor,
/// and an optional exception handler registered by a try opcode
#[derive(Debug)]
struct Frame {
    ops: Vec<OpId>,
    cursor: usize,
    handler: Option<OpId>,
}

/// The update VM: frame stack plus counters
#[derive(Debug, Default)]
pub struct UpdateVm {
    frames: Vec<Frame>,
    stats: VmStats,
}

impl UpdateVm {
    /// Create an idle VM
    pub fn new() -> Self {
        Self::default()
    }

    /// Cumulative counters
    pub fn stats(&self) -> VmStats {
        self.stats
    }

    fn push_frame(&mut self, ops: Vec<OpId>, handler: Option<OpId>) {
        self.stats.frames_pushed += 1;
        self.frames.push(Frame {
            ops,
            cursor: 0,
            handler,
        });
    }

    /// Run one update cycle over `roots`.
    ///
    /// Returns when every frame is exhausted, or with the original error
    /// if it reached the outermost frame without finding a try-boundary.
    /// In the latter case tracking state has been reset, so the failure
    /// cannot leak a half-entered context into unrelated work.
    pub fn execute<D, H>(&mut self, rt: &mut Runtime<D>, host: &mut H, roots: &[OpId]) -> VmResult<()>
    where
        D: TreeMutator,
        H: Host<D>,
    {
        let span = tracing::debug_span!("update_cycle");
        let _guard = span.enter();

        self.frames.clear();
        self.push_frame(roots.to_vec(), None);

        loop {
            let Some(frame) = self.frames.last_mut() else {
                break;
            };
            let Some(&op) = frame.ops.get(frame.cursor) else {
                self.frames.pop();
                continue;
            };
            frame.cursor += 1;

            if let Err(err) = self.evaluate(op, rt, host) {
                self.recover(err, rt, host)?;
            }
        }
        Ok(())
    }

    fn evaluate<D, H>(&mut self, id: OpId, rt: &mut Runtime<D>, host: &mut H) -> VmResult<()>
    where
        D: TreeMutator,
        H: Host<D>,
    {
        self.stats.ops_evaluated += 1;
        let mut op = rt.ops.take(id).ok_or(VmError::MissingOp(id))?;
        let result = self.evaluate_kind(id, &mut op, rt, host);
        rt.ops.put_back(id, op);
        result
    }

    fn evaluate_kind<D, H>(
        &mut self,
        id: OpId,
        op: &mut Op,
        rt: &mut Runtime<D>,
        host: &mut H,
    ) -> VmResult<()>
    where
        D: TreeMutator,
        H: Host<D>,
    {
        match &mut op.kind {
            OpKind::Binding(binding) => {
                let Runtime { tags, cells, dom, .. } = rt;
                if binding.cache.is_valid(tags) {
                    return Ok(());
                }
                self.stats.bindings_recomputed += 1;
                tracing::trace!(?id, expr = ?binding.expr, "binding stale, recomputing");

                let previous = binding.cache.last_value().cloned();
                let expr = binding.expr;
                let value = binding
                    .cache
                    .get_or_compute(tags, |tags| {
                        let mut cx = EvalCx {
                            tags,
                            cells: &mut *cells,
                        };
                        host.eval(expr, &mut cx)
                    })?
                    .clone();
                if previous.as_ref() != Some(&value) {
                    host.apply(dom, binding.target, &value)?;
                    self.stats.values_applied += 1;
                }
                Ok(())
            }
            OpKind::Block(block) => {
                if let Some(guard) = block.guard {
                    if rt.tags.validate(guard, block.last) {
                        tracing::trace!(?id, "block guard valid, skipping subtree");
                        return Ok(());
                    }
                    block.last = rt.tags.value_of(guard);
                }
                self.push_frame(block.children.clone(), None);
                Ok(())
            }
            OpKind::Try(try_op) => {
                self.push_frame(try_op.children.clone(), Some(id));
                Ok(())
            }
            OpKind::List(list) => self.evaluate_list(id, list, rt, host),
            OpKind::Item(item) => {
                self.push_frame(item.children.clone(), None);
                Ok(())
            }
        }
    }

    /// Synchronize a stale list against its collection, then push the
    /// surviving items for re-evaluation. Structural changes and value
    /// updates for one cycle are atomic from the outside: both happen
    /// within this single evaluate call.
    fn evaluate_list<D, H>(
        &mut self,
        id: OpId,
        list: &mut ListOp,
        rt: &mut Runtime<D>,
        host: &mut H,
    ) -> VmResult<()>
    where
        D: TreeMutator,
        H: Host<D>,
    {
        if !rt.tags.validate(list.tag, list.last) {
            self.stats.lists_synced += 1;
            tracing::debug!(?id, source = ?list.source, "list stale, reconciling");

            let Runtime { tags, cells, ops, dom } = rt;
            let source = list.source;
            let (observed, read_tag) = tags.track(|tags| {
                let mut cx = EvalCx {
                    tags,
                    cells: &mut *cells,
                };
                host.items(source, &mut cx)
            });
            let observed = observed?;
            tags.update(list.tag, read_tag);

            let parent = dom
                .parent(list.region.first)
                .ok_or(VmError::Detached(list.region.first))?;

            // Transient trailing marker: the default "insert at the end"
            // anchor for this pass, removed once the pass completes.
            let marker = dom.create_comment("");
            dom.insert_before(parent, marker, Some(list.region.last));

            let mut target = ListTarget {
                tags: &mut *tags,
                cells: &mut *cells,
                ops: &mut *ops,
                dom: &mut *dom,
                host: &mut *host,
                parent,
                marker,
            };
            let result = list
                .keyed
                .sync(observed.into_iter().map(|item| (item.key.clone(), item)), &mut target);
            dom.remove_child(marker);

            let outcome = result?;
            self.stats.items_inserted += outcome.inserted as u64;
            self.stats.items_moved += outcome.moved as u64;
            self.stats.items_removed += outcome.removed as u64;
            list.last = tags.value_of(list.tag);
        }

        self.push_frame(list.keyed.handles().collect(), None);
        Ok(())
    }

    /// Unwind to the nearest registered handler and let it re-derive its
    /// subtree; escalate outward if recovery itself fails.
    fn recover<D, H>(&mut self, err: VmError, rt: &mut Runtime<D>, host: &mut H) -> VmResult<()>
    where
        D: TreeMutator,
        H: Host<D>,
    {
        let mut err = err;
        loop {
            let Some(position) = self.frames.iter().rposition(|frame| frame.handler.is_some())
            else {
                rt.tags.reset();
                self.frames.clear();
                return Err(err);
            };
            let handler = self.frames[position].handler;
            self.frames.truncate(position);
            let Some(handler) = handler else {
                continue;
            };

            match self.handle_exception(handler, rt, host) {
                Ok(()) => {
                    self.stats.exceptions_recovered += 1;
                    tracing::warn!(error = %err, ?handler, "recovered update exception");
                    return Ok(());
                }
                Err(next) => err = next,
            }
        }
    }

    fn handle_exception<D, H>(
        &mut self,
        id: OpId,
        rt: &mut Runtime<D>,
        host: &mut H,
    ) -> VmResult<()>
    where
        D: TreeMutator,
        H: Host<D>,
    {
        let mut op = rt.ops.take(id).ok_or(VmError::MissingOp(id))?;
        let result = self.rederive_try(id, &mut op, rt, host);
        rt.ops.put_back(id, op);
        result
    }

    /// Destroy a try-boundary's current children and splice in a freshly
    /// derived subtree rendered from its saved resumable state.
    fn rederive_try<D, H>(
        &mut self,
        id: OpId,
        op: &mut Op,
        rt: &mut Runtime<D>,
        host: &mut H,
    ) -> VmResult<()>
    where
        D: TreeMutator,
        H: Host<D>,
    {
        let OpKind::Try(try_op) = &mut op.kind else {
            return Err(VmError::NotAHandler(id));
        };
        let mut builder =
            Builder::resume(&rt.dom, &try_op.region).ok_or(VmError::Detached(try_op.region.first))?;

        for child in std::mem::take(&mut try_op.children) {
            destroy_op(&mut rt.ops, &mut rt.cells, &mut rt.dom, child, false);
        }
        try_op.drops.run();
        try_op.region.clear(&mut rt.dom);

        let Runtime { tags, cells, ops, dom } = rt;
        let open = builder.comment(dom, "");
        let mut cx = RenderCx {
            tags: &mut *tags,
            cells: &mut *cells,
            ops: &mut *ops,
            dom: &mut *dom,
        };
        let fresh = host.resume(try_op.resume, &mut builder, &mut try_op.drops, &mut cx)?;
        let close = builder.comment(dom, "");

        try_op.children = fresh;
        try_op.region = LiveRegion::between(open, close);
        Ok(())
    }
}

/// Bridges the reconciler's edit script onto the opcode tree and the
/// mutated tree for one list synchronization pass
struct ListTarget<'a, D, H> {
    tags: &'a mut Tags,
    cells: &'a mut CellStore,
    ops: &'a mut OpArena,
    dom: &'a mut D,
    host: &'a mut H,
    parent: NodeId,
    marker: NodeId,
}

impl<D: TreeMutator, H: Host<D>> ListTarget<'_, D, H> {
    /// First rendered node of an entry, or the trailing marker
    fn anchor(&self, before: Option<OpId>) -> NodeId {
        before
            .and_then(|handle| self.ops.get(handle))
            .and_then(|op| op.region())
            .map(|region| region.first)
            .unwrap_or(self.marker)
    }
}

impl<D: TreeMutator, H: Host<D>> ReconcileTarget<String, ListItem> for ListTarget<'_, D, H> {
    type Handle = OpId;
    type Error = VmError;

    fn retain(&mut self, key: &ItemKey<String>, handle: OpId, item: ListItem) -> VmResult<()> {
        match self.ops.get(handle).map(|op| &op.kind) {
            Some(OpKind::Item(entry)) => {
                let value_cell = entry.value_cell;
                let memo_cell = entry.memo_cell;
                self.cells.write(value_cell, self.tags, item.value);
                // Memo holds the same disambiguated key insert seeded, so
                // retaining unchanged items never dirties it.
                self.cells
                    .write(memo_cell, self.tags, Value::Str(key.to_string()));
                Ok(())
            }
            _ => Err(VmError::MissingOp(handle)),
        }
    }

    fn move_item(&mut self, handle: OpId, before: Option<OpId>) -> VmResult<()> {
        let region = self
            .ops
            .get(handle)
            .and_then(|op| op.region())
            .ok_or(VmError::MissingOp(handle))?;
        let anchor = self.anchor(before);
        region.move_before(self.dom, self.parent, Some(anchor));
        Ok(())
    }

    fn insert(
        &mut self,
        key: &ItemKey<String>,
        item: ListItem,
        before: Option<OpId>,
    ) -> VmResult<OpId> {
        let anchor = self.anchor(before);
        let mut builder = Builder::for_initial_render(self.parent, Some(anchor));

        let value_cell = self.cells.alloc(self.tags, item.value.clone());
        let memo_cell = self
            .cells
            .alloc(self.tags, Value::Str(key.to_string()));

        let open = builder.comment(self.dom, "");
        let mut drops = DestroyBag::new();
        let mut cx = RenderCx {
            tags: &mut *self.tags,
            cells: &mut *self.cells,
            ops: &mut *self.ops,
            dom: &mut *self.dom,
        };
        let children = self.host.render_item(
            &item,
            value_cell,
            memo_cell,
            &mut builder,
            &mut drops,
            &mut cx,
        )?;
        let close = builder.comment(self.dom, "");

        let id = self.ops.alloc(Op::new(OpKind::Item(ItemOp {
            value_cell,
            memo_cell,
            children,
            region: LiveRegion::between(open, close),
            drops,
        })));
        tracing::trace!(key = %key, ?id, "list item inserted");
        Ok(id)
    }

    fn remove(&mut self, handle: OpId) -> VmResult<()> {
        destroy_op(self.ops, self.cells, self.dom, handle, true);
        Ok(())
    }
}

/// Tear an opcode down: children first, then its own resources, then its
/// rendered region (descendants skip region clearing because the
/// ancestor's region contains theirs).
pub(crate) fn destroy_op<D: TreeMutator>(
    ops: &mut OpArena,
    cells: &mut CellStore,
    dom: &mut D,
    id: OpId,
    clear_region: bool,
) {
    let Some(mut op) = ops.take(id) else {
        return;
    };
    for child in op.children() {
        destroy_op(ops, cells, dom, child, false);
    }
    match &mut op.kind {
        OpKind::Binding(_) => {}
        OpKind::Block(block) => block.drops.run(),
        OpKind::Try(try_op) => try_op.drops.run(),
        OpKind::List(list) => list.drops.run(),
        OpKind::Item(item) => {
            item.drops.run();
            cells.free(item.value_cell);
            cells.free(item.memo_cell);
        }
    }
    if clear_region && let Some(region) = op.region() {
        region.clear(dom);
    }
    ops.put_back(id, op);
    ops.free(id);
}
