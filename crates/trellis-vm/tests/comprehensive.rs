//! Full update-cycle tests: mount, quiescent cycles, value updates,
//! keyed reorders, removals, duplicate keys, and exception recovery,
//! driven through a scripted host over the in-memory tree.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use trellis_reconcile::ItemKey;
use trellis_tags::{TagId, Tags};
use trellis_vm::{
    BindingOp, BlockOp, Builder, CellId, DestroyBag, EvalCx, ExprId, FlatDom, Host, ListItem,
    ListOp, LiveRegion, NodeId, Op, OpId, OpKind, RenderCx, ResumePoint, Runtime, SourceId,
    TreeMutator, TryOp, UpdateVm, Value, VmError,
};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, Copy)]
enum Expr {
    Cell(CellId),
    Fail,
}

/// Scripted host: expression table, keyed collections with a source tag,
/// and canned resume content for try-boundaries.
#[derive(Default)]
struct ScriptHost {
    exprs: HashMap<u32, Expr>,
    next_expr: u32,
    sources: HashMap<u32, (TagId, Vec<ListItem>)>,
    resume_text: HashMap<u32, &'static str>,
    destroyed: Rc<RefCell<Vec<String>>>,
}

impl ScriptHost {
    fn new() -> Self {
        Self::default()
    }

    fn expr(&mut self, expr: Expr) -> ExprId {
        let id = self.next_expr;
        self.next_expr += 1;
        self.exprs.insert(id, expr);
        ExprId(id)
    }

    fn source(&mut self, tags: &mut Tags, id: u32, items: &[(&str, i64)]) -> SourceId {
        let tag = tags.dirtyable();
        self.sources.insert(id, (tag, to_items(items)));
        SourceId(id)
    }

    fn set_items(&mut self, tags: &mut Tags, source: SourceId, items: &[(&str, i64)]) {
        if let Some((tag, stored)) = self.sources.get_mut(&source.0) {
            *stored = to_items(items);
            tags.dirty(*tag);
        }
    }

    fn destroyed(&self) -> Vec<String> {
        self.destroyed.borrow().clone()
    }
}

fn to_items(items: &[(&str, i64)]) -> Vec<ListItem> {
    items
        .iter()
        .map(|&(key, value)| ListItem::new(key, value))
        .collect()
}

impl Host<FlatDom> for ScriptHost {
    fn eval(&mut self, expr: ExprId, cx: &mut EvalCx<'_>) -> Result<Value, VmError> {
        match self.exprs.get(&expr.0) {
            Some(Expr::Cell(cell)) => cx.read_cell(*cell),
            Some(Expr::Fail) => Err(VmError::host("scripted failure")),
            None => Err(VmError::host(format!("unknown expression {expr:?}"))),
        }
    }

    fn apply(&mut self, dom: &mut FlatDom, target: NodeId, value: &Value) -> Result<(), VmError> {
        dom.set_text(target, &value.to_string());
        Ok(())
    }

    fn items(&mut self, source: SourceId, cx: &mut EvalCx<'_>) -> Result<Vec<ListItem>, VmError> {
        match self.sources.get(&source.0) {
            Some((tag, items)) => {
                cx.tags.consume(*tag);
                Ok(items.clone())
            }
            None => Err(VmError::host(format!("unknown source {source:?}"))),
        }
    }

    fn render_item(
        &mut self,
        item: &ListItem,
        value_cell: CellId,
        _memo_cell: CellId,
        builder: &mut Builder,
        drops: &mut DestroyBag,
        cx: &mut RenderCx<'_, FlatDom>,
    ) -> Result<Vec<OpId>, VmError> {
        let text = cx.dom.create_text(&item.value.to_string());
        builder.place(cx.dom, text);

        // One live binding per item, reading the item's value cell.
        // Initial render just produced the value, so prime the cache.
        let expr = self.expr(Expr::Cell(value_cell));
        let mut binding = BindingOp::new(expr, text);
        let cells = &mut *cx.cells;
        let (value, tag) = cx.tags.track(|tags| cells.read(value_cell, tags).cloned());
        if let Some(value) = value {
            binding.cache.prime(cx.tags, value, tag);
        }
        let binding_id = cx.ops.alloc(Op::new(OpKind::Binding(binding)));

        let destroyed = Rc::clone(&self.destroyed);
        let key = item.key.clone();
        drops.defer(move || destroyed.borrow_mut().push(key));
        Ok(vec![binding_id])
    }

    fn resume(
        &mut self,
        point: ResumePoint,
        builder: &mut Builder,
        _drops: &mut DestroyBag,
        cx: &mut RenderCx<'_, FlatDom>,
    ) -> Result<Vec<OpId>, VmError> {
        let text = self
            .resume_text
            .get(&point.0)
            .copied()
            .unwrap_or("recovered");
        let node = cx.dom.create_text(text);
        builder.place(cx.dom, node);
        Ok(Vec::new())
    }
}

/// Mount an empty list block under the root: two boundary markers and a
/// list opcode whose first evaluation performs the initial sync.
fn mount_list(rt: &mut Runtime<FlatDom>, source: SourceId) -> OpId {
    let open = rt.dom.create_comment("");
    let close = rt.dom.create_comment("");
    rt.dom.insert_before(NodeId::ROOT, open, None);
    rt.dom.insert_before(NodeId::ROOT, close, None);
    let tag = rt.tags.updatable();
    rt.ops.alloc(Op::new(OpKind::List(ListOp::new(
        source,
        tag,
        LiveRegion::between(open, close),
    ))))
}

fn list_handles(rt: &Runtime<FlatDom>, list: OpId) -> Vec<OpId> {
    match rt.ops.get(list).map(|op| &op.kind) {
        Some(OpKind::List(list)) => list.keyed.handles().collect(),
        _ => panic!("not a list opcode"),
    }
}

fn item_memo_cell(rt: &Runtime<FlatDom>, list: OpId, key: &ItemKey<String>) -> CellId {
    let handle = match rt.ops.get(list).map(|op| &op.kind) {
        Some(OpKind::List(list_op)) => list_op.keyed.handle_of(key).unwrap(),
        _ => panic!("not a list opcode"),
    };
    match rt.ops.get(handle).map(|op| &op.kind) {
        Some(OpKind::Item(item)) => item.memo_cell,
        _ => panic!("not an item opcode"),
    }
}

#[test]
fn test_initial_sync_renders_items() {
    init_tracing();
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    let source = host.source(&mut rt.tags, 0, &[("k1", 1), ("k2", 2), ("k3", 3)]);
    let list = mount_list(&mut rt, source);

    vm.execute(&mut rt, &mut host, &[list]).unwrap();

    assert_eq!(rt.dom.text_of(NodeId::ROOT), "123");
    let stats = vm.stats();
    assert_eq!(stats.lists_synced, 1);
    assert_eq!(stats.items_inserted, 3);
    assert_eq!(stats.items_moved, 0);
    assert_eq!(stats.items_removed, 0);
    // One list opcode, three items, three bindings
    assert_eq!(rt.ops.len(), 7);
}

#[test]
fn test_quiescent_cycle_does_no_work() {
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    let source = host.source(&mut rt.tags, 0, &[("k1", 1), ("k2", 2)]);
    let list = mount_list(&mut rt, source);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();
    let first = vm.stats();

    vm.execute(&mut rt, &mut host, &[list]).unwrap();
    let second = vm.stats();

    assert_eq!(second.lists_synced, first.lists_synced);
    assert_eq!(second.bindings_recomputed, first.bindings_recomputed);
    assert_eq!(second.values_applied, first.values_applied);
    assert_eq!(rt.dom.text_of(NodeId::ROOT), "12");
}

#[test]
fn test_value_update_recomputes_one_binding() {
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    let source = host.source(&mut rt.tags, 0, &[("k1", 1), ("k2", 2), ("k3", 3)]);
    let list = mount_list(&mut rt, source);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();
    let before = vm.stats();

    host.set_items(&mut rt.tags, source, &[("k1", 1), ("k2", 20), ("k3", 3)]);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();
    let after = vm.stats();

    assert_eq!(rt.dom.text_of(NodeId::ROOT), "1203");
    assert_eq!(after.lists_synced, before.lists_synced + 1);
    assert_eq!(after.bindings_recomputed, before.bindings_recomputed + 1);
    assert_eq!(after.values_applied, before.values_applied + 1);
    assert_eq!(after.items_inserted, before.items_inserted);
    assert_eq!(after.items_removed, before.items_removed);
}

#[test]
fn test_reorder_moves_without_rebuilding() {
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    let source = host.source(&mut rt.tags, 0, &[("k1", 1), ("k2", 2), ("k3", 3)]);
    let list = mount_list(&mut rt, source);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();
    let handles_before = list_handles(&rt, list);
    let before = vm.stats();

    host.set_items(&mut rt.tags, source, &[("k2", 2), ("k3", 3), ("k1", 1)]);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();
    let after = vm.stats();

    assert_eq!(rt.dom.text_of(NodeId::ROOT), "231");
    assert_eq!(after.items_moved, before.items_moved + 1);
    assert_eq!(after.items_inserted, before.items_inserted);
    assert_eq!(after.items_removed, before.items_removed);
    assert!(host.destroyed().is_empty());

    // Same opcode instances, new order
    let handles_after = list_handles(&rt, list);
    assert_eq!(
        handles_after,
        vec![handles_before[1], handles_before[2], handles_before[0]]
    );
}

#[test]
fn test_removal_destroys_resources_once() {
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    let source = host.source(&mut rt.tags, 0, &[("k1", 1), ("k2", 2), ("k3", 3)]);
    let list = mount_list(&mut rt, source);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();

    host.set_items(&mut rt.tags, source, &[]);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();

    assert_eq!(rt.dom.text_of(NodeId::ROOT), "");
    assert_eq!(host.destroyed(), vec!["k1", "k2", "k3"]);
    // Only the list opcode survives; item cells were released
    assert_eq!(rt.ops.len(), 1);
    assert!(rt.cells.is_empty());

    // Re-inserting a deleted key produces a fresh opcode
    host.set_items(&mut rt.tags, source, &[("k1", 1)]);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();
    assert_eq!(rt.dom.text_of(NodeId::ROOT), "1");
    assert_eq!(vm.stats().items_inserted, 4);
}

#[test]
fn test_duplicate_keys_are_occurrence_stable() {
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    let source = host.source(&mut rt.tags, 0, &[("a", 1), ("b", 2), ("a", 3)]);
    let list = mount_list(&mut rt, source);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();
    assert_eq!(rt.dom.text_of(NodeId::ROOT), "123");

    // The second "a" is memoized under its occurrence-disambiguated key
    let second_a = ItemKey {
        raw: "a".to_owned(),
        occurrence: 1,
    };
    let memo_cell = item_memo_cell(&rt, list, &second_a);
    assert_eq!(
        rt.cells.read(memo_cell, &mut rt.tags),
        Some(&Value::Str("a#1".to_owned()))
    );

    let before = vm.stats();
    host.set_items(&mut rt.tags, source, &[("a", 1), ("a", 3), ("b", 2)]);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();
    let after = vm.stats();

    assert_eq!(rt.dom.text_of(NodeId::ROOT), "132");
    assert_eq!(after.items_inserted, before.items_inserted);
    assert_eq!(after.items_removed, before.items_removed);
    assert!(host.destroyed().is_empty());
}

#[test]
fn test_memo_cells_stable_across_identical_cycles() {
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    let source = host.source(&mut rt.tags, 0, &[("a", 1), ("b", 2), ("a", 3)]);
    let list = mount_list(&mut rt, source);
    vm.execute(&mut rt, &mut host, &[list]).unwrap();

    let second_a = ItemKey {
        raw: "a".to_owned(),
        occurrence: 1,
    };
    let memo_cell = item_memo_cell(&rt, list, &second_a);
    let memo_tag = rt.cells.tag(memo_cell).unwrap();

    // Re-sync with identical items: retain must write the same
    // disambiguated key back, leaving the memo cell clean
    host.set_items(&mut rt.tags, source, &[("a", 1), ("b", 2), ("a", 3)]);
    let snapshot = rt.tags.current_revision();
    vm.execute(&mut rt, &mut host, &[list]).unwrap();

    assert_eq!(
        rt.cells.read(memo_cell, &mut rt.tags),
        Some(&Value::Str("a#1".to_owned()))
    );
    assert!(rt.tags.validate(memo_tag, snapshot));
}

#[test]
fn test_exception_recovery_replaces_try_subtree() {
    init_tracing();
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    // Try block wrapping a binding that always fails
    let t_open = rt.dom.create_comment("");
    let t_text = rt.dom.create_text("initial");
    let t_close = rt.dom.create_comment("");
    for node in [t_open, t_text, t_close] {
        rt.dom.insert_before(NodeId::ROOT, node, None);
    }
    let fail_expr = host.expr(Expr::Fail);
    let failing = rt
        .ops
        .alloc(Op::new(OpKind::Binding(BindingOp::new(fail_expr, t_text))));
    host.resume_text.insert(7, "recovered");
    let try_id = rt.ops.alloc(Op::new(OpKind::Try(TryOp::new(
        vec![failing],
        LiveRegion::between(t_open, t_close),
        ResumePoint(7),
    ))));

    // Unrelated sibling binding after the try block
    let sib_text = rt.dom.create_text("");
    rt.dom.insert_before(NodeId::ROOT, sib_text, None);
    let sib_cell = rt.cells.alloc(&mut rt.tags, Value::from("sib"));
    let sib_expr = host.expr(Expr::Cell(sib_cell));
    let sibling = rt
        .ops
        .alloc(Op::new(OpKind::Binding(BindingOp::new(sib_expr, sib_text))));

    vm.execute(&mut rt, &mut host, &[try_id, sibling]).unwrap();

    assert_eq!(vm.stats().exceptions_recovered, 1);
    assert_eq!(rt.dom.text_of(NodeId::ROOT), "recoveredsib");
    // The failing opcode was destroyed; the try holds the fresh subtree
    assert!(rt.ops.get(failing).is_none());
    match rt.ops.get(try_id).map(|op| &op.kind) {
        Some(OpKind::Try(try_op)) => {
            assert!(try_op.children.is_empty());
            assert_ne!(try_op.region.first, t_open);
        }
        _ => panic!("try opcode missing"),
    }

    // Later cycles run the recovered tree without incident
    vm.execute(&mut rt, &mut host, &[try_id, sibling]).unwrap();
    assert_eq!(vm.stats().exceptions_recovered, 1);
}

#[test]
fn test_unhandled_error_propagates_and_resets_tracking() {
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    let text = rt.dom.create_text("x");
    rt.dom.insert_before(NodeId::ROOT, text, None);
    let fail_expr = host.expr(Expr::Fail);
    let failing = rt
        .ops
        .alloc(Op::new(OpKind::Binding(BindingOp::new(fail_expr, text))));

    let err = vm.execute(&mut rt, &mut host, &[failing]).unwrap_err();
    assert!(matches!(err, VmError::Host(_)));
    assert_eq!(rt.tags.tracking_depth(), 0);
    // The tree outside the failure is untouched
    assert_eq!(rt.dom.text_of(NodeId::ROOT), "x");

    // The runtime is still usable for unrelated work
    let cell = rt.cells.alloc(&mut rt.tags, Value::Int(9));
    let ok_expr = host.expr(Expr::Cell(cell));
    let healthy = rt
        .ops
        .alloc(Op::new(OpKind::Binding(BindingOp::new(ok_expr, text))));
    vm.execute(&mut rt, &mut host, &[healthy]).unwrap();
    assert_eq!(rt.dom.text_of(NodeId::ROOT), "9");
}

#[test]
fn test_block_guard_skips_valid_subtree() {
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    let text = rt.dom.create_text("");
    rt.dom.insert_before(NodeId::ROOT, text, None);
    let cell = rt.cells.alloc(&mut rt.tags, Value::Int(1));
    let expr = host.expr(Expr::Cell(cell));
    let binding = rt
        .ops
        .alloc(Op::new(OpKind::Binding(BindingOp::new(expr, text))));
    let guard = rt.cells.tag(cell).unwrap();
    let block = rt.ops.alloc(Op::new(OpKind::Block(BlockOp::guarded(
        vec![binding],
        LiveRegion::single(text),
        guard,
    ))));

    vm.execute(&mut rt, &mut host, &[block]).unwrap();
    assert_eq!(rt.dom.text_of(NodeId::ROOT), "1");
    let first = vm.stats();
    assert_eq!(first.bindings_recomputed, 1);

    // Guard valid: the child frame is never pushed
    vm.execute(&mut rt, &mut host, &[block]).unwrap();
    let second = vm.stats();
    assert_eq!(second.bindings_recomputed, first.bindings_recomputed);
    assert_eq!(second.frames_pushed, first.frames_pushed + 1);

    rt.cells.write(cell, &mut rt.tags, Value::Int(5));
    vm.execute(&mut rt, &mut host, &[block]).unwrap();
    assert_eq!(rt.dom.text_of(NodeId::ROOT), "5");
    assert_eq!(vm.stats().bindings_recomputed, first.bindings_recomputed + 1);
}

#[test]
fn test_two_lists_update_independently() {
    let mut rt = Runtime::new(FlatDom::new());
    let mut host = ScriptHost::new();
    let mut vm = UpdateVm::new();

    let left = host.source(&mut rt.tags, 0, &[("a", 1)]);
    let right = host.source(&mut rt.tags, 1, &[("z", 9)]);
    let left_list = mount_list(&mut rt, left);
    let right_list = mount_list(&mut rt, right);
    let roots = [left_list, right_list];

    vm.execute(&mut rt, &mut host, &roots).unwrap();
    assert_eq!(rt.dom.text_of(NodeId::ROOT), "19");
    let before = vm.stats();

    host.set_items(&mut rt.tags, left, &[("a", 1), ("b", 2)]);
    vm.execute(&mut rt, &mut host, &roots).unwrap();
    let after = vm.stats();

    assert_eq!(rt.dom.text_of(NodeId::ROOT), "129");
    // Only the dirtied list re-synchronized
    assert_eq!(after.lists_synced, before.lists_synced + 1);
    assert_eq!(after.items_inserted, before.items_inserted + 1);
}
