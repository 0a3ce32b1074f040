//! Trellis VM - Incremental update engine
//!
//! A persistent tree of update opcodes (live bindings, blocks, exception
//! boundaries, keyed lists) re-executed once per update cycle. Only
//! subtrees whose dependency tags are stale do any work; keyed lists are
//! re-synchronized through the reconciler; failures are recovered at the
//! nearest try-boundary by destroying and re-deriving its subtree.

mod builder;
mod cells;
mod dom;
mod error;
mod host;
mod opcode;
mod region;
mod value;
mod vm;

pub use builder::Builder;
pub use cells::{CellId, CellStore};
pub use dom::{FlatDom, NodeId, NodeKind, TreeMutator};
pub use error::VmError;
pub use host::{EvalCx, ExprId, Host, ListItem, RenderCx, ResumePoint, SourceId};
pub use opcode::{BindingOp, BlockOp, DestroyBag, ItemOp, ListOp, Op, OpArena, OpId, OpKind, TryOp};
pub use region::LiveRegion;
pub use value::Value;
pub use vm::{Runtime, UpdateVm, VmStats};
