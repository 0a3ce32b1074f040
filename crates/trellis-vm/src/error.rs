//! Update VM errors

use crate::{NodeId, OpId};

/// Result type for update operations
pub type VmResult<T> = Result<T, VmError>;

/// Errors surfaced by an update cycle
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    /// The host failed to evaluate an expression or render content
    #[error("host error: {0}")]
    Host(String),

    /// An opcode handle does not resolve to a live opcode
    #[error("opcode {0:?} is not resident in the arena")]
    MissingOp(OpId),

    /// A region's boundary node is not attached to the tree
    #[error("node {0:?} is detached")]
    Detached(NodeId),

    /// An opcode was asked to recover but is not a try-boundary
    #[error("opcode {0:?} is not an exception handler")]
    NotAHandler(OpId),
}

impl VmError {
    /// Convenience constructor for host-side failures
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }
}
