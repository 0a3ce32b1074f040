//! Trellis Reconcile - Keyed list diffing
//!
//! Transforms a previous keyed ordering into a new one with a minimal
//! edit script (retain/move/insert/delete), reusing handles for retained
//! keys. Edits are emitted through an injected target so the caller owns
//! the actual items.

mod key;
mod list;

pub use key::{ItemKey, KeyDeduper};
pub use list::{KeyedList, ReconcileTarget, SyncStats};
