//! Trellis Tags - Dependency tracking primitives
//!
//! A pull-based invalidation system: every reactive source carries a tag,
//! writes advance a global logical clock, and staleness is detected by
//! comparing revisions. No subscriber lists, no notification fan-out.

mod cached;
mod cell;
mod revision;
mod tag;

pub use cached::CachedRef;
pub use cell::Cell;
pub use revision::{Revision, RevisionClock};
pub use tag::{TagId, Tags};
