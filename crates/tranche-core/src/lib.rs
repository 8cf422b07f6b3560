//! # tranche-core
//!
//! Shared building blocks for the tranche coordinator and its workers:
//!
//! - [`TicketAllocator`] hands out disjoint, weight-sized [`TicketBlock`]s
//!   from a single lock-guarded counter.
//! - [`FrameCodec`] reads and writes the line-oriented `cmd:` / `body:`
//!   frames spoken by callers, the master and workers.
//! - [`JobState`], [`DispatchMessage`], [`QueryRequest`] and
//!   [`CancelReport`] are the JSON payloads carried in those frames.
//! - [`Error`] is the error type shared by all of the above.

mod allocator;
mod common;

pub use allocator::*;
pub use common::*;
