//! Worker registry and connection pool.
//!
//! - [`registry`] - worker list loading and the fixed [`registry::Registry`].
//! - [`connection`] - per-worker serialized, deadline-bounded writes.

pub mod connection;
pub mod registry;
