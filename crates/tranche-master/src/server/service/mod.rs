//! Request handling and coordination logic.
//!
//! This module contains the coordinator itself and the client-facing request
//! plumbing that feeds it.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env settings validated into [`config::ServerConfig`].
//! - [`handler`] - the [`handler::Master`] coordinator (query, dispatch,
//!   cancel).
//! - [`router`] - maps decoded request frames onto coordinator calls.
//! - [`session`] - accept loop and per-client sessions.

pub mod config;
pub mod handler;
pub mod router;
pub mod session;
