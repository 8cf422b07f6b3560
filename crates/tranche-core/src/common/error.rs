//! Error types for the coordinator.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable failure of the coordination engine. Each variant
//! renders to a single human-readable line so the request layer can write it
//! back to the caller verbatim.
//!
//! ## Error Cases
//! - `InvalidRequest`: The request body was not valid JSON for its command.
//! - `UnknownCommand`: The request verb is not one of `get`, `start`, `cancel`.
//! - `WorkerOutOfRange`: A worker index does not exist in the registry.
//! - `WorkerUnavailable`: The worker has no live connection.
//! - `Timeout`: A write to a worker exceeded its deadline.
//! - `Io`: A socket read or write failed.
//! - `Encode`: A payload could not be serialized.
//! - `MalformedFrame` / `FrameTooLarge`: The byte stream is not a valid frame.
//! - `TicketSpaceExhausted`: The ticket counter cannot advance any further.

use core::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the coordinator.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The request body could not be parsed.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The request named a verb nobody handles.
    #[error("Unknown command: {command:?}")]
    UnknownCommand { command: String },

    /// The worker index is not part of the registry.
    #[error("Worker {index} out of range (registry holds {len} workers)")]
    WorkerOutOfRange { index: usize, len: usize },

    /// The worker never connected at startup.
    #[error("Worker {index} unavailable")]
    WorkerUnavailable { index: usize },

    /// A write did not complete before its deadline.
    #[error("Worker {index} timed out after {after:?}")]
    Timeout { index: usize, after: Duration },

    /// Socket failure, flattened to a message so the error stays `Clone`.
    #[error("I/O error: {context}")]
    Io { context: String },

    /// A payload could not be serialized.
    #[error("Encode error: {reason}")]
    Encode { reason: String },

    /// The byte stream does not follow the `cmd:` / `body:` layout.
    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },

    /// A frame grew past the configured limit before it was terminated.
    #[error("Frame of {len} bytes exceeds maximum ({max})")]
    FrameTooLarge { len: usize, max: usize },

    /// Advancing the counter by the requested block would overflow.
    #[error("Ticket space exhausted at {pointer} (requested weight {weight})")]
    TicketSpaceExhausted { pointer: u64, weight: u32 },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            context: err.to_string(),
        }
    }
}

impl Error {
    /// Wraps a JSON decoding failure of a request body.
    pub fn invalid_request(err: &serde_json::Error) -> Self {
        Self::InvalidRequest {
            reason: err.to_string(),
        }
    }

    /// The worker this error names in its own message, if any.
    pub const fn worker(&self) -> Option<usize> {
        match self {
            Self::WorkerOutOfRange { index, .. }
            | Self::WorkerUnavailable { index }
            | Self::Timeout { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Wraps a JSON encoding failure of an outgoing payload.
    pub fn encode(err: &serde_json::Error) -> Self {
        Self::Encode {
            reason: err.to_string(),
        }
    }
}
