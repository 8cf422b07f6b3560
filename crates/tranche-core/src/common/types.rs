//! # Wire Types and Constants
//!
//! This module defines the payloads that travel between callers, the master
//! and its workers. Every payload is JSON and is carried in the `body:` line
//! of a [`Frame`].
//!
//! ## Overview
//!
//! - [`JobState`] - the caller-supplied job description (`hash` + `mod`)
//! - [`DispatchMessage`] - a job paired with the first ticket of its block
//! - [`QueryRequest`] - a `get` request naming a worker by index
//! - [`CancelReport`] - the summary returned after a cancel broadcast
//! - [`Command`] - the verbs understood on either side of the wire
//!
//! ## Constants
//!
//! - [`UNIT`] - ticket-block size per unit of worker weight
//! - [`SINGLE_MODE`] / [`THREAD_MODE`] - modes that target worker 0 only

use crate::common::{
    error::{Error, Result},
    frame::Frame,
};
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};

/// Number of tickets reserved per unit of worker weight.
pub const UNIT: u64 = 10_000_000_000;

/// Mode that dispatches to the first worker only.
pub const SINGLE_MODE: &str = "single";

/// Mode that dispatches to the first worker only, for thread-parallel jobs
/// that run inside a single worker.
pub const THREAD_MODE: &str = "thread";

/// Body of the structured cancel signal sent to every worker.
pub const CANCEL_BODY: &str = "{}";

/// Verbs carried in the `cmd:` line of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Reserve a block for one worker without contacting it.
    Get,
    /// Dispatch a job to the workers selected by its mode.
    Start,
    /// Ask every worker to stop.
    Cancel,
}

impl Command {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Start => "start",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "get" => Ok(Self::Get),
            "start" => Ok(Self::Start),
            "cancel" => Ok(Self::Cancel),
            other => Err(Error::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }
}

/// Which workers a dispatch reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// Worker 0 only.
    Single,
    /// Every registered worker.
    All,
}

impl FanOut {
    /// Maps a job mode onto its fan-out. Anything that is not
    /// [`SINGLE_MODE`] or [`THREAD_MODE`], including the empty string, means
    /// every worker.
    pub fn from_mode(mode: &str) -> Self {
        match mode {
            SINGLE_MODE | THREAD_MODE => Self::Single,
            _ => Self::All,
        }
    }

    /// Number of leading registry entries targeted, never more than
    /// `registry_len`.
    pub const fn target_count(self, registry_len: usize) -> usize {
        match self {
            Self::Single => {
                if registry_len == 0 {
                    0
                } else {
                    1
                }
            }
            Self::All => registry_len,
        }
    }
}

/// Caller-assigned job description.
///
/// Missing fields decode as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    #[serde(default)]
    pub hash: String,
    #[serde(default, rename = "mod")]
    pub mode: String,
}

impl JobState {
    pub fn new(hash: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            mode: mode.into(),
        }
    }

    pub fn fan_out(&self) -> FanOut {
        FanOut::from_mode(&self.mode)
    }

    /// Parses a `start` request body.
    pub fn from_body(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| Error::invalid_request(&e))
    }
}

/// A job paired with the first ticket of the block reserved for it.
///
/// Serializes flat: `{"pointer":..,"hash":..,"mod":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub pointer: u64,
    #[serde(flatten)]
    pub state: JobState,
}

impl DispatchMessage {
    pub const fn new(pointer: u64, state: JobState) -> Self {
        Self { pointer, state }
    }

    /// Wraps the message in a `start` frame.
    pub fn to_frame(&self) -> Result<Frame> {
        Frame::json(Command::Start, self)
    }

    /// Recovers a message from a `start` frame, as a worker would.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.command()? != Command::Start {
            return Err(Error::InvalidRequest {
                reason: format!("expected a start frame, got {:?}", frame.cmd),
            });
        }
        serde_json::from_str(&frame.body).map_err(|e| Error::invalid_request(&e))
    }
}

/// Body of a `get` request.
///
/// The worker index keeps its historical field name `cors` on the wire and
/// defaults to worker 0 when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default, rename = "cors")]
    pub worker: usize,
    #[serde(flatten)]
    pub state: JobState,
}

impl QueryRequest {
    pub fn from_body(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| Error::invalid_request(&e))
    }
}

/// Outcome of a cancel broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReport {
    /// Workers in the registry.
    pub workers: usize,
    /// Workers whose cancel signal was written before the deadline.
    pub delivered: usize,
}

impl CancelReport {
    pub fn to_frame(&self) -> Result<Frame> {
        Frame::json(Command::Cancel, self)
    }
}
