//! Structured error types for dlmon
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to load eBPF program: {0}")]
    EbpfLoadFailed(#[from] aya::EbpfError),

    #[error("Failed to attach {probe} to {symbol} in {target}: {error}")]
    ProbeAttachFailed { probe: String, symbol: String, target: String, error: String },

    #[error("eBPF map {0} not found")]
    MapNotFound(&'static str),

    #[error("eBPF program {0} not found")]
    ProgramNotFound(&'static str),

    #[error("Process name {0:?} is longer than 15 bytes and can never match")]
    TargetNameTooLong(String),

    #[error("Polling the event channel failed: {0}")]
    PollFailed(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),

    #[error(transparent)]
    Program(#[from] aya::programs::ProgramError),
}

impl MonitorError {
    /// Process exit status for a poll failure: the absolute errno value
    #[must_use]
    pub fn poll_exit_code(&self) -> Option<i32> {
        match self {
            MonitorError::PollFailed(e) => Some(e.raw_os_error().map_or(1, i32::abs)),
            _ => None,
        }
    }
}

/// Why a text block did not become an event
///
/// Never surfaced to callers of the store; only logged.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty event block")]
    EmptyBlock,

    #[error("block header does not match `[<timestamp>] event: <type>`: {0:?}")]
    BadHeader(String),

    #[error("block header has an empty timestamp")]
    EmptyTimestamp,
}
