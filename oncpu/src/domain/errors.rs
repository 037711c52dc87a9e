//! Structured error types for oncpu
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! The enums follow the failure classes of the sampling pipeline: configuration
//! problems are fatal at construction, attach failures are per thread, decode
//! failures are per drain pass.

use super::types::{Pid, Tid};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("please provide the on-CPU dump period")]
    EmptyPeriod,

    #[error("the on-CPU dump period format is not right, current value: {0}")]
    InvalidPeriod(String),

    #[error("the on-CPU dump period could not be smaller than 1ms, current value: {0}")]
    PeriodTooSmall(String),

    #[error("the processes count must be 1, current is: {0}")]
    ProcessCount(usize),

    #[error("process {0} could not be profiled: no symbol table")]
    NoSymbolTable(Pid),

    #[error("data page count must be a non-zero power of two, got {0}")]
    DataPages(usize),
}

/// A kernel call failed while attaching to one thread.
///
/// Recoverable: the runner logs it and carries on with the remaining threads.
#[derive(Error, Debug)]
#[error("failed to attach to {tid}: {call} failed: {source}")]
pub struct AttachError {
    pub tid: Tid,
    pub call: &'static str,
    #[source]
    pub source: std::io::Error,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated record header: {available} bytes readable, {needed} needed")]
    TruncatedHeader { available: u64, needed: u64 },

    #[error("record of {declared} bytes exceeds the {available} readable bytes")]
    TruncatedRecord { declared: u64, available: u64 },

    #[error("producer cursor {head} is behind consumer cursor {tail}")]
    CursorInversion { head: u64, tail: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("mapping of {len} bytes is smaller than the {needed} byte metadata page")]
    MappingTooSmall { len: usize, needed: usize },

    #[error("data region size {0} is not a power of two")]
    DataSizeNotPowerOfTwo(u64),

    #[error("data region [{offset}, {offset}+{size}) lies outside the {len} byte mapping")]
    DataOutOfBounds { offset: u64, size: u64, len: usize },

    #[error("metadata page is not 8-byte aligned")]
    Misaligned,
}

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Attach(#[from] AttachError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("invalid runner state: {operation} called while {state}")]
    InvalidState { operation: &'static str, state: &'static str },

    #[error("failed to wait for sampling readiness: {0}")]
    WaitFailed(#[source] std::io::Error),

    #[error("failed to list the threads of {pid}")]
    ThreadList {
        pid: Pid,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ProcessCount(2);
        assert_eq!(err.to_string(), "the processes count must be 1, current is: 2");
    }

    #[test]
    fn test_attach_error_display() {
        let err = AttachError {
            tid: Tid(42),
            call: "perf_event_open",
            source: std::io::Error::from_raw_os_error(libc::ESRCH),
        };
        let msg = err.to_string();
        assert!(msg.contains("TID:42"));
        assert!(msg.contains("perf_event_open"));
    }

    #[test]
    fn test_profiler_error_wraps_config() {
        let err: ProfilerError = ConfigError::EmptyPeriod.into();
        assert!(err.to_string().contains("period"));
    }

    #[test]
    fn test_thread_list_keeps_cause() {
        use std::error::Error as _;

        let cause = anyhow::Error::from(std::io::Error::from_raw_os_error(libc::ENOENT))
            .context("Failed to read /proc/7/task");
        let err = ProfilerError::ThreadList { pid: Pid(7), source: cause.into() };
        assert_eq!(err.to_string(), "failed to list the threads of PID:7");
        let source = err.source().expect("cause is kept");
        assert_eq!(source.to_string(), "Failed to read /proc/7/task");
        assert!(source.source().is_some());
    }
}
