//! Runtime error types and the fatal-abort path.
//!
//! Mirrors the distinction the original C++ runtime draws between
//! recoverable resource exhaustion (return an error code) and unrecoverable
//! conditions (log and abort the process outright) -- see `xmemory.h`'s
//! `abort()` calls on unexpected SIGSEGV codes and `xheap.h`'s behavior on
//! out-of-memory.

use thiserror::Error;

/// Errors surfaced by the public runtime API.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("os error during {op}: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("thread {0} not found")]
    ThreadNotFound(u32),

    #[error("mutex is not initialized")]
    MutexUninitialized,
}

impl RuntimeError {
    pub fn os(op: &'static str) -> Self {
        RuntimeError::Os { op, source: std::io::Error::last_os_error() }
    }
}

/// Logs `msg` at error level, then aborts the process.
///
/// Used for conditions the design treats as unrecoverable: an unexpected
/// page fault code, a corrupted lock's magic number, a worker that could
/// not be spawned. There is deliberately no panic/unwind path here --
/// abort matches the behavior of the C++ runtime's `abort()` calls, and
/// unwinding across a `SIGSEGV` handler's restored context would not be
/// meaningful anyway.
pub fn fatal(msg: &str) -> ! {
    log::error!("fatal: {msg}");
    std::process::abort();
}
