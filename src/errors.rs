//! The error taxonomy for one run.
//!
//! "The target made no progress" and "the target ran but didn't crash" are
//! deliberately absent: they are expected outcomes of a fuzz campaign, not
//! failures, and are modeled as plain enum returns from the controller
//! rather than `Err` variants.

use std::io;

use nix::sys::signal::Signal;
use thiserror::Error;

/// Fatal error kinds the controller can raise while driving one run.
#[derive(Debug, Error)]
pub enum FallaError {
    /// fork/exec failed; unrecoverable for the run.
    #[error("failed to spawn {who}: {source}")]
    Spawn {
        who: &'static str,
        #[source]
        source: io::Error,
    },

    /// A child died before the rendezvous, or a handshake pipe write hit
    /// broken-pipe.
    #[error("handshake with {who} failed: {reason}")]
    Handshake { who: &'static str, reason: String },

    /// The tracer produced an unexpected first line, never produced one, or
    /// the attach line never appeared.
    #[error("{0}")]
    Attach(String),

    /// The external tracer binary reported its own error on the first line.
    #[error("{tracer}: {message}")]
    TracerReported { tracer: String, message: String },

    /// The tracee's own exec of the user target failed.
    #[error("cannot run tracee: {0}")]
    CannotRunTracee(String),

    /// strace produced an output line this parser does not understand in a
    /// context where only a specific shape was expected.
    #[error("unexpected strace output line: {0}")]
    UnexpectedLine(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Nix(#[from] nix::Error),

    /// The syscall-error catalog failed to parse.
    #[error("failed to load syscall-error catalog: {0}")]
    Catalog(#[from] serde_json::Error),
}

impl FallaError {
    pub fn spawn(who: &'static str, source: io::Error) -> Self {
        Self::Spawn { who, source }
    }

    pub fn handshake(who: &'static str, reason: impl Into<String>) -> Self {
        Self::Handshake {
            who,
            reason: reason.into(),
        }
    }
}

/// A child exited normally (non-negative code) or died by signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(Signal),
}

impl ExitStatus {
    /// Non-negative = exit code, negative = `-signal`.
    pub fn as_code(self) -> i32 {
        match self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled(sig) => -(sig as i32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_encodes_exit_code_and_signal() {
        assert_eq!(ExitStatus::Exited(0).as_code(), 0);
        assert_eq!(ExitStatus::Exited(1).as_code(), 1);
        assert_eq!(
            ExitStatus::Signaled(Signal::SIGSEGV).as_code(),
            -(Signal::SIGSEGV as i32)
        );
    }
}
