//! The `Fault` value type: a `(syscall, error, occurrence)` injection target.

use std::fmt;

/// A single fault-injection target: turn the `occurrence`-th call to
/// `syscall` into a failed call returning `error`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fault {
    syscall: String,
    error: String,
    occurrence: u32,
}

impl Fault {
    /// Build a new fault. `occurrence` must be `>= 1`.
    ///
    /// # Panics
    /// Panics if `occurrence` is zero — callers construct faults from
    /// already-validated generator/CLI input, so this is a programmer error,
    /// not a recoverable one.
    pub fn new(syscall: impl Into<String>, error: impl Into<String>, occurrence: u32) -> Self {
        assert!(occurrence >= 1, "Fault occurrence must be >= 1");
        Self {
            syscall: syscall.into(),
            error: error.into(),
            occurrence,
        }
    }

    pub fn syscall(&self) -> &str {
        &self.syscall
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn occurrence(&self) -> u32 {
        self.occurrence
    }

    /// The `-e` directive strace expects: `fault=<syscall>:error=<ERRNO>:when=<occurrence>`.
    pub fn to_strace_directive(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fault={}:error={}:when={}",
            self.syscall, self.error, self.occurrence
        )
    }
}
