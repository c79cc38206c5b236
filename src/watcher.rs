//! Watchers: sticky stateful predicates over trace lines.
//!
//! Grounded in `src/utils/parser.py`'s `Watcher` base class and its
//! `watcher_call` decorator: "once fired, sticky" is implemented here as an
//! explicit wrapper around each variant's own predicate, not as
//! inheritance.

use std::any::Any;
use std::collections::HashMap;

use regex::Regex;

/// Capability set every concrete watcher satisfies via dynamic dispatch:
/// evaluate a line, and recall the line that made it fire.
/// `Any` lets a caller holding `&dyn Watcher` by name (the parser's
/// registry) downcast back to a concrete type to read its extra state
/// (e.g. `RegexWatcher::group`), the same way the prototype reaches into
/// `watchers["start"].matcher.group(...)` after `continue_until_watchers`.
pub trait Watcher: Any {
    /// Evaluate `line` against this watcher's own (non-sticky) predicate.
    /// Callers should go through [`fire`](Watcher::fire), not this, except
    /// when implementing the sticky wrapper itself.
    fn evaluate(&mut self, line: &str) -> bool;

    fn occasion(&self) -> Option<&str>;

    fn set_occasion(&mut self, line: &str);

    fn as_any(&self) -> &dyn Any;

    /// The sticky wrapper: once fired, returns `true` without
    /// re-inspecting `line` or mutating state further.
    fn fire(&mut self, line: &str) -> bool {
        if self.occasion().is_some() {
            return true;
        }
        if self.evaluate(line) {
            self.set_occasion(line);
            true
        } else {
            false
        }
    }
}

/// Fires when `line` starts with `syscall`, on its Nth such occurrence.
/// Mirrors `ERROR_INJECT_WATCHER` in `src/utils/parser.py`.
pub struct ErrorInjectWatcher {
    syscall: String,
    when: u32,
    were: u32,
    occasion: Option<String>,
}

impl ErrorInjectWatcher {
    /// # Panics
    /// Panics if `when` is zero; the prototype raises `ValueError` for the
    /// same input.
    pub fn new(syscall: impl Into<String>, when: u32) -> Self {
        assert!(when >= 1, "ErrorInjectWatcher when must be >= 1");
        Self {
            syscall: syscall.into(),
            when,
            were: 0,
            occasion: None,
        }
    }

    /// How many matching-prefix lines have been seen so far, fired or not.
    pub fn were(&self) -> u32 {
        self.were
    }
}

impl Watcher for ErrorInjectWatcher {
    fn evaluate(&mut self, line: &str) -> bool {
        if line.starts_with(self.syscall.as_str()) {
            self.were += 1;
        }
        self.were == self.when
    }

    fn occasion(&self) -> Option<&str> {
        self.occasion.as_deref()
    }

    fn set_occasion(&mut self, line: &str) {
        self.occasion = Some(line.to_string());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Fires when `line` matches a compiled regex; exposes the named capture
/// groups of the match (copied out as owned strings, so the watcher never
/// borrows from the line it was called with).
pub struct RegexWatcher {
    regex: Regex,
    groups: HashMap<String, String>,
    occasion: Option<String>,
}

impl RegexWatcher {
    pub fn new(regex: Regex) -> Self {
        Self {
            regex,
            groups: HashMap::new(),
            occasion: None,
        }
    }

    /// Named capture group from the line that fired this watcher, if any.
    pub fn group(&self, name: &str) -> Option<&str> {
        self.groups.get(name).map(|s| s.as_str())
    }
}

impl Watcher for RegexWatcher {
    fn evaluate(&mut self, line: &str) -> bool {
        match self.regex.captures(line) {
            Some(caps) => {
                self.groups = self
                    .regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                    .collect();
                true
            }
            None => false,
        }
    }

    fn occasion(&self) -> Option<&str> {
        self.occasion.as_deref()
    }

    fn set_occasion(&mut self, line: &str) {
        self.occasion = Some(line.to_string());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The line shapes `TerminationWatcher` classifies a line into.
/// `Exited`/`Killed`/`Unexpected` are terminating; the rest are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Syscall,
    SyscallResumed,
    Signal,
    Exited,
    Killed,
    Unexpected,
}

impl LineClass {
    pub fn is_terminating(self) -> bool {
        matches!(self, LineClass::Exited | LineClass::Killed | LineClass::Unexpected)
    }
}

struct LinePatterns {
    syscall: Regex,
    syscall_resumed: Regex,
    signal: Regex,
    exited: Regex,
    killed: Regex,
}

impl LinePatterns {
    fn new() -> Self {
        Self {
            syscall: Regex::new(r"^(?P<syscall>\w+)\(").unwrap(),
            syscall_resumed: Regex::new(r"^<\.{3} (?P<syscall>\w+) resumed>").unwrap(),
            signal: Regex::new(r"^-{3} (?P<signal>SIG\w+) \{.*\} -{3}$").unwrap(),
            exited: Regex::new(r"^\+{3} exited with (?P<exitcode>\d+) \+{3}$").unwrap(),
            killed: Regex::new(r"^\+{3} killed by (?P<signal>SIG\w+).* \+{3}$").unwrap(),
        }
    }

    fn classify(&self, line: &str) -> (LineClass, Option<String>) {
        if let Some(caps) = self.syscall.captures(line) {
            return (LineClass::Syscall, Some(caps["syscall"].to_string()));
        }
        if let Some(caps) = self.syscall_resumed.captures(line) {
            return (LineClass::SyscallResumed, Some(caps["syscall"].to_string()));
        }
        if self.signal.is_match(line) {
            return (LineClass::Signal, None);
        }
        if self.exited.is_match(line) {
            return (LineClass::Exited, None);
        }
        if self.killed.is_match(line) {
            return (LineClass::Killed, None);
        }
        (LineClass::Unexpected, None)
    }
}

/// Classifies lines and fires on a terminating class.
pub struct TerminationWatcher {
    patterns: LinePatterns,
    class: Option<LineClass>,
    occasion: Option<String>,
}

impl Default for TerminationWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationWatcher {
    pub fn new() -> Self {
        Self {
            patterns: LinePatterns::new(),
            class: None,
            occasion: None,
        }
    }

    pub fn class(&self) -> Option<LineClass> {
        self.class
    }

    /// Runs classification without the sticky wrapper, exposing both the
    /// class and whether it terminates — used by `RememberSyscallsWatcher`,
    /// which composes a `TerminationWatcher` rather than inheriting from
    /// it.
    fn classify_line(&mut self, line: &str) -> (LineClass, Option<String>) {
        let (class, captured) = self.patterns.classify(line);
        self.class = Some(class);
        (class, captured)
    }
}

impl Watcher for TerminationWatcher {
    fn evaluate(&mut self, line: &str) -> bool {
        let (class, _) = self.classify_line(line);
        class.is_terminating()
    }

    fn occasion(&self) -> Option<&str> {
        self.occasion.as_deref()
    }

    fn set_occasion(&mut self, line: &str) {
        self.occasion = Some(line.to_string());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Extends `TerminationWatcher` by composition: records every syscall name
/// seen, optionally capping the run and optionally treating signals as
/// terminating too.
pub struct RememberSyscallsWatcher {
    inner: TerminationWatcher,
    max_syscalls: Option<usize>,
    skip_signals: bool,
    list_syscalls: Vec<String>,
    occasion: Option<String>,
}

impl RememberSyscallsWatcher {
    pub fn new(max_syscalls: Option<usize>, skip_signals: bool) -> Self {
        Self {
            inner: TerminationWatcher::new(),
            max_syscalls,
            skip_signals,
            list_syscalls: Vec::new(),
            occasion: None,
        }
    }

    pub fn list_syscalls(&self) -> &[String] {
        &self.list_syscalls
    }
}

impl Watcher for RememberSyscallsWatcher {
    fn evaluate(&mut self, line: &str) -> bool {
        let (class, captured) = self.inner.classify_line(line);
        let terminated = class.is_terminating();

        if class == LineClass::Syscall {
            if let Some(name) = captured {
                self.list_syscalls.push(name);
            }
            if let Some(max) = self.max_syscalls {
                if self.list_syscalls.len() == max {
                    return true;
                }
            }
        }

        if !self.skip_signals && class == LineClass::Signal {
            return true;
        }

        terminated
    }

    fn occasion(&self) -> Option<&str> {
        self.occasion.as_deref()
    }

    fn set_occasion(&mut self, line: &str) {
        self.occasion = Some(line.to_string());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_inject_fires_on_nth_occurrence() {
        let mut w = ErrorInjectWatcher::new("open", 3);
        assert!(!w.fire("open(\"a\") = 3"));
        assert!(!w.fire("read(3, ...) = 10"));
        assert!(!w.fire("open(\"b\") = 4"));
        assert!(!w.fire("write(1, ...) = 5"));
        assert!(w.fire("open(\"c\") = 5"));
        assert_eq!(w.occasion(), Some("open(\"c\") = 5"));
        assert_eq!(w.were(), 3);
    }

    #[test]
    fn sticky_watcher_does_not_remutate_after_firing() {
        let mut w = ErrorInjectWatcher::new("open", 1);
        assert!(w.fire("open() = 1"));
        assert_eq!(w.were(), 1);
        // Further calls with lines that would otherwise advance `were`
        // must not do so: the watcher is sticky.
        assert!(w.fire("open() = 2"));
        assert_eq!(w.were(), 1);
    }

    #[test]
    #[should_panic(expected = "when must be >= 1")]
    fn error_inject_rejects_zero_when() {
        ErrorInjectWatcher::new("open", 0);
    }

    #[test]
    fn regex_watcher_exposes_capture_groups() {
        let re = Regex::new(r#"^execve\("(?P<path>[^"]+)", .*\) = (?P<code>-?\d+)"#).unwrap();
        let mut w = RegexWatcher::new(re);
        assert!(w.fire("execve(\"/bin/t\", [\"/bin/t\"], 0x0) = 0"));
        assert_eq!(w.group("path"), Some("/bin/t"));
        assert_eq!(w.group("code"), Some("0"));
    }

    #[test]
    fn termination_watcher_classifies_shapes() {
        let mut w = TerminationWatcher::new();
        assert!(!w.fire("openat(AT_FDCWD, \"/etc\", O_RDONLY) = 3"));
        assert_eq!(w.class(), Some(LineClass::Syscall));

        let mut w = TerminationWatcher::new();
        assert!(w.fire("+++ exited with 0 +++"));
        assert_eq!(w.class(), Some(LineClass::Exited));

        let mut w = TerminationWatcher::new();
        assert!(w.fire("+++ killed by SIGSEGV (core dumped) +++"));
        assert_eq!(w.class(), Some(LineClass::Killed));

        let mut w = TerminationWatcher::new();
        assert!(!w.fire("--- SIGCHLD {si_signo=SIGCHLD} ---"));
        assert_eq!(w.class(), Some(LineClass::Signal));

        let mut w = TerminationWatcher::new();
        assert!(!w.fire("<... read resumed>= 10"));
        assert_eq!(w.class(), Some(LineClass::SyscallResumed));
    }

    #[test]
    fn remember_syscalls_accumulates_and_caps() {
        let mut w = RememberSyscallsWatcher::new(Some(2), true);
        assert!(!w.fire("openat(AT_FDCWD, \"/a\") = 3"));
        assert!(w.fire("read(3, ...) = 10"));
        assert_eq!(w.list_syscalls(), &["openat".to_string(), "read".to_string()]);
    }

    #[test]
    fn remember_syscalls_defers_signals_when_not_skipped() {
        let mut w = RememberSyscallsWatcher::new(None, false);
        assert!(w.fire("--- SIGSEGV {si_signo=SIGSEGV} ---"));
    }

    #[test]
    fn remember_syscalls_terminates_on_exit_line() {
        let mut w = RememberSyscallsWatcher::new(None, true);
        assert!(!w.fire("write(1, \"hi\", 2) = 2"));
        assert!(w.fire("+++ exited with 0 +++"));
        assert_eq!(w.list_syscalls(), &["write".to_string()]);
    }
}
