//! The error reporter: turns the controller's lifecycle events into a
//! single human-readable diagnostic line, `argv[0]`-prefixed.
//!
//! Grounded directly in `src/engine/reporters.py`'s `ErrorReporter`: same
//! four named events, same message text. The Python version threads an
//! `aterror` callback through `set_aterror`/`_handle_error` so any event can
//! unwind the whole program; here each event method just returns `bool`
//! (`true` = continue, `false` = abort) and the controller calls
//! [`ExecutionController::terminate_all`](crate::controller::ExecutionController::terminate_all)
//! itself on `false` — a callback isn't needed when the caller already has
//! the control flow in hand.

use std::io::Write;

/// Reports lifecycle events for one run to `sink`, prefixing every line
/// with the program name the way `strace`'s own diagnostics are prefixed.
pub struct ErrorReporter<W: Write> {
    program: String,
    sink: W,
}

impl<W: Write> ErrorReporter<W> {
    pub fn new(program: impl Into<String>, sink: W) -> Self {
        Self {
            program: program.into(),
            sink,
        }
    }

    fn report(&mut self, message: &str) {
        let _ = writeln!(self.sink, "{}: {}", self.program, message);
    }

    /// `TRACEE_WAIT_FOR_STARTED_EVENT`: the tracee must still be alive once
    /// the handshake completes.
    pub fn tracee_wait_for_started(&mut self, success: bool, exit_code_if_dead: i32) -> bool {
        if success {
            return true;
        }
        self.report(&format!(
            "tracee was externally terminated: exitcode {exit_code_if_dead}"
        ));
        false
    }

    /// `TRACER_STARTED_EVENT`: the tracer's first line must be its attach
    /// confirmation, not silence or a self-reported error.
    pub fn tracer_started(
        &mut self,
        first_line: Option<&str>,
        tracer_executable: &str,
        tracee_pid: i32,
    ) -> bool {
        let Some(line) = first_line else {
            self.report("strace doesn't respond");
            return false;
        };

        let attached = format!("{tracer_executable}: Process {tracee_pid} attached");
        if line == attached {
            return true;
        }

        let cannot_run_prefix = "cannot run strace: ";
        let own_prefix = format!("{tracer_executable}: ");
        if line.starts_with(cannot_run_prefix) || line.starts_with(own_prefix.as_str()) {
            self.report(line);
        } else {
            self.report("Unknown error");
        }
        false
    }

    /// `START_ACTUAL_TRACEE_EVENT`: `Some(Ok(()))` means the tracee's own
    /// `execve` of the user program succeeded (`code == 0` in the
    /// prototype); `Some(Err(strerror))` is `execve` failing in the child
    /// (`code == -1`); `None` is the watcher timing out before either.
    pub fn start_actual_tracee(&mut self, result: Option<Result<(), String>>) -> bool {
        match result {
            None => {
                self.report("actual tracee was not started");
                false
            }
            Some(Ok(())) => true,
            Some(Err(strerror)) => {
                self.report(&format!("cannot run tracee: {strerror}"));
                false
            }
        }
    }

    /// `STRACE_OUTPUT_NOT_SYSCALL_EVENT`: `None` means a syscall line
    /// scanned fine; `Some(line)` means the parser saw something it could
    /// not classify where only a syscall line was expected.
    pub fn strace_output_not_syscall(&mut self, line: Option<&str>) -> bool {
        match line {
            None => true,
            Some(line) => {
                self.report(&format!("Unexpected strace output line: {line}"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> ErrorReporter<Vec<u8>> {
        ErrorReporter::new("falla", Vec::new())
    }

    fn output(r: &ErrorReporter<Vec<u8>>) -> String {
        String::from_utf8_lossy(&r.sink).into_owned()
    }

    #[test]
    fn tracee_wait_for_started_reports_external_termination() {
        let mut r = reporter();
        assert!(!r.tracee_wait_for_started(false, -11));
        assert!(output(&r).contains("tracee was externally terminated: exitcode -11"));
    }

    #[test]
    fn tracer_started_accepts_attach_line() {
        let mut r = reporter();
        assert!(r.tracer_started(Some("strace: Process 123 attached"), "strace", 123));
        assert!(output(&r).is_empty());
    }

    #[test]
    fn tracer_started_reports_silence() {
        let mut r = reporter();
        assert!(!r.tracer_started(None, "strace", 123));
        assert!(output(&r).contains("strace doesn't respond"));
    }

    #[test]
    fn tracer_started_reports_self_reported_error() {
        let mut r = reporter();
        assert!(!r.tracer_started(
            Some("strace: option requires an argument"),
            "strace",
            123
        ));
        assert!(output(&r).contains("option requires an argument"));
    }

    #[test]
    fn start_actual_tracee_reports_exec_failure() {
        let mut r = reporter();
        assert!(!r.start_actual_tracee(Some(Err("No such file or directory".to_string()))));
        assert!(output(&r).contains("cannot run tracee: No such file or directory"));
    }

    #[test]
    fn strace_output_not_syscall_passes_through_none() {
        let mut r = reporter();
        assert!(r.strace_output_not_syscall(None));
    }
}
