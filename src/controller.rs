//! The execution controller: per-run state machine from tracee spawn to
//! verdict, with two flavors — probe and inject.
//!
//! Grounded in `ExecutionController`/`InjectionExecutionController` from
//! `src/engine/controllers.py`, generalized to also cover the probe flavor
//! (`GeneratorExecutionController`, referenced by `generator.py` but not
//! present in the filtered prototype source — reconstructed here from its
//! one call site and from `fuzzer.py`'s single-flavor ancestor, which
//! registers a `REMEMBER_SYSCALLS` watcher and exposes `list_syscalls`).

use std::path::Path;
use std::time::Duration;

use nix::sys::signal::Signal;
use regex::Regex;

use crate::child::{TraceeHandle, TracerHandle};
use crate::errors::{ExitStatus, FallaError};
use crate::fault::Fault;
use crate::parser::{LineParser, ScanOutcome};
use crate::reporter::ErrorReporter;
use crate::watcher::{ErrorInjectWatcher, RegexWatcher, RememberSyscallsWatcher};

/// What a probe run learns about the target's uninstrumented syscall trace.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub list_syscalls: Vec<String>,
    pub list_dropped_syscalls: Vec<String>,
}

/// The per-run state machine. One instance drives exactly one tracee/tracer
/// pair from spawn to cleanup; the driver builds a fresh one per generated
/// fault.
pub struct ExecutionController<W: std::io::Write> {
    strace_executable: String,
    run_timeout: Duration,
    max_step: Duration,
    reporter: ErrorReporter<W>,
    tracee: Option<TraceeHandle>,
    tracer: Option<TracerHandle>,
    parser: LineParser,
}

impl<W: std::io::Write> ExecutionController<W> {
    pub fn new(
        strace_executable: impl Into<String>,
        run_timeout: Duration,
        max_step: Duration,
        reporter: ErrorReporter<W>,
    ) -> Self {
        Self {
            strace_executable: strace_executable.into(),
            run_timeout,
            max_step,
            reporter,
            tracee: None,
            tracer: None,
            parser: LineParser::new(),
        }
    }

    pub fn set_run_timeout(&mut self, timeout: Duration) {
        self.run_timeout = timeout;
    }

    /// Terminate tracer then tracee: the tracer holds the ptrace attachment,
    /// so killing it first lets the tracee make progress or die on its own
    /// before the SIGKILL reaches it. Safe to call more than once and on a
    /// controller that never finished setup.
    pub fn terminate_all(&mut self) {
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.terminate();
        }
        if let Some(tracee) = self.tracee.as_mut() {
            tracee.terminate();
        }
        self.tracer = None;
        self.tracee = None;
    }

    fn were(&self, watcher_name: &str) -> u32 {
        self.parser
            .watcher(watcher_name)
            .and_then(|w| w.as_any().downcast_ref::<ErrorInjectWatcher>())
            .map(|w| w.were())
            .unwrap_or(0)
    }

    /// Shared setup for both flavors: spawn tracee, spawn tracer, confirm
    /// attach, release the tracee, and scan until the target's own `execve`
    /// either returns or fails. Returns the syscalls observed before that
    /// point ("dropped": accounting-visible, not injectable).
    fn start_processes(
        &mut self,
        target: &Path,
        target_args: &[String],
        tracer_extra_args: &[String],
    ) -> Result<Vec<String>, FallaError> {
        let mut tracee = TraceeHandle::spawn(target, target_args)?;
        let started = tracee.wait_for_started();
        if !self.reporter.tracee_wait_for_started(
            started,
            tracee.exit_status(true).map(ExitStatus::as_code).unwrap_or(0),
        ) {
            tracee.terminate();
            return Err(FallaError::handshake(
                "tracee",
                "tracee was externally terminated before reaching the rendezvous",
            ));
        }

        let mut tracer = TracerHandle::spawn(&self.strace_executable, tracee.pid(), tracer_extra_args)?;

        let first_line = self.parser.read_line(&mut tracer, self.run_timeout, self.max_step);
        if !self.reporter.tracer_started(
            first_line.as_deref(),
            &self.strace_executable,
            tracee.pid().as_raw(),
        ) {
            tracer.terminate();
            tracee.terminate();
            return Err(FallaError::Attach(
                first_line.unwrap_or_else(|| "strace doesn't respond".to_string()),
            ));
        }

        let target_str = target.to_string_lossy();
        let start_regex = Regex::new(&format!(
            r#"^execve\("{}", .*\) = (?P<code>-?\d+)(?:$| (?P<errno>\w+) \((?P<strerror>[\w\s]+)\)$)"#,
            regex::escape(&target_str)
        ))
        .expect("execve regex must compile");
        self.parser.add_watcher("start", Box::new(RegexWatcher::new(start_regex)));
        self.parser
            .add_watcher("drop", Box::new(RememberSyscallsWatcher::new(None, true)));

        if !tracee.start_actual_tracee() {
            tracer.terminate();
            tracee.terminate();
            return Err(FallaError::handshake(
                "tracee",
                "broken pipe while releasing the tracee for exec",
            ));
        }

        let outcome = self.parser.continue_until_watchers(&mut tracer, self.run_timeout, self.max_step);

        let (start_fired, drop_fired, stop_line) = match &outcome {
            ScanOutcome::Fired { line, fired } => (
                fired.iter().any(|n| n == "start"),
                fired.iter().any(|n| n == "drop"),
                Some(line.clone()),
            ),
            ScanOutcome::TimedOut => (false, false, None),
        };

        if drop_fired && !start_fired {
            self.reporter.strace_output_not_syscall(stop_line.as_deref());
            tracer.terminate();
            tracee.terminate();
            return Err(FallaError::UnexpectedLine(stop_line.unwrap_or_default()));
        }

        let start_result: Option<Result<(), String>> = if !start_fired {
            None
        } else {
            let code: Option<i32> = self
                .parser
                .watcher("start")
                .and_then(|w| w.as_any().downcast_ref::<RegexWatcher>())
                .and_then(|w| w.group("code"))
                .and_then(|c| c.parse().ok());
            let strerror = self
                .parser
                .watcher("start")
                .and_then(|w| w.as_any().downcast_ref::<RegexWatcher>())
                .and_then(|w| w.group("strerror"))
                .map(|s| s.to_string());
            match code {
                Some(0) => Some(Ok(())),
                _ => Some(Err(strerror.unwrap_or_else(|| "exec failed".to_string()))),
            }
        };

        if !self.reporter.start_actual_tracee(start_result.clone()) {
            tracer.terminate();
            tracee.terminate();
            return match start_result {
                Some(Err(strerror)) => Err(FallaError::CannotRunTracee(strerror)),
                _ => Err(FallaError::Attach("actual tracee was not started".to_string())),
            };
        }

        let dropped = self
            .parser
            .watcher("drop")
            .and_then(|w| w.as_any().downcast_ref::<RememberSyscallsWatcher>())
            .map(|w| w.list_syscalls().to_vec())
            .unwrap_or_default();

        self.parser.remove_watcher("start");
        self.parser.remove_watcher("drop");

        self.tracee = Some(tracee);
        self.tracer = Some(tracer);
        Ok(dropped)
    }

    /// Probe flavor: runs the target uninstrumented and records every
    /// syscall it makes.
    pub fn run_probe(&mut self, target: &Path, target_args: &[String]) -> Result<ProbeResult, FallaError> {
        let list_dropped_syscalls = self.start_processes(target, target_args, &[])?;

        self.parser
            .add_watcher("probe", Box::new(RememberSyscallsWatcher::new(None, true)));
        let _ = self.parser.continue_until_watchers(
            self.tracer.as_mut().expect("start_processes populated tracer"),
            self.run_timeout,
            self.max_step,
        );

        let list_syscalls = self
            .parser
            .watcher("probe")
            .and_then(|w| w.as_any().downcast_ref::<RememberSyscallsWatcher>())
            .map(|w| w.list_syscalls().to_vec())
            .unwrap_or_default();

        self.terminate_all();
        Ok(ProbeResult {
            list_syscalls,
            list_dropped_syscalls,
        })
    }

    /// Inject flavor: applies one fault and reports whether it induced a
    /// SIGSEGV core dump. `Ok(Some(context))` is a confirmed crash
    /// (`context` is the triggering trace line); `Ok(None)` means the
    /// target never reached the injection point, or reached it but didn't
    /// crash — both expected outcomes of a fuzz run, not errors.
    pub fn run_inject(
        &mut self,
        target: &Path,
        target_args: &[String],
        fault: &Fault,
    ) -> Result<Option<String>, FallaError> {
        let tracer_args = vec!["-e".to_string(), fault.to_strace_directive()];
        self.start_processes(target, target_args, &tracer_args)?;

        self.parser.add_watcher(
            "inject",
            Box::new(ErrorInjectWatcher::new(fault.syscall(), fault.occurrence())),
        );

        let mut previous_were = self.were("inject");
        loop {
            let outcome = self.parser.continue_until_watchers(
                self.tracer.as_mut().expect("start_processes populated tracer"),
                self.run_timeout,
                self.max_step,
            );

            match outcome {
                ScanOutcome::Fired { line, fired } if fired.iter().any(|n| n == "inject") => {
                    let context = line;
                    self.parser.remove_watcher("inject");
                    let killed_regex = Regex::new(r"^\+{3} killed by SIGSEGV \(core dumped\) \+{3}$")
                        .expect("static regex must compile");
                    self.parser
                        .add_watcher("sigsegv", Box::new(RegexWatcher::new(killed_regex)));

                    let verdict_outcome = self.parser.continue_until_watchers(
                        self.tracer.as_mut().expect("start_processes populated tracer"),
                        self.run_timeout,
                        self.max_step,
                    );

                    let verdict = match verdict_outcome {
                        ScanOutcome::Fired { fired, .. } if fired.iter().any(|n| n == "sigsegv") => {
                            let code = self
                                .tracee
                                .as_mut()
                                .expect("start_processes populated tracee")
                                .exit_status(true);
                            debug_assert_eq!(code, Some(ExitStatus::Signaled(Signal::SIGSEGV)));
                            Some(context)
                        }
                        _ => None,
                    };

                    self.terminate_all();
                    return Ok(verdict);
                }
                ScanOutcome::Fired { .. } => {
                    // Only "inject" is registered at this point; nothing
                    // else can be in `fired`.
                    unreachable!("only the inject watcher is registered in this loop");
                }
                ScanOutcome::TimedOut => {
                    let were_now = self.were("inject");
                    if were_now == previous_were {
                        self.terminate_all();
                        return Ok(None);
                    }
                    previous_were = were_now;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use serial_test::serial;

    /// Writes an executable shell script that stands in for `strace`,
    /// echoing `lines` verbatim to its own stderr, one per line.
    fn stub_tracer_literal(dir: &std::path::Path, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.join("stub-strace");
        let mut script = String::from("#!/bin/sh\n");
        for line in lines {
            script.push_str(&format!("echo '{line}' 1>&2\n"));
        }
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Like `stub_tracer_literal`, but prepends the attach line strace
    /// itself would print, computed at shell runtime from `$0` (the
    /// executable path `falla` invoked it by) and `$2` (the tracee pid,
    /// since `falla` always execs it `-p <pid> ...`) — a real pid isn't
    /// known until after fork, so it can't be baked into the script text.
    fn stub_tracer_with_attach(dir: &std::path::Path, body_lines: &[&str]) -> std::path::PathBuf {
        let path = dir.join("stub-strace");
        let mut script = String::from("#!/bin/sh\necho \"$0: Process $2 attached\" 1>&2\n");
        for line in body_lines {
            script.push_str(&format!("echo '{line}' 1>&2\n"));
        }
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn controller(strace: &std::path::Path) -> ExecutionController<Vec<u8>> {
        ExecutionController::new(
            strace.to_string_lossy().into_owned(),
            Duration::from_millis(500),
            Duration::from_millis(50),
            ErrorReporter::new("falla", Vec::new()),
        )
    }

    #[test]
    #[serial]
    fn probe_run_reports_attach_failure_as_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let strace = stub_tracer_literal(dir.path(), &["cannot run strace: No such file or directory"]);
        let mut ctl = controller(&strace);
        let result = ctl.run_probe(std::path::Path::new("/bin/true"), &[]);
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn probe_run_collects_observed_syscalls() {
        let dir = tempfile::tempdir().unwrap();
        let strace = stub_tracer_with_attach(
            dir.path(),
            &[
                "execve(\"/bin/true\", [\"/bin/true\"], 0x0) = 0",
                "openat(AT_FDCWD, \"/a\") = 3",
                "openat(AT_FDCWD, \"/b\") = 4",
                "read(3, \"\", 0) = 0",
                "+++ exited with 0 +++",
            ],
        );
        let mut ctl = controller(&strace);
        let result = ctl.run_probe(std::path::Path::new("/bin/true"), &[]);
        match result {
            Ok(probe) => {
                assert!(probe.list_syscalls.contains(&"openat".to_string()));
            }
            Err(e) => {
                // Environments without a real /bin/true or sh may not
                // support this path; surface why rather than silently pass.
                panic!("expected Ok(probe), got {e}");
            }
        }
    }
}
