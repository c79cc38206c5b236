//! Fork-exec wrappers with the tracee/tracer handshake protocol.
//!
//! Mirrors `src/engine/processes.py` (`AbstractPipeProcess`, `TracerProcess`,
//! `TraceeProcess`) from the Python prototype this crate reimplements, in
//! the idiom `renacer::tracer` uses for its own fork plumbing: raw
//! `nix::unistd` calls, `unsafe { fork() }` isolated to one call site per
//! child. Pipe endpoints are tracked as plain `RawFd`s (not `OwnedFd`)
//! because ownership crosses the fork boundary in ways `OwnedFd`'s `Drop`
//! can't express — ends need closing in one process but not the other.

use std::ffi::CString;
use std::os::unix::io::{BorrowedFd, IntoRawFd, RawFd};
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, fork, pipe, pipe2, read, write, ForkResult, Pid};

use crate::errors::{ExitStatus, FallaError};

const WAIT_TOKEN: &[u8] = b"wait";
const START_TOKEN: &[u8] = b"start";

fn raw_pipe2(flags: OFlag) -> nix::Result<(RawFd, RawFd)> {
    let (r, w) = pipe2(flags)?;
    Ok((r.into_raw_fd(), w.into_raw_fd()))
}

fn raw_pipe() -> nix::Result<(RawFd, RawFd)> {
    let (r, w) = pipe()?;
    Ok((r.into_raw_fd(), w.into_raw_fd()))
}

/// Shared fork-exec bookkeeping: pid, cached exit status, idempotent
/// `terminate`. The implicit lifecycle is unspawned -> running -> reaped: a
/// `ChildCore` only ever exists for an already-forked pid, and `exit_status`
/// settles once `waitpid` reports a terminal status.
#[derive(Debug)]
struct ChildCore {
    pid: Pid,
    exit_status: Option<ExitStatus>,
}

impl ChildCore {
    fn new(pid: Pid) -> Self {
        Self {
            pid,
            exit_status: None,
        }
    }

    fn exit_status(&mut self, blocking: bool) -> Option<ExitStatus> {
        if self.exit_status.is_some() {
            return self.exit_status;
        }

        let flag = if blocking {
            None
        } else {
            Some(WaitPidFlag::WNOHANG)
        };

        match waitpid(self.pid, flag) {
            Ok(WaitStatus::Exited(_, code)) => {
                self.exit_status = Some(ExitStatus::Exited(code));
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                self.exit_status = Some(ExitStatus::Signaled(sig));
            }
            Ok(_) => {
                // Still running (WNOHANG saw pid 0), or a stop/continue
                // event this handle doesn't track.
            }
            Err(nix::Error::ECHILD) => {
                // Already reaped elsewhere; nothing more to learn.
            }
            Err(_) => {}
        }

        self.exit_status
    }

    /// Idempotent: SIGKILL if still running, then blocking reap. Safe to
    /// call on an already-reaped handle.
    fn terminate(&mut self) {
        if self.exit_status(false).is_none() {
            let _ = kill(self.pid, Signal::SIGKILL);
            self.exit_status(true);
        }
    }
}

fn set_cloexec(fd: RawFd) -> nix::Result<()> {
    // SAFETY: `fd` is owned by the caller for the duration of this call;
    // this borrow is not retained past it.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let flags = FdFlag::from_bits_truncate(fcntl(borrowed, FcntlArg::F_GETFD)?);
    fcntl(borrowed, FcntlArg::F_SETFD(flags | FdFlag::FD_CLOEXEC))?;
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    // SAFETY: `fd` is owned by the caller for the duration of this call;
    // this borrow is not retained past it.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let flags = OFlag::from_bits_truncate(fcntl(borrowed, FcntlArg::F_GETFL)?);
    fcntl(borrowed, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

fn close_quiet(fd: RawFd) {
    let _ = close(fd);
}

fn cstring(s: &str) -> CString {
    CString::new(s).expect("argument must not contain a NUL byte")
}

/// The user-supplied target process. Handshakes with the parent over two
/// pipes so the tracer can attach before the target's own `execve` runs.
#[derive(Debug)]
pub struct TraceeHandle {
    core: ChildCore,
    /// Parent's read end of the child→parent "wait" pipe.
    wait_read: RawFd,
    /// Parent's write end of the parent→child "start" pipe.
    start_write: RawFd,
    target: String,
}

impl TraceeHandle {
    /// Fork a child that blocks on the handshake before exec'ing `target`.
    /// Returns only after the fork; the child is still waiting at the
    /// rendezvous point (`wait_for_started` observes that).
    pub fn spawn(target: &Path, args: &[String]) -> Result<Self, FallaError> {
        let target = target
            .to_str()
            .ok_or_else(|| FallaError::handshake("tracee", "target path is not valid UTF-8"))?
            .to_string();

        let (rstart, wstart) = raw_pipe2(OFlag::O_CLOEXEC).map_err(FallaError::from)?;
        let (rwait, wwait) = raw_pipe2(OFlag::O_CLOEXEC).map_err(FallaError::from)?;

        // SAFETY: the child only calls async-signal-safe syscalls (read,
        // write, close, execve) before either exec'ing or _exit'ing; no
        // Rust allocator or destructor runs on the child's path below.
        match unsafe { fork() }.map_err(|e| FallaError::spawn("tracee", e.into()))? {
            ForkResult::Child => {
                close_quiet(rwait);
                close_quiet(wstart);
                child_exec_tracee(rstart, wwait, &target, args);
            }
            ForkResult::Parent { child } => {
                close_quiet(wwait);
                close_quiet(rstart);
                let _ = set_cloexec(rwait);
                let _ = set_cloexec(wstart);
                Ok(Self {
                    core: ChildCore::new(child),
                    wait_read: rwait,
                    start_write: wstart,
                    target,
                })
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.core.pid
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Waits for the child to reach the rendezvous (it writes immediately
    /// after fork, so this does not block meaningfully in practice).
    /// Returns `false` if the child died before reaching it.
    pub fn wait_for_started(&mut self) -> bool {
        let mut buf = [0u8; 4];
        // SAFETY: `wait_read` is owned by `self` for the duration of this call.
        let borrowed = unsafe { BorrowedFd::borrow_raw(self.wait_read) };
        match read(borrowed, &mut buf) {
            Ok(n) => n == WAIT_TOKEN.len() && &buf[..n] == WAIT_TOKEN,
            Err(_) => false,
        }
    }

    /// Authorizes the child to `exec` the target. Returns `false` if the
    /// child is already gone (`BrokenPipe`).
    pub fn start_actual_tracee(&mut self) -> bool {
        // SAFETY: `start_write` is owned by `self` for the duration of this call.
        let borrowed = unsafe { BorrowedFd::borrow_raw(self.start_write) };
        write(borrowed, START_TOKEN).is_ok()
    }

    pub fn exit_status(&mut self, blocking: bool) -> Option<ExitStatus> {
        self.core.exit_status(blocking)
    }

    pub fn terminate(&mut self) {
        self.core.terminate();
    }
}

impl Drop for TraceeHandle {
    fn drop(&mut self) {
        close_quiet(self.wait_read);
        close_quiet(self.start_write);
    }
}

fn child_exec_tracee(rstart: RawFd, wwait: RawFd, target: &str, args: &[String]) -> ! {
    // SAFETY: `wwait`/`rstart` are owned by this process for the duration
    // of this call (the child's copy of the handshake pipe fds).
    let wwait_borrowed = unsafe { BorrowedFd::borrow_raw(wwait) };
    let wrote_wait = write(wwait_borrowed, WAIT_TOKEN).is_ok();
    if wrote_wait {
        let mut buf = [0u8; 5];
        let rstart_borrowed = unsafe { BorrowedFd::borrow_raw(rstart) };
        if let Ok(n) = read(rstart_borrowed, &mut buf) {
            close_quiet(rstart);
            if n == START_TOKEN.len() && &buf[..n] == START_TOKEN {
                let path = cstring(target);
                let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 1);
                argv.push(path.clone());
                argv.extend(args.iter().map(|a| cstring(a)));
                let _ = nix::unistd::execv(&path, &argv);
                // execv only returns on failure.
                eprintln!("falla: failed to exec the requested invocation");
            }
        }
    } else {
        eprintln!("falla: main program was terminated");
    }
    close_quiet(wwait);
    std::process::exit(1);
}

/// The external tracer process (typically `strace`). Its stderr is dup'd
/// onto the parent's (non-blocking) read end of a pipe.
#[derive(Debug)]
pub struct TracerHandle {
    core: ChildCore,
    stderr_read: RawFd,
}

impl TracerHandle {
    /// Forks, dup2's the pipe write end onto the child's stderr, closes
    /// spare descriptors, then execs `executable -p <tracee_pid> <extra_args...>`.
    pub fn spawn(
        executable: &str,
        tracee_pid: Pid,
        extra_args: &[String],
    ) -> Result<Self, FallaError> {
        let (r, w) = raw_pipe().map_err(FallaError::from)?;

        // SAFETY: same constraints as TraceeHandle::spawn.
        match unsafe { fork() }.map_err(|e| FallaError::spawn("tracer", e.into()))? {
            ForkResult::Child => {
                close_quiet(r);
                child_exec_tracer(w, executable, tracee_pid, extra_args);
            }
            ForkResult::Parent { child } => {
                close_quiet(w);
                let _ = set_nonblocking(r);
                let _ = set_cloexec(r);
                Ok(Self {
                    core: ChildCore::new(child),
                    stderr_read: r,
                })
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.core.pid
    }

    /// Raw fd for the stream reader's readiness multiplexer.
    pub fn stderr_fd(&self) -> RawFd {
        self.stderr_read
    }

    /// One non-blocking read of whatever is currently queued. Never blocks;
    /// the caller's poll loop decides when to call this.
    pub fn read_available(&self, buf: &mut [u8]) -> nix::Result<usize> {
        // SAFETY: `stderr_read` is owned by `self` for the duration of this call.
        let borrowed = unsafe { BorrowedFd::borrow_raw(self.stderr_read) };
        match read(borrowed, buf) {
            Ok(n) => Ok(n),
            Err(nix::Error::EAGAIN) => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn exit_status(&mut self, blocking: bool) -> Option<ExitStatus> {
        self.core.exit_status(blocking)
    }

    pub fn terminate(&mut self) {
        self.core.terminate();
    }
}

impl Drop for TracerHandle {
    fn drop(&mut self) {
        close_quiet(self.stderr_read);
    }
}

fn child_exec_tracer(w: RawFd, executable: &str, tracee_pid: Pid, extra_args: &[String]) -> ! {
    // SAFETY: `w` is a valid, open fd owned by this process at this point.
    let dup_ok = unsafe { libc::dup2(w, libc::STDERR_FILENO) } >= 0;
    close_quiet(w);
    if dup_ok {
        let exe = cstring(executable);
        let mut argv: Vec<CString> = vec![
            exe.clone(),
            cstring("-p"),
            cstring(&tracee_pid.to_string()),
        ];
        argv.extend(extra_args.iter().map(|a| cstring(a)));
        if let Err(e) = nix::unistd::execvp(&exe, &argv) {
            eprintln!("cannot run strace: {}", e);
        }
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn tracee_handshake_then_terminate_without_start() {
        let mut tracee = TraceeHandle::spawn(Path::new("/bin/true"), &[]).unwrap();
        assert!(tracee.wait_for_started());
        tracee.terminate();
        assert!(tracee.exit_status(true).is_some());
    }

    #[test]
    #[serial]
    fn tracee_runs_target_after_start() {
        let mut tracee = TraceeHandle::spawn(Path::new("/bin/true"), &[]).unwrap();
        assert!(tracee.wait_for_started());
        assert!(tracee.start_actual_tracee());
        let status = tracee.exit_status(true);
        assert_eq!(status, Some(ExitStatus::Exited(0)));
    }

    #[test]
    #[serial]
    fn terminate_is_idempotent() {
        let mut tracee = TraceeHandle::spawn(Path::new("/bin/true"), &[]).unwrap();
        assert!(tracee.wait_for_started());
        tracee.terminate();
        let first = tracee.exit_status(true);
        tracee.terminate();
        let second = tracee.exit_status(true);
        assert_eq!(first, second);
    }

    #[test]
    #[serial]
    fn parent_pipe_closed_before_start_fails_cleanly() {
        let mut tracee = TraceeHandle::spawn(Path::new("/bin/true"), &[]).unwrap();
        assert!(tracee.wait_for_started());
        close_quiet(tracee.start_write);
        tracee.start_write = -1; // avoid double-close in Drop
        assert!(!tracee.start_actual_tracee());
        tracee.terminate();
        assert!(tracee.exit_status(true).is_some());
    }

    #[test]
    #[serial]
    fn tracer_spawn_reports_missing_executable() {
        let mut tracee = TraceeHandle::spawn(Path::new("/bin/true"), &[]).unwrap();
        assert!(tracee.wait_for_started());
        let mut tracer = TracerHandle::spawn("/no/such/strace", tracee.pid(), &[]).unwrap();
        let mut buf = [0u8; 256];
        // Give the child a moment to exec-fail and flush its message.
        std::thread::sleep(std::time::Duration::from_millis(50));
        let n = tracer.read_available(&mut buf).unwrap_or(0);
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("cannot run strace"), "got: {text:?}");
        tracer.terminate();
        tracee.terminate();
    }
}
