//! The stream reader: non-blocking, timeout-bounded aggregation of the
//! tracer's stderr into raw bytes.
//!
//! Grounded in `TracerProcess.readbuf` (`src/engine/processes.py`): poll
//! with the remaining budget, read whatever is ready, and on detecting the
//! tracer has exited, perform one zero-timeout drain before returning.
//! `renacer` has no equivalent (it reads ptrace registers, not a pipe), so
//! the readiness primitive here is `nix::poll` rather than the prototype's
//! `select`, substituted for the Rust-idiomatic one without changing the
//! read/drain-on-exit shape.

use std::os::unix::io::{BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::errors::ExitStatus;

/// What the stream reader needs from a tracer child: a pollable fd, a
/// non-blocking read, and a way to observe exit without blocking. Kept as a
/// trait so tests can drive the reader against an in-process stub instead
/// of a real forked `strace`.
pub trait TracerStream {
    fn fd(&self) -> RawFd;
    fn read_available(&self, buf: &mut [u8]) -> nix::Result<usize>;
    fn exit_status(&mut self, blocking: bool) -> Option<ExitStatus>;
}

impl TracerStream for crate::child::TracerHandle {
    fn fd(&self) -> RawFd {
        self.stderr_fd()
    }

    fn read_available(&self, buf: &mut [u8]) -> nix::Result<usize> {
        crate::child::TracerHandle::read_available(self, buf)
    }

    fn exit_status(&mut self, blocking: bool) -> Option<ExitStatus> {
        crate::child::TracerHandle::exit_status(self, blocking)
    }
}

fn duration_to_poll_timeout(timeout: Duration) -> PollTimeout {
    let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
    PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
}

/// One `poll(2)` call for readability on `fd`, bounded by `timeout`.
fn poll_readable(fd: RawFd, timeout: Duration) -> bool {
    // SAFETY: `fd` outlives this call; it is owned by the caller's
    // `TracerStream` for the whole lifetime of the reader.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
    match poll(&mut fds, duration_to_poll_timeout(timeout)) {
        Ok(n) => n > 0,
        Err(_) => false,
    }
}

/// Drains whatever is currently queued on `tracer`'s fd without blocking.
fn drain_available<T: TracerStream + ?Sized>(tracer: &T) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match tracer.read_available(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    out
}

/// Reads up to `timeout` wall-clock seconds' worth of new bytes from
/// `tracer`'s stderr. Never blocks longer than `timeout`; once the tracer
/// has exited, performs one zero-timeout drain so no buffered bytes are
/// lost.
pub fn read_buffer<T: TracerStream + ?Sized>(tracer: &mut T, timeout: Duration) -> Vec<u8> {
    let mut collected = Vec::new();
    let clock = Instant::now();
    let mut timeout_left = timeout;

    loop {
        if !poll_readable(tracer.fd(), timeout_left) {
            break;
        }
        collected.extend(drain_available(tracer));

        if tracer.exit_status(false).is_some() {
            if poll_readable(tracer.fd(), Duration::ZERO) {
                collected.extend(drain_available(tracer));
            }
            break;
        }

        let elapsed = clock.elapsed();
        if elapsed >= timeout {
            break;
        }
        timeout_left = timeout - elapsed;
    }

    collected
}
