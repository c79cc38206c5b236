//! The line parser: turns raw tracer bytes into complete lines and drives a
//! registry of sticky [`Watcher`]s over them until one fires or a deadline
//! passes.
//!
//! Grounded in `src/utils/parser.py`'s `Parser.continueUntil`: pull bytes in
//! bounded chunks (`max_step`), split on newlines, and check every
//! registered watcher against each new line, returning as soon as any one
//! of them fires.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::stream::{self, TracerStream};
use crate::watcher::Watcher;

/// Accumulates tracer bytes into complete lines. A partial trailing line
/// (no `\n` yet) stays buffered across calls to [`LineBuffer::feed`].
#[derive(Default)]
pub struct LineBuffer {
    partial: String,
    lines: VecDeque<String>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes, splitting out any newly-completed lines.
    /// Non-UTF-8 bytes are replaced: strace output is treated as text, and
    /// malformed bytes never block the parser.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.partial.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.lines.push_back(line.trim_end_matches('\n').to_string());
        }
    }

    pub fn has_line(&self) -> bool {
        !self.lines.is_empty()
    }

    pub fn pop_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    /// The next line without consuming it (mirrors the prototype's
    /// `continue_until_watchers`, which checks `_lines[0]` against every
    /// watcher before deciding whether to pop it).
    pub fn peek_line(&self) -> Option<&str> {
        self.lines.front().map(|s| s.as_str())
    }
}

/// What `continue_until_watchers` returns.
pub enum ScanOutcome {
    /// At least one registered watcher fired on this line.
    Fired { line: String, fired: Vec<String> },
    /// `timeout` elapsed with no watcher firing.
    TimedOut,
}

/// Pulls bytes from `tracer` (in chunks no larger than `max_step`), feeds
/// them through `buffer`, and fires every watcher in `watchers` against
/// each completed line, in insertion order, until the `timeout` budget
/// elapsed or one or more watchers fire on the same line.
pub struct LineParser {
    buffer: LineBuffer,
    watchers: HashMap<String, Box<dyn Watcher>>,
    order: Vec<String>,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            buffer: LineBuffer::new(),
            watchers: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn add_watcher(&mut self, name: impl Into<String>, watcher: Box<dyn Watcher>) {
        let name = name.into();
        if !self.watchers.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.watchers.insert(name, watcher);
    }

    pub fn remove_watcher(&mut self, name: &str) -> Option<Box<dyn Watcher>> {
        self.order.retain(|n| n != name);
        self.watchers.remove(name)
    }

    /// Looks up a still-registered watcher by name, to read its captured
    /// state after it fired (mirrors the prototype's `watchers["name"]`
    /// lookup after `continue_until_watchers` returns).
    pub fn watcher(&self, name: &str) -> Option<&dyn Watcher> {
        self.watchers.get(name).map(|w| w.as_ref())
    }

    pub fn has_line(&self) -> bool {
        self.buffer.has_line()
    }

    pub fn pop_line(&mut self) -> Option<String> {
        self.buffer.pop_line()
    }

    /// Feeds one already-read chunk into the line buffer without running
    /// any watchers; used by callers that want raw lines (e.g. the probe
    /// phase of the controller, which has no watchers registered yet).
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.feed(bytes);
    }

    /// Fires every registered watcher against `line`, in registration
    /// order, returning the names of the ones that fired for the first
    /// time on this call.
    fn fire_all(&mut self, line: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| {
                self.watchers
                    .get_mut(name.as_str())
                    .map(|w| w.fire(line))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Returns the next complete line, reading in `max_step`-bounded chunks
    /// until one is available or `timeout` elapses (used for the tracer's
    /// first-line probe, before any watcher is registered).
    pub fn read_line<T: TracerStream + ?Sized>(
        &mut self,
        tracer: &mut T,
        timeout: Duration,
        max_step: Duration,
    ) -> Option<String> {
        if let Some(line) = self.pop_line() {
            return Some(line);
        }

        let clock = Instant::now();
        loop {
            let elapsed = clock.elapsed();
            if elapsed >= timeout {
                return None;
            }
            let step = (timeout - elapsed).min(max_step);
            let chunk = stream::read_buffer(tracer, step);
            self.buffer.feed(&chunk);
            if let Some(line) = self.pop_line() {
                return Some(line);
            }
        }
    }

    /// Drives the read/parse loop until a watcher fires or `timeout`
    /// elapses, reading in chunks bounded by `max_step` — this is what lets
    /// the controller poll for `Ctrl-C` between reads without blocking for
    /// the whole `timeout`.
    ///
    /// A line that doesn't fire any watcher is consumed (mirrors the
    /// prototype's `pop_line()` in the no-match branch); a line that fires
    /// one or more watchers is left in the buffer, exactly as
    /// `continue_until_watchers` leaves `_lines[0]` in place on a match —
    /// callers that add further watchers right after removing the ones
    /// that just fired see the same line checked against the new set.
    pub fn continue_until_watchers<T: TracerStream + ?Sized>(
        &mut self,
        tracer: &mut T,
        timeout: Duration,
        max_step: Duration,
    ) -> ScanOutcome {
        let clock = Instant::now();

        loop {
            if self.has_line() {
                let line = self.buffer.peek_line().expect("has_line just returned true").to_string();
                let fired = self.fire_all(&line);
                if !fired.is_empty() {
                    return ScanOutcome::Fired { line, fired };
                }
                self.pop_line();
                continue;
            }

            let elapsed = clock.elapsed();
            if elapsed >= timeout {
                return ScanOutcome::TimedOut;
            }
            let remaining = timeout - elapsed;
            let step = remaining.min(max_step);

            let chunk = stream::read_buffer(tracer, step);
            self.buffer.feed(&chunk);

            if !self.has_line() && clock.elapsed() >= timeout {
                return ScanOutcome::TimedOut;
            }
        }
    }
}
