//! The successful-injection report sink: an append-only `(Fault,
//! context-line)` sequence with header/footer framing.
//!
//! Grounded directly in `src/utils/injection_writer.py`'s
//! `ListSuccessfulInjections`: same header/separator/footer text, computed
//! from the header's own length rather than hardcoded, same lazy-header /
//! footer-only-on-flush discipline.

use std::fs::File;
use std::io::{self, BufWriter, Stderr, Write};
use std::path::Path;

use crate::fault::Fault;

const HEADER: &str = "--- list of injections, which induced SIGSEGV in targeted executable ---";

fn separator() -> String {
    "-".repeat(HEADER.len())
}

fn footer() -> String {
    let label = " end of list ";
    let pad = HEADER.len().saturating_sub(label.len());
    let left = pad / 2;
    let right = pad - left;
    format!("{}{}{}", "-".repeat(left), label, "-".repeat(right))
}

/// Either a buffered file or stderr; picked once at driver startup from
/// `Config::report_path`.
enum Backend {
    File(BufWriter<File>),
    Stderr(Stderr),
}

impl Write for Backend {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Backend::File(f) => f.write(buf),
            Backend::Stderr(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Backend::File(f) => f.flush(),
            Backend::Stderr(s) => s.flush(),
        }
    }
}

/// Append-only sink for confirmed injections. Prints the header lazily
/// before the first record; the footer is printed only by
/// [`ReportSink::flush_until_end`], called once at clean driver exit or
/// from the abort hook if the report is non-empty.
pub struct ReportSink {
    backend: Backend,
    header_printed: bool,
}

impl ReportSink {
    /// `path = None` means stderr, the CLI default for `-o`.
    pub fn new(path: Option<&Path>) -> io::Result<Self> {
        let backend = match path {
            Some(path) => Backend::File(BufWriter::new(File::create(path)?)),
            None => Backend::Stderr(io::stderr()),
        };
        Ok(Self {
            backend,
            header_printed: false,
        })
    }

    fn ensure_header(&mut self) {
        if !self.header_printed {
            let _ = writeln!(self.backend, "{HEADER}");
            self.header_printed = true;
        }
    }

    /// Appends one confirmed injection: `context` is the tracer line that
    /// corresponds to the faulted syscall.
    pub fn append(&mut self, fault: &Fault, context: &str) {
        self.ensure_header();
        let _ = writeln!(self.backend, "{}", separator());
        let _ = writeln!(
            self.backend,
            "Syscall: {}\nError: {}\nAppearance: {}",
            fault.syscall(),
            fault.error(),
            fault.occurrence()
        );
        let _ = writeln!(self.backend, "Context: {context}");
    }

    /// True iff nothing has been appended since the last flush.
    pub fn is_empty(&self) -> bool {
        !self.header_printed
    }

    /// Prints the footer and flushes the sink. Call exactly once, at clean
    /// exit or from the abort hook.
    pub fn flush_until_end(&mut self) {
        self.ensure_header();
        let _ = writeln!(self.backend, "{}", footer());
        let _ = self.backend.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn header_printed_lazily_on_first_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        {
            let mut sink = ReportSink::new(Some(&path)).unwrap();
            assert!(sink.is_empty());
            sink.append(&Fault::new("open", "ENOENT", 3), "open(\"x\") = -1 ENOENT");
            assert!(!sink.is_empty());
            sink.flush_until_end();
        }
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(HEADER));
        assert!(content.contains("Syscall: open"));
        assert!(content.contains("Error: ENOENT"));
        assert!(content.contains("Appearance: 3"));
        assert!(content.trim_end().ends_with(&footer()));
    }

    #[test]
    fn footer_is_centered_padding_of_header_width() {
        let f = footer();
        assert_eq!(f.len(), HEADER.len());
        assert!(f.contains(" end of list "));
    }

    #[test]
    fn flush_with_no_appends_still_writes_header_and_footer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        {
            let mut sink = ReportSink::new(Some(&path)).unwrap();
            sink.flush_until_end();
        }
        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(HEADER));
        assert_eq!(lines.next(), Some(footer().as_str()));
    }
}
