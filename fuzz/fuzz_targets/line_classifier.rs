#![no_main]

use libfuzzer_sys::fuzz_target;

use falla::parser::LineBuffer;
use falla::watcher::{RememberSyscallsWatcher, TerminationWatcher, Watcher};

fuzz_target!(|data: &[u8]| {
    let mut buffer = LineBuffer::new();
    buffer.feed(data);

    let mut termination = TerminationWatcher::new();
    let mut remember = RememberSyscallsWatcher::new(None, false);

    while let Some(line) = buffer.pop_line() {
        let _ = termination.fire(&line);
        let _ = remember.fire(&line);
    }
});
