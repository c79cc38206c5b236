//! Operator-facing diagnostics, independent of the user-visible report sink
//! (`report.rs`), which writes confirmed-crash records rather than trace
//! noise.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber::fmt` subscriber. `RUST_LOG` always wins;
/// `verbosity` (from repeated `-v`) only picks the default when `RUST_LOG`
/// is unset: `warn` at 0, `info` at 1, `debug` at 2+.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
