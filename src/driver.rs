//! The top-level driver: wires config, catalog, generator and report sink
//! together and runs the fuzz loop until SIGINT or `--max-attempts` is
//! reached.
//!
//! Grounded in `fuzzer.py`'s `__main__` block: load the catalog, build the
//! generator, loop drawing faults and injecting them, report confirmed
//! crashes, flush the report on exit.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::catalog::SyscallErrorCatalog;
use crate::config::Config;
use crate::generator::InjectionGenerator;
use crate::reporter::ErrorReporter;
use crate::report::ReportSink;

/// Set by the SIGINT handler, polled between generator draws — a flag
/// checked between runs, not an async-signal-unsafe callback.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

fn install_sigint_handler() -> nix::Result<()> {
    let action = SigAction::new(SigHandler::Handler(handle_sigint), SaFlags::empty(), SigSet::empty());
    unsafe { signal::sigaction(Signal::SIGINT, &action) }?;
    Ok(())
}

/// Runs the fuzz loop to completion: `Ok(())` on a clean stop (SIGINT or
/// `max_attempts` reached), `Err` on any fatal setup failure — a spawn,
/// handshake, attach, or exec failure either during the initial probe or
/// during a later inject run aborts the whole process rather than just
/// skipping the current draw, flushing whatever was already confirmed
/// first.
pub fn run(config: Config) -> anyhow::Result<()> {
    install_sigint_handler().context("failed to install SIGINT handler")?;

    let catalog = SyscallErrorCatalog::load(&config.catalog_path)
        .with_context(|| format!("loading catalog {}", config.catalog_path.display()))?;

    let mut report = ReportSink::new(config.report_path.as_deref())
        .with_context(|| "opening report sink")?;

    let program = std::env::args().next().unwrap_or_else(|| "falla".to_string());
    let reporter = ErrorReporter::new(program_basename(&program), std::io::stderr());

    let mut generator = InjectionGenerator::new(
        config.strace_executable.clone(),
        config.target.clone(),
        config.target_args.clone(),
        &catalog,
        config.run_timeout,
        config.max_step,
        reporter,
    );

    let mut attempts: u64 = 0;
    loop {
        if INTERRUPTED.load(Ordering::SeqCst) {
            tracing::info!("interrupted, stopping");
            break;
        }
        if let Some(max) = config.max_attempts {
            if attempts >= max {
                tracing::info!(attempts, "max attempts reached, stopping");
                break;
            }
        }

        let fault = match generator.next()? {
            Some(fault) => fault,
            None => {
                tracing::warn!("no injectable syscall found in target's probe trace");
                break;
            }
        };
        attempts += 1;
        tracing::debug!(%fault, attempts, "drew fault");

        match generator.inject(&fault) {
            Ok(Some(context)) => {
                tracing::info!(%fault, "confirmed crash");
                report.append(&fault, &context);
            }
            Ok(None) => {
                tracing::trace!(%fault, "no crash");
            }
            Err(err) => {
                tracing::error!(%err, "fatal error, aborting");
                if !report.is_empty() {
                    report.flush_until_end();
                }
                return Err(err).context("inject run failed fatally");
            }
        }
    }

    report.flush_until_end();
    Ok(())
}

fn program_basename(argv0: &str) -> String {
    std::path::Path::new(argv0)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "falla".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_basename_strips_directories() {
        assert_eq!(program_basename("/usr/local/bin/falla"), "falla");
        assert_eq!(program_basename("falla"), "falla");
    }
}
