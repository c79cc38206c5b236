//! The injection generator: probes the target once, then yields an
//! effectively infinite, weighted-random sequence of candidate faults.
//!
//! Grounded in `src/engine/generator.py`'s `InjectionGenerator`: same
//! two-phase shape (probe once on first draw, then lazy sampling), same
//! per-syscall histograms, same dropped-syscall occurrence adjustment —
//! kept as the prototype's literal, asymmetric behavior and exercised
//! below. One deliberate deviation from the prototype: the error mnemonic
//! is drawn from `catalog[syscall]`, not from the full unconstrained errno
//! namespace the prototype samples from (`errno.errorcode`) — the catalog
//! gives the errno choice an actual grounding in what the target's libc can
//! plausibly return (see `DESIGN.md`).

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;

use crate::catalog::SyscallErrorCatalog;
use crate::controller::ExecutionController;
use crate::errors::FallaError;
use crate::fault::Fault;
use crate::reporter::ErrorReporter;

/// Iterator-like generator: the probe runs lazily on the first call to
/// [`InjectionGenerator::next`], not at construction.
pub struct InjectionGenerator<'a, W: Write> {
    controller: ExecutionController<W>,
    target: PathBuf,
    target_args: Vec<String>,
    catalog: &'a SyscallErrorCatalog,
    injectable: Vec<String>,
    count: HashMap<String, u32>,
    count_dropped: HashMap<String, u32>,
    probed: bool,
}

impl<'a, W: Write> InjectionGenerator<'a, W> {
    pub fn new(
        strace_executable: impl Into<String>,
        target: PathBuf,
        target_args: Vec<String>,
        catalog: &'a SyscallErrorCatalog,
        run_timeout: Duration,
        max_step: Duration,
        reporter: ErrorReporter<W>,
    ) -> Self {
        Self {
            controller: ExecutionController::new(strace_executable, run_timeout, max_step, reporter),
            target,
            target_args,
            catalog,
            injectable: Vec::new(),
            count: HashMap::new(),
            count_dropped: HashMap::new(),
            probed: false,
        }
    }

    fn probe(&mut self) -> Result<(), FallaError> {
        let probe = self.controller.run_probe(&self.target, &self.target_args)?;

        for syscall in &probe.list_syscalls {
            *self.count.entry(syscall.clone()).or_insert(0) += 1;
        }
        for syscall in &probe.list_dropped_syscalls {
            *self.count_dropped.entry(syscall.clone()).or_insert(0) += 1;
        }

        // Weighted by occurrence count: a syscall called 5 times keeps 5
        // entries here, so drawing uniformly from `injectable` draws
        // uniformly over *occurrences* rather than over distinct syscalls.
        self.injectable = probe
            .list_syscalls
            .into_iter()
            .filter(|s| self.catalog.contains(s))
            .collect();

        self.probed = true;
        Ok(())
    }

    /// Draws the next candidate fault. `Ok(None)` means the probe found no
    /// syscall present in the catalog — generation cannot continue for this
    /// target. Errors here are always setup/attach failures from the probe
    /// run; an ordinary "target made no progress" is never surfaced as
    /// `Err` (it's what an *inject* run's `Ok(None)` means, not the
    /// generator's).
    pub fn next(&mut self) -> Result<Option<Fault>, FallaError> {
        if !self.probed {
            self.probe()?;
        }

        if self.injectable.is_empty() {
            return Ok(None);
        }

        let mut rng = rand::thread_rng();
        let syscall = self.injectable[rng.gen_range(0..self.injectable.len())].clone();

        let occurrences = *self.count.get(&syscall).unwrap_or(&1);
        let dropped = *self.count_dropped.get(&syscall).unwrap_or(&0);
        let occurrence = rng.gen_range(1..=occurrences) + dropped;

        let errors = self.catalog.errors_for(&syscall);
        let error = errors[rng.gen_range(0..errors.len())].clone();

        Ok(Some(Fault::new(syscall, error, occurrence)))
    }

    /// Runs one inject trial for `fault`, delegating to the controller.
    pub fn inject(&mut self, fault: &Fault) -> Result<Option<String>, FallaError> {
        self.controller.run_inject(&self.target, &self.target_args, fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(entries: &[(&str, &[&str])]) -> SyscallErrorCatalog {
        let json = serde_json::json!(entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect::<HashMap<_, _>>());
        serde_json::from_value(json).unwrap()
    }

    /// Exercises the dropped-syscall occurrence arithmetic directly:
    /// `occurrence` is drawn from `[1, count[syscall]]` then shifted by
    /// `count_dropped[syscall]`, so the *minimum* possible
    /// occurrence for a syscall with dropped occurrences is
    /// `1 + count_dropped[syscall]`, never `1`.
    #[test]
    fn occurrence_is_shifted_by_dropped_count_floor() {
        let catalog = catalog_with(&[("open", &["ENOENT"])]);
        let mut count = HashMap::new();
        count.insert("open".to_string(), 2u32);
        let mut count_dropped = HashMap::new();
        count_dropped.insert("open".to_string(), 3u32);

        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let occurrence = rng.gen_range(1..=*count.get("open").unwrap()) + count_dropped["open"];
            assert!(occurrence >= 1 + 3);
            assert!(occurrence <= 2 + 3);
        }
    }

    #[test]
    fn catalog_filters_non_catalog_syscalls_from_injectable_set() {
        let catalog = catalog_with(&[("open", &["ENOENT"])]);
        let list_syscalls = vec!["open".to_string(), "mmap".to_string(), "open".to_string()];
        let injectable: Vec<String> = list_syscalls.into_iter().filter(|s| catalog.contains(s)).collect();
        assert_eq!(injectable, vec!["open".to_string(), "open".to_string()]);
    }
}
