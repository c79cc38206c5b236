//! The resolved run configuration: every other module consumes this, never
//! `cli::Cli` directly, so that only `main.rs` depends on `clap` — the same
//! separation `renacer` keeps between its own `Cli` and the plain arguments
//! `tracer::trace_command` takes.

use std::path::PathBuf;
use std::time::Duration;

/// Resolved, already-validated form of [`crate::cli::Cli`].
#[derive(Debug, Clone)]
pub struct Config {
    pub target: PathBuf,
    pub target_args: Vec<String>,
    pub strace_executable: String,
    pub report_path: Option<PathBuf>,
    pub catalog_path: PathBuf,
    pub run_timeout: Duration,
    pub max_step: Duration,
    pub max_attempts: Option<u64>,
    pub verbosity: u8,
}

impl From<crate::cli::Cli> for Config {
    fn from(cli: crate::cli::Cli) -> Self {
        Self {
            target: cli.target,
            target_args: cli.args,
            strace_executable: cli.strace,
            report_path: cli.output,
            catalog_path: cli.catalog,
            run_timeout: Duration::from_secs_f64(cli.timeout),
            max_step: Duration::from_millis(cli.max_step),
            max_attempts: cli.max_attempts,
            verbosity: cli.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn resolves_timeouts_from_seconds_and_millis() {
        let cli = Cli::parse_from([
            "falla",
            "--catalog",
            "catalog.json",
            "--timeout",
            "2.5",
            "--max-step",
            "250",
            "/bin/true",
        ]);
        let config: Config = cli.into();
        assert_eq!(config.run_timeout, Duration::from_millis(2500));
        assert_eq!(config.max_step, Duration::from_millis(250));
        assert_eq!(config.strace_executable, "strace");
        assert!(config.report_path.is_none());
        assert!(config.max_attempts.is_none());
    }

    #[test]
    fn carries_target_args_and_explicit_flags() {
        let cli = Cli::parse_from([
            "falla",
            "--catalog",
            "catalog.json",
            "-s",
            "/usr/bin/strace",
            "-o",
            "report.txt",
            "--max-attempts",
            "10",
            "/bin/cat",
            "file.txt",
        ]);
        let config: Config = cli.into();
        assert_eq!(config.target, PathBuf::from("/bin/cat"));
        assert_eq!(config.target_args, vec!["file.txt".to_string()]);
        assert_eq!(config.strace_executable, "/usr/bin/strace");
        assert_eq!(config.report_path, Some(PathBuf::from("report.txt")));
        assert_eq!(config.max_attempts, Some(10));
    }
}
