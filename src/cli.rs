//! CLI argument parsing for `falla`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "falla")]
#[command(version)]
#[command(about = "Syscall-level fault-injection fuzzer driving strace as a black-box tracer", long_about = None)]
pub struct Cli {
    /// Executable to fuzz.
    pub target: PathBuf,

    /// Arguments forwarded to `target`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Path to the strace binary.
    #[arg(short, long, default_value = "strace")]
    pub strace: String,

    /// Where to write confirmed injections; stderr if omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Path to the syscall -> errno JSON catalog.
    #[arg(long)]
    pub catalog: PathBuf,

    /// Per-run scan budget, in seconds.
    #[arg(long, default_value_t = 1.0)]
    pub timeout: f64,

    /// Bound on a single non-blocking read chunk, in milliseconds.
    #[arg(long = "max-step", default_value_t = 100)]
    pub max_step: u64,

    /// Stop after this many generated faults; absent means run until SIGINT.
    #[arg(long = "max-attempts")]
    pub max_attempts: Option<u64>,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_target_and_catalog() {
        let cli = Cli::parse_from(["falla", "--catalog", "c.json", "/bin/true"]);
        assert_eq!(cli.target, PathBuf::from("/bin/true"));
        assert!(cli.args.is_empty());
        assert_eq!(cli.strace, "strace");
        assert_eq!(cli.timeout, 1.0);
        assert_eq!(cli.max_step, 100);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn collects_trailing_target_args() {
        let cli = Cli::parse_from(["falla", "--catalog", "c.json", "/bin/cat", "-n", "file.txt"]);
        assert_eq!(cli.args, vec!["-n".to_string(), "file.txt".to_string()]);
    }

    #[test]
    fn verbose_flag_is_repeatable() {
        let cli = Cli::parse_from(["falla", "--catalog", "c.json", "-vv", "/bin/true"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn rejects_missing_catalog() {
        let result = Cli::try_parse_from(["falla", "/bin/true"]);
        assert!(result.is_err());
    }
}
