use anyhow::Result;
use clap::Parser;

use falla::cli::Cli;
use falla::config::Config;
use falla::{driver, logging};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config: Config = cli.into();

    logging::init(config.verbosity);

    driver::run(config)
}
