use anyhow::Result;
use clap::Parser;

mod commands;
mod logger;

use commands::Command;

/// Options configurable via the CLI.
#[derive(Debug, Parser)]
#[command(name = "cadence", version = env!("CARGO_PKG_VERSION"), about)]
struct Flags {
    /// Verbosity of console logging.
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
    #[clap(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let flags = Flags::parse();
    logger::init_logger(flags.log_level);
    flags.command.handle()
}
