//! lawledger CLI: incremental acquisition of national laws and regulations.
//!
//! Crawls the remote catalog into a local ledger, downloads source
//! documents and converts them into structured markdown.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

/// Exit status after an interrupt (128 + SIGINT).
const INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    tokio::select! {
        result = commands::run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            std::process::exit(INTERRUPTED);
        }
    }
}
