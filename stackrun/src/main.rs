//! stackrun command-line entry point.

use clap::Parser;
use std::process::ExitCode;

mod cli;

use cli::{Cli, EXIT_USAGE};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}
