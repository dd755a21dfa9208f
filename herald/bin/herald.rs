//! Command-line entry point for the herald notification dispatcher

use clap::Parser;
use herald::commands::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    herald_common::logging::init();

    commands::run(Cli::parse()).await
}
