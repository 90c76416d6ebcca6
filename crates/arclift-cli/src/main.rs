//! Arclift CLI - command-line front-end for the arclift archive engine.

mod cli;
mod commands;
mod progress;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    if let Some(engine) = &cli.engine {
        arclift_core::engine::native::set_library_path(engine)?;
    }

    match &cli.command {
        cli::Commands::List(args) => commands::list::execute(args, cli.json, cli.quiet),
        cli::Commands::Extract(args) => commands::extract::execute(args, cli.quiet),
        cli::Commands::Create(args) => commands::create::execute(args, cli.quiet),
        cli::Commands::Verify(args) => commands::verify::execute(args, cli.quiet),
    }
}
