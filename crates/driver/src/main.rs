//! Command-line driver for the TileForge PGO pipeline.

use anyhow::Result;
use clap::Parser;
use tileforge_compiler::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
