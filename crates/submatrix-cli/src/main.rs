mod cli;
mod commands;

use std::sync::Arc;

use clap::Parser;
use submatrix_rs::BlockCache;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cache = Arc::new(BlockCache::new(cli.cache_blocks)?);
    debug!(capacity = cache.capacity(), "block cache ready");

    match &cli.command {
        Command::Layout(args) => commands::print_layout(args),
        Command::Create(args) => commands::create(args, cache),
        Command::Get(args) => commands::get(args, cache),
        Command::Set(args) => commands::set(args, cache),
        Command::Sum(args) => commands::sum(args, cache),
        Command::Zero(args) => commands::zero(args, cache),
    }
}
