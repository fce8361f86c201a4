//! Procgroup CLI - run a manifest of processes as a single group.
//!
//! Output from every process is printed as `[name] line`. Logging goes to
//! stderr and is controlled with `RUST_LOG` (default `info`).

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    execute(cli).await
}
