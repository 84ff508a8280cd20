use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod cli;
mod error;
mod extract;
mod util;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

fn main() -> miette::Result<()> {
    let cli = Cli::parse_from(wild::args_os());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(util::verbosity_level(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    extract::run(cli)?;

    Ok(())
}
