//! Federated bus runner.
//!
//! Binary name: `fedbus`
//!
//! Loads a federation descriptor and either runs its buses until Ctrl-C or
//! validates it and prints a summary.

mod cli;

use clap::Parser;
use fedbus_observe::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        verbosity: cli.verbose,
        quiet: cli.quiet,
        json: cli.json,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("cannot initialize tracing: {e}"))?;

    let result = match &cli.command {
        Commands::Run { config } => cli::run::run(config).await,
        Commands::Check { config } => cli::check::check(config, cli.json).await,
    };

    shutdown_tracing();
    result
}
