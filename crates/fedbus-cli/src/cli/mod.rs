//! CLI command definitions for the `fedbus` binary.

pub mod check;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run in-process federated message buses.
#[derive(Parser)]
#[command(name = "fedbus", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON (command output and logs).
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true, env = "FEDBUS_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start every bus in the descriptor and run until Ctrl-C.
    Run {
        /// Federation descriptor (TOML).
        #[arg(long, short, env = "FEDBUS_CONFIG")]
        config: PathBuf,
    },

    /// Validate a descriptor and its rule sets without starting anything.
    Check {
        /// Federation descriptor (TOML).
        #[arg(long, short, env = "FEDBUS_CONFIG")]
        config: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_global_flags() {
        let cli = Cli::try_parse_from(["fedbus", "-vv", "run", "--config", "fed.toml"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Run { ref config } if config == &PathBuf::from("fed.toml")));
    }

    #[test]
    fn parses_check_json() {
        let cli = Cli::try_parse_from(["fedbus", "check", "-c", "fed.toml", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Check { .. }));
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
