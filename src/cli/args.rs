//! CLI argument definitions using clap
//!
//! Commands:
//! - socketpush serve --config <path> [--port <port>]
//! - socketpush check --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// socketpush - Scoped server-to-client push over WebSockets
#[derive(Parser, Debug)]
#[command(name = "socketpush")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the push server
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./socketpush.json")]
        config: PathBuf,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate a configuration file and print the declared channels
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./socketpush.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["socketpush", "serve"]).unwrap();
        match cli.command {
            Command::Serve { config, port } => {
                assert_eq!(config, PathBuf::from("./socketpush.json"));
                assert_eq!(port, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_check_with_config() {
        let cli = Cli::try_parse_from(["socketpush", "check", "--config", "/etc/push.json"]).unwrap();
        assert!(matches!(cli.command, Command::Check { config } if config == PathBuf::from("/etc/push.json")));
    }
}
