//! CLI module for socketpush
//!
//! Provides command-line interface for:
//! - serve: Run the push server
//! - check: Validate a configuration file

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{check, run, run_command, serve};
pub use errors::{CliError, CliErrorCode, CliResult};
