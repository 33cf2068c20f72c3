//! CLI command implementations
//!
//! `serve` loads the configuration, installs logging, declares the
//! configured channels and runs the HTTP server until interrupted.
//! `check` performs the same validation without binding a socket.

use std::path::Path;

use tracing::info;

use crate::config::Config;
use crate::http_server::HttpServer;
use crate::observability::init_logging;
use crate::push::PushManager;

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port } => serve(&config, port),
        Command::Check { config } => check(&config),
    }
}

/// Run the push server
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = Config::load(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }

    init_logging(&config.logging);

    let manager = PushManager::from_config(&config)?;
    info!(
        config = %config_path.display(),
        channels = config.channels.len(),
        "push manager ready"
    );

    let server = HttpServer::new(config.server.clone(), manager);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::serve_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::serve_failed(format!("HTTP server failed: {}", e)))
    })?;

    Ok(())
}

/// Validate a configuration file
pub fn check(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let manager = PushManager::from_config(&config)?;

    println!("Configuration OK: {}", config_path.display());
    println!("Listening address: {}", config.server.socket_addr());
    for channel in manager.channels() {
        println!("  - {} ({})", channel.name, channel.scope);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_check_accepts_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("socketpush.json");
        let config = json!({
            "channels": [ { "name": "notifications", "scope": "session" } ]
        });
        fs::write(&config_path, config.to_string()).unwrap();

        check(&config_path).unwrap();
    }

    #[test]
    fn test_check_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("socketpush.json");
        fs::write(&config_path, "{ not json").unwrap();

        let result = check(&config_path);
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_serve_reports_bind_failure() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("socketpush.json");
        let config = json!({ "server": { "host": "not a host" } });
        fs::write(&config_path, config.to_string()).unwrap();

        let result = serve(&config_path, Some(0));
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::ServeFailed);
    }

    #[test]
    fn test_serve_requires_config() {
        let temp_dir = TempDir::new().unwrap();
        let result = serve(&temp_dir.path().join("missing.json"), None);
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::ConfigError);
    }
}
