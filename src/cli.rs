//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Swift package registry with Basic and OpenID Connect authentication
#[derive(Parser, Debug)]
#[command(name = "spm-registry")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SPM_REGISTRY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "SPM_REGISTRY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "SPM_REGISTRY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "SPM_REGISTRY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SPM_REGISTRY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the registry server (default)
    Serve,

    /// Print the SHA-256 digest of a password for `auth.users[].password`
    HashPassword {
        /// Plain-text password
        #[arg(required = true)]
        password: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::try_parse_from(["spm-registry"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "spm-registry",
            "--config",
            "registry.yaml",
            "--port",
            "9000",
            "--host",
            "0.0.0.0",
            "serve",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("registry.yaml")));
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn test_hash_password() {
        let cli = Cli::try_parse_from(["spm-registry", "hash-password", "pass"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::HashPassword { password }) if password == "pass"
        ));
    }
}
