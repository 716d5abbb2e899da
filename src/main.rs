//! Swift Package Registry server

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use spm_registry::{
    auth::hash_password,
    cli::{Cli, Command},
    config::Config,
    server::RegistryServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Command::HashPassword { password }) = &cli.command {
        println!("{}", hash_password(password));
        return ExitCode::SUCCESS;
    }

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    run_server(cli).await
}

/// Run the registry server
async fn run_server(cli: Cli) -> ExitCode {
    // Shared by reqwest and axum-server
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        info!("rustls crypto provider already installed");
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.hostname = host;
    }

    let server = match RegistryServer::new(config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start registry: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
