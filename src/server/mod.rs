//! Registry HTTP server

pub mod router;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

pub use router::{AppState, RouterLimits, auth_middleware, create_router};

use crate::auth::Authenticator;
use crate::config::Config;
use crate::registry::FsRepository;
use crate::{Error, Result};

/// Time allowed for in-flight requests after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Package registry server
pub struct RegistryServer {
    config: Config,
    state: Arc<AppState>,
}

impl RegistryServer {
    /// Build the server, selecting the authenticator from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the authenticator cannot be constructed (for example when
    /// OIDC discovery fails).
    pub async fn new(config: Config) -> Result<Self> {
        let base_url = config.server.resolved_base_url();
        let authenticator = Authenticator::from_config(&config.auth, &base_url).await?;
        let repository = Arc::new(FsRepository::new(&config.storage.path));

        let state = Arc::new(AppState {
            authenticator,
            repository,
            base_url,
            tls: config.server.tls_enabled(),
        });

        Ok(Self { config, state })
    }

    /// Serve until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let server = &self.config.server;
        let addr = resolve_addr(&server.hostname, server.port).await?;
        let app = create_router(
            Arc::clone(&self.state),
            RouterLimits {
                request_timeout: server.request_timeout,
                max_body_size: server.max_body_size,
            },
        );

        info!("============================================================");
        info!("SPM REGISTRY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(address = %addr, tls = server.tls_enabled(), "Listening");
        info!(base_url = %self.state.base_url, "External URL");
        info!(path = %self.config.storage.path.display(), "Package storage");
        info!(auth = self.state.authenticator.kind(), "Authentication");
        info!("============================================================");

        if let (Some(cert), Some(key)) = (&server.tls_cert, &server.tls_key) {
            let tls = RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| Error::Tls(format!("failed to load certificate: {e}")))?;

            let handle = axum_server::Handle::new();
            let shutdown = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        } else {
            let listener = TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }

        info!("Server stopped");
        Ok(())
    }
}

async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| Error::Config(format!("Invalid host: {host}")))
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
