//! Proxy server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::forward::Forwarder;
use super::router::{AppState, create_router};
use super::routes::RouteTable;
use crate::auth::AuthGate;
use crate::config::Config;
use crate::{Error, Result};

/// Cromwell proxy server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared request state
    state: Arc<AppState>,
    /// Shutdown broadcaster
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Gateway {
    /// Create a new gateway. Builds every request-path component up front so
    /// configuration errors surface before the listener is bound.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let routes = RouteTable::from_config(&config.effective_routes())?;
        let gate = if config.requires_auth() {
            Some(AuthGate::from_config(&config.auth)?)
        } else {
            None
        };
        let forwarder = Forwarder::new(&config.upstream)?;

        let state = Arc::new(AppState {
            routes,
            gate,
            forwarder,
        });

        Ok(Self {
            config,
            state,
            shutdown_tx: None,
        })
    }

    /// Bind the configured address and serve until a shutdown signal.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(mut self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        self.log_banner(local_addr);

        let app = create_router(Arc::clone(&self.state));
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .into_future();
        tokio::pin!(serve);

        // After the signal, in-flight requests get `shutdown_timeout` to drain.
        let drain_limit = self.config.server.shutdown_timeout;
        tokio::select! {
            result = &mut serve => {
                return result.map_err(|e| Error::Internal(e.to_string()));
            }
            _ = shutdown_rx.recv() => {}
        }

        match tokio::time::timeout(drain_limit, serve).await {
            Ok(result) => result.map_err(|e| Error::Internal(e.to_string()))?,
            Err(_) => warn!(
                timeout_secs = drain_limit.as_secs(),
                "Shutdown timeout elapsed with requests still in flight"
            ),
        }

        info!("Proxy stopped");
        Ok(())
    }

    fn log_banner(&self, local_addr: SocketAddr) {
        info!("============================================================");
        info!("Cromwell proxy v{}", env!("CARGO_PKG_VERSION"));
        info!("  Listening on http://{local_addr}");
        info!("  Upstream:    {}", self.config.upstream.base_url);
        match self.state.gate.as_ref() {
            Some(gate) => info!(
                "  Tokens:      issuer={} audience={}",
                gate.validator().issuer(),
                gate.validator().audience()
            ),
            None => warn!("AUTHENTICATION disabled - no route requires a token"),
        }
        info!("  Routes:      {}", self.state.routes.len());
        info!("============================================================");
    }
}

/// Resolve when Ctrl+C or SIGTERM arrives, then notify `shutdown_tx`.
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
    let _ = shutdown_tx.send(());
}
