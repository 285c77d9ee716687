//! WebSocket relay server for Hearth.
//!
//! Exposes three routes: `/` (active-connection indicator polled by
//! clients), `/health`, and `/ws` (the chat WebSocket). All connection
//! handlers share one [`ServerState`] constructed at startup.

mod admin;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::ai::AiBridge;
use crate::config::Config;
use crate::moderation::ModerationStore;
use crate::registry::Registry;
use crate::{HearthError, Result};

/// Shared server context, constructed once at startup and passed by
/// reference into every connection handler.
pub struct ServerState {
    /// Loaded configuration.
    pub config: Config,
    /// Live session registry.
    pub registry: Registry,
    /// Persistent ban/mute store.
    pub store: ModerationStore,
    /// Bridge to the external completion service.
    pub ai: AiBridge,
}

impl ServerState {
    /// Build the context: load moderation state and set up the AI bridge.
    pub async fn new(config: Config) -> Result<Self> {
        let store = ModerationStore::load(&config.moderation.state_path).await;
        let ai = AiBridge::new(config.ai.clone())?;
        if ai.is_configured() {
            tracing::info!("AI bridge configured for {}", config.ai.endpoint);
        } else {
            tracing::info!("AI bridge unconfigured, running in simulated mode");
        }

        Ok(Self {
            config,
            registry: Registry::new(),
            store,
            ai,
        })
    }
}

/// The chat relay server.
pub struct RelayServer {
    /// Bind address.
    addr: SocketAddr,
    /// Shared context.
    state: Arc<ServerState>,
}

impl RelayServer {
    /// Create a new server from configuration.
    pub async fn new(config: Config) -> Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| HearthError::Config(format!("invalid server address: {e}")))?;
        let state = Arc::new(ServerState::new(config).await?);

        Ok(Self { addr, state })
    }

    /// Get the shared server context.
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/health", get(health))
            .route("/ws", get(ws::ws_handler))
            .with_state(Arc::clone(&self.state))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until a shutdown signal arrives.
    ///
    /// Moderation state is flushed before returning, bounding data loss on
    /// termination signals.
    pub async fn run(self) -> Result<()> {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Relay server listening on http://{}", local_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Shutting down, flushing moderation state");
        self.state.store.flush().await;
        Ok(())
    }

    /// Run the server in the background and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> Result<SocketAddr> {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Relay server listening on http://{}", local_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Relay server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}

/// Resolve when the process receives ctrl-c or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install ctrl-c handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// GET / - server indicator with the active session count.
async fn index(State(state): State<Arc<ServerState>>) -> Html<String> {
    let online = state.registry.count().await;
    Html(format!(
        "<h1>Hearth Server</h1><p>Active connections: {online}</p>"
    ))
}

/// GET /health - liveness probe.
async fn health() -> &'static str {
    "OK"
}
