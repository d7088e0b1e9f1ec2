//! Streamable-HTTP transport: one server (and session) per MCP session id.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use boris::config::ServerConfig;
use boris::registry::SessionRegistry;
use http::HeaderName;
use rmcp::transport::streamable_http_server::StreamableHttpServerConfig;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::transport::streamable_http_server::session::local::{LocalSessionManager, SessionConfig};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{self, AuthState};
use crate::server::BorisServer;

/// Default idle timeout before an HTTP session is torn down.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub addr: SocketAddr,
    pub auth_token: Option<String>,
    pub idle_timeout: Duration,
}

/// Serve MCP over streamable HTTP until SIGTERM/SIGINT, then close every
/// live session.
pub async fn run_http(config: Arc<ServerConfig>, opts: HttpOptions) -> anyhow::Result<()> {
    let registry = Arc::new(SessionRegistry::new());
    let app = build_app(config, registry.clone(), &opts);

    let listener = tokio::net::TcpListener::bind(opts.addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, closing sessions");
    registry.close_all().await;
    Ok(())
}

/// Assemble the router: `/health` stays open, `/mcp` sits behind the
/// optional bearer middleware, CORS wraps everything (and answers
/// preflights before auth runs).
pub fn build_app(
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    opts: &HttpOptions,
) -> Router {
    let mut session_config = SessionConfig::default();
    session_config.channel_capacity = 16;
    session_config.keep_alive = Some(opts.idle_timeout);
    let mut session_manager = LocalSessionManager::default();
    session_manager.session_config = session_config;
    let session_manager = Arc::new(session_manager);

    let service = StreamableHttpService::new(
        {
            let config = config.clone();
            let registry = registry.clone();
            move || Ok(BorisServer::new(config.clone(), registry.clone()))
        },
        session_manager,
        {
            let mut config = StreamableHttpServerConfig::default();
            config.sse_keep_alive = Some(Duration::from_secs(15));
            config.stateful_mode = true;
            config
        },
    );

    let mut mcp = Router::new().nest_service("/mcp", service);
    if let Some(token) = &opts.auth_token {
        mcp = mcp.layer(axum::middleware::from_fn_with_state(
            AuthState::new(token.clone()),
            auth::require_bearer,
        ));
    }

    Router::new()
        .route("/health", get(health))
        .merge(mcp)
        .layer(cors_layer())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        // Browsers need to read the session id to reconnect.
        .expose_headers([HeaderName::from_static("mcp-session-id")])
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }
}
