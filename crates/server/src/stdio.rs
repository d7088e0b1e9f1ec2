//! Stdio transport: one session for the life of the process.
//!
//! Logging must go to stderr in this mode; stdout carries the MCP framing.

use std::sync::Arc;

use boris::config::ServerConfig;
use boris::registry::SessionRegistry;
use rmcp::ServiceExt;
use rmcp::transport::stdio;

use crate::server::BorisServer;

/// Serve MCP over stdin/stdout until the transport ends, then close the
/// session so background tasks are reaped before exit.
pub async fn run_stdio(config: Arc<ServerConfig>) -> anyhow::Result<()> {
    let registry = Arc::new(SessionRegistry::new());
    let server = BorisServer::new(config, registry);
    let session = server.session();

    tracing::info!("serving on stdio");
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    session.close().await;
    Ok(())
}
