use std::sync::Arc;

use anyhow::{Context, Result};
use codevec::config::Config;
use codevec::embedder;
use codevec::mcp::server::{McpContext, McpServer};
use tokio::sync::Mutex as TokioMutex;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout carries the MCP protocol, so all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting codevec MCP server...");

    // 1. Resolve config (root discovery + env overrides), immutable afterwards
    let config = Arc::new(Config::from_env().context("failed to resolve configuration")?);
    tracing::info!(
        "Codebase root: {} (model: {}, device: {})",
        config.root_path.display(),
        config.model,
        config.device
    );

    // 2. Build the embedding backend (model itself loads lazily on first use)
    let embedder = embedder::build_embedder(&config).context("failed to build embedder")?;

    // 3. Shared context for tool handlers
    let ctx = McpContext {
        config,
        embedder,
        update_lock: Arc::new(TokioMutex::new(())),
    };

    // 4. Serve on stdio
    McpServer::new(ctx).start().await
}
