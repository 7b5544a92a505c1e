//! MCP server setup using `rmcp` with stdio transport.
//!
//! Provides `McpContext` (shared state) and `McpServer` (startup logic).
use anyhow::{Context, Result};
use rmcp::{ServiceExt, handler::server::router::Router, transport::io::stdio};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tracing::info;

use crate::config::Config;
use crate::embedder::Embedder;
use crate::mcp::tools::AppTools;

/// Shared application context available to all tool handlers.
#[derive(Clone)]
pub struct McpContext {
    pub config: Arc<Config>,
    pub embedder: Arc<dyn Embedder>,
    /// Serializes index passes; concurrent update callers queue here
    /// instead of interleaving writes.
    pub update_lock: Arc<TokioMutex<()>>,
}

/// MCP server wrapping the context and serving via stdio.
#[derive(Clone)]
pub struct McpServer {
    pub ctx: McpContext,
}

impl McpServer {
    pub fn new(ctx: McpContext) -> Self {
        Self { ctx }
    }

    /// Start the MCP server on stdio transport (blocks until the client
    /// disconnects).
    pub async fn start(self) -> Result<()> {
        info!(
            "starting MCP server on stdio (codebase root: {})",
            self.ctx.config.root_path.display()
        );
        let (stdin, stdout) = stdio();

        let app_tools = AppTools::new(self.ctx.clone());
        let router = Router::new(app_tools.clone()).with_tools(app_tools.tool_router.clone());

        router
            .serve((stdin, stdout))
            .await
            .context("MCP server encountered an error during stdio transport")?;

        Ok(())
    }
}
