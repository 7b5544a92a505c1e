//! MCP tool handlers.
//!
//! Two tools over the shared context:
//! 1. update_index – run one incremental index pass
//! 2. search       – semantic search over the indexed codebase
//!
//! Handlers always answer with a JSON envelope carrying `success` and
//! `message`; backend failures become `success: false` payloads rather
//! than protocol-level errors, so callers can surface them verbatim.
use std::sync::Arc;

use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::warn;

use crate::indexer::{IndexBuilder, IndexStats};
use crate::mcp::server::McpContext;
use crate::query::{QueryEngine, QueryError};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct SearchParams {
    /// Search query (natural language or code terms)
    query: String,
    /// Max results, clamped to 1..=100 (default: 10)
    limit: Option<usize>,
    /// Number of top results to skip, for paging (default: 0)
    offset: Option<usize>,
    /// Run an incremental index pass before searching (default: true)
    refresh_index: Option<bool>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )]))
}

fn failure(message: String) -> Result<CallToolResult, McpError> {
    json_result(serde_json::json!({
        "success": false,
        "message": message,
    }))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

fn clamp_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    /// One serialized index pass on the blocking pool.
    async fn run_update(&self) -> anyhow::Result<IndexStats> {
        let _guard = self.ctx.update_lock.lock().await;
        let config = Arc::clone(&self.ctx.config);
        let embedder = Arc::clone(&self.ctx.embedder);
        tokio::task::spawn_blocking(move || IndexBuilder::new(config, embedder).update())
            .await
            .map_err(|e| anyhow::anyhow!("index task panicked: {e}"))?
    }

    // ── Tool 1: update_index ────────────────────────────────────────

    #[tool(
        description = "Incrementally index the configured codebase for semantic search. Unchanged files are skipped; chunks of deleted or rewritten files are pruned. Safe to call repeatedly."
    )]
    async fn update_index(&self) -> Result<CallToolResult, McpError> {
        match self.run_update().await {
            Ok(stats) => json_result(serde_json::json!({
                "success": true,
                "message": format!(
                    "Index updated: {} added, {} updated, {} unchanged, {} removed",
                    stats.files_added, stats.files_updated, stats.files_skipped, stats.files_removed,
                ),
                "codebase_root": self.ctx.config.root_path.display().to_string(),
                "stats": stats,
            })),
            Err(e) => {
                warn!("update_index failed: {e:#}");
                failure(format!("Index update failed: {e:#}"))
            }
        }
    }

    // ── Tool 2: search ──────────────────────────────────────────────

    #[tool(
        description = "Semantic search over the indexed codebase. Returns the most similar code chunks with file path, line span and similarity score. By default refreshes the index first so results reflect the working tree."
    )]
    async fn search(&self, params: Parameters<SearchParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().is_empty() {
            return error_result("query is required");
        }

        let limit = clamp_limit(p.limit);
        let offset = p.offset.unwrap_or(0);

        if p.refresh_index.unwrap_or(true) {
            if let Err(e) = self.run_update().await {
                warn!("index refresh before search failed: {e:#}");
                return failure(format!("Index refresh failed: {e:#}"));
            }
        }

        let config = Arc::clone(&self.ctx.config);
        let embedder = Arc::clone(&self.ctx.embedder);
        let query = p.query.clone();
        let result = tokio::task::spawn_blocking(move || {
            QueryEngine::new(config, embedder).query(&query, limit, offset)
        })
        .await
        .map_err(|e| McpError::internal_error(format!("search task panicked: {e}"), None))?;

        match result {
            Ok(hits) => {
                let total_returned = hits.len();
                json_result(serde_json::json!({
                    "success": true,
                    "query": p.query,
                    "results": hits,
                    "total_returned": total_returned,
                    "offset": offset,
                }))
            }
            Err(e @ QueryError::IndexMissing(_)) => failure(e.to_string()),
            Err(e) => {
                warn!("search failed: {e}");
                failure(format!("Search failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit_defaults_and_bounds() {
        assert_eq!(clamp_limit(None), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(10_000)), MAX_LIMIT);
    }
}
