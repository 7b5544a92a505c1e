//! # codevec — Semantic Codebase Search MCP Server
//!
//! Indexes a codebase's source files into chunk-level vector embeddings
//! stored in SQLite (sqlite-vec), then serves nearest-neighbor semantic
//! search to AI assistants via the Model Context Protocol (MCP).
//!
//! ## Architecture
//!
//! - **[`config`]** — Environment-driven configuration and codebase root discovery
//! - **[`walker`]** — Recursive source file enumeration with include/exclude globs
//! - **[`languages`]** — Extension → language mapping and Tree-sitter grammars
//! - **[`chunker`]** — Deterministic size-bounded chunking along syntax boundaries
//! - **[`ids`]** — Content-addressed chunk ids and file fingerprints
//! - **[`embedder`]** — Text embedding (local ONNX or remote API), batched and memoized
//! - **[`db`]** — SQLite + sqlite-vec vector store and incremental-pass state
//! - **[`indexer`]** — Incremental index builder (fingerprint memoization + id diffing)
//! - **[`query`]** — Vector query engine (cosine k-NN with pagination)
//! - **[`mcp`]** — MCP server with `update_index` and `search` tools (stdio via rmcp)

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedder;
pub mod ids;
pub mod indexer;
pub mod languages;
pub mod mcp;
pub mod query;
pub mod walker;
