//! notegraph-mcp library
//!
//! Local knowledge base with keyword and semantic search, and a
//! nearest-neighbour similarity graph over note embeddings.
//!
//! # Modules
//!
//! - `core`: notes, configuration and the error type
//! - `search`: encoder, vector store, ranking, keyword fallback, graph
//! - `mcp`: MCP server over stdio (feature `mcp`)
//! - `web`: HTTP graph API (feature `web`)

pub mod core;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod search;
#[cfg(feature = "web")]
pub mod web;

// Re-exports for convenience
pub use core::config::{DataPaths, Settings};
pub use core::error::{Error, Result};
pub use core::note::{parse_tags, Note, NoteSummary};
pub use search::{
    Encoder, GraphOptions, KnowledgeBase, LazyEncoder, NoteGraph, SearchHit, SearchMode, VectorDB,
};
