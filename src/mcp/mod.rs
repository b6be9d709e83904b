//! MCP server exposing the knowledge base to AI clients over stdio.

mod server;

pub use server::{run_mcp_server, KnowledgeService};
