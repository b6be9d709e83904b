//! Knowledge base MCP server over stdio

use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{
        AnnotateAble, CallToolResult, Content, ListResourcesResult, PaginatedRequestParam,
        RawResource, ReadResourceRequestParam, ReadResourceResult, Resource, ResourceContents,
        ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router, ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::config::{DataPaths, Settings};
use crate::core::error::Error;
use crate::core::note::parse_tags;
use crate::search::embedding::{self, Encoder};
use crate::search::engine::{KnowledgeBase, SearchMode};
use crate::search::graph::GraphOptions;

/// Notes are exposed as resources under `notes://{key}`.
const RESOURCE_SCHEME: &str = "notes://";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StoreNoteParams {
    #[schemars(description = "Unique note key, e.g. \"python/argparse-tips\"")]
    pub key: String,
    #[schemars(description = "Full text of the note")]
    pub body: String,
    #[schemars(description = "Optional comma-separated tags, e.g. \"newrelic,mcp,cursor\"")]
    #[serde(default)]
    pub tags: Option<String>,
    #[schemars(description = "Add tags suggested from similar notes (default: false)")]
    #[serde(default)]
    pub auto_tag: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct KeyParams {
    #[schemars(description = "Note key")]
    pub key: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "What to search for")]
    pub query: String,
    #[schemars(description = "Use case-insensitive substring search instead of semantic search")]
    #[serde(default)]
    pub keyword: bool,
    #[schemars(description = "Maximum number of results (default: 10)")]
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListNotesParams {
    #[schemars(description = "Only notes carrying exactly this tag")]
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GraphParams {
    #[schemars(description = "Neighbours per note (default: 3)")]
    #[serde(default)]
    pub neighbors: Option<usize>,
}

/// Knowledge base MCP service
///
/// Each call opens its own connection; the encoder is shared.
#[derive(Clone)]
pub struct KnowledgeService {
    paths: DataPaths,
    settings: Settings,
    encoder: Arc<dyn Encoder>,
    tool_router: ToolRouter<Self>,
}

impl KnowledgeService {
    pub fn new(paths: DataPaths, settings: Settings) -> Self {
        let encoder: Arc<dyn Encoder> = embedding::global(&settings.embedding);
        Self::with_encoder(paths, settings, encoder)
    }

    pub fn with_encoder(paths: DataPaths, settings: Settings, encoder: Arc<dyn Encoder>) -> Self {
        Self {
            paths,
            settings,
            encoder,
            tool_router: Self::tool_router(),
        }
    }

    /// Run `f` against a fresh knowledge base on the blocking pool.
    async fn with_kb<T, F>(&self, f: F) -> Result<Result<T, Error>, McpError>
    where
        T: Send + 'static,
        F: FnOnce(&KnowledgeBase) -> Result<T, Error> + Send + 'static,
    {
        let paths = self.paths.clone();
        let settings = self.settings.clone();
        let encoder = self.encoder.clone();

        tokio::task::spawn_blocking(move || {
            let kb = KnowledgeBase::open(&paths, settings, encoder)?;
            f(&kb)
        })
        .await
        .map_err(|e| McpError::internal_error(format!("Tool task failed: {}", e), None))
    }

    /// One resource per stored note, read from the store on every call.
    async fn note_resources(&self) -> Result<Vec<Resource>, McpError> {
        let summaries = self
            .with_kb(|kb| kb.list_notes(None))
            .await?
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        Ok(summaries
            .into_iter()
            .map(|summary| {
                let tags = if summary.tags.is_empty() {
                    "no tags".to_string()
                } else {
                    summary.tags.join(", ")
                };
                let mut raw =
                    RawResource::new(format!("{}{}", RESOURCE_SCHEME, summary.key), summary.key);
                raw.description = Some(format!(
                    "[{}] updated {}",
                    tags,
                    summary.updated_at.to_rfc3339()
                ));
                raw.mime_type = Some("text/plain".to_string());
                raw.no_annotation()
            })
            .collect())
    }

    /// Body of the note behind a `notes://{key}` URI.
    async fn read_note_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        let Some(key) = uri.strip_prefix(RESOURCE_SCHEME) else {
            return Err(McpError::invalid_params(
                format!("unsupported resource URI: {}", uri),
                None,
            ));
        };
        let key = key.to_string();

        match self.with_kb(move |kb| kb.get_note(&key)).await? {
            Ok(note) => Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(note.body, uri)],
            }),
            Err(e @ Error::KeyNotFound(_)) => Err(McpError::resource_not_found(
                e.to_string(),
                Some(serde_json::json!({ "uri": uri })),
            )),
            Err(e) => Err(McpError::internal_error(e.to_string(), None)),
        }
    }
}

#[tool_router]
impl KnowledgeService {
    #[tool(description = "Health check. Confirms the server is reachable.")]
    async fn ping(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text("pong")]))
    }

    #[tool(description = "Save a text note under a unique key. An existing note with the same key is overwritten. An embedding is stored alongside it for semantic search.")]
    async fn store_note(
        &self,
        params: Parameters<StoreNoteParams>,
    ) -> Result<CallToolResult, McpError> {
        let StoreNoteParams {
            key,
            body,
            tags,
            auto_tag,
        } = params.0;
        let tags = tags.as_deref().map(parse_tags).unwrap_or_default();

        let result = self
            .with_kb(move |kb| kb.store_note(&key, &body, &tags, auto_tag))
            .await?;

        match result {
            Ok(stored) => {
                let mut message = format!("Stored note '{}'.", stored.note.key);
                if !stored.added_tags.is_empty() {
                    message.push_str(&format!(" Auto-tags: {}.", stored.added_tags.join(", ")));
                }
                if let Some(reason) = stored.embedding_error {
                    message.push_str(&format!(
                        " No embedding yet ({}); it will be added by backfill.",
                        reason
                    ));
                }
                Ok(CallToolResult::success(vec![Content::text(message)]))
            }
            Err(e) => tool_result::<()>(Err(e)),
        }
    }

    #[tool(description = "Retrieve a note by key. Returns key, body, tags, created_at and updated_at as JSON.")]
    async fn get_note(&self, params: Parameters<KeyParams>) -> Result<CallToolResult, McpError> {
        let key = params.0.key;
        tool_result(self.with_kb(move |kb| kb.get_note(&key)).await?)
    }

    #[tool(description = "Search notes by meaning (default) or by keyword. Semantic results are ordered by similarity. With keyword=true, a case-insensitive substring match over key, body and tags, newest first.")]
    async fn search_notes(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let SearchParams {
            query,
            keyword,
            limit,
        } = params.0;
        let mode = if keyword {
            SearchMode::Keyword
        } else {
            SearchMode::Semantic
        };

        tool_result(
            self.with_kb(move |kb| kb.search_notes(&query, mode, limit))
                .await?,
        )
    }

    #[tool(description = "List all notes (key, tags, created_at, updated_at; no body), optionally filtered by tag.")]
    async fn list_notes(
        &self,
        params: Parameters<ListNotesParams>,
    ) -> Result<CallToolResult, McpError> {
        let tag = params.0.tag.filter(|t| !t.trim().is_empty());
        tool_result(self.with_kb(move |kb| kb.list_notes(tag.as_deref())).await?)
    }

    #[tool(description = "Delete a note and its embedding by key.")]
    async fn delete_note(&self, params: Parameters<KeyParams>) -> Result<CallToolResult, McpError> {
        let key = params.0.key;
        let lookup = key.clone();
        match self.with_kb(move |kb| kb.delete_note(&lookup)).await? {
            Ok(true) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Deleted note '{}'.",
                key
            ))])),
            Ok(false) => tool_result::<()>(Err(Error::KeyNotFound(key))),
            Err(e) => tool_result::<()>(Err(e)),
        }
    }

    #[tool(description = "Suggest tags for a note from the tags of semantically similar notes.")]
    async fn suggest_tags(&self, params: Parameters<KeyParams>) -> Result<CallToolResult, McpError> {
        let key = params.0.key;
        tool_result(self.with_kb(move |kb| kb.suggest_tags(&key)).await?)
    }

    #[tool(description = "Nearest-neighbour similarity graph over all notes: {nodes, edges}. Cost grows quadratically with note count.")]
    async fn note_graph(&self, params: Parameters<GraphParams>) -> Result<CallToolResult, McpError> {
        let graph = &self.settings.graph;
        let options = GraphOptions::new(graph.clamp_neighbors(params.0.neighbors))
            .with_timeout(graph.timeout());

        tool_result(self.with_kb(move |kb| kb.get_graph(&options)).await?)
    }
}

/// Serialize a value as the tool's text output. Caller-facing failures become
/// tool errors; storage failures become protocol errors.
fn tool_result<T: Serialize>(result: Result<T, Error>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => {
            let output = serde_json::to_string_pretty(&value).map_err(|e| {
                McpError::internal_error(format!("JSON serialization failed: {}", e), None)
            })?;
            Ok(CallToolResult::success(vec![Content::text(output)]))
        }
        Err(
            e @ (Error::KeyNotFound(_)
            | Error::InvalidKey(_)
            | Error::ModelUnavailable(_)
            | Error::GraphCancelled { .. }),
        ) => Ok(CallToolResult::error(vec![Content::text(format!("Error: {}", e))])),
        Err(e) => Err(McpError::internal_error(e.to_string(), None)),
    }
}

#[tool_handler]
impl ServerHandler for KnowledgeService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Local knowledge base. Store notes, search them by meaning or keyword, and explore the similarity graph.".to_string(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult::with_all_items(self.note_resources().await?))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        self.read_note_resource(&request.uri).await
    }
}

/// Run the MCP server on stdin/stdout until the client disconnects
pub async fn run_mcp_server(paths: DataPaths, settings: Settings) -> Result<()> {
    use tokio::io::{stdin, stdout};

    info!(data_dir = %paths.root.display(), "starting MCP server on stdio");
    let service = KnowledgeService::new(paths, settings);
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    server.waiting().await?;

    Ok(())
}
