use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    engine::Engine,
    error,
    search::{MatchKind, SearchRequest, SearchResult, SearchStatus},
    text_util::chunk_snippet,
};

const DEFAULT_SEARCH_LIMIT: usize = 10;
const DEFAULT_SUGGESTION_LIMIT: usize = 10;

#[derive(Clone)]
pub struct DocsiftMcpServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

impl DocsiftMcpServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocsiftMcpServer {
    /// Hybrid search over indexed sections.
    #[tool(
        name = "docsift_search",
        description = "Search indexed manuals by section. Exact section titles return that section directly; other queries combine keyword and semantic scoring. Results carry page ranges and a snippet."
    )]
    pub async fn docsift_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let query = params.query.clone();

        let mut request = SearchRequest::new(
            params.query,
            params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        );
        if let Some(reference) = params.document.as_deref() {
            let doc = self.engine.document(reference).map_err(|e| {
                rmcp::ErrorData::invalid_params(e.to_string(), None)
            })?;
            request = request.in_document(doc.id.numeric);
        }
        if params.lexical_only.unwrap_or(false) {
            request = request.lexical_only();
        }

        // Model calls block; keep them off the async workers.
        let engine = Arc::clone(&self.engine);
        let outcome =
            tokio::task::spawn_blocking(move || engine.search(&request))
                .await
                .map_err(|e| mcp_error("search task failed", e))?;

        let include_snippet = params.include_snippet.unwrap_or(true);
        let items: Vec<SearchResultItem> = outcome
            .results
            .iter()
            .map(|r| SearchResultItem::new(r, &query, include_snippet))
            .collect();

        let summary = format_search_summary(&items, &query, &outcome.status);
        let structured = serde_json::to_value(SearchResponse {
            query,
            result_count: items.len(),
            short_circuited: outcome.short_circuited,
            status: outcome.status,
            results: items,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::default();
        result.content = vec![Content::text(summary)];
        result.structured_content = Some(structured);
        result.is_error = Some(false);
        result.meta = None;
        Ok(result)
    }

    /// Section titles for autocompletion.
    #[tool(
        name = "docsift_suggest_titles",
        description = "Suggest indexed section titles that start with (or contain) a prefix."
    )]
    pub async fn docsift_suggest_titles(
        &self,
        params: Parameters<SuggestParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let titles = self.engine.title_suggestions(
            &params.prefix,
            params.limit.unwrap_or(DEFAULT_SUGGESTION_LIMIT),
        );

        let summary = if titles.is_empty() {
            format!("No titles match \"{}\"", params.prefix)
        } else {
            titles.join("\n")
        };

        let mut result = CallToolResult::default();
        result.content = vec![Content::text(summary)];
        result.structured_content = Some(json!({
            "prefix": params.prefix,
            "titles": titles,
        }));
        result.is_error = Some(false);
        result.meta = None;
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocsiftMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info =
            Implementation::new("docsift".to_string(), env!("CARGO_PKG_VERSION").to_string());
        server_info.title = Some("docsift MCP".to_string());
        server_info.icons = None;
        server_info.website_url = None;

        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = server_info;
        info.instructions = Some(
            "Use docsift_suggest_titles to find exact section names, then docsift_search with a title or a question. Restrict to one manual with the document parameter."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query or section title.
    pub query: String,
    /// Maximum number of results (default: 10).
    pub limit: Option<usize>,
    /// Restrict to one document (file name or id).
    pub document: Option<String>,
    /// Skip semantic scoring and reranking.
    pub lexical_only: Option<bool>,
    /// Include a snippet preview (default: true).
    pub include_snippet: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuggestParams {
    /// Title prefix, matched case-insensitively.
    pub prefix: String,
    /// Maximum number of titles (default: 10).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    short_circuited: bool,
    status: SearchStatus,
    results: Vec<SearchResultItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultItem {
    chunk_id: String,
    document_id: String,
    file: String,
    ordinal: usize,
    title: String,
    page_start: u32,
    page_end: u32,
    score: f32,
    match_type: MatchKind,
    extraction_method: &'static str,
    snippet: Option<String>,
}

impl SearchResultItem {
    fn new(result: &SearchResult, query: &str, include_snippet: bool) -> Self {
        let chunk = &result.chunk;
        Self {
            chunk_id: chunk.id.clone(),
            document_id: result.document.id.short.clone(),
            file: result.document.record.file_name.clone(),
            ordinal: chunk.ordinal,
            title: chunk.title.clone(),
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            score: result.final_score,
            match_type: result.match_type,
            extraction_method: chunk.extraction_method(),
            snippet: include_snippet
                .then(|| chunk_snippet(&chunk.content, query))
                .flatten(),
        }
    }
}

fn format_search_summary(
    results: &[SearchResultItem],
    query: &str,
    status: &SearchStatus,
) -> String {
    if let SearchStatus::Failed { reason } = status {
        return format!("Search for \"{query}\" failed: {reason}");
    }
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 2);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for item in results {
        lines.push(format!(
            "{} {:.3} {} p.{} {}",
            item.chunk_id, item.score, item.file, item.page_start, item.title
        ));
    }

    if let SearchStatus::Degraded { reasons } = status {
        lines.push(format!("(degraded: {})", reasons.join("; ")));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Serve the engine over stdio until the client disconnects.
pub fn run_mcp(engine: Engine) -> error::Result<()> {
    let server = DocsiftMcpServer::new(Arc::new(engine));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}
