/// MCP server for WCAG remediation.
///
/// Exposes four tools:
/// - `analyze_url`: Scan a live page, correct its violations and rescan
/// - `analyze_markup`: Same pipeline over caller-supplied HTML
/// - `search_guidelines`: Semantic search over WCAG success criteria
/// - `correct_fragment`: Correct a single HTML fragment for a described issue
/// - `get_run_violations`: Read back the violation tables persisted by an earlier run
use std::sync::Arc;

use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::ContextCache;
use crate::engine::Fragment;
use crate::index::GuidelineHit;
use crate::model::CorrectionResult;
use crate::pipeline::{RemediationPipeline, RemediationReport, RunViolations};

const DEFAULT_SEARCH_LIMIT: u32 = 5;
const MAX_SEARCH_LIMIT: u32 = 50;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AnalyzeUrlParams {
    /// Absolute URL of the page to remediate.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AnalyzeMarkupParams {
    /// Full HTML document to remediate.
    pub html: String,
    /// URL used to resolve relative references while scanning.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchGuidelinesParams {
    /// Description of the accessibility issue or topic.
    pub query: String,
    /// Maximum number of results to return (default: 5, max: 50).
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SearchGuidelinesResponse {
    pub results: Vec<GuidelineHit>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CorrectFragmentParams {
    /// The offending HTML fragment.
    pub html: String,
    /// What is wrong with it, e.g. "Images must have alternate text".
    pub issue: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunViolationsParams {
    /// `run_id` from an earlier remediation report.
    pub run_id: String,
}

#[derive(Clone)]
pub struct WcagRemediatorServer {
    pipeline: Arc<RemediationPipeline>,
    cache: Arc<ContextCache>,
    tool_router: ToolRouter<WcagRemediatorServer>,
}

impl WcagRemediatorServer {
    pub fn new(pipeline: Arc<RemediationPipeline>, cache: Arc<ContextCache>) -> Self {
        Self {
            pipeline,
            cache,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl WcagRemediatorServer {
    #[tool(description = "Scan a web page for WCAG violations, generate corrections for each offending element, rescan the corrected markup and report severity scores before and after.")]
    async fn analyze_url(
        &self,
        Parameters(params): Parameters<AnalyzeUrlParams>,
    ) -> Result<Json<RemediationReport>, String> {
        let url = params.url.trim().to_string();
        if url.is_empty() {
            return Err("url must not be empty".to_string());
        }
        info!(url = %url, "analyze_url tool invoked");

        self.pipeline
            .analyze(&url)
            .await
            .map(Json)
            .map_err(|e| format!("analysis failed: {e}"))
    }

    #[tool(description = "Remediate a caller-supplied HTML document: scan it, correct each violation, rescan and report severity scores before and after.")]
    async fn analyze_markup(
        &self,
        Parameters(params): Parameters<AnalyzeMarkupParams>,
    ) -> Result<Json<RemediationReport>, String> {
        if params.html.trim().is_empty() {
            return Err("html must not be empty".to_string());
        }

        self.pipeline
            .analyze_markup(&params.html, params.base_url.as_deref())
            .await
            .map(Json)
            .map_err(|e| format!("analysis failed: {e}"))
    }

    #[tool(description = "Search WCAG success criteria by semantic similarity. Returns ranked criteria with their principle and guideline context.")]
    async fn search_guidelines(
        &self,
        Parameters(params): Parameters<SearchGuidelinesParams>,
    ) -> Result<Json<SearchGuidelinesResponse>, String> {
        let query = params.query.trim().to_string();
        if query.is_empty() {
            return Err("query must not be empty".to_string());
        }
        let limit = params
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT) as usize;

        if let Some(results) = self.cache.get_search_results(&query, limit).await {
            return Ok(Json(SearchGuidelinesResponse { results }));
        }

        let results = self
            .pipeline
            .engine()
            .index()
            .search(&query, limit)
            .await
            .map_err(|e| format!("search failed: {e}"))?;
        self.cache.set_search_results(&query, limit, &results).await;

        Ok(Json(SearchGuidelinesResponse { results }))
    }

    #[tool(description = "Correct a single HTML fragment for a described accessibility issue using retrieved WCAG guidance. Returns the original fragment unchanged when the model reply cannot be parsed.")]
    async fn correct_fragment(
        &self,
        Parameters(params): Parameters<CorrectFragmentParams>,
    ) -> Result<Json<CorrectionResult>, String> {
        if params.html.trim().is_empty() {
            return Err("html must not be empty".to_string());
        }
        let fragment = Fragment {
            html: &params.html,
            issue: &params.issue,
        };

        self.pipeline
            .engine()
            .correct(fragment)
            .await
            .map(Json)
            .map_err(|e| format!("correction failed: {e}"))
    }

    #[tool(description = "Return the before and after violation tables of an earlier remediation run, read back from its CSV artifacts. Requires ARTIFACT_DIR.")]
    async fn get_run_violations(
        &self,
        Parameters(params): Parameters<RunViolationsParams>,
    ) -> Result<Json<RunViolations>, String> {
        let store = self
            .pipeline
            .artifacts()
            .ok_or_else(|| "artifacts are disabled; set ARTIFACT_DIR".to_string())?;
        store
            .load_run(params.run_id.trim())
            .map(Json)
            .map_err(|e| format!("failed to load run: {e}"))
    }
}

#[tool_handler]
impl ServerHandler for WcagRemediatorServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "wcag-remediator".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "WCAG accessibility remediation server. Use analyze_url or analyze_markup \
                 to scan a page, correct its violations with retrieved WCAG guidance and \
                 compare severity scores; search_guidelines to look up success criteria; \
                 correct_fragment to fix one HTML element; get_run_violations to read \
                 back the tables of an earlier run."
                    .to_string(),
            ),
        }
    }
}
