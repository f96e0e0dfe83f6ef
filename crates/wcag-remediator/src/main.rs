mod cache;
mod config;
mod corpus;
mod engine;
mod error;
mod fetch;
mod http;
mod index;
mod markup;
mod model;
mod pipeline;
mod scanner;
mod server;
mod violations;

use std::sync::Arc;

use rmcp::{ServiceExt, transport::stdio};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use a11y_common::embedding::{Embedder, TextEmbedder};
use a11y_common::memory::MemoryVectorDb;
use a11y_common::openai::{ChatModel, OpenAiChatModel, OpenAiClient, OpenAiClientConfig};
use a11y_common::redis::RedisCache;
use a11y_common::vectordb::{VectorCatalog, VectorDb};

use cache::ContextCache;
use config::Config;
use engine::CorrectionEngine;
use fetch::HttpFetcher;
use index::EmbeddingIndex;
use pipeline::{ArtifactStore, RemediationPipeline};
use scanner::CommandScanner;
use server::WcagRemediatorServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing to stderr (stdout is reserved for MCP JSON-RPC)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting wcag-remediator");

    // 1. Load config from environment
    let config = Config::from_env()?;
    info!(
        corpus_path = %config.corpus_path,
        lancedb_path = config.lancedb_path.as_deref().unwrap_or("<memory>"),
        redis = config.redis_url.is_some(),
        chat_model = %config.chat_model,
        retrieval_k = config.retrieval_k,
        "configuration loaded"
    );

    // 2. Load the guideline corpus (missing or malformed is fatal)
    let corpus = corpus::load_file(std::path::Path::new(&config.corpus_path))?;
    info!(criteria = corpus::criterion_count(&corpus), "guideline corpus loaded");

    // 3. Connect to Redis (optional, graceful degradation if unavailable)
    let redis_cache = RedisCache::new(config.redis_url.as_deref());
    if redis_cache.is_available().await {
        info!("redis connected");
    } else {
        info!("redis unavailable, running without cache");
    }
    let cache = Arc::new(ContextCache::new(redis_cache));

    // 4. Initialize embedding model
    info!("initializing embedding model (may download on first run)");
    let embedder: Arc<dyn TextEmbedder> = Arc::new(Embedder::new().await?);
    info!("embedding model ready");

    // 5. Open the index and fill in whatever is missing
    let catalog: Box<dyn VectorCatalog> = match &config.lancedb_path {
        Some(path) => {
            let db = VectorDb::connect(path).await?;
            info!("lancedb connected");
            Box::new(db)
        }
        None => {
            info!("LANCEDB_PATH not set, keeping the index in memory");
            Box::new(MemoryVectorDb::new())
        }
    };
    let index = EmbeddingIndex::open_or_create(catalog.as_ref(), &config.index_name, embedder).await?;
    let report = index.populate(&corpus).await;
    if report.inserted > 0 {
        cache.invalidate_all().await;
    }
    if !report.failures.is_empty() {
        warn!(
            failed = report.failures.len(),
            "some criteria could not be indexed; rerun to retry them"
        );
    }
    info!(entries = index.len().await?, "guideline index ready");

    // 6. Chat backend, scanner and fetcher
    let openai_config = OpenAiClientConfig::from_env();
    info!(
        base_url = %openai_config.base_url,
        timeout_ms = openai_config.default_timeout.as_millis(),
        max_retries = openai_config.max_retries,
        "openai client configured"
    );
    let openai = Arc::new(OpenAiClient::new(openai_config)?);
    let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(openai, config.chat_model.clone()));

    let scanner = Arc::new(CommandScanner::new(&config.scanner_command, config.scan_timeout)?);
    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
    let artifacts = config
        .artifact_dir
        .as_deref()
        .map(ArtifactStore::open)
        .transpose()?;

    let engine = Arc::new(CorrectionEngine::new(
        Arc::new(index),
        chat,
        Arc::clone(&cache),
        config.retrieval_k,
    ));
    let pipeline = Arc::new(RemediationPipeline::new(engine, scanner, fetcher, artifacts));

    // 7. Serve
    if let Some(addr) = &config.http_listen_addr {
        let listener = TcpListener::bind(addr).await?;
        info!(listen_addr = %addr, "HTTP API ready");
        axum::serve(listener, http::router(pipeline)).await?;
        return Ok(());
    }

    let server = WcagRemediatorServer::new(pipeline, cache);

    if let Some(addr) = &config.mcp_tcp_listen_addr {
        let listener = TcpListener::bind(addr).await?;
        info!(listen_addr = %addr, "MCP server ready, serving on TCP");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = server.clone();
            tokio::spawn(async move {
                info!(peer = %peer, "MCP client connected");
                let service = server.serve(stream).await.inspect_err(|e| {
                    tracing::error!(error = %e, "MCP server error");
                })?;
                service.waiting().await?;
                info!(peer = %peer, "MCP client disconnected");
                Ok::<(), anyhow::Error>(())
            });
        }
    } else {
        info!("MCP server ready, serving on stdio");
        let service = server.serve(stdio()).await.inspect_err(|e| {
            tracing::error!(error = %e, "MCP server error");
        })?;
        service.waiting().await?;
        info!("MCP server shut down");
    }
    Ok(())
}
