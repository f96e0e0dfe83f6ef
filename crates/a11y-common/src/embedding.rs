/// Embedding wrapper around fastembed.
///
/// `TextEmbedding` from fastembed is synchronous and CPU-bound. All embed calls go through
/// `tokio::task::spawn_blocking`. The model is wrapped in `Arc` and accessed only from
/// blocking tasks.
///
/// The nomic-embed-text-v1.5 model uses task-prefixed inputs:
/// - Documents: "search_document: {text}"
/// - Queries: "search_query: {text}"
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CommonError;

/// Anything that can turn text into a fixed-length vector.
///
/// Guideline documents and violation descriptions are embedded through different
/// methods so that asymmetric models can apply their own prefixes.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embed a single document for indexing.
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>, CommonError>;

    /// Embed a single query for search.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CommonError>;

    /// Dimensionality of every vector this embedder returns.
    fn dimensions(&self) -> usize;
}

/// Wraps fastembed's `TextEmbedding` model for generating vector embeddings.
pub struct Embedder {
    model: Arc<fastembed::TextEmbedding>,
}

impl Embedder {
    /// Initialize the embedding model (nomic-embed-text-v1.5).
    ///
    /// This downloads the model on first run (~300MB). The download happens synchronously
    /// inside a blocking task.
    pub async fn new() -> Result<Self, CommonError> {
        let model = tokio::task::spawn_blocking(|| {
            let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::NomicEmbedTextV15)
                .with_show_download_progress(true);
            fastembed::TextEmbedding::try_new(options)
        })
        .await
        .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
        .map_err(|e| CommonError::Embedding(format!("model initialization failed: {e}")))?;

        Ok(Self {
            model: Arc::new(model),
        })
    }

    async fn embed_one(&self, input: String, kind: &'static str) -> Result<Vec<f32>, CommonError> {
        let model = Arc::clone(&self.model);
        let mut results = tokio::task::spawn_blocking(move || model.embed(vec![input], None))
            .await
            .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
            .map_err(|e| CommonError::Embedding(format!("{kind} embedding failed: {e}")))?;
        results
            .pop()
            .ok_or_else(|| CommonError::Embedding("empty embedding result".to_string()))
    }
}

#[async_trait]
impl TextEmbedder for Embedder {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>, CommonError> {
        self.embed_one(format!("search_document: {text}"), "document")
            .await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CommonError> {
        self.embed_one(format!("search_query: {query}"), "query").await
    }

    /// 768 for nomic-embed-text-v1.5.
    fn dimensions(&self) -> usize {
        768
    }
}
