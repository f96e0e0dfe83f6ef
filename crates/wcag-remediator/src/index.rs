/// Guideline embedding index.
///
/// Wraps a named vector table and the embedder used to fill it. Population is resumable:
/// each criterion is embedded and inserted on its own, criteria already present are
/// skipped, and a failure on one criterion is recorded without touching the others.
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use a11y_common::embedding::TextEmbedder;
use a11y_common::vectordb::{Neighbor, VectorCatalog, VectorRow, VectorTable};

use crate::corpus;
use crate::error::AppError;
use crate::model::GuidelineDocument;

/// What a `populate` run did.
#[derive(Debug, Default)]
pub struct PopulationReport {
    pub inserted: usize,
    pub skipped: usize,
    /// One `AppError::IndexPopulation` per criterion that could not be indexed.
    pub failures: Vec<AppError>,
}

/// A search hit for the tool surfaces.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GuidelineHit {
    pub criterion_id: String,
    /// Similarity score (higher is better).
    pub score: f32,
    pub text: String,
}

pub struct EmbeddingIndex {
    table: Arc<dyn VectorTable>,
    embedder: Arc<dyn TextEmbedder>,
}

impl EmbeddingIndex {
    /// Open the table called `name`, creating it empty if absent. Never fails because the
    /// name is unknown.
    pub async fn open_or_create(
        catalog: &dyn VectorCatalog,
        name: &str,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Result<Self, AppError> {
        let table = catalog.open_or_create(name, embedder.dimensions()).await?;
        Ok(Self { table, embedder })
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub async fn len(&self) -> Result<usize, AppError> {
        Ok(self.table.count().await?)
    }

    /// Embed and insert every criterion not already in the table.
    ///
    /// Running this on a fully populated index is a no-op. Entries inserted before a
    /// failure stay inserted.
    pub async fn populate(&self, doc: &GuidelineDocument) -> PopulationReport {
        let mut report = PopulationReport::default();

        for entry in corpus::flatten(doc) {
            match self.insert_if_absent(entry.id, entry.text).await {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.skipped += 1,
                Err(source) => {
                    warn!(criterion_id = entry.id, error = %source, "failed to index criterion, continuing");
                    report.failures.push(AppError::IndexPopulation {
                        criterion_id: entry.id.to_string(),
                        source,
                    });
                }
            }
        }

        info!(
            table = self.name(),
            inserted = report.inserted,
            skipped = report.skipped,
            failed = report.failures.len(),
            "guideline index populated"
        );
        report
    }

    async fn insert_if_absent(
        &self,
        id: &str,
        text: String,
    ) -> Result<bool, a11y_common::error::CommonError> {
        if self.table.contains(id).await? {
            return Ok(false);
        }
        let embedding = self.embedder.embed_document(&text).await?;
        self.table
            .insert(VectorRow {
                id: id.to_string(),
                text,
                embedding,
            })
            .await?;
        Ok(true)
    }

    /// Document texts of the `k` entries nearest to `query`, most similar first.
    ///
    /// An empty index yields an empty list.
    pub async fn query(&self, query: &[f32], k: usize) -> Result<Vec<String>, AppError> {
        Ok(self
            .nearest(query, k)
            .await?
            .into_iter()
            .map(|n| n.text)
            .collect())
    }

    /// Embed `text` as a query and return the `k` best hits with scores.
    pub async fn search(&self, text: &str, k: usize) -> Result<Vec<GuidelineHit>, AppError> {
        let query = self.embed_query(text).await?;
        Ok(self
            .nearest(&query, k)
            .await?
            .into_iter()
            .map(|n| GuidelineHit {
                criterion_id: n.id,
                // LanceDB reports L2 distance; invert so higher is more similar.
                score: (1.0_f32 - n.distance).max(0.0),
                text: n.text,
            })
            .collect())
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError> {
        Ok(self.embedder.embed_query(text).await?)
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, AppError> {
        if k == 0 {
            return Err(AppError::InvalidArgument(
                "k must be a positive integer".to_string(),
            ));
        }
        Ok(self.table.nearest(query, k).await?)
    }
}
