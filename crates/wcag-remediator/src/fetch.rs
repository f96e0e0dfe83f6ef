use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::AppError;

/// Retrieves the markup of a page so corrections can be spliced into it.
#[async_trait]
pub trait MarkupFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, AppError>;
}

pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Fetch(format!("failed to build http client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl MarkupFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Fetch(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!("GET {url} returned {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::Fetch(format!("failed to read body of {url}: {e}")))?;
        info!(url, bytes = body.len(), "page markup fetched");
        Ok(body)
    }
}
