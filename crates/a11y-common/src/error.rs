/// Error types shared by the remediation crates.
///
/// These errors represent failures in infrastructure components (vector store, embeddings)
/// that sit underneath the remediation service. Redis failures never surface here: the
/// cache degrades to a no-op instead. Application-specific errors are defined in the
/// service crate and wrap `CommonError` via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("vector db error: {0}")]
    VectorDb(String),

    #[error("embedding error: {0}")]
    Embedding(String),
}
