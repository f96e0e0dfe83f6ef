use a11y_common::error::CommonError;
use a11y_common::openai::OpenAiClientError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("config error: {0}")]
    Config(String),

    #[error("malformed guideline corpus at {path}: {message}")]
    MalformedCorpus { path: String, message: String },

    #[error("failed to index success criterion {criterion_id}: {source}")]
    IndexPopulation {
        criterion_id: String,
        #[source]
        source: CommonError,
    },

    #[error("language model unavailable: {0}")]
    ModelUnavailable(#[from] OpenAiClientError),

    #[error("improvement is undefined when the initial severity total is zero")]
    DivisionByZero,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("scan failed: {0}")]
    Scan(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("artifact error: {0}")]
    Artifact(String),
}
