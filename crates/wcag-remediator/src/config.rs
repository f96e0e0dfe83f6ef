use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;

const DEFAULT_INDEX_NAME: &str = "wcag_docs";
const DEFAULT_CHAT_MODEL: &str = "codegemma:latest";
const DEFAULT_RETRIEVAL_K: usize = 3;

/// Application configuration loaded explicitly from environment variables.
///
/// The corpus path and scanner command are required; everything else has a default or
/// disables the feature it controls when absent.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the WCAG guideline JSON document.
    pub corpus_path: String,
    /// Filesystem path to the LanceDB data directory. `None` keeps the index in memory.
    pub lancedb_path: Option<String>,
    /// Redis connection URL (e.g. "redis://127.0.0.1:6379"). `None` disables caching.
    pub redis_url: Option<String>,
    /// Name of the vector table holding guideline embeddings.
    pub index_name: String,
    /// Scanner program followed by its arguments.
    pub scanner_command: Vec<String>,
    pub scan_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Chat model identifier sent to the OpenAI-compatible backend.
    pub chat_model: String,
    /// Number of guideline passages retrieved per violation.
    pub retrieval_k: usize,
    /// Directory receiving CSV/JSON artifacts. `None` disables artifact output.
    pub artifact_dir: Option<PathBuf>,
    /// Serve the HTTP API on this address instead of MCP.
    pub http_listen_addr: Option<String>,
    /// Serve MCP over TCP on this address instead of stdio.
    pub mcp_tcp_listen_addr: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `WCAG_CORPUS_PATH`: path to the guideline JSON file (must exist)
    /// - `SCANNER_COMMAND`: accessibility scanner command line
    ///
    /// Optional:
    /// - `LANCEDB_PATH`, `REDIS_URL`, `INDEX_NAME`, `SCAN_TIMEOUT_SECS` (120),
    ///   `FETCH_TIMEOUT_SECS` (30), `CHAT_MODEL`, `RETRIEVAL_K` (3), `ARTIFACT_DIR`,
    ///   `HTTP_LISTEN_ADDR`, `MCP_TCP_LISTEN_ADDR`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let corpus_path = lookup("WCAG_CORPUS_PATH").ok_or_else(|| {
            AppError::Config("WCAG_CORPUS_PATH environment variable is required".to_string())
        })?;
        if !Path::new(&corpus_path).is_file() {
            return Err(AppError::Config(format!(
                "guideline corpus not found at {corpus_path}"
            )));
        }

        let scanner_command: Vec<String> = lookup("SCANNER_COMMAND")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        if scanner_command.is_empty() {
            return Err(AppError::Config(
                "SCANNER_COMMAND environment variable is required".to_string(),
            ));
        }

        let retrieval_k = match lookup("RETRIEVAL_K") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|&k| k > 0)
                .ok_or_else(|| {
                    AppError::Config(format!("RETRIEVAL_K must be a positive integer, got {raw}"))
                })?,
            None => DEFAULT_RETRIEVAL_K,
        };

        let secs = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(default))
        };

        Ok(Self {
            corpus_path,
            lancedb_path: lookup("LANCEDB_PATH"),
            redis_url: lookup("REDIS_URL"),
            index_name: lookup("INDEX_NAME").unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            scanner_command,
            scan_timeout: secs("SCAN_TIMEOUT_SECS", 120),
            fetch_timeout: secs("FETCH_TIMEOUT_SECS", 30),
            chat_model: lookup("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            retrieval_k,
            artifact_dir: lookup("ARTIFACT_DIR").map(PathBuf::from),
            http_listen_addr: lookup("HTTP_LISTEN_ADDR"),
            mcp_tcp_listen_addr: lookup("MCP_TCP_LISTEN_ADDR"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let corpus = tempfile::NamedTempFile::new().unwrap();
        let path = corpus.path().to_string_lossy().to_string();
        let config = Config::from_lookup(lookup_from(&[
            ("WCAG_CORPUS_PATH", path.as_str()),
            ("SCANNER_COMMAND", "node scripts/axe-scan.mjs"),
        ]))
        .unwrap();

        assert_eq!(config.scanner_command, vec!["node", "scripts/axe-scan.mjs"]);
        assert_eq!(config.retrieval_k, 3);
        assert_eq!(config.index_name, "wcag_docs");
        assert_eq!(config.scan_timeout, Duration::from_secs(120));
        assert!(config.lancedb_path.is_none());
        assert!(config.artifact_dir.is_none());
    }

    #[test]
    fn test_missing_corpus_is_fatal() {
        let err = Config::from_lookup(lookup_from(&[
            ("WCAG_CORPUS_PATH", "/definitely/not/here/wcag.json"),
            ("SCANNER_COMMAND", "scan"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_zero_retrieval_k_rejected() {
        let corpus = tempfile::NamedTempFile::new().unwrap();
        let path = corpus.path().to_string_lossy().to_string();
        let err = Config::from_lookup(lookup_from(&[
            ("WCAG_CORPUS_PATH", path.as_str()),
            ("SCANNER_COMMAND", "scan"),
            ("RETRIEVAL_K", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RETRIEVAL_K"));
    }
}
