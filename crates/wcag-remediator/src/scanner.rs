/// Accessibility scanner collaborator.
///
/// The scanner is an external program (typically a headless browser driving axe-core).
/// It receives `{"url": ..., "html": ...}` as JSON on stdin and prints the axe violation
/// list on stdout, either as a bare array or as an object with a `violations` field.
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::AppError;
use crate::model::ViolationRecord;
use crate::violations::{self, AxeViolation};

/// What to scan: a live URL, or caller-supplied markup rendered with `url` as its base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanTarget {
    pub url: String,
    pub html: Option<String>,
}

impl ScanTarget {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: None,
        }
    }

    pub fn markup(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: Some(html.into()),
        }
    }
}

#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan the target and return its violations flattened to table rows.
    async fn scan(&self, target: &ScanTarget) -> Result<Vec<ViolationRecord>, AppError>;
}

/// Runs the configured scanner command once per scan.
pub struct CommandScanner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandScanner {
    pub fn new(command: &[String], timeout: Duration) -> Result<Self, AppError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AppError::Config("scanner command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }
}

#[async_trait]
impl Scanner for CommandScanner {
    async fn scan(&self, target: &ScanTarget) -> Result<Vec<ViolationRecord>, AppError> {
        let input = serde_json::to_vec(target)
            .map_err(|e| AppError::Scan(format!("failed to encode scan request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Scan(format!("failed to start {}: {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Scan("scanner stdin unavailable".to_string()))?;

        // Dropping the future on timeout drops the child, which kills it.
        let run = async move {
            match stdin.write_all(&input).await {
                Ok(()) => {}
                // The scanner may exit without reading its input; its exit status decides.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(AppError::Scan(format!("failed to write scan request: {e}"))),
            }
            drop(stdin);
            child
                .wait_with_output()
                .await
                .map_err(|e| AppError::Scan(format!("scanner did not complete: {e}")))
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                AppError::Scan(format!("scanner timed out after {:?}", self.timeout))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Scan(format!(
                "scanner exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let found = parse_scan_output(&output.stdout)?;
        let rows = violations::from_scan(&found);
        info!(url = %target.url, violations = found.len(), rows = rows.len(), "scan complete");
        Ok(rows)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScanOutput {
    List(Vec<AxeViolation>),
    Report { violations: Vec<AxeViolation> },
}

/// Decode the scanner's stdout.
pub fn parse_scan_output(stdout: &[u8]) -> Result<Vec<AxeViolation>, AppError> {
    let parsed: ScanOutput = serde_json::from_slice(stdout).map_err(|e| {
        debug!(output = %String::from_utf8_lossy(stdout), "unparsable scanner output");
        AppError::Scan(format!("unparsable scanner output: {e}"))
    })?;
    Ok(match parsed {
        ScanOutput::List(v) | ScanOutput::Report { violations: v } => v,
    })
}
