/// End-to-end remediation of one page: scan, correct, splice, rescan, score.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{CorrectionEngine, Fragment};
use crate::error::AppError;
use crate::fetch::MarkupFetcher;
use crate::markup::{self, SpliceOutcome};
use crate::model::{CorrectionResult, ViolationRecord};
use crate::scanner::{ScanTarget, Scanner};
use crate::violations::{self, ScoredViolation, SeverityColumn};

const BEFORE_CSV: &str = "violationResult.csv";
const AFTER_CSV: &str = "correctionViolations.csv";
const REPORT_JSON: &str = "report.json";

/// Base URL used when markup is analyzed without one.
const BLANK_BASE_URL: &str = "about:blank";

/// Result of a remediation run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemediationReport {
    pub total_initial_severity_score: u32,
    pub total_final_severity_score: u32,
    /// Percentage reduction of the severity total; `null` when the page had nothing to fix.
    pub total_improvement: Option<f64>,
    /// Violations remaining after correction, scored under `finalScore`.
    pub result_df: Vec<ScoredViolation>,
    pub corrections: Vec<AppliedCorrection>,
    /// Rows left out of either total because their impact was not recognized.
    pub unscored_rows: usize,
    pub corrected_markup: String,
    /// Artifact subdirectory of this run; `null` when artifacts are disabled.
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AppliedCorrection {
    pub rule_id: String,
    #[serde(flatten)]
    pub result: CorrectionResult,
    pub outcome: SpliceOutcome,
}

/// Root directory for run artifacts. Each run writes its CSV tables and JSON report into
/// its own subdirectory, named by the run id.
pub struct ArtifactStore {
    root: PathBuf,
    runs: AtomicU64,
}

/// Both violation tables of one run, read back from its CSV artifacts.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RunViolations {
    pub run_id: String,
    pub before: Vec<ViolationRecord>,
    pub after: Vec<ViolationRecord>,
}

impl ArtifactStore {
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| AppError::Artifact(format!("failed to create {}: {e}", dir.display())))?;
        Ok(Self {
            root: dir.to_path_buf(),
            runs: AtomicU64::new(0),
        })
    }

    /// Allocate a fresh run directory seeded with header-only tables.
    fn begin_run(&self) -> Result<RunArtifacts, AppError> {
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = self.runs.fetch_add(1, Ordering::Relaxed);
        let id = format!("{started}-{seq}");
        let dir = self.root.join(&id);
        std::fs::create_dir(&dir)
            .map_err(|e| AppError::Artifact(format!("failed to create {}: {e}", dir.display())))?;
        violations::ensure_csv(&dir.join(BEFORE_CSV))?;
        violations::ensure_csv(&dir.join(AFTER_CSV))?;
        Ok(RunArtifacts { id, dir })
    }

    /// Read back the violation tables written by run `run_id`.
    pub fn load_run(&self, run_id: &str) -> Result<RunViolations, AppError> {
        let valid = !run_id.is_empty()
            && run_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        let dir = self.root.join(run_id);
        if !valid || !dir.is_dir() {
            return Err(AppError::InvalidArgument(format!("unknown run `{run_id}`")));
        }
        Ok(RunViolations {
            run_id: run_id.to_string(),
            before: violations::read_csv(&dir.join(BEFORE_CSV))?,
            after: violations::read_csv(&dir.join(AFTER_CSV))?,
        })
    }
}

struct RunArtifacts {
    id: String,
    dir: PathBuf,
}

impl RunArtifacts {
    fn write_before(&self, records: &[ViolationRecord]) -> Result<(), AppError> {
        violations::write_csv(&self.dir.join(BEFORE_CSV), records)
    }

    fn write_after(&self, records: &[ViolationRecord]) -> Result<(), AppError> {
        violations::write_csv(&self.dir.join(AFTER_CSV), records)
    }

    fn write_report(&self, report: &RemediationReport) -> Result<(), AppError> {
        let json = serde_json::to_vec_pretty(report)
            .map_err(|e| AppError::Artifact(format!("failed to encode report: {e}")))?;
        violations::persist_atomically(&self.dir.join(REPORT_JSON), &json)
    }
}

pub struct RemediationPipeline {
    engine: Arc<CorrectionEngine>,
    scanner: Arc<dyn Scanner>,
    fetcher: Arc<dyn MarkupFetcher>,
    artifacts: Option<ArtifactStore>,
}

impl RemediationPipeline {
    pub fn new(
        engine: Arc<CorrectionEngine>,
        scanner: Arc<dyn Scanner>,
        fetcher: Arc<dyn MarkupFetcher>,
        artifacts: Option<ArtifactStore>,
    ) -> Self {
        Self {
            engine,
            scanner,
            fetcher,
            artifacts,
        }
    }

    pub fn engine(&self) -> &CorrectionEngine {
        &self.engine
    }

    pub fn artifacts(&self) -> Option<&ArtifactStore> {
        self.artifacts.as_ref()
    }

    /// Remediate a live page.
    pub async fn analyze(&self, url: &str) -> Result<RemediationReport, AppError> {
        let page = self.fetcher.fetch(url).await?;
        self.run(ScanTarget::url(url), url, page).await
    }

    /// Remediate caller-supplied markup, resolving relative references against `base_url`.
    pub async fn analyze_markup(
        &self,
        html: &str,
        base_url: Option<&str>,
    ) -> Result<RemediationReport, AppError> {
        let base_url = base_url.unwrap_or(BLANK_BASE_URL);
        self.run(ScanTarget::markup(base_url, html), base_url, html.to_string())
            .await
    }

    async fn run(
        &self,
        before_target: ScanTarget,
        base_url: &str,
        page: String,
    ) -> Result<RemediationReport, AppError> {
        let artifacts = self
            .artifacts
            .as_ref()
            .map(ArtifactStore::begin_run)
            .transpose()?;
        let run_id = artifacts.as_ref().map(|a| a.id.clone());

        let before_records = self.scanner.scan(&before_target).await?;
        if let Some(run) = &artifacts {
            run.write_before(&before_records)?;
        }
        let before = violations::attach_severity(before_records, SeverityColumn::Initial);
        let initial_total = violations::total_severity(&before);
        info!(url = base_url, rows = before.len(), total = initial_total, "initial severity computed");

        if initial_total == 0 {
            info!(url = base_url, "nothing to correct");
            let after = violations::attach_severity(
                before.iter().map(|r| r.record.clone()).collect(),
                SeverityColumn::Final,
            );
            let report = RemediationReport {
                total_initial_severity_score: 0,
                total_final_severity_score: 0,
                total_improvement: None,
                unscored_rows: violations::unscored_count(&before),
                result_df: after,
                corrections: Vec::new(),
                corrected_markup: page,
                run_id,
            };
            persist_report(artifacts.as_ref(), &report)?;
            return Ok(report);
        }

        let (corrections, rule_ids) = self.correct_all(&before).await;
        let (corrected_markup, outcomes) = markup::splice_corrections(&page, &corrections);
        let applied = outcomes
            .iter()
            .filter(|o| **o == SpliceOutcome::Applied)
            .count();
        info!(url = base_url, corrections = corrections.len(), applied, "corrections spliced");

        let after_records = self
            .scanner
            .scan(&ScanTarget::markup(base_url, corrected_markup.as_str()))
            .await?;
        if let Some(run) = &artifacts {
            run.write_after(&after_records)?;
        }
        let after = violations::attach_severity(after_records, SeverityColumn::Final);
        let final_total = violations::total_severity(&after);
        let improvement = violations::improvement_percent(initial_total, final_total)?;
        info!(
            url = base_url,
            initial_total,
            final_total,
            improvement,
            "remediation complete"
        );

        let report = RemediationReport {
            total_initial_severity_score: initial_total,
            total_final_severity_score: final_total,
            total_improvement: Some(improvement),
            unscored_rows: violations::unscored_count(&before) + violations::unscored_count(&after),
            result_df: after,
            corrections: corrections
                .into_iter()
                .zip(rule_ids)
                .zip(outcomes)
                .map(|((result, rule_id), outcome)| AppliedCorrection {
                    rule_id,
                    result,
                    outcome,
                })
                .collect(),
            corrected_markup,
            run_id,
        };
        persist_report(artifacts.as_ref(), &report)?;
        Ok(report)
    }

    /// One correction per distinct `(rule, fragment)` pair, in row order. Rows without a
    /// fragment have nothing to splice and are left out.
    async fn correct_all(&self, rows: &[ScoredViolation]) -> (Vec<CorrectionResult>, Vec<String>) {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let mut corrections = Vec::new();
        let mut rule_ids = Vec::new();

        for row in rows {
            let record = &row.record;
            if record.node_html.trim().is_empty() {
                debug!(rule_id = %record.rule_id, "violation row has no fragment, not corrected");
                continue;
            }
            if !seen.insert((record.rule_id.as_str(), record.node_html.as_str())) {
                continue;
            }
            corrections.push(self.engine.correct_or_fallback(Fragment::from(record)).await);
            rule_ids.push(record.rule_id.clone());
        }
        (corrections, rule_ids)
    }
}

fn persist_report(run: Option<&RunArtifacts>, report: &RemediationReport) -> Result<(), AppError> {
    match run {
        Some(run) => {
            run.write_report(report)?;
            info!(run_id = %run.id, dir = %run.dir.display(), "run artifacts written");
            Ok(())
        }
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;

    use a11y_common::openai::OpenAiClientError;

    use super::*;
    use crate::cache::ContextCache;
    use crate::engine::tests::ScriptedChat;
    use crate::index::tests::populated_index;
    use crate::violations::tests::record;

    pub(crate) const PAGE: &str = "<main><img src=a.png><a href=/></a></main>";

    /// Reports every known issue whose fragment still occurs in the scanned markup.
    pub(crate) struct FragmentScanner {
        issues: Vec<ViolationRecord>,
    }

    impl FragmentScanner {
        pub(crate) fn new(issues: Vec<ViolationRecord>) -> Self {
            Self { issues }
        }

        pub(crate) fn page_issues() -> Self {
            Self::new(vec![
                record("image-alt", "critical", "<img src=a.png>"),
                record("link-name", "serious", "<a href=/></a>"),
            ])
        }
    }

    #[async_trait]
    impl Scanner for FragmentScanner {
        async fn scan(&self, target: &ScanTarget) -> Result<Vec<ViolationRecord>, AppError> {
            let html = target.html.as_deref().unwrap_or(PAGE);
            Ok(self
                .issues
                .iter()
                .filter(|r| html.contains(&r.node_html))
                .cloned()
                .collect())
        }
    }

    pub(crate) struct StaticFetcher;

    #[async_trait]
    impl MarkupFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<String, AppError> {
            Ok(PAGE.to_string())
        }
    }

    pub(crate) async fn pipeline_with(
        scanner: FragmentScanner,
        chat: Arc<ScriptedChat>,
        artifacts: Option<ArtifactStore>,
    ) -> RemediationPipeline {
        let engine = CorrectionEngine::new(
            Arc::new(populated_index().await),
            chat,
            Arc::new(ContextCache::disabled()),
            3,
        );
        RemediationPipeline::new(
            Arc::new(engine),
            Arc::new(scanner),
            Arc::new(StaticFetcher),
            artifacts,
        )
    }

    #[tokio::test]
    async fn test_analyze_scores_and_falls_back_on_model_failure() {
        let chat = Arc::new(ScriptedChat::new(vec![
            Ok("Correct: [[<img src=a.png alt=Logo>]]".to_string()),
            Err(OpenAiClientError::EmptyReply),
        ]));
        let pipeline = pipeline_with(FragmentScanner::page_issues(), chat, None).await;

        let report = pipeline.analyze("https://example.com").await.unwrap();
        assert_eq!(report.total_initial_severity_score, 9);
        assert_eq!(report.total_final_severity_score, 4);
        let improvement = report.total_improvement.unwrap();
        assert!((improvement - 55.555_555).abs() < 1e-3);

        assert_eq!(report.corrections.len(), 2);
        assert_eq!(report.corrections[0].outcome, SpliceOutcome::Applied);
        assert_eq!(report.corrections[1].rule_id, "link-name");
        assert!(!report.corrections[1].result.was_parsed);
        assert_eq!(report.corrections[1].outcome, SpliceOutcome::Unchanged);

        assert_eq!(report.result_df.len(), 1);
        assert_eq!(report.result_df[0].record.rule_id, "link-name");
        assert_eq!(
            report.corrected_markup,
            "<main><img src=a.png alt=Logo><a href=/></a></main>"
        );
    }

    #[tokio::test]
    async fn test_duplicate_rows_corrected_once() {
        let mut none_check = record("image-alt", "critical", "<img src=a.png>");
        none_check.node_type = crate::model::NodeType::None;
        let scanner = FragmentScanner::new(vec![
            record("image-alt", "critical", "<img src=a.png>"),
            none_check,
        ]);
        let chat = Arc::new(ScriptedChat::replying("Correct: [[<img src=a.png alt=A>]]"));
        let pipeline = pipeline_with(scanner, Arc::clone(&chat), None).await;

        let report = pipeline.analyze("https://example.com").await.unwrap();
        assert_eq!(chat.prompts.lock().unwrap().len(), 1);
        assert_eq!(report.corrections.len(), 1);
        assert_eq!(report.total_initial_severity_score, 10);
        assert_eq!(report.total_final_severity_score, 0);
        assert_eq!(report.total_improvement, Some(100.0));
    }

    #[tokio::test]
    async fn test_clean_page_skips_correction() {
        let chat = Arc::new(ScriptedChat::new(vec![]));
        let pipeline = pipeline_with(FragmentScanner::new(vec![]), Arc::clone(&chat), None).await;

        let report = pipeline
            .analyze_markup("<main><h1>Hi</h1></main>", None)
            .await
            .unwrap();
        assert_eq!(report.total_initial_severity_score, 0);
        assert!(report.total_improvement.is_none());
        assert!(report.corrections.is_empty());
        assert!(chat.prompts.lock().unwrap().is_empty());
        assert_eq!(report.corrected_markup, "<main><h1>Hi</h1></main>");
    }

    #[tokio::test]
    async fn test_rows_without_fragment_are_not_sent_to_model() {
        let scanner = FragmentScanner::new(vec![
            record("image-alt", "critical", "<img src=a.png>"),
            record("document-title", "serious", ""),
        ]);
        let chat = Arc::new(ScriptedChat::replying("Correct: [[<p>fix</p>]]"));
        let pipeline = pipeline_with(scanner, Arc::clone(&chat), None).await;

        let report = pipeline.analyze("https://example.com").await.unwrap();
        assert_eq!(chat.prompts.lock().unwrap().len(), 1);
        assert_eq!(report.corrections.len(), 1);
        assert_eq!(report.corrections[0].rule_id, "image-alt");
        assert!(report.corrected_markup.starts_with("<main><p>fix</p>"));
        assert!(report.run_id.is_none());
    }

    #[tokio::test]
    async fn test_artifacts_written_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(&dir.path().join("out")).unwrap();
        let chat = Arc::new(ScriptedChat::replying("Correct: [[<img src=a.png alt=Logo>]]"));
        let pipeline = pipeline_with(FragmentScanner::page_issues(), chat, Some(store)).await;

        let first = pipeline
            .analyze_markup(PAGE, Some("https://example.com"))
            .await
            .unwrap();
        let second = pipeline.analyze("https://example.com").await.unwrap();
        let first_id = first.run_id.unwrap();
        assert_ne!(Some(first_id.as_str()), second.run_id.as_deref());

        let run_dir = dir.path().join("out").join(&first_id);
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join(REPORT_JSON)).unwrap()).unwrap();
        assert_eq!(report["total_initial_severity_score"], 9);
        assert_eq!(report["result_df"][0]["finalScore"], 4);
        assert_eq!(report["run_id"], first_id.as_str());

        let tables = pipeline.artifacts().unwrap().load_run(&first_id).unwrap();
        assert_eq!(tables.before.len(), 2);
        assert_eq!(tables.after.len(), 1);
        assert_eq!(tables.after[0].rule_id, "link-name");
    }

    #[test]
    fn test_load_run_rejects_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        for id in ["", "../etc", "0-0"] {
            assert!(matches!(store.load_run(id), Err(AppError::InvalidArgument(_))));
        }

        let run = store.begin_run().unwrap();
        let tables = store.load_run(&run.id).unwrap();
        assert!(tables.before.is_empty());
        assert!(tables.after.is_empty());
    }
}
