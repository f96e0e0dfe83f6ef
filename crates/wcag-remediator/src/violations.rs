/// Violation tables: scanner output flattening, severity scoring and CSV artifacts.
///
/// A scan produces one row per failed check, i.e. per `(violation, node, check list,
/// check)`. Rows carry the scanner's impact; a severity score is derived from it and
/// attached under a named column (`initialScore` before correction, `finalScore` after).
use std::io::Write;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppError;
use crate::model::{Impact, NodeType, ViolationRecord};

const CSV_HEADER: [&str; 12] = [
    "id",
    "impact",
    "tags",
    "description",
    "help",
    "helpUrl",
    "nodeImpact",
    "nodeHtml",
    "nodeTarget",
    "nodeType",
    "message",
    "numViolation",
];

// --- Scanner output (axe-core result format) ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxeViolation {
    pub id: String,
    #[serde(default = "unreported_impact")]
    pub impact: Impact,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub help_url: String,
    #[serde(default)]
    pub nodes: Vec<AxeNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AxeNode {
    #[serde(default)]
    pub html: String,
    /// Selectors; entries for elements inside frames or shadow roots are nested arrays.
    #[serde(default)]
    pub target: Vec<serde_json::Value>,
    #[serde(default)]
    pub any: Vec<AxeCheck>,
    #[serde(default)]
    pub all: Vec<AxeCheck>,
    #[serde(default)]
    pub none: Vec<AxeCheck>,
}

impl AxeNode {
    fn checks(&self, kind: NodeType) -> &[AxeCheck] {
        match kind {
            NodeType::Any => &self.any,
            NodeType::All => &self.all,
            NodeType::None => &self.none,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AxeCheck {
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub message: String,
}

fn unreported_impact() -> Impact {
    Impact::Unrecognized(String::new())
}

/// Flatten scanner violations into table rows.
///
/// Nodes without any failed check produce no rows. Every row records how many
/// violations (rules) the scan reported.
pub fn from_scan(violations: &[AxeViolation]) -> Vec<ViolationRecord> {
    let violation_count = violations.len();
    let mut rows = Vec::new();

    for violation in violations {
        for node in &violation.nodes {
            let node_target: Vec<String> = node
                .target
                .iter()
                .map(|t| match t {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();

            for kind in NodeType::ALL_KINDS {
                for check in node.checks(kind) {
                    rows.push(ViolationRecord {
                        rule_id: violation.id.clone(),
                        impact: violation.impact.clone(),
                        tags: violation.tags.clone(),
                        description: violation.description.clone(),
                        help: violation.help.clone(),
                        help_url: violation.help_url.clone(),
                        node_impact: check.impact.clone().unwrap_or_default(),
                        node_html: node.html.clone(),
                        node_target: node_target.clone(),
                        node_type: kind,
                        message: check.message.clone(),
                        violation_count,
                    });
                }
            }
        }
    }
    rows
}

// --- Severity ---

/// Which column a severity score is attached under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SeverityColumn {
    #[serde(rename = "initialScore")]
    Initial,
    #[serde(rename = "finalScore")]
    Final,
}

/// A score cell; serializes as `"initialScore": n` or `"finalScore": n` when flattened
/// into its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SeverityCell {
    #[serde(rename = "initialScore")]
    Initial(Option<u32>),
    #[serde(rename = "finalScore")]
    Final(Option<u32>),
}

impl SeverityCell {
    pub fn score(self) -> Option<u32> {
        match self {
            SeverityCell::Initial(s) | SeverityCell::Final(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoredViolation {
    #[serde(flatten)]
    pub record: ViolationRecord,
    #[serde(flatten)]
    pub severity: SeverityCell,
}

/// Score every record under `column`. Unrecognized impacts get no score.
pub fn attach_severity(records: Vec<ViolationRecord>, column: SeverityColumn) -> Vec<ScoredViolation> {
    records
        .into_iter()
        .map(|record| {
            let score = record.impact.severity();
            if score.is_none() {
                warn!(
                    rule_id = %record.rule_id,
                    impact = %record.impact,
                    "unrecognized impact, row left unscored"
                );
            }
            let severity = match column {
                SeverityColumn::Initial => SeverityCell::Initial(score),
                SeverityColumn::Final => SeverityCell::Final(score),
            };
            ScoredViolation { record, severity }
        })
        .collect()
}

/// Sum of the present scores. An empty table totals 0.
pub fn total_severity(rows: &[ScoredViolation]) -> u32 {
    rows.iter().filter_map(|r| r.severity.score()).sum()
}

/// Rows excluded from `total_severity` because their impact was not recognized.
pub fn unscored_count(rows: &[ScoredViolation]) -> usize {
    rows.iter().filter(|r| r.severity.score().is_none()).count()
}

/// Percentage reduction from `initial` to `final_total`.
///
/// Negative when the total got worse.
pub fn improvement_percent(initial: u32, final_total: u32) -> Result<f64, AppError> {
    if initial == 0 {
        return Err(AppError::DivisionByZero);
    }
    Ok((1.0 - f64::from(final_total) / f64::from(initial)) * 100.0)
}

// --- CSV artifacts ---

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    id: String,
    impact: String,
    tags: String,
    description: String,
    help: String,
    #[serde(rename = "helpUrl")]
    help_url: String,
    #[serde(rename = "nodeImpact")]
    node_impact: String,
    #[serde(rename = "nodeHtml")]
    node_html: String,
    #[serde(rename = "nodeTarget")]
    node_target: String,
    #[serde(rename = "nodeType")]
    node_type: String,
    message: String,
    #[serde(rename = "numViolation")]
    num_violation: usize,
}

impl From<&ViolationRecord> for CsvRow {
    fn from(r: &ViolationRecord) -> Self {
        Self {
            id: r.rule_id.clone(),
            impact: r.impact.to_string(),
            tags: r.tags.join("|"),
            description: r.description.clone(),
            help: r.help.clone(),
            help_url: r.help_url.clone(),
            node_impact: r.node_impact.clone(),
            node_html: r.node_html.clone(),
            node_target: r.node_target.join("|"),
            node_type: r.node_type.as_str().to_string(),
            message: r.message.clone(),
            num_violation: r.violation_count,
        }
    }
}

impl TryFrom<CsvRow> for ViolationRecord {
    type Error = AppError;

    fn try_from(row: CsvRow) -> Result<Self, AppError> {
        let node_type = NodeType::ALL_KINDS
            .into_iter()
            .find(|k| k.as_str() == row.node_type)
            .ok_or_else(|| {
                AppError::Artifact(format!("unknown nodeType `{}` for rule {}", row.node_type, row.id))
            })?;
        Ok(Self {
            rule_id: row.id,
            impact: Impact::from(row.impact),
            tags: split_pipes(&row.tags),
            description: row.description,
            help: row.help,
            help_url: row.help_url,
            node_impact: row.node_impact,
            node_html: row.node_html,
            node_target: split_pipes(&row.node_target),
            node_type,
            message: row.message,
            violation_count: row.num_violation,
        })
    }
}

fn split_pipes(field: &str) -> Vec<String> {
    if field.is_empty() {
        Vec::new()
    } else {
        field.split('|').map(str::to_string).collect()
    }
}

pub fn read_csv(path: &Path) -> Result<Vec<ViolationRecord>, AppError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| AppError::Artifact(format!("failed to open {}: {e}", path.display())))?;
    reader
        .deserialize::<CsvRow>()
        .map(|row| {
            let row = row.map_err(|e| {
                AppError::Artifact(format!("malformed row in {}: {e}", path.display()))
            })?;
            ViolationRecord::try_from(row)
        })
        .collect()
}

/// Write the table to `path`, replacing any previous file atomically.
pub fn write_csv(path: &Path, records: &[ViolationRecord]) -> Result<(), AppError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    let csv_err = |e: csv::Error| AppError::Artifact(format!("csv encoding failed: {e}"));

    writer.write_record(CSV_HEADER).map_err(csv_err)?;
    for record in records {
        writer.serialize(CsvRow::from(record)).map_err(csv_err)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Artifact(format!("csv encoding failed: {e}")))?;
    persist_atomically(path, &bytes)
}

/// Create a header-only table at `path` if nothing exists there yet.
pub fn ensure_csv(path: &Path) -> Result<(), AppError> {
    if path.exists() {
        return Ok(());
    }
    write_csv(path, &[])
}

/// Write `bytes` to a temp file beside `path`, then rename it into place.
pub(crate) fn persist_atomically(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let artifact_err =
        |e: std::io::Error| AppError::Artifact(format!("failed to write {}: {e}", path.display()));

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(artifact_err)?;
    tmp.write_all(bytes).map_err(artifact_err)?;
    tmp.as_file().sync_all().map_err(artifact_err)?;
    tmp.persist(path).map_err(|e| artifact_err(e.error))?;
    Ok(())
}
