use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A WCAG principle, e.g. "1: Perceivable". Top level of the guideline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principle {
    pub id: String,
    pub title: String,
    pub guidelines: Vec<Guideline>,
}

/// A guideline within a principle, e.g. "1.1: Text Alternatives".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    pub id: String,
    pub title: String,
    pub success_criteria: Vec<Criterion>,
}

/// A success criterion, e.g. "1.1.1: Non-text Content". The unit that gets indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Globally unique criterion id, e.g. "1.1.1"
    pub id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    /// Conformance level ("A", "AA", "AAA"); not every corpus entry carries one.
    pub level: Option<String>,
}

/// The full guideline tree, read once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GuidelineDocument {
    pub principles: Vec<Principle>,
}

/// Violation impact as reported by the scanner.
///
/// Values outside the known scale are kept verbatim so they can be reported rather than
/// silently scored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Impact {
    Critical,
    Serious,
    Moderate,
    Minor,
    Cosmetic,
    Unrecognized(String),
}

impl Impact {
    /// Severity weight: critical=5 > serious=4 > moderate=3 > minor=2 > cosmetic=1.
    pub fn severity(&self) -> Option<u32> {
        match self {
            Impact::Critical => Some(5),
            Impact::Serious => Some(4),
            Impact::Moderate => Some(3),
            Impact::Minor => Some(2),
            Impact::Cosmetic => Some(1),
            Impact::Unrecognized(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Impact::Critical => "critical",
            Impact::Serious => "serious",
            Impact::Moderate => "moderate",
            Impact::Minor => "minor",
            Impact::Cosmetic => "cosmetic",
            Impact::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for Impact {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Impact::Critical,
            "serious" => Impact::Serious,
            "moderate" => Impact::Moderate,
            "minor" => Impact::Minor,
            "cosmetic" => Impact::Cosmetic,
            _ => Impact::Unrecognized(raw),
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Impact {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Impact {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // axe reports `null` impact for some checks
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Impact::from(raw.unwrap_or_default()))
    }
}

/// Which check list of an axe node produced the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Any,
    All,
    None,
}

impl NodeType {
    pub const ALL_KINDS: [NodeType; 3] = [NodeType::Any, NodeType::All, NodeType::None];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Any => "any",
            NodeType::All => "all",
            NodeType::None => "none",
        }
    }
}

/// One row of the violations table: a single failed check on a single page element.
///
/// Produced by the scanner; the remediation core only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ViolationRecord {
    /// axe rule id, e.g. "image-alt"
    #[serde(rename = "id")]
    pub rule_id: String,
    #[schemars(with = "String")]
    pub impact: Impact,
    pub tags: Vec<String>,
    pub description: String,
    pub help: String,
    pub help_url: String,
    /// Impact of the individual check; empty when the scanner did not report one.
    pub node_impact: String,
    pub node_html: String,
    /// Selector path to the element.
    pub node_target: Vec<String>,
    pub node_type: NodeType,
    pub message: String,
    /// Number of violations (rules, not rows) in the scan that produced this row.
    #[serde(rename = "numViolation")]
    pub violation_count: usize,
}

/// Outcome of asking the model to fix one fragment.
///
/// When `was_parsed` is false the model reply did not follow the required grammar and
/// `corrected_html` is the unmodified original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CorrectionResult {
    pub original_html: String,
    pub corrected_html: String,
    pub was_parsed: bool,
}

impl CorrectionResult {
    pub fn fallback(original_html: &str) -> Self {
        Self {
            original_html: original_html.to_string(),
            corrected_html: original_html.to_string(),
            was_parsed: false,
        }
    }

    /// True when splicing this result would change the markup.
    pub fn changes_markup(&self) -> bool {
        self.was_parsed && self.corrected_html != self.original_html
    }
}
