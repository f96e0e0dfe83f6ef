/// Splicing of corrected fragments into page markup.
///
/// Replacement is exact-substring and first-occurrence only. Fragments the scanner
/// serialized differently from the source (attribute order, entity encoding) are not found
/// and are skipped.
use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::CorrectionResult;

/// Whether a correction made it into the markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SpliceOutcome {
    Applied,
    /// The model reply could not be parsed or changed nothing.
    Unchanged,
    /// The original fragment is empty or does not occur in the markup.
    NotFound,
    /// An earlier correction already replaced this fragment.
    AlreadyCorrected,
}

/// Apply `corrections` in order, returning the new markup and one outcome per correction.
pub fn splice_corrections(markup: &str, corrections: &[CorrectionResult]) -> (String, Vec<SpliceOutcome>) {
    let mut out = markup.to_string();
    let mut replaced: HashSet<&str> = HashSet::new();
    let mut outcomes = Vec::with_capacity(corrections.len());

    for correction in corrections {
        let original = correction.original_html.as_str();
        let outcome = if !correction.changes_markup() {
            SpliceOutcome::Unchanged
        } else if original.trim().is_empty() {
            warn!("correction has no original fragment, skipped");
            SpliceOutcome::NotFound
        } else if replaced.contains(original) {
            SpliceOutcome::AlreadyCorrected
        } else if let Some(pos) = out.find(original) {
            out.replace_range(pos..pos + original.len(), &correction.corrected_html);
            replaced.insert(original);
            debug!(original, corrected = %correction.corrected_html, "correction spliced");
            SpliceOutcome::Applied
        } else {
            warn!(original, "fragment not found in markup, correction skipped");
            SpliceOutcome::NotFound
        };
        outcomes.push(outcome);
    }
    (out, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(original: &str, corrected: &str) -> CorrectionResult {
        CorrectionResult {
            original_html: original.to_string(),
            corrected_html: corrected.to_string(),
            was_parsed: true,
        }
    }

    #[test]
    fn test_replaces_first_occurrence_only() {
        let markup = "<ul><li><a href=/></a></li><li><a href=/></a></li></ul>";
        let (out, outcomes) = splice_corrections(markup, &[parsed("<a href=/></a>", "<a href=/>Home</a>")]);
        assert_eq!(out, "<ul><li><a href=/>Home</a></li><li><a href=/></a></li></ul>");
        assert_eq!(outcomes, vec![SpliceOutcome::Applied]);
    }

    #[test]
    fn test_missing_and_unparsed_fragments_are_skipped() {
        let markup = "<main><img src=a.png></main>";
        let corrections = [
            parsed("<img src=\"b.png\">", "<img src=b.png alt=B>"),
            CorrectionResult::fallback("<img src=a.png>"),
            parsed("<img src=a.png>", "<img src=a.png alt=A>"),
        ];
        let (out, outcomes) = splice_corrections(markup, &corrections);
        assert_eq!(out, "<main><img src=a.png alt=A></main>");
        assert_eq!(
            outcomes,
            vec![SpliceOutcome::NotFound, SpliceOutcome::Unchanged, SpliceOutcome::Applied]
        );
    }

    #[test]
    fn test_empty_original_is_never_spliced() {
        let markup = "<html><main></main></html>";
        let corrections = [parsed("", "<p>fix</p>"), parsed("  ", "<p>fix</p>")];
        let (out, outcomes) = splice_corrections(markup, &corrections);
        assert_eq!(out, markup);
        assert_eq!(outcomes, vec![SpliceOutcome::NotFound, SpliceOutcome::NotFound]);
    }

    #[test]
    fn test_fragment_is_not_corrected_twice() {
        let markup = "<p><img src=a.png></p>";
        let corrections = [
            parsed("<img src=a.png>", "<img src=a.png alt=A>"),
            parsed("<img src=a.png>", "<img src=a.png alt=Again>"),
        ];
        let (out, outcomes) = splice_corrections(markup, &corrections);
        assert_eq!(out, "<p><img src=a.png alt=A></p>");
        assert_eq!(outcomes[1], SpliceOutcome::AlreadyCorrected);
    }
}
