/// Loader for the WCAG guideline corpus.
///
/// The JSON document is a three-level tree:
/// `[{ref_id, title, guidelines: [{ref_id, title, success_criteria: [{ref_id, title,
/// description, url, level?}]}]}]`
///
/// Loading validates every level and reports the JSON path of the first malformed node.
/// Flattening yields one embedding document per success criterion in a fixed layout; any
/// change to `compose_document_text` invalidates indexes built with the old layout.
use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::error::AppError;
use crate::model::{Criterion, Guideline, GuidelineDocument, Principle};

/// One indexable unit: a criterion id and the text that gets embedded for it.
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionDocument<'a> {
    pub id: &'a str,
    pub text: String,
}

/// Read and parse the corpus file. A missing file is a fatal startup error.
pub fn load_file(path: &Path) -> Result<GuidelineDocument, AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    load(&content)
}

/// Parse the corpus JSON into a `GuidelineDocument`.
pub fn load(content: &str) -> Result<GuidelineDocument, AppError> {
    let root: Value = serde_json::from_str(content).map_err(|e| AppError::MalformedCorpus {
        path: "$".to_string(),
        message: format!("invalid JSON: {e}"),
    })?;

    let items = root.as_array().ok_or_else(|| malformed("$", "expected an array of principles"))?;

    let mut principles = Vec::with_capacity(items.len());
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (pi, item) in items.iter().enumerate() {
        let p_path = format!("$[{pi}]");
        let id = required_str(item, "ref_id", &p_path)?;
        let title = required_str(item, "title", &p_path)?;
        let mut guidelines = Vec::new();

        for (gi, g) in required_array(item, "guidelines", &p_path)?.iter().enumerate() {
            let g_path = format!("{p_path}.guidelines[{gi}]");
            let g_id = required_str(g, "ref_id", &g_path)?;
            let g_title = required_str(g, "title", &g_path)?;
            let mut criteria = Vec::new();

            for (ci, c) in required_array(g, "success_criteria", &g_path)?.iter().enumerate() {
                let c_path = format!("{g_path}.success_criteria[{ci}]");
                let criterion = Criterion {
                    id: required_str(c, "ref_id", &c_path)?,
                    title: required_str(c, "title", &c_path)?,
                    description: required_str(c, "description", &c_path)?,
                    url: required_str(c, "url", &c_path)?,
                    level: optional_str(c, "level", &c_path)?,
                };
                if !seen_ids.insert(criterion.id.clone()) {
                    warn!(criterion_id = %criterion.id, path = %c_path, "duplicate success criterion id, later entry ignored for indexing");
                }
                criteria.push(criterion);
            }

            guidelines.push(Guideline {
                id: g_id,
                title: g_title,
                success_criteria: criteria,
            });
        }

        principles.push(Principle {
            id,
            title,
            guidelines,
        });
    }

    Ok(GuidelineDocument { principles })
}

/// Lazily yield one document per distinct criterion id, in corpus order.
///
/// The sequence can be restarted by calling `flatten` again; the corpus is immutable.
pub fn flatten(doc: &GuidelineDocument) -> impl Iterator<Item = CriterionDocument<'_>> + '_ {
    let mut seen: HashSet<&str> = HashSet::new();
    doc.principles
        .iter()
        .flat_map(|p| {
            p.guidelines
                .iter()
                .flat_map(move |g| g.success_criteria.iter().map(move |c| (p, g, c)))
        })
        .filter(move |&(_, _, c)| seen.insert(c.id.as_str()))
        .map(|(p, g, c)| CriterionDocument {
            id: &c.id,
            text: compose_document_text(p, g, c),
        })
}

/// Number of distinct criteria, i.e. the size of a fully populated index.
pub fn criterion_count(doc: &GuidelineDocument) -> usize {
    doc.principles
        .iter()
        .flat_map(|p| &p.guidelines)
        .flat_map(|g| &g.success_criteria)
        .map(|c| c.id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Compose the embedding text for a criterion with its principle and guideline context.
pub fn compose_document_text(principle: &Principle, guideline: &Guideline, criterion: &Criterion) -> String {
    format!(
        "Top-level Title: {}\n\
         Top-level ID: {}\n\n\
         Guideline Title: {}\n\
         Guideline ID: {}\n\n\
         Success Criterion ID: {}\n\
         Success Criterion Title: {}\n\
         Description: {}\n\
         URL: {}\n\
         Level: {}\n",
        principle.title,
        principle.id,
        guideline.title,
        guideline.id,
        criterion.id,
        criterion.title,
        criterion.description,
        criterion.url,
        criterion.level.as_deref().unwrap_or("N/A"),
    )
}

fn malformed(path: &str, message: &str) -> AppError {
    AppError::MalformedCorpus {
        path: path.to_string(),
        message: message.to_string(),
    }
}

fn required_str(node: &Value, key: &str, path: &str) -> Result<String, AppError> {
    match node.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(malformed(path, &format!("field `{key}` must be a string"))),
        None => Err(malformed(path, &format!("missing required field `{key}`"))),
    }
}

fn optional_str(node: &Value, key: &str, path: &str) -> Result<Option<String>, AppError> {
    match node.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(malformed(path, &format!("field `{key}` must be a string"))),
    }
}

fn required_array<'a>(node: &'a Value, key: &str, path: &str) -> Result<&'a Vec<Value>, AppError> {
    match node.get(key) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(malformed(path, &format!("field `{key}` must be an array"))),
        None => Err(malformed(path, &format!("missing required field `{key}`"))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SINGLE_CRITERION: &str = r#"[
      {
        "ref_id": "1",
        "title": "Perceivable",
        "guidelines": [
          {
            "ref_id": "1.1",
            "title": "Text Alternatives",
            "success_criteria": [
              {
                "ref_id": "1.1.1",
                "title": "Non-text Content",
                "description": "All non-text content has a text alternative.",
                "url": "https://www.w3.org/TR/WCAG21/#non-text-content",
                "level": "A"
              }
            ]
          }
        ]
      }
    ]"#;

    #[test]
    fn test_load_single_criterion() {
        let doc = load(SINGLE_CRITERION).unwrap();
        assert_eq!(doc.principles.len(), 1);
        let g = &doc.principles[0].guidelines[0];
        assert_eq!(g.id, "1.1");
        assert_eq!(g.success_criteria[0].id, "1.1.1");
        assert_eq!(g.success_criteria[0].level.as_deref(), Some("A"));
        assert_eq!(criterion_count(&doc), 1);
    }

    #[test]
    fn test_missing_success_criteria_names_path() {
        let content = r#"[{"ref_id": "1", "title": "Perceivable",
            "guidelines": [{"ref_id": "1.1", "title": "Text Alternatives"}]}]"#;
        match load(content).unwrap_err() {
            AppError::MalformedCorpus { path, message } => {
                assert_eq!(path, "$[0].guidelines[0]");
                assert!(message.contains("success_criteria"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_ref_id_is_malformed() {
        let content = r#"[{"title": "Perceivable", "guidelines": []}]"#;
        let err = load(content).unwrap_err();
        assert!(matches!(err, AppError::MalformedCorpus { .. }));
        assert!(err.to_string().contains("ref_id"));
    }

    #[test]
    fn test_non_array_root_is_malformed() {
        assert!(matches!(
            load(r#"{"principles": []}"#),
            Err(AppError::MalformedCorpus { .. })
        ));
    }

    #[test]
    fn test_flatten_layout() {
        let doc = load(SINGLE_CRITERION).unwrap();
        let docs: Vec<CriterionDocument<'_>> = flatten(&doc).collect();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "1.1.1");
        assert_eq!(
            docs[0].text,
            "Top-level Title: Perceivable\n\
             Top-level ID: 1\n\n\
             Guideline Title: Text Alternatives\n\
             Guideline ID: 1.1\n\n\
             Success Criterion ID: 1.1.1\n\
             Success Criterion Title: Non-text Content\n\
             Description: All non-text content has a text alternative.\n\
             URL: https://www.w3.org/TR/WCAG21/#non-text-content\n\
             Level: A\n"
        );
    }

    #[test]
    fn test_flatten_skips_duplicate_ids_and_defaults_level() {
        let content = r#"[{"ref_id": "2", "title": "Operable", "guidelines": [
            {"ref_id": "2.1", "title": "Keyboard Accessible", "success_criteria": [
                {"ref_id": "2.1.1", "title": "Keyboard", "description": "d", "url": "u"},
                {"ref_id": "2.1.1", "title": "Keyboard again", "description": "d", "url": "u"},
                {"ref_id": "2.1.2", "title": "No Keyboard Trap", "description": "d", "url": "u", "level": null}
            ]}]}]"#;
        let doc = load(content).unwrap();
        let docs: Vec<CriterionDocument<'_>> = flatten(&doc).collect();
        let ids: Vec<&str> = docs.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["2.1.1", "2.1.2"]);
        assert!(docs[0].text.contains("Success Criterion Title: Keyboard\n"));
        assert!(docs[1].text.ends_with("Level: N/A\n"));
        assert_eq!(criterion_count(&doc), 2);

        // restartable
        assert_eq!(flatten(&doc).count(), 2);
    }
}
