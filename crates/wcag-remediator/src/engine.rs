/// Retrieval-augmented correction of single HTML fragments.
///
/// For each fragment the engine retrieves guideline passages for the issue description,
/// asks the chat model for a fix in the `Correct: [[...]]` grammar, and parses the reply.
/// A reply that does not follow the grammar is not an error: the fragment is returned
/// unchanged with `was_parsed = false`.
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use a11y_common::openai::ChatModel;

use crate::cache::ContextCache;
use crate::error::AppError;
use crate::index::EmbeddingIndex;
use crate::model::{CorrectionResult, ViolationRecord};

const SYSTEM_PROMPT: &str = "You are an assistant who will correct web accessibility issues of a provided website.\n\
I will provide you with an incorrect line of HTML and relevant information from a knowledge base. \
Provide a correction in the following format:\n\
\n\
Correct: [['corrected HTML here']]\n\
\n\
Do not add anything else in the response.";

static CORRECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Correct:\s*\[\[(.*?)\]\]").expect("valid regex"));

/// The part of a violation the engine works on: the offending markup and what is wrong
/// with it.
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    pub html: &'a str,
    pub issue: &'a str,
}

impl<'a> From<&'a ViolationRecord> for Fragment<'a> {
    fn from(record: &'a ViolationRecord) -> Self {
        Self {
            html: &record.node_html,
            issue: &record.description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Build the two chat messages for a fragment.
///
/// The user message carries the markup, the issue and the retrieved passages, in that
/// order.
pub fn build_prompt(fragment: Fragment<'_>, retrieved: &str) -> Prompt {
    let user = format!(
        "Provide a correction for the following. Do not add anything else in the response.\n\
         \n\
         Incorrect: {}\n\
         Issue: {}\n\
         \n\
         Relevant information from the knowledge base:\n\
         {}",
        fragment.html, fragment.issue, retrieved
    );
    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Extract the corrected markup from a model reply.
///
/// Only the first `Correct: [[...]]` block counts. Quotes and line breaks are stripped
/// from the captured text.
pub fn parse_correction(raw: &str, fallback_html: &str) -> CorrectionResult {
    let Some(captured) = CORRECTION_RE.captures(raw).and_then(|c| c.get(1)) else {
        return CorrectionResult::fallback(fallback_html);
    };
    let corrected: String = captured
        .as_str()
        .trim()
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '\n' | '\r'))
        .collect();

    CorrectionResult {
        original_html: fallback_html.to_string(),
        corrected_html: corrected.trim().to_string(),
        was_parsed: true,
    }
}

pub struct CorrectionEngine {
    index: Arc<EmbeddingIndex>,
    chat: Arc<dyn ChatModel>,
    cache: Arc<ContextCache>,
    retrieval_k: usize,
}

impl CorrectionEngine {
    pub fn new(
        index: Arc<EmbeddingIndex>,
        chat: Arc<dyn ChatModel>,
        cache: Arc<ContextCache>,
        retrieval_k: usize,
    ) -> Self {
        Self {
            index,
            chat,
            cache,
            retrieval_k,
        }
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    /// Top-k guideline passages for an issue description, joined by blank lines.
    pub async fn get_relevant_context(&self, issue: &str) -> Result<String, AppError> {
        if let Some(cached) = self.cache.get_context(issue, self.retrieval_k).await {
            debug!(k = self.retrieval_k, "retrieval context served from cache");
            return Ok(cached);
        }

        let query = self.index.embed_query(issue).await?;
        let passages = self.index.query(&query, self.retrieval_k).await?;
        let context = passages.join("\n\n");

        self.cache.set_context(issue, self.retrieval_k, &context).await;
        Ok(context)
    }

    pub async fn request_correction(&self, prompt: &Prompt) -> Result<String, AppError> {
        Ok(self.chat.chat(&prompt.system, &prompt.user).await?)
    }

    pub async fn correct(&self, fragment: Fragment<'_>) -> Result<CorrectionResult, AppError> {
        let context = self.get_relevant_context(fragment.issue).await?;
        let prompt = build_prompt(fragment, &context);
        let raw = self.request_correction(&prompt).await?;

        let result = parse_correction(&raw, fragment.html);
        if result.was_parsed {
            info!(original = fragment.html, corrected = %result.corrected_html, "correction parsed");
        } else {
            warn!(original = fragment.html, "model reply had no correction block, keeping original markup");
        }
        Ok(result)
    }

    /// Like `correct`, but any failure degrades to the unchanged fragment.
    pub async fn correct_or_fallback(&self, fragment: Fragment<'_>) -> CorrectionResult {
        match self.correct(fragment).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, original = fragment.html, "correction failed, keeping original markup");
                CorrectionResult::fallback(fragment.html)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use a11y_common::openai::OpenAiClientError;

    use super::*;
    use crate::index::tests::populated_index;

    /// Chat model that replies from a fixed script and records every user message.
    pub(crate) struct ScriptedChat {
        replies: Mutex<Vec<Result<String, OpenAiClientError>>>,
        pub(crate) prompts: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        pub(crate) fn new(replies: Vec<Result<String, OpenAiClientError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn replying(reply: &str) -> Self {
            Self::new(vec![Ok(reply.to_string())])
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(&self, _system: &str, user: &str) -> Result<String, OpenAiClientError> {
            self.prompts.lock().unwrap().push(user.to_string());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(OpenAiClientError::EmptyReply);
            }
            replies.remove(0)
        }
    }

    async fn engine_with(chat: Arc<ScriptedChat>) -> CorrectionEngine {
        CorrectionEngine::new(
            Arc::new(populated_index().await),
            chat,
            Arc::new(ContextCache::disabled()),
            2,
        )
    }

    const IMG: Fragment<'static> = Fragment {
        html: "<img src=\"logo.png\">",
        issue: "Ensures image elements have alternate text",
    };

    #[test]
    fn test_parse_simple_block() {
        let result = parse_correction("Correct: [[<div>ok</div>]]", "<div></div>");
        assert_eq!(result.corrected_html, "<div>ok</div>");
        assert_eq!(result.original_html, "<div></div>");
        assert!(result.was_parsed);
    }

    #[test]
    fn test_parse_without_block_falls_back() {
        let result = parse_correction("I cannot help.", "<img>");
        assert_eq!(result, CorrectionResult::fallback("<img>"));
    }

    #[test]
    fn test_parse_strips_quotes_and_newlines() {
        let raw = "Sure!\nCorrect: [['<img src=\"a.png\"\n alt=\"Logo\">']]\nthanks";
        let result = parse_correction(raw, "<img src=\"a.png\">");
        assert_eq!(result.corrected_html, "<img src=a.png alt=Logo>");
        assert!(result.was_parsed);
    }

    #[test]
    fn test_parse_takes_first_block_only() {
        let raw = "Correct: [[<a>one</a>]] Correct: [[<a>two</a>]]";
        assert_eq!(parse_correction(raw, "<a></a>").corrected_html, "<a>one</a>");
    }

    #[test]
    fn test_parse_spans_lines() {
        let raw = "Correct:\n[[\n<button>\nSave</button>\r\n]]";
        assert_eq!(
            parse_correction(raw, "<button></button>").corrected_html,
            "<button>Save</button>"
        );
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = build_prompt(IMG, "passage one\n\npassage two");
        assert!(prompt.system.contains("Correct: [['corrected HTML here']]"));
        assert!(prompt.system.contains("Do not add anything else"));

        let incorrect = prompt.user.find("Incorrect: <img src=\"logo.png\">").unwrap();
        let issue = prompt.user.find("Issue: Ensures image elements").unwrap();
        let context = prompt
            .user
            .find("Relevant information from the knowledge base:\npassage one")
            .unwrap();
        assert!(incorrect < issue && issue < context);
    }

    #[tokio::test]
    async fn test_relevant_context_joins_top_k() {
        let engine = engine_with(Arc::new(ScriptedChat::new(vec![]))).await;
        let context = engine.get_relevant_context(IMG.issue).await.unwrap();
        let passages: Vec<&str> = context.split("\n\n").collect();
        assert!(passages[0].starts_with("Top-level Title: Perceivable"));
        assert!(context.contains("Success Criterion ID: 1.1.1"));
        assert_eq!(context.matches("Top-level Title:").count(), 2);
    }

    #[tokio::test]
    async fn test_correct_sends_context_and_parses_reply() {
        let chat = Arc::new(ScriptedChat::replying(
            "Correct: [[<img src='logo.png' alt='Company logo'>]]",
        ));
        let engine = engine_with(Arc::clone(&chat)).await;

        let result = engine.correct(IMG).await.unwrap();
        assert_eq!(result.corrected_html, "<img src=logo.png alt=Company logo>");
        assert!(result.changes_markup());

        let prompts = chat.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Success Criterion ID: 1.1.1"));
    }

    #[tokio::test]
    async fn test_model_failure_surfaces_then_falls_back() {
        let chat = Arc::new(ScriptedChat::new(vec![Err(OpenAiClientError::EmptyReply)]));
        let engine = engine_with(Arc::clone(&chat)).await;
        assert!(matches!(
            engine.correct(IMG).await,
            Err(AppError::ModelUnavailable(_))
        ));

        let result = engine.correct_or_fallback(IMG).await;
        assert_eq!(result, CorrectionResult::fallback(IMG.html));
    }
}
