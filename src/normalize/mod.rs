//! Normalization pipeline: decompose raw text into atoms, classify each
//! atom into a semantic frame, and score confidence.
//!
//! The decompose call runs first; classify calls for all atoms then run
//! concurrently with a positional gather, so the output order always
//! matches decomposition order. Confidence scores are attached here but
//! never filtered here; callers decide at the ingestion boundary.

mod confidence;

pub use confidence::compute_confidence;

use crate::llm::{LlmProvider, extract_json_from_response, truncate_for_error};
use crate::models::{Frame, Insight};
use crate::{Error, Result};
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DECOMPOSE_MAX_TOKENS: u32 = 1024;
const CLASSIFY_MAX_TOKENS: u32 = 512;

const DECOMPOSE_PROMPT: &str = "\
Decompose the following text into insights. Each insight should express a meaningful \
concept, relationship, or principle that is specific and actionable.

Rules:
- Keep related context together (e.g., \"X causes Y in context Z\" is ONE insight, not three)
- Skip generic definitions that lack specificity (e.g., \"X is a type of Y\" where both are obvious)
- Prefer insights that explain WHY or HOW over what things ARE
- Aim for 1-5 insights per input, not exhaustive enumeration

Text: {text}

Return a JSON array of strings, each being one insight. \
If the text contains no meaningful insights, return an empty array [].
Return ONLY valid JSON, no explanation.";

const CLASSIFY_PROMPT: &str = "\
Classify this insight into exactly one semantic frame and rewrite it in a clear, specific form.

Insight: {text}

Frames and templates:
- causal: \"{condition} causes {effect}\" or \"{condition} causes {effect} because {mechanism}\"
- constraint: \"{action} requires {precondition}\"
- pattern: \"When {situation}, prefer {approach} over {alternative} because {reason}\"
- equivalence: \"{A} is equivalent to {B} in context {C}\"
- taxonomy: \"{specific} is a type of {general} with property {distinguishing_property}\"
- procedure: \"To achieve {goal}, do: {step1}, then {step2}, ...\"

Rewriting rules:
- Preserve technical terms exactly (variable names, library names, error codes)
- Make implicit causality explicit (add \"because\" if reasoning is implied)
- Include context if mentioned in original (e.g., \"in production\", \"during initialization\")
- Keep normalized text under 200 characters by removing filler words

Return JSON: {\"frame\": \"<frame>\", \"normalized\": \"<rewritten text>\", \"entities\": [\"<entity1>\", ...], \"problems\": [\"<problem1>\", ...], \"resolutions\": [\"<resolution1>\", ...], \"contexts\": [\"<context1>\", ...]}

Rules for extraction:
- entities: technical things mentioned (tools, libraries, protocols, concepts, code constructs)
- problems: issues, bugs, failures, or pain points described (empty array if none)
- resolutions: fixes, solutions, or workarounds described (empty array if none)
- contexts: situational qualifiers like \"production\", \"CI pipeline\", \"React 18+\" (empty array if none)

Return ONLY valid JSON, no explanation.";

/// One classified atom, as returned by the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct Classification {
    /// Assigned semantic frame.
    pub frame: Frame,
    /// Rewrite under the frame's template.
    pub normalized: String,
    /// Extracted entities.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Extracted problems.
    #[serde(default)]
    pub problems: Vec<String>,
    /// Extracted resolutions.
    #[serde(default)]
    pub resolutions: Vec<String>,
    /// Extracted contexts.
    #[serde(default)]
    pub contexts: Vec<String>,
}

/// Decomposes and classifies text into canonical semantic frames using an
/// LLM.
#[derive(Clone)]
pub struct Normalizer {
    llm: Arc<dyn LlmProvider>,
}

impl Normalizer {
    /// Creates a normalizer over an LLM provider.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Decomposes text into 1–5 meaningful, self-contained atoms.
    ///
    /// Returns an empty list when the input carries no actionable
    /// insight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if the LLM call fails or returns
    /// something that is not a JSON array of strings.
    pub async fn decompose(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let prompt = DECOMPOSE_PROMPT.replace("{text}", text);
        let response = self
            .llm
            .complete(&prompt, DECOMPOSE_MAX_TOKENS, cancel)
            .await?;
        let json = extract_json_from_response(&response);
        serde_json::from_str(json).map_err(|e| Error::Provider {
            provider: self.llm.name().to_string(),
            cause: format!(
                "invalid decompose response: {e}. Response: {}",
                truncate_for_error(&response)
            ),
        })
    }

    /// Classifies one atom into exactly one frame and rewrites it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if the LLM call fails or the response
    /// does not match the classification shape.
    pub async fn classify(&self, text: &str, cancel: &CancellationToken) -> Result<Classification> {
        let prompt = CLASSIFY_PROMPT.replace("{text}", text);
        let response = self
            .llm
            .complete(&prompt, CLASSIFY_MAX_TOKENS, cancel)
            .await?;
        let json = extract_json_from_response(&response);
        serde_json::from_str(json).map_err(|e| Error::Provider {
            provider: self.llm.name().to_string(),
            cause: format!(
                "invalid classify response: {e}. Response: {}",
                truncate_for_error(&response)
            ),
        })
    }

    /// Runs the full pipeline: decompose, classify every atom
    /// concurrently, attach caller-supplied source and domains, and score
    /// confidence.
    ///
    /// Output order matches decomposition order. Scores are raw; nothing
    /// is filtered here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if any LLM call fails, or
    /// [`Error::Cancelled`] when the token fires; cancellation propagates
    /// to all pending classify calls.
    pub async fn normalize(
        &self,
        text: &str,
        source: &str,
        domains: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Insight>> {
        let atoms = self.decompose(text, cancel).await?;

        let classifications =
            join_all(atoms.iter().map(|atom| self.classify(atom, cancel))).await;

        let mut insights = Vec::with_capacity(atoms.len());
        for (atom, classification) in atoms.into_iter().zip(classifications) {
            let classification = classification?;
            let mut insight = Insight {
                id: None,
                text: atom,
                normalized_text: classification.normalized,
                frame: classification.frame,
                domains: domains.to_vec(),
                entities: classification.entities,
                problems: classification.problems,
                resolutions: classification.resolutions,
                contexts: classification.contexts,
                confidence: 1.0,
                source: source.to_string(),
                created_at: None,
                updated_at: None,
            };
            insight.confidence = compute_confidence(&insight);
            insights.push(insight);
        }
        Ok(insights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted LLM: first call answers the decompose prompt, later calls
    /// answer classify prompts in order.
    struct ScriptedLlm {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<&str>) -> Self {
            let mut responses: Vec<String> =
                responses.into_iter().map(String::from).collect();
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| Error::Provider {
                    provider: "scripted".to_string(),
                    cause: "script exhausted".to_string(),
                })
        }
    }

    #[tokio::test]
    async fn test_normalize_empty_text_returns_empty() {
        let normalizer = Normalizer::new(Arc::new(ScriptedLlm::new(vec![])));
        let insights = normalizer
            .normalize("", "test", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(insights.is_empty());

        let insights = normalizer
            .normalize("   \n ", "test", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(insights.is_empty());
    }

    #[tokio::test]
    async fn test_normalize_attaches_source_and_domains() {
        let normalizer = Normalizer::new(Arc::new(ScriptedLlm::new(vec![
            r#"["JWT parsing fails without null checks"]"#,
            r#"{"frame": "constraint", "normalized": "Safe JWT parsing requires null checks on every claim", "entities": ["JWT"], "problems": ["null pointer"], "resolutions": ["null checks"], "contexts": []}"#,
        ])));

        let domains = vec!["node".to_string(), "auth".to_string()];
        let insights = normalizer
            .normalize(
                "Fixed auth by adding null checks to JWT",
                "debug",
                &domains,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(insights.len(), 1);
        let insight = &insights[0];
        assert_eq!(insight.frame, Frame::Constraint);
        assert_eq!(insight.domains, domains);
        assert_eq!(insight.source, "debug");
        assert_eq!(insight.problems, vec!["null pointer".to_string()]);
        assert!(insight.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_normalize_preserves_atom_order() {
        let normalizer = Normalizer::new(Arc::new(ScriptedLlm::new(vec![
            r#"["first atom text", "second atom text"]"#,
            r#"{"frame": "causal", "normalized": "first normalized"}"#,
            r#"{"frame": "procedure", "normalized": "second normalized"}"#,
        ])));

        let insights = normalizer
            .normalize("compound input", "", &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].text, "first atom text");
        assert_eq!(insights[0].normalized_text, "first normalized");
        assert_eq!(insights[1].text, "second atom text");
        assert_eq!(insights[1].frame, Frame::Procedure);
    }

    #[tokio::test]
    async fn test_decompose_strips_markdown_fences() {
        let normalizer = Normalizer::new(Arc::new(ScriptedLlm::new(vec![
            "```json\n[\"one atom\"]\n```",
        ])));
        let atoms = normalizer
            .decompose("some text", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(atoms, vec!["one atom".to_string()]);
    }

    #[tokio::test]
    async fn test_classify_rejects_unknown_frame() {
        let normalizer = Normalizer::new(Arc::new(ScriptedLlm::new(vec![
            r#"{"frame": "vibes", "normalized": "x"}"#,
        ])));
        let result = normalizer.classify("atom", &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Provider { .. })));
    }
}
