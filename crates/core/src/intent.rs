//! Intent Extraction
//!
//! Maps free-form completion text to exactly one registered policy. The
//! default [`KeywordExtractor`] is a deliberately simple classifier: it looks
//! for each policy's object keyword as a substring and falls back to the
//! first-registered policy when nothing matches. Other strategies can be
//! plugged in through the [`IntentExtractor`] trait.

use crate::{
    completion::{CompletionClient, CompletionError},
    prompt,
    registry::PolicyRegistry,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of extraction. There is no unresolved state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "policy", rename_all = "snake_case")]
pub enum ExtractionResult {
    /// The completion text named this policy.
    Resolved(String),
    /// Nothing matched; this is the registry's fallback policy.
    Fallback(String),
}

impl ExtractionResult {
    pub fn policy(&self) -> &str {
        match self {
            ExtractionResult::Resolved(name) | ExtractionResult::Fallback(name) => name,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ExtractionResult::Resolved(_))
    }

    pub fn into_policy(self) -> String {
        match self {
            ExtractionResult::Resolved(name) | ExtractionResult::Fallback(name) => name,
        }
    }
}

/// Strategy turning generated text into a policy choice. Must be total.
pub trait IntentExtractor: Send + Sync {
    fn extract(&self, text: &str, registry: &PolicyRegistry) -> ExtractionResult;
}

/// First-match substring search over policy object keywords.
///
/// Matching is case-sensitive and follows registry order, so when several
/// keywords occur the earliest-registered policy wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordExtractor;

impl IntentExtractor for KeywordExtractor {
    fn extract(&self, text: &str, registry: &PolicyRegistry) -> ExtractionResult {
        match registry.iter().find(|p| text.contains(p.keyword())) {
            Some(policy) => ExtractionResult::Resolved(policy.name.clone()),
            None => ExtractionResult::Fallback(registry.fallback().name.clone()),
        }
    }
}

/// Result of running an utterance through prompt, completion and extraction.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub completion: String,
    pub extraction: ExtractionResult,
}

/// Runs the natural-language path: prompt, completion call, extraction.
pub struct IntentResolver {
    client: Arc<dyn CompletionClient>,
    extractor: Arc<dyn IntentExtractor>,
}

impl IntentResolver {
    pub fn new(client: Arc<dyn CompletionClient>, extractor: Arc<dyn IntentExtractor>) -> Self {
        Self { client, extractor }
    }

    /// Resolver using [`KeywordExtractor`].
    pub fn with_keywords(client: Arc<dyn CompletionClient>) -> Self {
        Self::new(client, Arc::new(KeywordExtractor))
    }

    /// Resolves `utterance` against `registry`.
    ///
    /// Errors only when the completion round-trip itself fails; an answer
    /// that names no policy yields [`ExtractionResult::Fallback`].
    pub async fn resolve(
        &self,
        utterance: &str,
        registry: &PolicyRegistry,
    ) -> Result<Resolution, CompletionError> {
        let prompt = prompt::build(utterance, registry);
        debug!(prompt_len = prompt.len(), "Requesting completion");

        let completion = self.client.complete(&prompt).await?;
        let extraction = self.extractor.extract(&completion, registry);
        info!(
            policy = extraction.policy(),
            resolved = extraction.is_resolved(),
            "Utterance resolved"
        );
        Ok(Resolution {
            completion,
            extraction,
        })
    }
}
