//! AI-backed classification and summarization of messages
//!
//! The two operations fail differently. [`Classifier::classify`] never
//! returns an error: anything that goes wrong degrades to an `Unclassified`
//! result carrying a note. [`Classifier::summarize`] propagates failures so
//! a message is never stored with a blank summary.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AiConfig;
use crate::error::{Result, TriageError};
use crate::llm::TextGenerator;
use crate::models::{Category, Classification, Message};

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^```[a-zA-Z]*\s*$").unwrap());

/// Why a classification fell back to `Unclassified`
#[derive(Debug, Clone, PartialEq)]
pub enum Degraded {
    /// The user has no categories to choose from
    NoCategories,
    /// The provider call failed
    Provider(String),
    /// The provider answered with something that is not the expected JSON
    Unparseable(String),
}

impl fmt::Display for Degraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degraded::NoCategories => write!(f, "No categories defined"),
            Degraded::Provider(e) => write!(f, "Classification call failed: {}", e),
            Degraded::Unparseable(e) => write!(f, "Could not parse classification: {}", e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    category: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Classifies and summarizes messages through a [`TextGenerator`]
#[derive(Clone)]
pub struct Classifier {
    generator: Arc<dyn TextGenerator>,
    classify_max_tokens: u32,
    summarize_max_tokens: u32,
    body_char_limit: usize,
}

impl Classifier {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &AiConfig) -> Self {
        Self {
            generator,
            classify_max_tokens: config.classify_max_tokens,
            summarize_max_tokens: config.summarize_max_tokens,
            body_char_limit: config.body_char_limit,
        }
    }

    /// Classify a message, degrading to `Unclassified` on any failure
    pub async fn classify(&self, categories: &[Category], message: &Message) -> Classification {
        match self.try_classify(categories, message).await {
            Ok(classification) => classification,
            Err(degraded) => {
                if degraded != Degraded::NoCategories {
                    warn!(
                        message_id = %message.external_id,
                        "Classification degraded: {}",
                        degraded
                    );
                }
                Classification::unclassified(degraded.to_string())
            }
        }
    }

    /// Classify a message, reporting why it could not be classified
    pub async fn try_classify(
        &self,
        categories: &[Category],
        message: &Message,
    ) -> std::result::Result<Classification, Degraded> {
        if categories.is_empty() {
            return Err(Degraded::NoCategories);
        }

        let prompt = self.classification_prompt(categories, message);
        let raw = self
            .generator
            .complete(&prompt, self.classify_max_tokens)
            .await
            .map_err(|e| Degraded::Provider(e.to_string()))?;

        let parsed = parse_classification(&raw)?;
        let category_id = categories
            .iter()
            .find(|c| c.name == parsed.category)
            .map(|c| c.id.clone());

        if category_id.is_none() {
            debug!(
                message_id = %message.external_id,
                category = %parsed.category,
                "Returned category does not match any user category"
            );
        }

        Ok(Classification {
            category_name: parsed.category,
            category_id,
            confidence: clamp_confidence(parsed.confidence),
            reasoning: parsed.reasoning.unwrap_or_default(),
            error: None,
        })
    }

    /// Produce a short summary; empty output counts as failure
    pub async fn summarize(&self, message: &Message) -> Result<String> {
        let prompt = self.summary_prompt(message);
        let summary = self
            .generator
            .complete(&prompt, self.summarize_max_tokens)
            .await
            .map_err(|e| TriageError::Summarization(e.to_string()))?;

        let summary = summary.trim();
        if summary.is_empty() {
            return Err(TriageError::Summarization(
                "Provider returned an empty summary".to_string(),
            ));
        }
        Ok(summary.to_string())
    }

    fn classification_prompt(&self, categories: &[Category], message: &Message) -> String {
        let category_lines: String = categories
            .iter()
            .map(|c| format!("- {}: {}\n", c.name, c.description))
            .collect();

        format!(
            "Classify the email below into exactly one of these categories. \
             Each category's description is the rule for belonging to it.\n\n\
             Categories:\n{categories}\n\
             Email:\nFrom: {from}\nSubject: {subject}\nBody:\n{body}\n\n\
             Respond with only a JSON object of the form \
             {{\"category\": \"<category name or Unclassified>\", \
             \"confidence\": <number between 0 and 1>, \
             \"reasoning\": \"<one sentence>\"}}. \
             Use the category name exactly as written above.",
            categories = category_lines,
            from = message.from,
            subject = message.subject,
            body = truncate_chars(&message.body, self.body_char_limit),
        )
    }

    fn summary_prompt(&self, message: &Message) -> String {
        format!(
            "Summarize this email in one or two short sentences. \
             Reply with the summary text only.\n\n\
             From: {}\nSubject: {}\nBody:\n{}",
            message.from,
            message.subject,
            truncate_chars(&message.body, self.body_char_limit),
        )
    }
}

/// Pull the JSON object out of a model reply, tolerating code fences and
/// surrounding prose
fn parse_classification(raw: &str) -> std::result::Result<RawClassification, Degraded> {
    let cleaned = CODE_FENCE.replace_all(raw, "");
    let start = cleaned.find('{');
    let end = cleaned.rfind('}');

    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => return Err(Degraded::Unparseable("No JSON object in response".to_string())),
    };

    let parsed: RawClassification =
        serde_json::from_str(json).map_err(|e| Degraded::Unparseable(e.to_string()))?;

    if parsed.category.trim().is_empty() {
        return Err(Degraded::Unparseable("Empty category".to_string()));
    }
    Ok(parsed)
}

fn clamp_confidence(value: Option<f64>) -> f32 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0) as f32,
        _ => 0.0,
    }
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
