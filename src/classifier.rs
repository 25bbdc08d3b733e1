//! # Triage Classification
//!
//! The classifier assigns each screened request to exactly one [`Category`].
//! Implementations are pure with respect to their inputs: the same request
//! and session snapshot always yield the same classification, which keeps
//! routing reproducible and testable.
//!
//! The dispatcher applies two guarantees on top of any implementation:
//! classifications below the configured confidence threshold are demoted to
//! [`Category::General`], and a failing classifier is recovered as
//! `General` with confidence 0 and rationale `"classifier_unavailable"` —
//! routing always has a destination.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::error::Result;
use crate::items::Request;
use crate::session::SessionSnapshot;

/// Rationale used when a classification backend fails and the dispatcher
/// falls back to [`Category::General`].
pub const CLASSIFIER_UNAVAILABLE: &str = "classifier_unavailable";

/// The outcome of classifying one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    /// Certainty in `[0, 1]`
    pub confidence: f64,
    pub rationale: String,
}

impl Classification {
    /// Creates a classification, clamping `confidence` into `[0, 1]`.
    pub fn new(category: Category, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            category,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
        }
    }
}

/// Assigns a category to a screened request.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: &Request,
        session: &SessionSnapshot,
    ) -> Result<Classification>;
}

struct KeywordRule {
    category: Category,
    keywords: Vec<String>,
}

/// Deterministic keyword classifier.
///
/// Each rule maps a keyword list to a category; the rule with the most
/// case-insensitive hits wins, with earlier rules breaking ties. Confidence
/// grows with the hit count: one hit scores 0.5, each further hit halves the
/// remaining distance to 1.
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
}

impl KeywordClassifier {
    /// A classifier with no rules; everything scores as `General`.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// The stock rule set for the built-in categories.
    pub fn with_defaults() -> Self {
        Self::new()
            .rule(
                Category::Billing,
                ["billing", "refund", "invoice", "charge", "payment", "subscription"],
            )
            .rule(
                Category::Technical,
                ["error", "crash", "bug", "install", "login", "password", "technical"],
            )
            .rule(
                Category::Escalation,
                ["complaint", "manager", "supervisor", "escalate", "unacceptable"],
            )
    }

    /// Adds a rule. Keywords are matched as lowercase substrings.
    pub fn rule<I, S>(mut self, category: Category, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(KeywordRule {
            category,
            keywords: keywords.into_iter().map(|k| k.into().to_lowercase()).collect(),
        });
        self
    }

    fn score(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();
        let mut best: Option<(&KeywordRule, Vec<&str>)> = None;

        for rule in &self.rules {
            let hits: Vec<&str> = rule
                .keywords
                .iter()
                .filter(|k| lower.contains(k.as_str()))
                .map(String::as_str)
                .collect();
            if hits.is_empty() {
                continue;
            }
            let replace = match &best {
                Some((_, current)) => hits.len() > current.len(),
                None => true,
            };
            if replace {
                best = Some((rule, hits));
            }
        }

        match best {
            Some((rule, hits)) => {
                let confidence = 1.0 - 0.5f64.powi(hits.len() as i32);
                Classification::new(
                    rule.category,
                    confidence,
                    format!("matched keywords: {}", hits.join(", ")),
                )
            }
            None => Classification::new(Category::General, 0.25, "no keyword match"),
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(
        &self,
        request: &Request,
        _session: &SessionSnapshot,
    ) -> Result<Classification> {
        Ok(self.score(&request.text))
    }
}

impl std::fmt::Debug for KeywordClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordClassifier")
            .field("rules", &self.rules.len())
            .finish()
    }
}
