//! # Escalation
//!
//! When a specialist cannot complete a request — explicit refusal, failure,
//! or timeout — the escalator picks the fallback handler the turn reroutes
//! to. The mapping is deterministic configuration: each category can name
//! its own fallback, with a required default covering the rest, and a cap
//! bounds how many times a single turn may reroute.
//!
//! Past the cap the escalator stops selecting handlers entirely; the
//! dispatcher turns that into a terminal blocked turn carrying the policy's
//! "unable to resolve" message.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::session::SessionSnapshot;

/// Deterministic fallback configuration for one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Maximum reroutes per turn
    pub max_escalations: usize,
    /// Per-category fallback handler ids
    pub fallbacks: HashMap<Category, String>,
    /// Fallback for categories without an entry above
    pub default_fallback: String,
    /// Caller-facing message for a turn that exhausts the cap
    pub exhausted_message: String,
}

impl EscalationPolicy {
    pub fn new(default_fallback: impl Into<String>) -> Self {
        Self {
            max_escalations: 1,
            fallbacks: HashMap::new(),
            default_fallback: default_fallback.into(),
            exhausted_message:
                "We were unable to resolve your request. A member of our team will follow up."
                    .to_string(),
        }
    }

    pub fn with_max_escalations(mut self, max_escalations: usize) -> Self {
        self.max_escalations = max_escalations;
        self
    }

    /// Sets the fallback handler for one category.
    pub fn fallback_for(mut self, category: Category, handler_id: impl Into<String>) -> Self {
        self.fallbacks.insert(category, handler_id.into());
        self
    }

    pub fn with_exhausted_message(mut self, message: impl Into<String>) -> Self {
        self.exhausted_message = message.into();
        self
    }
}

/// Outcome of a fallback selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Reroute the turn to this handler
    Reroute { handler_id: String },
    /// The cap is exhausted; no handler may be invoked
    Exhausted,
}

/// Selects fallback handlers according to an [`EscalationPolicy`].
#[derive(Debug, Clone)]
pub struct Escalator {
    policy: EscalationPolicy,
}

impl Escalator {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Picks the fallback for the `escalation_count`-th reroute (1-based) of
    /// a turn classified as `category`. Deterministic: the same inputs
    /// always select the same handler, independent of attempt count below
    /// the cap.
    pub fn select_fallback(
        &self,
        category: Category,
        escalation_count: usize,
        _session: &SessionSnapshot,
    ) -> FallbackDecision {
        if escalation_count > self.policy.max_escalations {
            return FallbackDecision::Exhausted;
        }
        let handler_id = self
            .policy
            .fallbacks
            .get(&category)
            .cloned()
            .unwrap_or_else(|| self.policy.default_fallback.clone());
        FallbackDecision::Reroute { handler_id }
    }

    /// The caller-facing message for an exhausted turn.
    pub fn exhausted_message(&self) -> &str {
        &self.policy.exhausted_message
    }
}
