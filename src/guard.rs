//! # Guards (orientation)
//!
//! Guards validate request input before classification and handler output
//! before acceptance. A [`Guard`] runs a set of independent
//! [`GuardPredicate`]s against a payload and combines their findings into a
//! single [`GuardVerdict`]; the dispatcher makes the block/continue decision
//! from the verdict. Guards never signal policy violations through errors —
//! a verdict is always produced.
//!
//! Each predicate carries its own trigger threshold: a finding only counts
//! toward blocking when its severity reaches that predicate's threshold. The
//! verdict's aggregate severity and confidence are the maxima across the
//! predicates that fired.
//!
//! When a predicate evaluator itself fails, the configured [`FailureBias`]
//! for the check direction decides the outcome: by default input checks
//! treat the predicate as passing while output checks block. Both directions
//! are independently configurable via [`GuardConfig`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::audit::AuditSink;
use crate::error::Result;

/// Severity tier of a finding or verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a turn a check applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Direction::Input => "input",
            Direction::Output => "output",
        })
    }
}

/// What one predicate concluded about a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateFinding {
    pub triggered: bool,
    pub reason: Option<String>,
    /// How certain the predicate is, in `[0, 1]`
    pub confidence: f64,
    pub severity: Severity,
}

impl PredicateFinding {
    /// A clean pass.
    pub fn pass() -> Self {
        Self {
            triggered: false,
            reason: None,
            confidence: 0.0,
            severity: Severity::Low,
        }
    }

    /// A triggered finding; `confidence` is clamped into `[0, 1]`.
    pub fn triggered(reason: impl Into<String>, confidence: f64, severity: Severity) -> Self {
        Self {
            triggered: true,
            reason: Some(reason.into()),
            confidence: confidence.clamp(0.0, 1.0),
            severity,
        }
    }
}

/// One independent validation rule.
#[async_trait]
pub trait GuardPredicate: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum finding severity at which this predicate contributes to a
    /// block. Findings below the threshold are recorded but do not block.
    fn trigger_threshold(&self) -> Severity {
        Severity::Medium
    }

    async fn evaluate(&self, payload: &str, direction: Direction) -> Result<PredicateFinding>;
}

/// Aggregate outcome of one guard check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardVerdict {
    pub blocked: bool,
    pub reason: Option<String>,
    pub confidence: f64,
    pub severity: Severity,
}

impl GuardVerdict {
    /// Verdict of a check where nothing fired.
    pub fn clear() -> Self {
        Self {
            blocked: false,
            reason: None,
            confidence: 0.0,
            severity: Severity::Low,
        }
    }
}

/// How a check direction behaves when a predicate evaluator fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureBias {
    /// Treat the failed predicate as passing
    Open,
    /// Treat the failed predicate as a high-severity block
    Closed,
}

/// Failure behavior per check direction. The default is open on input and
/// closed on output; both are explicit configuration, never assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    pub input_failure: FailureBias,
    pub output_failure: FailureBias,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            input_failure: FailureBias::Open,
            output_failure: FailureBias::Closed,
        }
    }
}

/// Runs predicates against a payload and combines their findings.
///
/// Emits one audit record per check with the full per-predicate breakdown.
pub struct Guard {
    predicates: Vec<Arc<dyn GuardPredicate>>,
    config: GuardConfig,
    audit: Arc<dyn AuditSink>,
}

impl Guard {
    pub fn new(config: GuardConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            predicates: Vec::new(),
            config,
            audit,
        }
    }

    /// Adds a predicate; checks run predicates in insertion order.
    pub fn predicate(mut self, predicate: Arc<dyn GuardPredicate>) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    /// Checks `payload` in `direction` and returns the combined verdict.
    ///
    /// Blocked = any predicate whose finding severity reached its own
    /// trigger threshold. Aggregate severity and confidence are the maxima
    /// across fired predicates.
    pub async fn check(&self, payload: &str, direction: Direction) -> GuardVerdict {
        let mut verdict = GuardVerdict::clear();
        let mut breakdown = Vec::with_capacity(self.predicates.len());

        for predicate in &self.predicates {
            match predicate.evaluate(payload, direction).await {
                Ok(finding) => {
                    let fired =
                        finding.triggered && finding.severity >= predicate.trigger_threshold();
                    if fired {
                        verdict.blocked = true;
                        if finding.severity > verdict.severity {
                            verdict.severity = finding.severity;
                        }
                        if finding.confidence > verdict.confidence {
                            verdict.confidence = finding.confidence;
                        }
                        if verdict.reason.is_none() {
                            verdict.reason = Some(
                                finding
                                    .reason
                                    .clone()
                                    .unwrap_or_else(|| predicate.name().to_string()),
                            );
                        }
                    }
                    breakdown.push(json!({
                        "predicate": predicate.name(),
                        "triggered": finding.triggered,
                        "fired": fired,
                        "severity": finding.severity,
                        "confidence": finding.confidence,
                        "reason": finding.reason,
                    }));
                }
                Err(e) => {
                    let bias = match direction {
                        Direction::Input => self.config.input_failure,
                        Direction::Output => self.config.output_failure,
                    };
                    warn!(
                        predicate = predicate.name(),
                        direction = %direction,
                        error = %e,
                        "guard predicate evaluation failed"
                    );
                    breakdown.push(json!({
                        "predicate": predicate.name(),
                        "error": e.to_string(),
                        "bias": bias,
                    }));
                    if bias == FailureBias::Closed {
                        verdict.blocked = true;
                        verdict.severity = Severity::High;
                        if verdict.reason.is_none() {
                            verdict.reason =
                                Some(format!("guard_evaluation_failed: {}", predicate.name()));
                        }
                    }
                }
            }
        }

        self.audit.record(
            "guard_checked",
            json!({
                "direction": direction,
                "blocked": verdict.blocked,
                "severity": verdict.severity,
                "confidence": verdict.confidence,
                "reason": verdict.reason,
                "predicates": breakdown,
            }),
        );

        verdict
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("predicates", &self.predicates.len())
            .field("config", &self.config)
            .finish()
    }
}

/// A [`GuardPredicate`] that triggers when the payload contains any of a
/// list of patterns, case-insensitively.
#[derive(Debug, Clone)]
pub struct PatternPredicate {
    name: String,
    patterns: Vec<String>,
    severity: Severity,
    threshold: Severity,
}

impl PatternPredicate {
    pub fn new(name: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            patterns,
            severity: Severity::High,
            threshold: Severity::Medium,
        }
    }

    /// Severity assigned to a match.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Minimum severity at which a match blocks.
    pub fn with_trigger_threshold(mut self, threshold: Severity) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl GuardPredicate for PatternPredicate {
    fn name(&self) -> &str {
        &self.name
    }

    fn trigger_threshold(&self) -> Severity {
        self.threshold
    }

    async fn evaluate(&self, payload: &str, _direction: Direction) -> Result<PredicateFinding> {
        let lower = payload.to_lowercase();
        for pattern in &self.patterns {
            if lower.contains(&pattern.to_lowercase()) {
                return Ok(PredicateFinding::triggered(
                    format!("payload contains blocked pattern: {}", pattern),
                    1.0,
                    self.severity,
                ));
            }
        }
        Ok(PredicateFinding::pass())
    }
}

/// A [`GuardPredicate`] that triggers when the payload length exceeds a
/// maximum.
#[derive(Debug, Clone)]
pub struct MaxLengthPredicate {
    name: String,
    max_length: usize,
    threshold: Severity,
}

impl MaxLengthPredicate {
    pub fn new(max_length: usize) -> Self {
        Self {
            name: format!("max_length_{}", max_length),
            max_length,
            threshold: Severity::Medium,
        }
    }

    pub fn with_trigger_threshold(mut self, threshold: Severity) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl GuardPredicate for MaxLengthPredicate {
    fn name(&self) -> &str {
        &self.name
    }

    fn trigger_threshold(&self) -> Severity {
        self.threshold
    }

    async fn evaluate(&self, payload: &str, _direction: Direction) -> Result<PredicateFinding> {
        if payload.len() > self.max_length {
            Ok(PredicateFinding::triggered(
                format!("payload exceeds maximum length of {} characters", self.max_length),
                1.0,
                Severity::Medium,
            ))
        } else {
            Ok(PredicateFinding::pass())
        }
    }
}

/// A [`GuardPredicate`] that flags long digit runs, a cheap heuristic for
/// account numbers and similar identifiers. Digits separated by single
/// spaces or dashes count as one run.
#[derive(Debug, Clone)]
pub struct DigitRunPredicate {
    min_digits: usize,
}

impl DigitRunPredicate {
    pub fn new(min_digits: usize) -> Self {
        Self { min_digits }
    }
}

impl Default for DigitRunPredicate {
    fn default() -> Self {
        Self::new(9)
    }
}

#[async_trait]
impl GuardPredicate for DigitRunPredicate {
    fn name(&self) -> &str {
        "digit_run"
    }

    fn trigger_threshold(&self) -> Severity {
        Severity::Medium
    }

    async fn evaluate(&self, payload: &str, _direction: Direction) -> Result<PredicateFinding> {
        let mut run = 0usize;
        let mut longest = 0usize;
        let mut prev_was_digit = false;
        for c in payload.chars() {
            if c.is_ascii_digit() {
                run += 1;
                prev_was_digit = true;
            } else if prev_was_digit && (c == ' ' || c == '-') {
                // separator inside a run; only a digit may follow
                prev_was_digit = false;
            } else {
                longest = longest.max(run);
                run = 0;
                prev_was_digit = false;
            }
        }
        longest = longest.max(run);

        if longest >= self.min_digits {
            Ok(PredicateFinding::triggered(
                format!("payload contains a run of {} digits", longest),
                0.8,
                Severity::High,
            ))
        } else {
            Ok(PredicateFinding::pass())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::error::TriageError;

    fn guard_with(predicates: Vec<Arc<dyn GuardPredicate>>, config: GuardConfig) -> Guard {
        let mut guard = Guard::new(config, Arc::new(MemoryAuditSink::new()));
        for p in predicates {
            guard = guard.predicate(p);
        }
        guard
    }

    #[tokio::test]
    async fn test_clean_payload_passes() {
        let guard = guard_with(
            vec![
                Arc::new(PatternPredicate::new(
                    "blocked_topics",
                    vec!["crypto tips".to_string()],
                )),
                Arc::new(MaxLengthPredicate::new(200)),
            ],
            GuardConfig::default(),
        );

        let verdict = guard.check("what is your refund policy?", Direction::Input).await;
        assert!(!verdict.blocked);
        assert!(verdict.reason.is_none());
        assert_eq!(verdict.severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_pattern_blocks_case_insensitively() {
        let guard = guard_with(
            vec![Arc::new(PatternPredicate::new(
                "blocked_topics",
                vec!["forbidden".to_string()],
            ))],
            GuardConfig::default(),
        );

        let verdict = guard.check("this is FORBIDDEN content", Direction::Input).await;
        assert!(verdict.blocked);
        assert_eq!(verdict.severity, Severity::High);
        assert!(verdict.reason.unwrap().contains("forbidden"));
    }

    #[tokio::test]
    async fn test_below_threshold_finding_does_not_block() {
        // Finding severity Low never reaches a Medium trigger threshold.
        let guard = guard_with(
            vec![Arc::new(
                PatternPredicate::new("tone", vec!["hmph".to_string()])
                    .with_severity(Severity::Low),
            )],
            GuardConfig::default(),
        );

        let verdict = guard.check("hmph, fine", Direction::Input).await;
        assert!(!verdict.blocked);
    }

    #[tokio::test]
    async fn test_aggregate_severity_is_max_of_fired() {
        let guard = guard_with(
            vec![
                Arc::new(
                    PatternPredicate::new("medium_topic", vec!["gossip".to_string()])
                        .with_severity(Severity::Medium),
                ),
                Arc::new(PatternPredicate::new(
                    "high_topic",
                    vec!["secret".to_string()],
                )),
            ],
            GuardConfig::default(),
        );

        let verdict = guard.check("gossip about the secret", Direction::Output).await;
        assert!(verdict.blocked);
        assert_eq!(verdict.severity, Severity::High);
        // First fired predicate supplies the reason.
        assert!(verdict.reason.unwrap().contains("gossip"));
    }

    struct FailingPredicate;

    #[async_trait]
    impl GuardPredicate for FailingPredicate {
        fn name(&self) -> &str {
            "failing"
        }

        async fn evaluate(&self, _: &str, _: Direction) -> Result<PredicateFinding> {
            Err(TriageError::GuardEvaluationFailed {
                predicate: "failing".to_string(),
                message: "backend offline".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_evaluator_failure_fails_open_on_input() {
        let guard = guard_with(vec![Arc::new(FailingPredicate)], GuardConfig::default());

        let verdict = guard.check("anything", Direction::Input).await;
        assert!(!verdict.blocked);
    }

    #[tokio::test]
    async fn test_evaluator_failure_fails_closed_on_output() {
        let guard = guard_with(vec![Arc::new(FailingPredicate)], GuardConfig::default());

        let verdict = guard.check("anything", Direction::Output).await;
        assert!(verdict.blocked);
        assert_eq!(verdict.severity, Severity::High);
        assert!(verdict.reason.unwrap().starts_with("guard_evaluation_failed"));
    }

    #[tokio::test]
    async fn test_failure_bias_is_configurable() {
        let config = GuardConfig {
            input_failure: FailureBias::Closed,
            output_failure: FailureBias::Open,
        };
        let guard = guard_with(vec![Arc::new(FailingPredicate)], config);

        assert!(guard.check("x", Direction::Input).await.blocked);
        assert!(!guard.check("x", Direction::Output).await.blocked);
    }

    #[tokio::test]
    async fn test_check_emits_audit_record_with_breakdown() {
        let sink = Arc::new(MemoryAuditSink::new());
        let guard = Guard::new(GuardConfig::default(), sink.clone()).predicate(Arc::new(
            PatternPredicate::new("blocked_topics", vec!["secret".to_string()]),
        ));

        guard.check("a secret plan", Direction::Input).await;

        let records = sink.records_of_kind("guard_checked");
        assert_eq!(records.len(), 1);
        let payload = &records[0].payload;
        assert_eq!(payload["blocked"], serde_json::json!(true));
        assert_eq!(payload["predicates"][0]["predicate"], "blocked_topics");
    }

    #[tokio::test]
    async fn test_digit_run_predicate() {
        let predicate = DigitRunPredicate::default();

        let clean = predicate.evaluate("call me maybe", Direction::Input).await.unwrap();
        assert!(!clean.triggered);

        let short = predicate.evaluate("order 12345", Direction::Input).await.unwrap();
        assert!(!short.triggered);

        let flagged = predicate
            .evaluate("my card is 4111-1111-1111-1111", Direction::Input)
            .await
            .unwrap();
        assert!(flagged.triggered);
        assert_eq!(flagged.severity, Severity::High);
    }

    #[tokio::test]
    async fn test_max_length_predicate() {
        let guard = guard_with(
            vec![Arc::new(MaxLengthPredicate::new(10))],
            GuardConfig::default(),
        );

        assert!(!guard.check("short", Direction::Input).await.blocked);
        assert!(
            guard
                .check("this is a very long input indeed", Direction::Input)
                .await
                .blocked
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }
}
