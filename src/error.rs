//! Error types for the triage engine

use thiserror::Error;

/// Result type alias for the triage engine
pub type Result<T> = std::result::Result<T, TriageError>;

/// Main error type for the triage engine
///
/// None of these variants escapes a dispatched turn: the dispatcher recovers
/// every one of them into a terminal accepted or blocked outcome. The type is
/// the shared vocabulary of those recovery paths and of `Handler`,
/// `Classifier`, and `InferenceBackend` implementations.
#[derive(Debug, Error)]
pub enum TriageError {
    /// The classification backend could not produce a category
    #[error("classification backend unavailable: {message}")]
    ClassificationUnavailable { message: String },

    /// A guard predicate evaluator itself failed (not a policy violation)
    #[error("guard predicate '{predicate}' failed to evaluate: {message}")]
    GuardEvaluationFailed { predicate: String, message: String },

    /// A handler explicitly declined to complete the request
    #[error("handler '{handler_id}' refused: {reason}")]
    HandlerRefusal { handler_id: String, reason: String },

    /// A handler invocation exceeded its deadline
    #[error("handler '{handler_id}' timed out after {deadline_ms}ms")]
    HandlerTimeout { handler_id: String, deadline_ms: u64 },

    /// The escalation chain for a single turn exceeded the configured cap
    #[error("escalation limit exceeded: {limit}")]
    EscalationLimitExceeded { limit: usize },

    /// A handler id resolved through routing is not registered
    #[error("unknown handler: {handler_id}")]
    UnknownHandler { handler_id: String },

    /// Backend error from an inference call
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Session error
    #[error("session error: {0}")]
    SessionError(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
