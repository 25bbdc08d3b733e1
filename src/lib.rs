//! # triagekit
//!
//! A triage and handoff orchestration engine for multi-agent conversational
//! systems. Each incoming request is screened by an input guard, classified
//! into a closed category set, dispatched to the routed specialist handler,
//! screened again on output, and either accepted into the session history or
//! escalated to a fallback handler — with every transition reported to an
//! audit sink.
//!
//! ## Core Concepts
//!
//! - **Dispatcher**: the per-turn state machine; every turn terminates as
//!   accepted or blocked, never as a propagated fault
//! - **Guard**: independent validation predicates combined into one verdict,
//!   with explicit fail-open/fail-closed behavior per direction
//! - **Classifier**: assigns exactly one category, defaulting to general on
//!   low confidence or classifier failure
//! - **Handlers**: stateless specialists resolved through a static routing
//!   table, backed by a narrow inference interface
//! - **Escalator**: deterministic, capped rerouting when a specialist
//!   refuses, fails, or times out
//! - **Sessions**: exclusively owned conversation state; turns of one
//!   session are serialized, distinct sessions run concurrently
//!
//! ## Getting Started
//!
//! ```rust
//! use std::sync::Arc;
//! use triagekit::{
//!     BackendHandler, Category, Dispatcher, RoutingTable, ScriptedBackend, SessionId,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(ScriptedBackend::new().with_message("Refunds take 3-5 days."));
//!
//! let dispatcher = Dispatcher::builder()
//!     .handler(Arc::new(BackendHandler::new(
//!         "billing_desk",
//!         "You resolve billing questions.",
//!         backend.clone(),
//!     )))
//!     .handler(Arc::new(BackendHandler::new(
//!         "concierge",
//!         "You handle everything else.",
//!         backend,
//!     )))
//!     .routing(
//!         RoutingTable::new("concierge").route(Category::Billing, "billing_desk"),
//!     )
//!     .build()?;
//!
//! let outcome = dispatcher
//!     .dispatch(&SessionId::from("conv-1"), "where is my refund?")
//!     .await;
//!
//! assert!(outcome.is_accepted());
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod backend;
pub mod category;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod escalator;
pub mod guard;
pub mod handler;
pub mod items;
pub mod session;
pub mod stats;

// Public re-exports for convenience
pub use audit::{AuditRecord, AuditSink, MemoryAuditSink, NullAuditSink, TracingAuditSink};
pub use backend::{InferenceBackend, Invocation, PromptContext, ScriptedBackend};
pub use category::{Category, RoutingTable};
pub use classifier::{Classification, Classifier, KeywordClassifier};
pub use config::{ConfigBuilder, TriageConfig};
pub use dispatcher::{Dispatcher, DispatcherBuilder, StreamingTurn, TurnOutcome, TurnStatus};
pub use error::{Result, TriageError};
pub use escalator::{EscalationPolicy, Escalator, FallbackDecision};
pub use guard::{
    Direction, DigitRunPredicate, FailureBias, Guard, GuardConfig, GuardPredicate, GuardVerdict,
    MaxLengthPredicate, PatternPredicate, PredicateFinding, Severity,
};
pub use handler::{BackendHandler, Handler, HandlerRegistry, HandlerReply};
pub use items::{Request, Response, TurnEvent, TurnRecord};
pub use session::{SessionId, SessionSnapshot, SessionState, SessionStore};
pub use stats::{DispatchStats, StatsSnapshot};
