//! # Dispatcher (orientation)
//!
//! The `Dispatcher` coordinates one turn: it screens the request through the
//! input guard, classifies it, invokes the routed handler under a deadline,
//! screens the handler's output, and either accepts the turn into the
//! session or escalates to a fallback handler. Guard verdicts, handler
//! refusals, timeouts, and classifier failures all resolve to a terminal
//! accepted or blocked outcome — a turn never surfaces an internal fault.
//!
//! A turn moves through a fixed set of states:
//!
//! ```text
//! RECEIVED → INPUT_CHECKED → CLASSIFIED → HANDLING → OUTPUT_CHECKED
//!                 │                            ▲            │
//!                 ▼                            └── ESCALATED┤
//!              BLOCKED                                      ▼
//!                                              {ACCEPTED, BLOCKED}
//! ```
//!
//! The session is mutated in exactly one place, the final accept step, so a
//! caller that drops an in-flight turn future cancels it cleanly: either the
//! full turn is appended to history or nothing is. Blocked turns never touch
//! history at all; the attempt is visible only in the audit trail.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::audit::{AuditSink, TracingAuditSink};
use crate::category::{Category, RoutingTable};
use crate::classifier::{Classification, Classifier, KeywordClassifier, CLASSIFIER_UNAVAILABLE};
use crate::config::TriageConfig;
use crate::error::{Result, TriageError};
use crate::escalator::{EscalationPolicy, Escalator, FallbackDecision};
use crate::guard::{Direction, Guard, GuardPredicate, Severity};
use crate::handler::{Handler, HandlerRegistry};
use crate::items::{Request, Response, TurnEvent};
use crate::session::{SessionId, SessionState, SessionStore};
use crate::stats::{DispatchStats, StatsSnapshot};

/// Terminal state of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Accepted,
    Blocked,
}

/// Everything a caller learns about one completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// The accepted response, or a caller-facing template on a blocked turn
    /// that exhausted escalation. Never part of session history when the
    /// turn is blocked.
    pub response: Option<Response>,
    /// Why the turn was blocked
    pub reason: Option<String>,
    pub severity: Option<Severity>,
    /// The category the turn was classified as, if it got that far
    pub category: Option<Category>,
    /// How many times the turn was rerouted
    pub escalation_count: usize,
    /// Ordered state-machine events for this turn
    pub events: Vec<TurnEvent>,
}

impl TurnOutcome {
    pub fn is_accepted(&self) -> bool {
        self.status == TurnStatus::Accepted
    }

    pub fn is_blocked(&self) -> bool {
        self.status == TurnStatus::Blocked
    }
}

/// Collects turn events in order and optionally forwards each one to a
/// live subscriber.
struct EventLog {
    events: Vec<TurnEvent>,
    tx: Option<UnboundedSender<TurnEvent>>,
}

impl EventLog {
    fn new(tx: Option<UnboundedSender<TurnEvent>>) -> Self {
        Self {
            events: Vec::new(),
            tx,
        }
    }

    fn push(&mut self, event: TurnEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event.clone());
        }
        self.events.push(event);
    }

    fn into_vec(self) -> Vec<TurnEvent> {
        self.events
    }
}

/// An in-flight turn whose events can be consumed as they happen.
pub struct StreamingTurn {
    events: UnboundedReceiverStream<TurnEvent>,
    handle: JoinHandle<TurnOutcome>,
}

impl StreamingTurn {
    /// Next event, or `None` once the turn has finished emitting.
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.next().await
    }

    /// Waits for the turn to finish and returns its outcome.
    pub async fn finish(self) -> TurnOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "streaming turn task did not complete");
                TurnOutcome {
                    status: TurnStatus::Blocked,
                    response: None,
                    reason: Some("turn_aborted".to_string()),
                    severity: Some(Severity::High),
                    category: None,
                    escalation_count: 0,
                    events: Vec::new(),
                }
            }
        }
    }

    /// Splits into the raw event stream and the outcome handle.
    pub fn into_parts(self) -> (UnboundedReceiverStream<TurnEvent>, JoinHandle<TurnOutcome>) {
        (self.events, self.handle)
    }
}

/// The turn orchestrator. Build one with [`Dispatcher::builder`], share it
/// freely: all configuration is immutable after construction and sessions
/// are serialized individually, so any number of turns across distinct
/// sessions may run concurrently.
#[derive(Clone)]
pub struct Dispatcher {
    classifier: Arc<dyn Classifier>,
    guard: Arc<Guard>,
    registry: Arc<HandlerRegistry>,
    routing: Arc<RoutingTable>,
    escalator: Arc<Escalator>,
    sessions: SessionStore,
    audit: Arc<dyn AuditSink>,
    stats: Arc<DispatchStats>,
    config: TriageConfig,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Runs one turn for `session_id`, creating the session on first use.
    ///
    /// Turns of the same session are serialized; this call waits if another
    /// turn of the session is in flight.
    pub async fn dispatch(&self, session_id: &SessionId, text: impl Into<String>) -> TurnOutcome {
        let request = Request::new(session_id.clone(), text);
        let handle = self.sessions.open(session_id);
        let mut session = handle.lock().await;
        self.run_turn(&mut session, request, None).await
    }

    /// Like [`dispatch`](Self::dispatch), but emits [`TurnEvent`]s as the
    /// turn progresses.
    pub fn dispatch_stream(
        &self,
        session_id: &SessionId,
        text: impl Into<String>,
    ) -> StreamingTurn {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = self.clone();
        let session_id = session_id.clone();
        let text = text.into();

        let handle = tokio::spawn(async move {
            let request = Request::new(session_id.clone(), text);
            let session_handle = dispatcher.sessions.open(&session_id);
            let mut session = session_handle.lock().await;
            dispatcher.run_turn(&mut session, request, Some(tx)).await
        });

        StreamingTurn {
            events: UnboundedReceiverStream::new(rx),
            handle,
        }
    }

    async fn run_turn(
        &self,
        session: &mut SessionState,
        request: Request,
        tx: Option<UnboundedSender<TurnEvent>>,
    ) -> TurnOutcome {
        let mut events = EventLog::new(tx);

        info!(
            session = %request.session_id,
            request = %request.id,
            "turn received"
        );
        self.audit.record(
            "turn_received",
            json!({
                "session": request.session_id,
                "request": request.id,
                "received_at": request.received_at,
            }),
        );
        events.push(TurnEvent::Received {
            request_id: request.id.clone(),
        });

        // RECEIVED → INPUT_CHECKED
        let verdict = self.guard.check(&request.text, Direction::Input).await;
        events.push(TurnEvent::GuardChecked {
            direction: Direction::Input,
            blocked: verdict.blocked,
            severity: verdict.severity,
            reason: verdict.reason.clone(),
        });
        if verdict.blocked {
            let reason = verdict.reason.unwrap_or_else(|| "input_blocked".to_string());
            return self.conclude_blocked(events, &request, reason, verdict.severity, None, 0, None);
        }

        // INPUT_CHECKED → CLASSIFIED
        let snapshot = session.snapshot(self.config.history_window);
        let classification = match self.classifier.classify(&request, &snapshot).await {
            Ok(c) if c.confidence >= self.config.confidence_threshold => c,
            Ok(c) => {
                debug!(
                    category = %c.category,
                    confidence = c.confidence,
                    threshold = self.config.confidence_threshold,
                    "classification below threshold, defaulting to general"
                );
                Classification::new(Category::General, c.confidence, c.rationale)
            }
            Err(e) => {
                warn!(error = %e, "classifier unavailable, defaulting to general");
                Classification::new(Category::General, 0.0, CLASSIFIER_UNAVAILABLE)
            }
        };
        events.push(TurnEvent::ClassificationDone {
            category: classification.category,
            confidence: classification.confidence,
            rationale: classification.rationale.clone(),
        });
        self.audit.record(
            "classification",
            json!({
                "request": request.id,
                "category": classification.category,
                "confidence": classification.confidence,
                "rationale": classification.rationale,
            }),
        );

        // CLASSIFIED → HANDLING, then around the escalation loop as needed
        let category = classification.category;
        let mut handler_id = self.routing.handler_for(category).to_string();
        let mut escalation_count = 0usize;

        loop {
            let resolved = match self.registry.get(&handler_id) {
                Some(handler) => Some(handler),
                None => {
                    let fallback = self.routing.fallback().to_string();
                    warn!(
                        handler = %handler_id,
                        fallback = %fallback,
                        "routed handler not registered, using fallback"
                    );
                    let handler = self.registry.get(&fallback);
                    handler_id = fallback;
                    handler
                }
            };
            let handler = match resolved {
                Some(handler) => handler,
                None => {
                    return self.conclude_blocked(
                        events,
                        &request,
                        "handler_unavailable".to_string(),
                        Severity::High,
                        Some(category),
                        escalation_count,
                        None,
                    );
                }
            };

            events.push(TurnEvent::HandlerInvoked {
                handler_id: handler_id.clone(),
                attempt: escalation_count + 1,
            });
            self.audit.record(
                "handler_invoked",
                json!({
                    "request": request.id,
                    "handler": handler_id,
                    "escalation_count": escalation_count,
                }),
            );

            // HANDLING (bounded by the handler deadline)
            let deadline = self.config.handler_deadline;
            let (reply, failure) = match timeout(deadline, handler.process(&request, &snapshot))
                .await
            {
                Ok(Ok(reply)) => (Some(reply), ""),
                Ok(Err(e)) => {
                    warn!(handler = %handler_id, error = %e, "handler failed");
                    self.audit.record(
                        "handler_failed",
                        json!({"request": request.id, "handler": handler_id, "error": e.to_string()}),
                    );
                    (None, "handler_failed")
                }
                Err(_) => {
                    let e = TriageError::HandlerTimeout {
                        handler_id: handler_id.clone(),
                        deadline_ms: deadline.as_millis() as u64,
                    };
                    warn!(handler = %handler_id, "{}", e);
                    self.stats.record_timeout();
                    self.audit.record(
                        "handler_timeout",
                        json!({"request": request.id, "handler": handler_id, "deadline_ms": deadline.as_millis() as u64}),
                    );
                    (None, "handler_timeout")
                }
            };

            let escalation_reason = match reply {
                Some(reply) => {
                    // HANDLING → OUTPUT_CHECKED
                    let verdict = self.guard.check(&reply.content, Direction::Output).await;
                    events.push(TurnEvent::GuardChecked {
                        direction: Direction::Output,
                        blocked: verdict.blocked,
                        severity: verdict.severity,
                        reason: verdict.reason.clone(),
                    });
                    if verdict.blocked {
                        // A blocked payload is never rerouted, even if the
                        // handler also signaled refusal.
                        let reason =
                            verdict.reason.unwrap_or_else(|| "output_blocked".to_string());
                        return self.conclude_blocked(
                            events,
                            &request,
                            reason,
                            verdict.severity,
                            Some(category),
                            escalation_count,
                            None,
                        );
                    }

                    if !reply.refusal {
                        // OUTPUT_CHECKED → ACCEPTED
                        let mut response = Response::new(handler_id.clone(), reply.content);
                        if let Some(structured) = reply.structured {
                            response = response.with_structured(structured);
                        }
                        events.push(TurnEvent::Accepted {
                            handler_id: handler_id.clone(),
                        });
                        session.append_turn(request.clone(), response.clone(), handler_id.clone());
                        self.stats.record_accepted();
                        self.audit.record(
                            "turn_accepted",
                            json!({
                                "session": request.session_id,
                                "request": request.id,
                                "handler": handler_id,
                                "category": category,
                                "escalation_count": escalation_count,
                            }),
                        );
                        info!(
                            session = %request.session_id,
                            handler = %handler_id,
                            escalations = escalation_count,
                            "turn accepted"
                        );
                        return TurnOutcome {
                            status: TurnStatus::Accepted,
                            response: Some(response),
                            reason: None,
                            severity: None,
                            category: Some(category),
                            escalation_count,
                            events: events.into_vec(),
                        };
                    }

                    self.audit.record(
                        "handler_refused",
                        json!({"request": request.id, "handler": handler_id}),
                    );
                    "handler_refused"
                }
                None => failure,
            };

            // OUTPUT_CHECKED → ESCALATED → HANDLING, bounded by the cap
            escalation_count += 1;
            self.stats.record_escalation();
            match self
                .escalator
                .select_fallback(category, escalation_count, &snapshot)
            {
                FallbackDecision::Reroute { handler_id: next } => {
                    info!(
                        from = %handler_id,
                        to = %next,
                        reason = escalation_reason,
                        "escalating turn"
                    );
                    events.push(TurnEvent::Escalated {
                        from_handler: handler_id.clone(),
                        to_handler: next.clone(),
                        reason: escalation_reason.to_string(),
                    });
                    self.audit.record(
                        "escalated",
                        json!({
                            "request": request.id,
                            "from": handler_id,
                            "to": next,
                            "reason": escalation_reason,
                            "escalation_count": escalation_count,
                        }),
                    );
                    handler_id = next;
                }
                FallbackDecision::Exhausted => {
                    let template = Response::new(
                        self.routing.fallback(),
                        self.escalator.exhausted_message(),
                    );
                    return self.conclude_blocked(
                        events,
                        &request,
                        "escalation_limit_exceeded".to_string(),
                        Severity::High,
                        Some(category),
                        escalation_count,
                        Some(template),
                    );
                }
            }
        }
    }

    /// Terminal BLOCKED transition. Never mutates the session; the attempt
    /// survives only in the audit trail.
    #[allow(clippy::too_many_arguments)]
    fn conclude_blocked(
        &self,
        mut events: EventLog,
        request: &Request,
        reason: String,
        severity: Severity,
        category: Option<Category>,
        escalation_count: usize,
        response: Option<Response>,
    ) -> TurnOutcome {
        events.push(TurnEvent::Blocked {
            reason: reason.clone(),
            severity,
        });
        self.stats.record_blocked();
        self.audit.record(
            "turn_blocked",
            json!({
                "session": request.session_id,
                "request": request.id,
                "reason": reason,
                "severity": severity,
                "category": category,
                "escalation_count": escalation_count,
            }),
        );
        info!(
            session = %request.session_id,
            reason = %reason,
            severity = %severity,
            "turn blocked"
        );
        TurnOutcome {
            status: TurnStatus::Blocked,
            response,
            reason: Some(reason),
            severity: Some(severity),
            category,
            escalation_count,
            events: events.into_vec(),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.registry.ids())
            .field("fallback", &self.routing.fallback())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// Builder for [`Dispatcher`].
///
/// A routing table is required, and the routing fallback plus every
/// escalation fallback must resolve to registered handlers — that is what
/// lets the dispatcher promise a destination for every turn.
pub struct DispatcherBuilder {
    config: TriageConfig,
    classifier: Option<Arc<dyn Classifier>>,
    predicates: Vec<Arc<dyn GuardPredicate>>,
    registry: HandlerRegistry,
    routing: Option<RoutingTable>,
    escalation: Option<EscalationPolicy>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: TriageConfig::default(),
            classifier: None,
            predicates: Vec::new(),
            registry: HandlerRegistry::new(),
            routing: None,
            escalation: None,
            audit: None,
        }
    }

    pub fn config(mut self, config: TriageConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the classifier; defaults to [`KeywordClassifier::with_defaults`].
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Adds a guard predicate, applied to both directions.
    pub fn predicate(mut self, predicate: Arc<dyn GuardPredicate>) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Registers a handler under its id.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.registry = self.registry.register(handler);
        self
    }

    pub fn routing(mut self, routing: RoutingTable) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Sets the escalation policy; defaults to the routing fallback with the
    /// configured escalation cap.
    pub fn escalation(mut self, policy: EscalationPolicy) -> Self {
        self.escalation = Some(policy);
        self
    }

    /// Sets the audit sink; defaults to [`TracingAuditSink`].
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        let routing = self
            .routing
            .ok_or_else(|| TriageError::Other("a routing table is required".to_string()))?;

        if !self.registry.contains(routing.fallback()) {
            return Err(TriageError::UnknownHandler {
                handler_id: routing.fallback().to_string(),
            });
        }

        let escalation = self.escalation.unwrap_or_else(|| {
            EscalationPolicy::new(routing.fallback())
                .with_max_escalations(self.config.max_escalations)
        });
        if !self.registry.contains(&escalation.default_fallback) {
            return Err(TriageError::UnknownHandler {
                handler_id: escalation.default_fallback.clone(),
            });
        }
        for handler_id in escalation.fallbacks.values() {
            if !self.registry.contains(handler_id) {
                return Err(TriageError::UnknownHandler {
                    handler_id: handler_id.clone(),
                });
            }
        }

        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(TracingAuditSink) as Arc<dyn AuditSink>);

        let mut guard = Guard::new(self.config.guard, audit.clone());
        for predicate in self.predicates {
            guard = guard.predicate(predicate);
        }

        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(KeywordClassifier::with_defaults()) as Arc<dyn Classifier>);

        Ok(Dispatcher {
            classifier,
            guard: Arc::new(guard),
            registry: Arc::new(self.registry),
            routing: Arc::new(routing),
            escalator: Arc::new(Escalator::new(escalation)),
            sessions: SessionStore::new(self.config.session_idle_timeout),
            audit,
            stats: Arc::new(DispatchStats::new()),
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::handler::BackendHandler;

    fn handler(id: &str, backend: ScriptedBackend) -> Arc<dyn Handler> {
        Arc::new(BackendHandler::new(id, "test instructions", Arc::new(backend)))
    }

    #[test]
    fn test_build_requires_routing() {
        let result = Dispatcher::builder()
            .handler(handler("general", ScriptedBackend::new()))
            .build();
        assert!(matches!(result, Err(TriageError::Other(_))));
    }

    #[test]
    fn test_build_requires_registered_fallback() {
        let result = Dispatcher::builder()
            .handler(handler("general", ScriptedBackend::new()))
            .routing(RoutingTable::new("missing"))
            .build();
        assert!(matches!(
            result,
            Err(TriageError::UnknownHandler { handler_id }) if handler_id == "missing"
        ));
    }

    #[test]
    fn test_build_requires_registered_escalation_targets() {
        let result = Dispatcher::builder()
            .handler(handler("general", ScriptedBackend::new()))
            .routing(RoutingTable::new("general"))
            .escalation(
                EscalationPolicy::new("general")
                    .fallback_for(Category::Billing, "billing_senior"),
            )
            .build();
        assert!(matches!(
            result,
            Err(TriageError::UnknownHandler { handler_id }) if handler_id == "billing_senior"
        ));
    }

    #[tokio::test]
    async fn test_minimal_dispatch_accepts() {
        let dispatcher = Dispatcher::builder()
            .handler(handler(
                "general",
                ScriptedBackend::new().with_message("hello there"),
            ))
            .routing(RoutingTable::new("general"))
            .build()
            .unwrap();

        let outcome = dispatcher
            .dispatch(&SessionId::from("s-1"), "good morning")
            .await;

        assert!(outcome.is_accepted());
        assert_eq!(outcome.response.unwrap().content, "hello there");
        assert_eq!(outcome.escalation_count, 0);
        assert_eq!(dispatcher.stats().accepted, 1);
    }

    #[tokio::test]
    async fn test_events_are_ordered() {
        let dispatcher = Dispatcher::builder()
            .handler(handler("general", ScriptedBackend::new().with_message("ok")))
            .routing(RoutingTable::new("general"))
            .build()
            .unwrap();

        let outcome = dispatcher.dispatch(&SessionId::from("s-2"), "hi").await;

        let kinds: Vec<&str> = outcome
            .events
            .iter()
            .map(|e| match e {
                TurnEvent::Received { .. } => "received",
                TurnEvent::GuardChecked { .. } => "guard_checked",
                TurnEvent::ClassificationDone { .. } => "classification_done",
                TurnEvent::HandlerInvoked { .. } => "handler_invoked",
                TurnEvent::Escalated { .. } => "escalated",
                TurnEvent::Accepted { .. } => "accepted",
                TurnEvent::Blocked { .. } => "blocked",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "received",
                "guard_checked",
                "classification_done",
                "handler_invoked",
                "guard_checked",
                "accepted"
            ]
        );
    }

    #[tokio::test]
    async fn test_dispatch_stream_forwards_events() {
        let dispatcher = Dispatcher::builder()
            .handler(handler("general", ScriptedBackend::new().with_message("ok")))
            .routing(RoutingTable::new("general"))
            .build()
            .unwrap();

        let mut streaming = dispatcher.dispatch_stream(&SessionId::from("s-3"), "hi");

        let mut streamed = Vec::new();
        while let Some(event) = streaming.next_event().await {
            streamed.push(event);
        }
        assert!(matches!(streamed.first(), Some(TurnEvent::Received { .. })));
        assert!(matches!(streamed.last(), Some(TurnEvent::Accepted { .. })));
    }
}
