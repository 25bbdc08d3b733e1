//! # Handlers (orientation)
//!
//! A `Handler` is a configured specialist: it receives a screened request
//! together with a session snapshot and produces a [`HandlerReply`].
//! Handlers are stateless across requests — anything a specialist needs to
//! remember travels through the session — and are identified by a stable id
//! that the routing table and escalation policy refer to.
//!
//! [`BackendHandler`] is the standard implementation: an id, standing
//! instructions, and an [`InferenceBackend`] to delegate generation to. The
//! read-only [`HandlerRegistry`] maps ids to handlers and is built once at
//! startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{InferenceBackend, Invocation, PromptContext};
use crate::error::Result;
use crate::items::Request;
use crate::session::SessionSnapshot;

/// What a handler produced for one turn.
///
/// `refusal` is the explicit inability-to-complete marker: a refusing
/// handler is not an error, it is a signal for the dispatcher to escalate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerReply {
    pub content: String,
    pub refusal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
}

impl HandlerReply {
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            refusal: false,
            structured: None,
        }
    }

    pub fn refused() -> Self {
        Self {
            content: String::new(),
            refusal: true,
            structured: None,
        }
    }

    pub fn with_structured(mut self, structured: Value) -> Self {
        self.structured = Some(structured);
        self
    }
}

impl From<Invocation> for HandlerReply {
    fn from(invocation: Invocation) -> Self {
        Self {
            content: invocation.content,
            refusal: invocation.refusal,
            structured: invocation.structured,
        }
    }
}

/// A specialist that can process requests for one or more categories.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stable id referenced by routing and escalation configuration.
    fn id(&self) -> &str;

    /// Short capability description, used in logs and audit payloads.
    fn description(&self) -> &str {
        ""
    }

    async fn process(&self, request: &Request, session: &SessionSnapshot)
        -> Result<HandlerReply>;
}

/// Handler that assembles a bounded prompt context and delegates to an
/// [`InferenceBackend`].
pub struct BackendHandler {
    id: String,
    description: String,
    instructions: String,
    backend: Arc<dyn InferenceBackend>,
    context_window: usize,
}

impl BackendHandler {
    pub fn new(
        id: impl Into<String>,
        instructions: impl Into<String>,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            instructions: instructions.into(),
            backend,
            context_window: 10,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Caps how many recent turns are included in the prompt context.
    pub fn with_context_window(mut self, turns: usize) -> Self {
        self.context_window = turns;
        self
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

#[async_trait]
impl Handler for BackendHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn process(
        &self,
        request: &Request,
        session: &SessionSnapshot,
    ) -> Result<HandlerReply> {
        let start = session.recent.len().saturating_sub(self.context_window);
        let context = PromptContext {
            instructions: self.instructions.clone(),
            request_text: request.text.clone(),
            history: session.recent[start..].to_vec(),
            preferences: session.preferences.clone(),
        };
        let invocation = self.backend.invoke(&self.id, &context).await?;
        Ok(invocation.into())
    }
}

impl std::fmt::Debug for BackendHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandler")
            .field("id", &self.id)
            .field("context_window", &self.context_window)
            .finish()
    }
}

/// Read-only id → handler table, built once at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its own id. A later registration with the
    /// same id replaces the earlier one.
    pub fn register(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(handler.id().to_string(), handler);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered ids, sorted for stable iteration.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::session::{SessionId, SessionState};
    use crate::items::Response;

    fn snapshot_with_turns(n: usize) -> SessionSnapshot {
        let mut state = SessionState::new(SessionId::from("s"));
        for i in 0..n {
            let req = Request::new(SessionId::from("s"), format!("q{}", i));
            let resp = Response::new("general", format!("a{}", i));
            state.append_turn(req, resp, "general");
        }
        state.snapshot(usize::MAX)
    }

    #[tokio::test]
    async fn test_backend_handler_delegates_and_converts() {
        let backend = Arc::new(ScriptedBackend::new().with_message("42"));
        let handler = BackendHandler::new("math_desk", "You answer math questions.", backend);

        let request = Request::new(SessionId::from("s"), "what is 6 * 7?");
        let reply = handler
            .process(&request, &snapshot_with_turns(0))
            .await
            .unwrap();

        assert_eq!(reply.content, "42");
        assert!(!reply.refusal);
        assert_eq!(handler.id(), "math_desk");
    }

    #[tokio::test]
    async fn test_backend_handler_surfaces_refusal() {
        let backend = Arc::new(ScriptedBackend::new().with_refusal());
        let handler = BackendHandler::new("strict_desk", "Decline everything.", backend);

        let request = Request::new(SessionId::from("s"), "help");
        let reply = handler
            .process(&request, &snapshot_with_turns(0))
            .await
            .unwrap();
        assert!(reply.refusal);
    }

    #[tokio::test]
    async fn test_context_window_bounds_history() {
        struct CapturingBackend {
            seen: std::sync::Mutex<usize>,
        }

        #[async_trait]
        impl InferenceBackend for CapturingBackend {
            async fn invoke(&self, _: &str, context: &PromptContext) -> Result<Invocation> {
                *self.seen.lock().unwrap() = context.history.len();
                Ok(Invocation::message("ok"))
            }
        }

        let backend = Arc::new(CapturingBackend {
            seen: std::sync::Mutex::new(0),
        });
        let handler = BackendHandler::new("desk", "inst", backend.clone()).with_context_window(2);

        let request = Request::new(SessionId::from("s"), "next");
        handler
            .process(&request, &snapshot_with_turns(5))
            .await
            .unwrap();

        assert_eq!(*backend.seen.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_registry_lookup_and_replacement() {
        let backend = Arc::new(ScriptedBackend::new());
        let registry = HandlerRegistry::new()
            .register(Arc::new(BackendHandler::new("a", "first", backend.clone())))
            .register(Arc::new(BackendHandler::new("b", "second", backend.clone())))
            .register(Arc::new(BackendHandler::new("a", "replaced", backend)));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_handler_reply_constructors() {
        let reply = HandlerReply::message("done").with_structured(serde_json::json!({"id": 1}));
        assert!(!reply.refusal);
        assert!(reply.structured.is_some());

        assert!(HandlerReply::refused().refusal);
    }
}
