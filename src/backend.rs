//! Inference backend boundary
//!
//! The engine never talks to a model provider directly. Handlers that need
//! generation go through [`InferenceBackend`], a narrow interface that
//! returns either usable content or an explicit refusal flag — no
//! provider-specific request or response schema crosses this boundary.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::items::TurnRecord;

/// Context assembled for one backend invocation.
#[derive(Debug, Clone)]
pub struct PromptContext {
    /// The invoking handler's standing instructions
    pub instructions: String,
    /// The request text for this turn
    pub request_text: String,
    /// Bounded recent history, oldest first
    pub history: Vec<TurnRecord>,
    /// User-scoped preferences
    pub preferences: HashMap<String, String>,
}

impl PromptContext {
    /// Renders the context as one prompt string: instructions, then recent
    /// turns, then the current request.
    pub fn render(&self) -> String {
        let mut out = self.instructions.clone();

        if !self.history.is_empty() {
            out.push_str("\n\nRecent conversation:\n");
            for turn in &self.history {
                out.push_str(&format!("- user: {}\n", turn.request.text));
                out.push_str(&format!(
                    "- {}: {}\n",
                    turn.handler_id, turn.response.content
                ));
            }
        }

        if !self.preferences.is_empty() {
            out.push_str("\nUser preferences:\n");
            let mut keys: Vec<_> = self.preferences.keys().collect();
            keys.sort();
            for key in keys {
                out.push_str(&format!("- {}: {}\n", key, self.preferences[key]));
            }
        }

        out.push_str(&format!("\nRequest: {}", self.request_text));
        out
    }
}

/// Result of one backend invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub content: String,
    /// The backend explicitly declined to complete the request
    pub refusal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
}

impl Invocation {
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

/// Narrow interface to the excluded inference provider.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn invoke(&self, handler_id: &str, context: &PromptContext) -> Result<Invocation>;
}

/// Backend that replays a queue of scripted invocations.
///
/// Useful for tests and demos; once the queue is drained it returns a fixed
/// default reply.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Invocation>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, invocation: Invocation) -> Self {
        self.replies
            .lock()
            .expect("scripted reply queue lock")
            .push_back(invocation);
        self
    }

    pub fn with_message(self, content: impl Into<String>) -> Self {
        self.with_reply(Invocation::message(content))
    }

    pub fn with_refusal(self) -> Self {
        self.with_reply(Invocation::refused())
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("scripted reply queue lock").len()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn invoke(&self, _handler_id: &str, _context: &PromptContext) -> Result<Invocation> {
        let mut replies = self.replies.lock().expect("scripted reply queue lock");
        Ok(replies
            .pop_front()
            .unwrap_or_else(|| Invocation::message("How can I help?")))
    }
}
