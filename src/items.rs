//! Items representing requests, responses, and turn events
//!
//! This module defines the core data structures that flow through a turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::category::Category;
use crate::guard::{Direction, Severity};
use crate::session::SessionId;

/// An immutable input unit, created once per turn and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub session_id: SessionId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl Request {
    pub fn new(session_id: SessionId, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// The output unit produced by a handler for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    /// Id of the handler that emitted this response
    pub handler_id: String,
    pub content: String,
    /// Category-specific structured fields, if the handler produced any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Response {
    pub fn new(handler_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            handler_id: handler_id.into(),
            content: content.into(),
            structured: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_structured(mut self, structured: Value) -> Self {
        self.structured = Some(structured);
        self
    }
}

/// One accepted turn: the request, the response, and the handler that
/// produced it. Only accepted turns are recorded; blocked attempts exist
/// solely in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub request: Request,
    pub response: Response,
    pub handler_id: String,
}

/// A typed event emitted while a turn moves through the state machine.
///
/// Events are collected in order on the turn outcome and can also be
/// consumed as a stream while the turn is running. The enum is closed: a
/// consumer matching on it sees every state transition the engine makes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    Received {
        request_id: String,
    },
    GuardChecked {
        direction: Direction,
        blocked: bool,
        severity: Severity,
        reason: Option<String>,
    },
    ClassificationDone {
        category: Category,
        confidence: f64,
        rationale: String,
    },
    HandlerInvoked {
        handler_id: String,
        /// 1 for the first dispatch, incremented per escalation
        attempt: usize,
    },
    Escalated {
        from_handler: String,
        to_handler: String,
        reason: String,
    },
    Accepted {
        handler_id: String,
    },
    Blocked {
        reason: String,
        severity: Severity,
    },
}
