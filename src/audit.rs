//! # Audit Trail for Turn Execution
//!
//! Every state transition, guard verdict, classification, escalation, and
//! terminal outcome is reported to an [`AuditSink`]. The sink is the engine's
//! only observability boundary: recording is synchronous fire-and-forget and
//! must never block or fail the turn that emitted it.
//!
//! Three sinks are provided:
//!
//! - [`TracingAuditSink`] emits structured events through the `tracing`
//!   crate, for wiring into whatever subscriber the host process runs.
//! - [`MemoryAuditSink`] buffers [`AuditRecord`]s in memory for inspection,
//!   which is how tests assert on the trail.
//! - [`NullAuditSink`] drops everything.
//!
//! ### Example: Inspecting the Trail
//!
//! ```rust
//! use triagekit::audit::{AuditSink, MemoryAuditSink};
//!
//! let sink = MemoryAuditSink::new();
//! sink.record("turn_received", serde_json::json!({"request": "r-1"}));
//!
//! let records = sink.records();
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].kind, "turn_received");
//! ```

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Generates a new, unique audit record id using UUIDv4.
pub fn gen_audit_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single audit entry: what happened, with a structured payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub kind: String,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: gen_audit_id(),
            kind: kind.into(),
            payload,
            recorded_at: Utc::now(),
        }
    }
}

/// Destination for audit records.
///
/// `record` is fire-and-forget: implementations must return promptly and
/// swallow their own failures. A slow or broken sink must not be able to
/// stall or fail a turn.
pub trait AuditSink: Send + Sync {
    fn record(&self, kind: &str, payload: Value);
}

/// Sink that forwards every record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, kind: &str, payload: Value) {
        info!(target: "triagekit::audit", kind = %kind, payload = %payload, "audit");
    }
}

/// Sink that buffers records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records so far, in emission order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Records filtered to one kind.
    pub fn records_of_kind(&self, kind: &str) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, kind: &str, payload: Value) {
        // A poisoned buffer means some reader panicked; drop the record
        // rather than propagate.
        if let Ok(mut guard) = self.records.lock() {
            guard.push(AuditRecord::new(kind, payload));
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _kind: &str, _payload: Value) {}
}
