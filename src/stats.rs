//! Turn accounting shared across sessions
//!
//! One [`DispatchStats`] instance is shared by every concurrent session of a
//! dispatcher, so the counters use atomic updates rather than exclusive
//! ownership. [`snapshot`](DispatchStats::snapshot) takes a consistent-enough
//! point-in-time copy for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide turn counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    accepted: AtomicU64,
    blocked: AtomicU64,
    escalations: AtomicU64,
    timeouts: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_escalation(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub blocked: u64,
    pub escalations: u64,
    pub timeouts: u64,
}

impl StatsSnapshot {
    /// Terminal turns seen so far.
    pub fn total_turns(&self) -> u64 {
        self.accepted + self.blocked
    }
}
