//! # Sessions (orientation)
//!
//! A session is one conversation: its ordered turn history, the handler
//! currently serving it, a turn counter, and user-scoped preferences. Each
//! [`SessionState`] is exclusively owned by its conversation — the
//! [`SessionStore`] wraps every state in an async mutex so that no two turns
//! of the same session can ever be in flight at once, while distinct
//! sessions proceed fully in parallel.
//!
//! History has exactly one append path, [`SessionState::append_turn`], and
//! turns are never removed or reordered. Components that need conversation
//! context during a turn receive an immutable [`SessionSnapshot`] instead of
//! the state itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::items::{Request, Response, TurnRecord};

/// Conversation identifier newtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Mutable per-conversation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    id: SessionId,
    history: Vec<TurnRecord>,
    active_handler: Option<String>,
    turn_counter: u64,
    preferences: HashMap<String, String>,
    last_activity: DateTime<Utc>,
}

impl SessionState {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            history: Vec::new(),
            active_handler: None,
            turn_counter: 0,
            preferences: HashMap::new(),
            last_activity: Utc::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Appends an accepted turn. This is the only write path into history;
    /// it also makes `handler_id` the session's active handler and advances
    /// the turn counter.
    pub fn append_turn(
        &mut self,
        request: Request,
        response: Response,
        handler_id: impl Into<String>,
    ) {
        let handler_id = handler_id.into();
        self.active_handler = Some(handler_id.clone());
        self.turn_counter += 1;
        self.history.push(TurnRecord {
            request,
            response,
            handler_id,
        });
        self.touch();
    }

    /// The most recent `limit` turns in insertion order, or the full history
    /// when `limit` is `None` or exceeds the turn count.
    pub fn history(&self, limit: Option<usize>) -> &[TurnRecord] {
        match limit {
            Some(n) if n < self.history.len() => &self.history[self.history.len() - n..],
            _ => &self.history,
        }
    }

    pub fn active_handler(&self) -> Option<&str> {
        self.active_handler.as_deref()
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_counter
    }

    pub fn get_preference(&self, key: &str) -> Option<&str> {
        self.preferences.get(key).map(String::as_str)
    }

    pub fn set_preference(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.preferences.insert(key.into(), value.into());
        self.touch();
    }

    /// Marks the session as active now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Whether the session has been inactive for at least `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.last_activity)
            .to_std()
            .map(|idle| idle >= timeout)
            .unwrap_or(false)
    }

    /// An immutable view for classifiers, guard predicates, and handlers:
    /// the most recent `window` turns plus identity and preferences.
    pub fn snapshot(&self, window: usize) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            turn_count: self.turn_counter,
            active_handler: self.active_handler.clone(),
            recent: self.history(Some(window)).to_vec(),
            preferences: self.preferences.clone(),
        }
    }
}

/// Immutable view of a session handed to components within one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub turn_count: u64,
    pub active_handler: Option<String>,
    pub recent: Vec<TurnRecord>,
    pub preferences: HashMap<String, String>,
}

/// In-memory registry of live sessions.
///
/// Sessions are created on first open and torn down either explicitly via
/// [`end`](Self::end) or by [`sweep_idle`](Self::sweep_idle) once they pass
/// the idle timeout. Teardown discards the in-memory history.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<StdMutex<HashMap<SessionId, Arc<Mutex<SessionState>>>>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(StdMutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Returns the session for `id`, creating it on first use. The returned
    /// mutex serializes turns: hold its guard for the whole turn.
    pub fn open(&self, id: &SessionId) -> Arc<Mutex<SessionState>> {
        let mut sessions = self.sessions.lock().expect("session map lock");
        sessions
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(session = %id, "creating session");
                Arc::new(Mutex::new(SessionState::new(id.clone())))
            })
            .clone()
    }

    /// Ends a conversation, discarding its state. Returns whether it existed.
    pub fn end(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.lock().expect("session map lock");
        sessions.remove(id).is_some()
    }

    /// Removes sessions idle past the configured timeout and returns how
    /// many were removed. Sessions with a turn in flight are skipped.
    pub fn sweep_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().expect("session map lock");
        let before = sessions.len();
        sessions.retain(|id, state| match state.try_lock() {
            Ok(guard) => {
                let keep = !guard.is_idle(self.idle_timeout);
                if !keep {
                    debug!(session = %id, "sweeping idle session");
                }
                keep
            }
            // in use right now, so not idle
            Err(_) => true,
        });
        before - sessions.len()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().expect("session map lock").contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session map lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn turn(state: &mut SessionState, text: &str, reply: &str, handler: &str) {
        let request = Request::new(state.id().clone(), text);
        let response = Response::new(handler, reply);
        state.append_turn(request, response, handler);
    }

    #[test]
    fn test_append_and_history_order() {
        let mut state = SessionState::new(SessionId::from("s-1"));
        turn(&mut state, "one", "r1", "general");
        turn(&mut state, "two", "r2", "billing");
        turn(&mut state, "three", "r3", "billing");

        assert_eq!(state.turn_count(), 3);
        assert_eq!(state.active_handler(), Some("billing"));

        let all = state.history(None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].request.text, "one");
        assert_eq!(all[2].request.text, "three");
    }

    #[test]
    fn test_history_limit_returns_most_recent_in_order() {
        let mut state = SessionState::new(SessionId::from("s-2"));
        for i in 0..5 {
            turn(&mut state, &format!("q{}", i), &format!("a{}", i), "general");
        }

        let last_two = state.history(Some(2));
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].request.text, "q3");
        assert_eq!(last_two[1].request.text, "q4");

        // limit larger than history returns everything
        assert_eq!(state.history(Some(100)).len(), 5);
        assert_eq!(state.history(Some(0)).len(), 0);
    }

    #[test]
    fn test_preferences() {
        let mut state = SessionState::new(SessionId::from("s-3"));
        assert_eq!(state.get_preference("language"), None);

        state.set_preference("language", "fr");
        assert_eq!(state.get_preference("language"), Some("fr"));

        state.set_preference("language", "de");
        assert_eq!(state.get_preference("language"), Some("de"));
    }

    #[test]
    fn test_snapshot_is_bounded_and_detached() {
        let mut state = SessionState::new(SessionId::from("s-4"));
        for i in 0..4 {
            turn(&mut state, &format!("q{}", i), "a", "general");
        }

        let snapshot = state.snapshot(2);
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.recent[0].request.text, "q2");
        assert_eq!(snapshot.turn_count, 4);

        // later mutation does not show up in the snapshot
        turn(&mut state, "q4", "a", "general");
        assert_eq!(snapshot.turn_count, 4);
    }

    #[tokio::test]
    async fn test_store_creates_once_and_ends() {
        let store = SessionStore::default();
        let id = SessionId::from("conv-1");

        let first = store.open(&id);
        first.lock().await.set_preference("seat", "12A");

        let second = store.open(&id);
        assert_eq!(second.lock().await.get_preference("seat"), Some("12A"));
        assert_eq!(store.len(), 1);

        assert!(store.end(&id));
        assert!(!store.contains(&id));
        assert!(!store.end(&id));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_idle_sessions() {
        let store = SessionStore::new(Duration::from_secs(0));
        let idle = SessionId::from("idle");
        let busy = SessionId::from("busy");

        store.open(&idle);
        let busy_handle = store.open(&busy);

        // hold the busy session as if a turn were in flight
        let _guard = busy_handle.lock().await;

        let removed = store.sweep_idle();
        assert_eq!(removed, 1);
        assert!(!store.contains(&idle));
        assert!(store.contains(&busy));
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_sessions() {
        let store = SessionStore::new(Duration::from_secs(3600));
        store.open(&SessionId::from("fresh"));
        assert_eq!(store.sweep_idle(), 0);
        assert_eq!(store.len(), 1);
    }
}
