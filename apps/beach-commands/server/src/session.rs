//! Table of live command sessions.
//!
//! Entries are shared as `Arc<SessionEntry>` and compared by pointer, so a
//! caller holding a stale entry can never evict the session that replaced it.

use std::sync::Arc;

use beach_commands_core::SessionId;
use dashmap::{mapref::entry::Entry, DashMap};
use metrics::gauge;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

use crate::handler::{CommandHandler, HandlerState};

/// One in-flight session. The handler sits behind its own lock so that
/// requests for the same session are strictly serialized.
pub struct SessionEntry {
    node: String,
    created_at: Instant,
    handler: Mutex<CommandHandler>,
}

impl SessionEntry {
    fn new(handler: CommandHandler) -> Self {
        Self {
            node: handler.node().to_string(),
            created_at: handler.created_at(),
            handler: Mutex::new(handler),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub async fn lock(&self) -> MutexGuard<'_, CommandHandler> {
        self.handler.lock().await
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionTableError {
    #[error("handler has no session id")]
    MissingSessionId,
    #[error("handler for session {0} is not executing")]
    NotExecuting(SessionId),
    #[error("session {0} is already registered")]
    Occupied(SessionId),
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub node: String,
    pub age_secs: u64,
}

/// Live sessions keyed by session id. Safe to mutate while the sweeper scans.
#[derive(Clone, Default)]
pub struct SessionTable {
    sessions: Arc<DashMap<SessionId, Arc<SessionEntry>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an executing handler under its own session id.
    pub fn put(&self, handler: CommandHandler) -> Result<Arc<SessionEntry>, SessionTableError> {
        let Some(session_id) = handler.session_id().cloned() else {
            return Err(SessionTableError::MissingSessionId);
        };
        if handler.state() != HandlerState::Executing {
            return Err(SessionTableError::NotExecuting(session_id));
        }

        let entry = match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(_) => return Err(SessionTableError::Occupied(session_id)),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(SessionEntry::new(handler));
                vacant.insert(Arc::clone(&entry));
                entry
            }
        };
        self.report_active();
        Ok(entry)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn remove(&self, session_id: &SessionId) -> Option<Arc<SessionEntry>> {
        let removed = self.sessions.remove(session_id).map(|(_, entry)| entry);
        if removed.is_some() {
            self.report_active();
        }
        removed
    }

    /// Removes `session_id` only while it still maps to `entry`.
    pub fn remove_entry(&self, session_id: &SessionId, entry: &Arc<SessionEntry>) -> bool {
        let removed = self
            .sessions
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, entry))
            .is_some();
        if removed {
            self.report_active();
        }
        removed
    }

    /// Whether `entry` is still the one published under `session_id`.
    pub fn is_current(&self, session_id: &SessionId, entry: &Arc<SessionEntry>) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), entry))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn snapshot_all(&self) -> Vec<(SessionId, Arc<SessionEntry>)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<_> = self
            .snapshot_all()
            .into_iter()
            .map(|(session_id, entry)| SessionSnapshot {
                session_id,
                node: entry.node().to_string(),
                age_secs: entry.age().as_secs(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        snapshots
    }

    fn report_active(&self) {
        gauge!("beach_commands_sessions_active", self.sessions.len() as f64);
    }
}
