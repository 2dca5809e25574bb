//! Process-wide table of live walkthrough sessions, keyed by a server-assigned id.

use crate::prompts::Prompts;
use crate::session_state::{TurnPolicy, WalkthroughSession};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identity of one physical connection, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

pub type SessionHandle = Arc<tokio::sync::Mutex<WalkthroughSession>>;

pub struct Registry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    prompts: Arc<Prompts>,
    policy: TurnPolicy,
}

impl Registry {
    pub fn new(prompts: Arc<Prompts>, policy: TurnPolicy) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            prompts,
            policy,
        }
    }

    /// Creates an empty session for a newly opened connection.
    ///
    /// The session is removed again when the returned lease is dropped, however the
    /// connection ends.
    pub fn open(self: &Arc<Self>) -> SessionLease {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(tokio::sync::Mutex::new(WalkthroughSession::new(
            Arc::clone(&self.prompts),
            self.policy,
        )));
        self.entries().insert(id, Arc::clone(&session));
        tracing::debug!(session = %id, "Session opened");

        SessionLease {
            id,
            session,
            registry: Arc::clone(self),
        }
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.entries().get(&id).cloned()
    }

    /// Removes a session. Returns `false` if it was already gone.
    pub fn close(&self, id: SessionId) -> bool {
        let removed = self.entries().remove(&id).is_some();
        if removed {
            tracing::debug!(session = %id, "Session closed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Never held across an await, so a poisoned map is still consistent.
    fn entries(&self) -> MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connection's claim on its registry entry.
pub struct SessionLease {
    id: SessionId,
    session: SessionHandle,
    registry: Arc<Registry>,
}

impl SessionLease {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.close(self.id);
    }
}
