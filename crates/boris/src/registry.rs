//! Transport-session-id to session mapping.
//!
//! The registry mutex guards the map only; `Session::close` always runs
//! after the lock is released, so there is no ordering with the session
//! mutex to get wrong.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::session::Session;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a transport session id to a session. Re-registering the same id
    /// replaces the previous binding (last write wins).
    pub fn register(&self, id: impl Into<String>, session: Arc<Session>) {
        self.sessions.lock().insert(id.into(), session);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Remove the binding and close the session. Unknown ids are a no-op.
    pub async fn close_and_remove(&self, id: &str) {
        let session = self.sessions.lock().remove(id);
        if let Some(session) = session {
            tracing::debug!(session_id = %id, "closing session");
            session.close().await;
        }
    }

    /// Drain every session and close each one. Used on server shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut map = self.sessions.lock();
            map.drain().map(|(_, session)| session).collect()
        };
        for session in drained {
            session.close().await;
        }
    }
}
