use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use super::ServerSession;
#[cfg(test)]
use crate::bson::Document;

/// A pool of server sessions that can be reused by later client sessions. Cloning the pool
/// yields another handle to the same sessions.
#[derive(Clone, Debug, Default)]
pub(crate) struct ServerSessionPool {
    pool: Arc<Mutex<VecDeque<ServerSession>>>,
}

impl ServerSessionPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Checks out a server session from the pool. Before doing so, it first clears out all the
    /// expired sessions. If there are no sessions left in the pool after clearing expired ones
    /// out, a new session will be created.
    pub(crate) fn check_out(&self, logical_session_timeout: Duration) -> ServerSession {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(session) = pool.pop_front() {
            // If a session is about to expire within the next minute, remove it from pool.
            if session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            return session;
        }
        ServerSession::new()
    }

    /// Checks in a server session to the pool. If it is about to expire or is dirty, it will be
    /// discarded.
    ///
    /// This method will also clear out any expired session from the pool before checking in.
    pub(crate) fn check_in(&self, session: ServerSession, logical_session_timeout: Duration) {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(pooled_session) = pool.pop_back() {
            if pooled_session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            pool.push_back(pooled_session);
            break;
        }

        if !session.dirty && !session.is_about_to_expire(logical_session_timeout) {
            pool.push_front(session);
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &Document) -> bool {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|s| &s.id == id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
