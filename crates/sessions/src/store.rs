//! The `id → Session` map.
//!
//! The manager is the sole origin and destination for session creation and
//! eviction. Its lock protects only map lookups and inserts — never I/O —
//! so `run_turn` proceeds without holding it. Eviction is a single lazy
//! sweeper task rather than per-session timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::session::{Session, SessionPrototype};

#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session, generating an id when the caller has none.
    pub fn create(&self, id: Option<Uuid>, proto: &SessionPrototype) -> Arc<Session> {
        let id = id.unwrap_or_else(Uuid::new_v4);
        let session = Arc::new(Session::new(id, proto));
        self.sessions.write().insert(id, session.clone());
        tracing::debug!(session_id = %id, "session created");
        session
    }

    pub fn lookup(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn touch(&self, id: &Uuid) {
        if let Some(session) = self.lookup(id) {
            session.touch();
        }
    }

    /// Remove a session outright, cancelling any in-flight turn.
    pub fn remove(&self, id: &Uuid) -> bool {
        match self.sessions.write().remove(id) {
            Some(session) => {
                session.cancel_active();
                tracing::debug!(session_id = %id, "session removed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Evict sessions idle longer than `ttl`. Returns how many went.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let expired: Vec<(Uuid, Arc<Session>)> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, s)| s.idle_for() > ttl)
                .map(|(id, s)| (*id, s.clone()))
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write();
        let mut evicted = 0;
        for (id, session) in expired {
            // Re-check under the write lock: activity may have arrived.
            if session.idle_for() > ttl {
                session.cancel_active();
                sessions.remove(&id);
                evicted += 1;
                tracing::info!(session_id = %id, "session expired");
            }
        }
        evicted
    }
}

/// Run the eviction sweeper until the manager is dropped elsewhere.
pub fn spawn_sweeper(
    manager: Arc<SessionManager>,
    ttl: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = manager.sweep(ttl);
            if evicted > 0 {
                tracing::debug!(evicted, remaining = manager.len(), "sweep complete");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proto() -> SessionPrototype {
        SessionPrototype::default()
    }

    #[tokio::test]
    async fn create_and_lookup() {
        let mgr = SessionManager::new();
        let session = mgr.create(None, &proto());
        assert!(mgr.lookup(&session.id()).is_some());
        assert!(mgr.lookup(&Uuid::new_v4()).is_none());
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test]
    async fn create_with_explicit_id() {
        let mgr = SessionManager::new();
        let id = Uuid::new_v4();
        let session = mgr.create(Some(id), &proto());
        assert_eq!(session.id(), id);
    }

    #[tokio::test]
    async fn remove_cancels_active_turn() {
        let mgr = SessionManager::new();
        let session = mgr.create(None, &proto());
        let (token, _) = session.begin_turn();

        assert!(mgr.remove(&session.id()));
        assert!(token.is_cancelled());
        assert!(!mgr.remove(&session.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_idle_sessions() {
        let mgr = SessionManager::new();
        let stale = mgr.create(None, &proto());
        tokio::time::advance(Duration::from_secs(300)).await;
        let fresh = mgr.create(None, &proto());
        tokio::time::advance(Duration::from_secs(301)).await;

        // stale idle 601 s, fresh idle 301 s.
        let evicted = mgr.sweep(Duration::from_secs(600));
        assert_eq!(evicted, 1);
        assert!(mgr.lookup(&stale.id()).is_none());
        assert!(mgr.lookup(&fresh.id()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_defers_eviction() {
        let mgr = SessionManager::new();
        let session = mgr.create(None, &proto());
        tokio::time::advance(Duration::from_secs(500)).await;
        mgr.touch(&session.id());
        tokio::time::advance(Duration::from_secs(500)).await;

        // Idle only 500 s since touch.
        assert_eq!(mgr.sweep(Duration::from_secs(600)), 0);
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_runs_periodically() {
        let mgr = Arc::new(SessionManager::new());
        mgr.create(None, &proto());

        let handle = spawn_sweeper(
            mgr.clone(),
            Duration::from_secs(600),
            Duration::from_secs(30),
        );

        // Paused-clock sleep auto-advances through the sweeper's ticks.
        tokio::time::sleep(Duration::from_secs(700)).await;

        assert!(mgr.is_empty());
        handle.abort();
    }
}
