//! SessionRegistry - Thread-safe owner map of live sessions
//!
//! Sessions are never shared: a worker checks a session out, owns it while it
//! processes one request, then checks it back in. While a session is checked
//! out only its [`InterruptHandle`] stays reachable through the registry, which
//! is all the out-of-band control path needs.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use boltsm::auth::NoAuth;
//! use boltsm::config::SessionConfig;
//! use boltsm::engine::MemoryEngine;
//! use boltsm::messages::Request;
//! use boltsm::registry::SessionRegistry;
//! use boltsm::response::ResponseRecorder;
//!
//! let engine = Arc::new(MemoryEngine::new("neo4j").unwrap());
//! let registry = SessionRegistry::new(engine, Arc::new(NoAuth), SessionConfig::default());
//!
//! let id = registry.open();
//! let mut session = registry.checkout(id).unwrap();
//! session.process(Request::hello("docs/1.0"), &mut ResponseRecorder::new()).unwrap();
//! registry.checkin(session).unwrap();
//!
//! registry.interrupt(id).unwrap();
//! registry.remove(id).unwrap();
//! assert!(registry.is_empty());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info};

use crate::auth::Authenticator;
use crate::config::SessionConfig;
use crate::engine::QueryEngine;
use crate::metrics::Metrics;
use crate::session::{InterruptHandle, Session, SessionId, State};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("Session {0} is being processed by another worker")]
    SessionBusy(SessionId),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

struct Entry {
    /// `None` while checked out
    session: Option<Session>,
    handle: InterruptHandle,
}

/// Listing row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    /// `None` while checked out
    pub state: Option<State>,
    pub pending_interrupts: usize,
}

pub struct SessionRegistry {
    engine: Arc<dyn QueryEngine>,
    authenticator: Arc<dyn Authenticator>,
    config: SessionConfig,
    metrics: Option<Arc<Metrics>>,
    next_id: AtomicUsize,
    /// Entries hold sessions, which are `Send` but not `Sync`
    sessions: Mutex<HashMap<SessionId, Entry>>,
}

impl SessionRegistry {
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        authenticator: Arc<dyn Authenticator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            engine,
            authenticator,
            config,
            metrics: None,
            next_id: AtomicUsize::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a CONNECTED session and register it.
    pub fn open(&self) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut session = Session::new(
            id,
            Arc::clone(&self.engine),
            Arc::clone(&self.authenticator),
            self.config.clone(),
        );
        if let Some(metrics) = &self.metrics {
            session = session.with_metrics(Arc::clone(metrics));
        }
        self.register(session)
    }

    /// Take ownership of an externally built session.
    pub fn register(&self, session: Session) -> SessionId {
        let id = session.id();
        let handle = session.interrupt_handle();
        self.lock().insert(id, Entry { session: Some(session), handle });
        debug!(session = id, "session registered");
        id
    }

    /// Move the session out for exclusive processing.
    pub fn checkout(&self, id: SessionId) -> RegistryResult<Session> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(&id).ok_or(RegistryError::SessionNotFound(id))?;
        entry.session.take().ok_or(RegistryError::SessionBusy(id))
    }

    /// Return a checked-out session. Closed sessions are dropped instead.
    ///
    /// Fails with `SessionNotFound` when the session was removed while it was
    /// checked out; the session is closed in that case.
    pub fn checkin(&self, mut session: Session) -> RegistryResult<()> {
        let id = session.id();
        let mut sessions = self.lock();

        let Some(entry) = sessions.get_mut(&id) else {
            drop(sessions);
            session.close();
            return Err(RegistryError::SessionNotFound(id));
        };

        if session.is_closed() {
            sessions.remove(&id);
            debug!(session = id, "closed session dropped on checkin");
            return Ok(());
        }
        entry.session = Some(session);
        Ok(())
    }

    pub fn handle(&self, id: SessionId) -> RegistryResult<InterruptHandle> {
        self.lock()
            .get(&id)
            .map(|entry| entry.handle.clone())
            .ok_or(RegistryError::SessionNotFound(id))
    }

    /// Raise an interrupt; works while the session is checked out.
    pub fn interrupt(&self, id: SessionId) -> RegistryResult<()> {
        self.handle(id)?.interrupt();
        Ok(())
    }

    /// Mark the session for closing on its next request.
    pub fn terminate(&self, id: SessionId) -> RegistryResult<()> {
        self.handle(id)?.terminate();
        Ok(())
    }

    /// Terminate every session, returning how many were marked.
    pub fn terminate_all(&self) -> usize {
        let sessions = self.lock();
        for entry in sessions.values() {
            entry.handle.terminate();
        }
        info!(count = sessions.len(), "terminated all sessions");
        sessions.len()
    }

    /// Unregister and close. A checked-out session is terminated and closed
    /// when its worker checks it back in.
    pub fn remove(&self, id: SessionId) -> RegistryResult<()> {
        let entry = self.lock().remove(&id).ok_or(RegistryError::SessionNotFound(id))?;
        match entry.session {
            Some(mut session) => session.close(),
            None => entry.handle.terminate(),
        }
        debug!(session = id, "session removed");
        Ok(())
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .lock()
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                state: entry.session.as_ref().map(Session::state),
                pending_interrupts: entry.handle.pending(),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;
    use crate::auth::NoAuth;
    use crate::engine::MemoryEngine;
    use crate::messages::Request;
    use crate::response::ResponseRecorder;
    use std::thread;

    fn registry() -> SessionRegistry {
        let engine = Arc::new(MemoryEngine::new("neo4j").unwrap());
        SessionRegistry::new(engine, Arc::new(NoAuth), SessionConfig::default())
    }

    #[test]
    fn test_registry_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SessionRegistry>();
        assert_send_sync::<Arc<SessionRegistry>>();
    }

    #[test]
    fn test_open_assigns_unique_ids() {
        let registry = registry();
        let a = registry.open();
        let b = registry.open();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_checkout_is_exclusive() {
        let registry = registry();
        let id = registry.open();

        let session = registry.checkout(id).unwrap();
        assert_eq!(registry.checkout(id).unwrap_err(), RegistryError::SessionBusy(id));
        assert_eq!(registry.list()[0].state, None);

        registry.checkin(session).unwrap();
        assert_eq!(registry.list()[0].state, Some(State::Connected));
        assert!(registry.checkout(id).is_ok());
    }

    #[test]
    fn test_unknown_session() {
        let registry = registry();
        assert_eq!(registry.checkout(42).unwrap_err(), RegistryError::SessionNotFound(42));
        assert_eq!(registry.interrupt(42).unwrap_err(), RegistryError::SessionNotFound(42));
        assert_eq!(registry.remove(42).unwrap_err(), RegistryError::SessionNotFound(42));
    }

    #[test]
    fn test_interrupt_while_checked_out() {
        let registry = registry();
        let id = registry.open();
        let mut session = registry.checkout(id).unwrap();
        session.process(Request::hello("x"), &mut ResponseRecorder::new()).unwrap();

        registry.interrupt(id).unwrap();
        assert_eq!(registry.list()[0].pending_interrupts, 1);

        let mut sink = ResponseRecorder::new();
        session.process(Request::run("RETURN 1"), &mut sink).unwrap();
        assert!(sink.last().unwrap().is_ignored());
        assert_eq!(session.state(), State::Interrupted);
        registry.checkin(session).unwrap();
    }

    #[test]
    fn test_closed_session_dropped_on_checkin() {
        let registry = registry();
        let id = registry.open();
        let mut session = registry.checkout(id).unwrap();
        session.close();

        registry.checkin(session).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_while_checked_out() {
        let registry = registry();
        let id = registry.open();
        let session = registry.checkout(id).unwrap();
        let handle = session.interrupt_handle();

        registry.remove(id).unwrap();
        assert!(handle.is_terminated());
        assert_eq!(registry.checkin(session).unwrap_err(), RegistryError::SessionNotFound(id));
    }

    #[test]
    fn test_terminate_all() {
        let registry = registry();
        let ids: Vec<_> = (0..3).map(|_| registry.open()).collect();
        assert_eq!(registry.terminate_all(), 3);

        for id in ids {
            let mut session = registry.checkout(id).unwrap();
            assert!(session.process(Request::hello("x"), &mut ResponseRecorder::new()).is_err());
            registry.checkin(session).unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_workers() {
        let registry = Arc::new(registry());
        let ids: Vec<_> = (0..8).map(|_| registry.open()).collect();

        let workers: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for request in [Request::hello("w"), Request::run("RETURN 1"), Request::pull_all()] {
                        let mut session = registry.checkout(id).unwrap();
                        session.process(request, &mut ResponseRecorder::new()).unwrap();
                        registry.checkin(session).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(registry.list().iter().all(|info| info.state == Some(State::Ready)));
    }
}
