//! Negotiation session registry
//!
//! The call-management layer owns one [`NegotiationRegistry`] and passes it
//! around by reference (or clone; clones share storage). There is no process
//! wide list of sessions: tests and independent subsystems each create their
//! own registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{NegotiationError, Result};
use crate::negotiation::NegotiationCore;
use crate::session::{ConnectionState, NegotiationSession, SessionId};

/// A registered session together with the core driving it
#[derive(Debug, Clone)]
pub struct RegisteredSession {
    pub session: NegotiationSession,
    pub core: NegotiationCore,
}

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Sessions currently registered
    pub registered: usize,
    /// Registered sessions not yet stopped
    pub active: usize,
    /// Sessions registered since the registry was created
    pub total_registered: usize,
    /// Sessions removed since the registry was created
    pub total_unregistered: usize,
    /// Sessions, current or removed, whose round ended with a fatal error
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    total_registered: usize,
    total_unregistered: usize,
    failed_unregistered: usize,
}

/// Registry of negotiation sessions owned by the call layer
#[derive(Debug, Clone, Default)]
pub struct NegotiationRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, RegisteredSession>>>,
    counters: Arc<RwLock<Counters>>,
}

impl NegotiationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and the core that drives it
    pub async fn register(&self, session: NegotiationSession, core: NegotiationCore) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session_id = session.id().clone();
        if sessions.contains_key(&session_id) {
            return Err(NegotiationError::SessionAlreadyRegistered { session_id });
        }

        sessions.insert(session_id.clone(), RegisteredSession { session, core });
        self.counters.write().await.total_registered += 1;

        tracing::debug!(session_id = %session_id, "Registered negotiation session");
        Ok(())
    }

    /// Look up a session
    pub async fn get(&self, session_id: &SessionId) -> Option<RegisteredSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Remove a session without stopping it
    pub async fn unregister(&self, session_id: &SessionId) -> Result<RegisteredSession> {
        let removed = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| NegotiationError::SessionNotFound {
                session_id: session_id.clone(),
            })?;

        let mut counters = self.counters.write().await;
        counters.total_unregistered += 1;
        if removed.session.last_error().is_some() {
            counters.failed_unregistered += 1;
        }

        tracing::debug!(session_id = %session_id, "Unregistered negotiation session");
        Ok(removed)
    }

    /// IDs of registered sessions that have not been stopped
    pub async fn list_active(&self) -> Vec<SessionId> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|entry| !entry.session.is_stopped())
            .map(|entry| entry.session.id().clone())
            .collect()
    }

    /// Registered sessions currently in `state`
    pub async fn find_by_connection_state(&self, state: ConnectionState) -> Vec<NegotiationSession> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|entry| entry.session.connection_state() == state)
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// Stop and remove every registered session; returns how many were removed
    pub async fn stop_all(&self) -> usize {
        let drained: Vec<RegisteredSession> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, entry)| entry).collect()
        };

        for entry in &drained {
            entry.core.stop(&entry.session).await;
        }

        let mut counters = self.counters.write().await;
        counters.total_unregistered += drained.len();
        counters.failed_unregistered += drained
            .iter()
            .filter(|entry| entry.session.last_error().is_some())
            .count();

        tracing::info!(stopped = drained.len(), "Stopped all negotiation sessions");
        drained.len()
    }

    /// Snapshot of registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let sessions = self.sessions.read().await;
        let counters = self.counters.read().await;

        let active = sessions.values().filter(|e| !e.session.is_stopped()).count();
        let failed_registered = sessions
            .values()
            .filter(|e| e.session.last_error().is_some())
            .count();

        RegistryStats {
            registered: sessions.len(),
            active,
            total_registered: counters.total_registered,
            total_unregistered: counters.total_unregistered,
            failed: counters.failed_unregistered + failed_registered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{CallContract, LocalSdpReady};
    use crate::transport::MockTransport;
    use async_trait::async_trait;

    struct NullCall;

    #[async_trait]
    impl CallContract for NullCall {
        async fn on_local_sdp_ready(&self, _ready: LocalSdpReady) {}
    }

    fn core() -> (Arc<MockTransport>, NegotiationCore) {
        let transport = MockTransport::builder().build();
        let core = NegotiationCore::new(transport.clone(), Arc::new(NullCall));
        (transport, core)
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = NegotiationRegistry::new();
        let (_, core) = core();
        let session = NegotiationSession::offerer();
        let id = session.id().clone();

        registry.register(session.clone(), core.clone()).await.unwrap();
        assert!(registry.contains(&id).await);
        assert_eq!(registry.get(&id).await.unwrap().session.id(), &id);

        assert!(matches!(
            registry.register(session, core).await,
            Err(NegotiationError::SessionAlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn unregister_updates_counters() {
        let registry = NegotiationRegistry::new();
        let (_, core) = core();
        let session = NegotiationSession::offerer();
        let id = session.id().clone();

        registry.register(session, core).await.unwrap();
        registry.unregister(&id).await.unwrap();

        assert!(matches!(
            registry.unregister(&id).await,
            Err(NegotiationError::SessionNotFound { .. })
        ));
        let stats = registry.stats().await;
        assert_eq!(stats.registered, 0);
        assert_eq!(stats.total_registered, 1);
        assert_eq!(stats.total_unregistered, 1);
    }

    #[tokio::test]
    async fn clones_share_storage_but_registries_are_independent() {
        let first = NegotiationRegistry::new();
        let second = NegotiationRegistry::new();
        let (_, core) = core();

        first.clone().register(NegotiationSession::answerer(), core).await.unwrap();

        assert_eq!(first.stats().await.registered, 1);
        assert_eq!(second.stats().await.registered, 0);
    }

    #[tokio::test]
    async fn stop_all_closes_every_transport() {
        let registry = NegotiationRegistry::new();
        let (transport_a, core_a) = core();
        let (transport_b, core_b) = core();

        registry.register(NegotiationSession::offerer(), core_a).await.unwrap();
        registry.register(NegotiationSession::offerer(), core_b).await.unwrap();
        assert_eq!(registry.list_active().await.len(), 2);

        assert_eq!(registry.stop_all().await, 2);
        assert!(transport_a.is_closed());
        assert!(transport_b.is_closed());
        assert!(registry.list_active().await.is_empty());
        assert_eq!(registry.stats().await.total_unregistered, 2);
    }

    #[tokio::test]
    async fn finds_sessions_by_connection_state() {
        let registry = NegotiationRegistry::new();
        let (_, core) = core();
        let session = NegotiationSession::offerer();

        registry.register(session.clone(), core.clone()).await.unwrap();
        assert_eq!(registry.find_by_connection_state(ConnectionState::New).await.len(), 1);

        core.stop(&session).await;
        assert!(registry.find_by_connection_state(ConnectionState::New).await.is_empty());
        assert_eq!(registry.find_by_connection_state(ConnectionState::Closed).await.len(), 1);
        assert!(registry.list_active().await.is_empty());
    }
}
