//! Concurrent session registry (C7).

use crate::error::RegistryError;
use crate::session::Session;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Maps session-id -> owned Session and client-id -> owned session-ids.
/// The registry is the sole owner of every live session; the dispatcher
/// only ever holds a transient `Arc` obtained through `get`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    by_client: RwLock<HashMap<String, HashSet<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        client_id: &str,
        session: Session,
    ) -> Result<Arc<Session>, RegistryError> {
        let session_id = session.id.clone();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session_id) {
            return Err(RegistryError::Conflict);
        }
        let session = Arc::new(session);
        sessions.insert(session_id.clone(), session.clone());
        drop(sessions);

        self.by_client
            .write()
            .await
            .entry(client_id.to_string())
            .or_default()
            .insert(session_id);

        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Arc<Session>, RegistryError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            let mut by_client = self.by_client.write().await;
            for ids in by_client.values_mut() {
                ids.remove(session_id);
            }
        }
        removed
    }

    /// Abort and remove every session owned by `client_id` (disconnect path).
    pub async fn abort_client(&self, client_id: &str) {
        let session_ids = self
            .by_client
            .write()
            .await
            .remove(client_id)
            .unwrap_or_default();

        for session_id in session_ids {
            if let Some(session) = self.sessions.write().await.remove(&session_id) {
                session.abort().await;
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Abort and remove every session idle for at least `timeout_seconds`
    /// (no `feed_pcm`/`feed_opus` activity). Returns the ids removed, for
    /// the caller to log; there is no outbound connection to notify here —
    /// the registry has no reverse session-id -> socket mapping.
    pub async fn sweep_idle(&self, timeout_seconds: f64) -> Vec<String> {
        let candidates: Vec<(String, Arc<Session>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();

        let mut expired = Vec::new();
        for (id, session) in candidates {
            if session.idle_seconds().await >= timeout_seconds {
                expired.push(id);
            }
        }

        for id in &expired {
            if let Some(session) = self.remove(id).await {
                session.abort().await;
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;
    use crate::strategy::{LocalAgreementStrategy, StabilizationConfig};
    use std::sync::Arc as StdArc;

    async fn session(id: &str) -> Session {
        let backend = StdArc::new(StubBackend::new());
        backend.load().await.unwrap();
        let strategy = Box::new(LocalAgreementStrategy::new(
            backend,
            StabilizationConfig::low(),
            30.0,
            500,
            None,
        ));
        Session::new(id, 16000, strategy, None).unwrap()
    }

    #[tokio::test]
    async fn duplicate_session_id_is_rejected() {
        let registry = SessionRegistry::new();
        registry.register("client-1", session("s-1").await).await.unwrap();
        let err = registry
            .register("client-1", session("s-1").await)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict));
    }

    #[tokio::test]
    async fn lookup_of_missing_session_fails() {
        let registry = SessionRegistry::new();
        let err = registry.get("nope").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound));
    }

    #[tokio::test]
    async fn abort_client_removes_and_closes_all_owned_sessions() {
        let registry = SessionRegistry::new();
        registry.register("client-1", session("s-1").await).await.unwrap();
        registry.register("client-1", session("s-2").await).await.unwrap();
        registry.register("client-2", session("s-3").await).await.unwrap();

        registry.abort_client("client-1").await;

        assert_eq!(registry.session_count().await, 1);
        assert!(registry.get("s-3").await.is_ok());
        assert!(registry.get("s-1").await.is_err());
    }

    #[tokio::test]
    async fn sweep_idle_removes_only_sessions_past_the_timeout() {
        let registry = SessionRegistry::new();
        registry.register("client-1", session("s-1").await).await.unwrap();
        registry.register("client-1", session("s-2").await).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        // Touch s-2 so it looks recently active relative to a tight timeout.
        registry.get("s-2").await.unwrap().feed_pcm(&[0i16; 160], 16000, 1).await.unwrap();

        let expired = registry.sweep_idle(0.01).await;
        assert_eq!(expired, vec!["s-1".to_string()]);
        assert!(registry.get("s-1").await.is_err());
        assert!(registry.get("s-2").await.is_ok());
    }
}
