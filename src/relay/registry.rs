//! Session registry
//!
//! Shared map from player identity to its live session. Every connection
//! worker reads and mutates this map concurrently; all operations are
//! linearized through one `RwLock` so that session creation, removal, and
//! broadcast snapshots never observe partial state.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::network::PeerHandle;
use crate::protocol::PlayerId;

/// One connected player: identity, dedup state, and the write handle for
/// its connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: PlayerId,
    /// Last accepted sequence tag; unset until the first frame
    pub last_sequence: Option<u32>,
    pub handle: PeerHandle,
    pub addr: SocketAddr,
}

/// Shared session registry. At most one session exists per player identity
/// at any instant.
#[derive(Clone, Default)]
pub struct Registry {
    sessions: Arc<RwLock<HashMap<PlayerId, Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing session's last sequence for `player_id`, or
    /// atomically create a fresh session bound to `handle` and return `None`.
    /// Concurrent first frames for one identity resolve to a single session.
    /// An existing session is rebound to `handle` when the identity shows up
    /// on a new connection, so a stale connection never pins the identity.
    pub async fn get_or_create(
        &self,
        player_id: PlayerId,
        handle: &PeerHandle,
        addr: SocketAddr,
    ) -> Option<u32> {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(player_id) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                if !session.handle.same_peer(handle) {
                    tracing::info!(player = player_id, %addr, "session rebound to new connection");
                    session.handle = handle.clone();
                    session.addr = addr;
                }
                session.last_sequence
            }
            Entry::Vacant(entry) => {
                entry.insert(Session {
                    player_id,
                    last_sequence: None,
                    handle: handle.clone(),
                    addr,
                });
                tracing::info!(player = player_id, %addr, "session created");
                None
            }
        }
    }

    /// Overwrite the last accepted sequence for `player_id`
    pub async fn update_sequence(&self, player_id: PlayerId, sequence: u32) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&player_id) {
            session.last_sequence = Some(sequence);
        }
    }

    /// Evict the session for `player_id`
    pub async fn remove(&self, player_id: PlayerId) -> Option<Session> {
        let removed = self.sessions.write().await.remove(&player_id);
        if removed.is_some() {
            tracing::info!(player = player_id, "session removed");
        }
        removed
    }

    /// Evict the session for `player_id` only if it is still bound to
    /// `handle`. A worker's exit cleanup uses this so it never tears down a
    /// successor session registered after its own eviction.
    pub async fn remove_if_bound(&self, player_id: PlayerId, handle: &PeerHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&player_id) {
            Some(session) if session.handle.same_peer(handle) => {
                sessions.remove(&player_id);
                tracing::info!(player = player_id, "session removed");
                true
            }
            _ => false,
        }
    }

    /// Consistent view of all live connections at the instant of the call
    pub async fn snapshot_connections(&self) -> Vec<(PlayerId, PeerHandle)> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .map(|s| (s.player_id, s.handle.clone()))
            .collect()
    }

    /// Look up a session by identity
    pub async fn get(&self, player_id: PlayerId) -> Option<Session> {
        self.sessions.read().await.get(&player_id).cloned()
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle() -> PeerHandle {
        let (tx, rx) = mpsc::channel(16);
        std::mem::forget(rx); // keep the channel alive for the test
        PeerHandle::new(tx)
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[test]
    fn test_get_or_create_then_update() {
        tokio_test::block_on(async {
            let registry = Registry::new();
            let h = handle();

            assert_eq!(registry.get_or_create(1, &h, addr()).await, None);
            registry.update_sequence(1, 42).await;
            assert_eq!(registry.get_or_create(1, &h, addr()).await, Some(42));
            assert_eq!(registry.len().await, 1);
        });
    }

    #[tokio::test]
    async fn test_one_session_per_identity_under_races() {
        let registry = Registry::new();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let h = handle();
            tasks.push(tokio::spawn(async move {
                registry.get_or_create(7, &h, addr()).await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.len().await, 1);
        assert!(registry.get(7).await.is_some());
    }

    #[tokio::test]
    async fn test_remove_if_bound_spares_successor() {
        let registry = Registry::new();
        let old = handle();
        let new = handle();

        registry.get_or_create(0, &old, addr()).await;
        registry.remove(0).await;
        registry.get_or_create(0, &new, addr()).await;

        // The old worker's cleanup must not evict the successor session.
        assert!(!registry.remove_if_bound(0, &old).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove_if_bound(0, &new).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_or_create_rebinds_new_connection() {
        let registry = Registry::new();
        let old = handle();
        let new = handle();

        registry.get_or_create(2, &old, addr()).await;
        registry.update_sequence(2, 5).await;

        // The same identity arrives on a fresh connection: dedup state is
        // kept, the connection handle is replaced.
        assert_eq!(registry.get_or_create(2, &new, addr()).await, Some(5));
        let session = registry.get(2).await.unwrap();
        assert!(session.handle.same_peer(&new));

        // The old connection's exit cleanup no longer owns the session.
        assert!(!registry.remove_if_bound(2, &old).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_excludes_removed() {
        let registry = Registry::new();
        registry.get_or_create(0, &handle(), addr()).await;
        registry.get_or_create(1, &handle(), addr()).await;
        registry.remove(0).await;

        let snapshot = registry.snapshot_connections().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, 1);
    }
}
