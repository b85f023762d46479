//! Registry of live sessions
//!
//! This module tracks every connected session, including:
//! - Admission against the configured player limit
//! - Session and entity id assignment
//! - Lookup by id for the world and the visibility broadcaster
//! - Broadcast of packets to every logged-in player
//!
//! The registry is shared by all connection tasks, so every operation takes
//! `&self` and is safe to call concurrently.

use crate::session::{SessionHandle, SessionId};
use dashmap::DashMap;
use log::{debug, info};
use shared::ClientboundPacket;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Manages all connected sessions
///
/// Session ids are opaque and never reused. Entity ids are what clients see;
/// they come from a monotonic counter so two connected players can never
/// share one.
pub struct ClientManager {
    /// Connected sessions indexed by their id
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    next_session_id: AtomicU64,
    next_entity_id: AtomicI32,
    /// Admitted sessions, reserved before the handle is built
    occupied: AtomicUsize,
    max_players: usize,
}

impl ClientManager {
    /// Creates an empty registry admitting at most `max_players` sessions
    ///
    /// Session and entity ids both start from 1.
    pub fn new(max_players: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            next_entity_id: AtomicI32::new(1),
            occupied: AtomicUsize::new(0),
            max_players,
        }
    }

    /// Attempts to admit a new session
    ///
    /// Returns None if the server is full. Otherwise `build` receives the
    /// fresh session id and entity id, and the handle it returns is stored
    /// and handed back.
    pub fn register<F>(&self, build: F) -> Option<Arc<SessionHandle>>
    where
        F: FnOnce(SessionId, i32) -> SessionHandle,
    {
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_players).then_some(n + 1)
            })
            .ok()?;

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let entity_id = self.next_entity_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(build(id, entity_id));

        info!(
            "Session {} (entity {}) connected from {}",
            id, entity_id, session.peer_addr
        );
        self.sessions.insert(id, Arc::clone(&session));
        Some(session)
    }

    /// Removes a session from the registry
    ///
    /// Returns true if the session was found and removed, false if it was
    /// already gone.
    pub fn unregister(&self, id: SessionId) -> bool {
        if self.sessions.remove(&id).is_some() {
            self.occupied.fetch_sub(1, Ordering::AcqRel);
            debug!("Session {} unregistered", id);
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Snapshot of every registered session
    pub fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.iter().map(|s| Arc::clone(s.value())).collect()
    }

    /// Snapshot of the sessions that have finished logging in
    pub fn active_sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .filter(|s| s.is_active())
            .map(|s| Arc::clone(s.value()))
            .collect()
    }

    /// Sends a packet to every logged-in session
    pub fn broadcast(&self, packet: &ClientboundPacket) {
        for session in self.active_sessions() {
            session.send(packet.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.occupied.load(Ordering::Acquire) >= self.max_players
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Outbound, ProtocolState};
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    const TEST_QUEUE: usize = 4096;

    fn addr() -> SocketAddr {
        "127.0.0.1:25565".parse().unwrap()
    }

    fn add(
        manager: &ClientManager,
    ) -> Option<(Arc<SessionHandle>, mpsc::Receiver<Outbound>)> {
        let (tx, rx) = mpsc::channel(TEST_QUEUE);
        manager
            .register(|id, entity_id| SessionHandle::new(id, entity_id, addr(), tx))
            .map(|session| (session, rx))
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let manager = ClientManager::new(4);
        let (first, _rx1) = add(&manager).unwrap();
        let (second, _rx2) = add(&manager).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(first.entity_id, 1);
        assert_eq!(second.entity_id, 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_capacity_limit() {
        let manager = ClientManager::new(2);
        let (first, _rx1) = add(&manager).unwrap();
        let _second = add(&manager).unwrap();

        assert!(manager.is_full());
        assert!(add(&manager).is_none());

        assert!(manager.unregister(first.id));
        assert!(!manager.is_full());
        assert!(add(&manager).is_some());
    }

    #[test]
    fn test_entity_ids_not_reused() {
        let manager = ClientManager::new(1);
        let (first, _rx1) = add(&manager).unwrap();
        manager.unregister(first.id);
        let (second, _rx2) = add(&manager).unwrap();

        assert_ne!(first.entity_id, second.entity_id);
    }

    #[test]
    fn test_unregister_twice() {
        let manager = ClientManager::new(2);
        let (session, _rx) = add(&manager).unwrap();

        assert!(manager.unregister(session.id));
        assert!(!manager.unregister(session.id));
        assert!(manager.is_empty());
        assert!(!manager.is_full());
    }

    #[test]
    fn test_broadcast_reaches_only_active_sessions() {
        let manager = ClientManager::new(4);
        let (active, mut active_rx) = add(&manager).unwrap();
        let (_pending, mut pending_rx) = add(&manager).unwrap();
        active.set_state(ProtocolState::Active);

        manager.broadcast(&ClientboundPacket::Chat {
            message: "hello".to_string(),
        });

        assert!(matches!(
            active_rx.try_recv(),
            Ok(Outbound::Packet(ClientboundPacket::Chat { .. }))
        ));
        assert!(pending_rx.try_recv().is_err());
        assert_eq!(manager.active_sessions().len(), 1);
    }
}
