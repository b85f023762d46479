//! Entity visibility between players
//!
//! Every session remembers which entities its client has spawned. When a
//! player moves, each active peer is classified by comparing that memory
//! ("was visible") against the current horizontal distance ("is visible"):
//!
//! | was | is    | packets                                               |
//! |-----|-------|-------------------------------------------------------|
//! | no  | yes   | mutual NamedEntitySpawn                               |
//! | yes | no    | mutual DestroyEntity                                  |
//! | yes | yes   | EntityTeleport or EntityRelativeMove to the peer      |
//! | no  | no    | nothing                                               |
//!
//! Deriving "was visible" from the spawned set instead of the previous
//! distance keeps the two sides consistent whatever order concurrent moves
//! land in, and makes every spawn and destroy happen exactly once.
//!
//! Locks on the spawned sets are taken one at a time. Inserting an entity is
//! refused once its session started tearing down; teardown clears the sets
//! under the same locks, so a departing player never reappears.

use crate::client_manager::ClientManager;
use crate::player::PlayerState;
use crate::session::SessionHandle;
use log::trace;
use shared::{to_fixed_point, ClientboundPacket};
use std::sync::Arc;

/// Furthest horizontal distance at which players see each other
pub const VISIBLE_RANGE: f64 = 192.0;

/// Displacement above which a move is always sent as a teleport
pub const TELEPORT_THRESHOLD: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Enter,
    Leave,
    Stay,
    Hidden,
}

impl Transition {
    pub fn between(was_visible: bool, is_visible: bool) -> Self {
        match (was_visible, is_visible) {
            (false, true) => Transition::Enter,
            (true, false) => Transition::Leave,
            (true, true) => Transition::Stay,
            (false, false) => Transition::Hidden,
        }
    }
}

/// Picks the cheapest packet that moves `player`'s entity from its last
/// broadcast state to its current one, or None if nothing changed.
pub fn movement_packet(entity_id: i32, player: &PlayerState) -> Option<ClientboundPacket> {
    let now = player.position;
    let last = player.last_broadcast;

    if now.distance_to(&last) > TELEPORT_THRESHOLD || player.rotation_dirty {
        return Some(player.teleport_packet(entity_id));
    }

    let dx = to_fixed_point(now.x) - to_fixed_point(last.x);
    let dy = to_fixed_point(now.y) - to_fixed_point(last.y);
    let dz = to_fixed_point(now.z) - to_fixed_point(last.z);
    if dx == 0 && dy == 0 && dz == 0 {
        return None;
    }

    match (i8::try_from(dx), i8::try_from(dy), i8::try_from(dz)) {
        (Ok(dx), Ok(dy), Ok(dz)) => Some(ClientboundPacket::EntityRelativeMove {
            entity_id,
            dx,
            dy,
            dz,
        }),
        _ => Some(player.teleport_packet(entity_id)),
    }
}

/// Updates every active peer after `mover`'s position changed.
///
/// Also used right after login, where the "move" is the arrival at spawn and
/// every peer in range is introduced.
pub async fn broadcast_movement(clients: &ClientManager, mover: &Arc<SessionHandle>) {
    let (position, spawn, update) = {
        let mut player = mover.player.write().await;
        let update = movement_packet(mover.entity_id, &player);
        player.mark_broadcast();
        (player.position, player.spawn_packet(mover.entity_id), update)
    };

    for peer in clients.active_sessions() {
        if peer.id == mover.id {
            continue;
        }
        let (peer_position, peer_spawn) = {
            let player = peer.player.read().await;
            (player.position, player.spawn_packet(peer.entity_id))
        };
        let is_visible = position.horizontal_distance_to(&peer_position) <= VISIBLE_RANGE;

        // What the peer sees of the mover.
        {
            let mut known = peer.known_entities.lock().await;
            match Transition::between(known.contains(&mover.entity_id), is_visible) {
                Transition::Enter => {
                    if !mover.is_closing() {
                        known.insert(mover.entity_id);
                        peer.send(spawn.clone());
                    }
                }
                Transition::Leave => {
                    known.remove(&mover.entity_id);
                    peer.send(ClientboundPacket::DestroyEntity {
                        entity_id: mover.entity_id,
                    });
                }
                Transition::Stay => {
                    if let Some(update) = &update {
                        peer.send(update.clone());
                    }
                }
                Transition::Hidden => {}
            }
        }

        // What the mover sees of the peer. The peer's own moves keep this
        // current, so only the edges matter here.
        {
            let mut known = mover.known_entities.lock().await;
            match Transition::between(known.contains(&peer.entity_id), is_visible) {
                Transition::Enter => {
                    if !peer.is_closing() {
                        known.insert(peer.entity_id);
                        mover.send(peer_spawn);
                    }
                }
                Transition::Leave => {
                    known.remove(&peer.entity_id);
                    mover.send(ClientboundPacket::DestroyEntity {
                        entity_id: peer.entity_id,
                    });
                }
                Transition::Stay | Transition::Hidden => {}
            }
        }
    }
}

/// Sends a look-only update to every peer that has `mover` spawned.
pub async fn broadcast_look(clients: &ClientManager, mover: &Arc<SessionHandle>) {
    let packet = {
        let mut player = mover.player.write().await;
        if !player.rotation_dirty {
            return;
        }
        player.mark_rotation_broadcast();
        player.look_packet(mover.entity_id)
    };

    for peer in clients.active_sessions() {
        if peer.id == mover.id {
            continue;
        }
        if peer.known_entities.lock().await.contains(&mover.entity_id) {
            peer.send(packet.clone());
        }
    }
}

/// Removes `session`'s entity from every client that has it spawned.
pub async fn despawn_everywhere(clients: &ClientManager, session: &SessionHandle) {
    for peer in clients.sessions() {
        if peer.id == session.id {
            continue;
        }
        let mut known = peer.known_entities.lock().await;
        if known.remove(&session.entity_id) {
            trace!("Destroying entity {} for session {}", session.entity_id, peer.id);
            peer.send(ClientboundPacket::DestroyEntity {
                entity_id: session.entity_id,
            });
        }
    }
    session.known_entities.lock().await.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Position;
    use crate::session::{Outbound, ProtocolState};
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    const TEST_QUEUE: usize = 4096;

    #[test]
    fn test_transition_table() {
        assert_eq!(Transition::between(false, true), Transition::Enter);
        assert_eq!(Transition::between(true, false), Transition::Leave);
        assert_eq!(Transition::between(true, true), Transition::Stay);
        assert_eq!(Transition::between(false, false), Transition::Hidden);
    }

    fn moved(from: Position, to: Position) -> PlayerState {
        let mut player = PlayerState::new("Alice".to_string());
        player.last_broadcast = from;
        player.position = to;
        player
    }

    #[test]
    fn test_small_move_is_relative() {
        let player = moved(Position::new(0.0, 64.0, 0.0), Position::new(1.0, 64.5, -2.0));
        assert_eq!(
            movement_packet(5, &player),
            Some(ClientboundPacket::EntityRelativeMove {
                entity_id: 5,
                dx: 32,
                dy: 16,
                dz: -64
            })
        );
    }

    #[test]
    fn test_no_change_sends_nothing() {
        let player = moved(Position::SPAWN, Position::SPAWN);
        assert_eq!(movement_packet(5, &player), None);
    }

    #[test]
    fn test_delta_outside_i8_is_teleport() {
        // Exactly 4 blocks is not over the threshold, but 128 units do not fit.
        let player = moved(Position::new(0.0, 64.0, 0.0), Position::new(4.0, 64.0, 0.0));
        assert!(matches!(
            movement_packet(5, &player),
            Some(ClientboundPacket::EntityTeleport { x: 128, .. })
        ));

        let player = moved(Position::new(0.0, 64.0, 0.0), Position::new(-3.99, 64.0, 0.0));
        assert!(matches!(
            movement_packet(5, &player),
            Some(ClientboundPacket::EntityRelativeMove { dx: -128, .. })
        ));
    }

    #[test]
    fn test_large_move_is_teleport() {
        let player = moved(Position::new(0.0, 64.0, 0.0), Position::new(3.0, 64.0, 3.0));
        assert!(matches!(
            movement_packet(5, &player),
            Some(ClientboundPacket::EntityTeleport { .. })
        ));
    }

    #[test]
    fn test_rotation_forces_teleport() {
        let mut player = moved(Position::SPAWN, Position::SPAWN);
        player.set_rotation(90.0, 10.0);
        assert_eq!(
            movement_packet(5, &player),
            Some(ClientboundPacket::EntityTeleport {
                entity_id: 5,
                x: 0,
                y: 2048,
                z: 0,
                yaw: 64,
                pitch: 7
            })
        );
    }

    struct Peer {
        session: Arc<SessionHandle>,
        rx: mpsc::Receiver<Outbound>,
    }

    impl Peer {
        async fn join(clients: &ClientManager, name: &str, x: f64) -> Peer {
            let (tx, rx) = mpsc::channel(TEST_QUEUE);
            let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
            let session = clients
                .register(|id, entity_id| SessionHandle::new(id, entity_id, addr, tx))
                .unwrap();
            {
                let mut player = session.player.write().await;
                player.username = name.to_string();
                player.position.x = x;
                player.last_broadcast.x = x;
            }
            session.set_state(ProtocolState::Active);
            Peer { session, rx }
        }

        async fn move_to(&self, clients: &ClientManager, x: f64) {
            self.session.player.write().await.position.x = x;
            broadcast_movement(clients, &self.session).await;
        }

        fn drain(&mut self) -> Vec<ClientboundPacket> {
            let mut packets = Vec::new();
            while let Ok(Outbound::Packet(packet)) = self.rx.try_recv() {
                packets.push(packet);
            }
            packets
        }
    }

    fn count(packets: &[ClientboundPacket], pred: impl Fn(&ClientboundPacket) -> bool) -> usize {
        packets.iter().filter(|p| pred(p)).count()
    }

    #[tokio::test]
    async fn test_enter_and_leave_are_mutual() {
        let clients = ClientManager::new(4);
        let mut alice = Peer::join(&clients, "Alice", 0.0).await;
        let mut bob = Peer::join(&clients, "Bob", 200.0).await;

        broadcast_movement(&clients, &alice.session).await;
        assert!(alice.drain().is_empty());
        assert!(bob.drain().is_empty());

        alice.move_to(&clients, 100.0).await;
        let to_alice = alice.drain();
        let to_bob = bob.drain();
        assert_eq!(to_alice.len(), 1);
        assert!(matches!(&to_alice[0], ClientboundPacket::NamedEntitySpawn { name, .. } if name == "Bob"));
        assert_eq!(to_bob.len(), 1);
        assert!(matches!(&to_bob[0], ClientboundPacket::NamedEntitySpawn { name, .. } if name == "Alice"));

        // Bob catching up sees Alice already known: no second spawn.
        bob.move_to(&clients, 199.0).await;
        assert_eq!(
            count(&alice.drain(), |p| matches!(p, ClientboundPacket::NamedEntitySpawn { .. })),
            0
        );
        assert!(bob.drain().is_empty());

        alice.move_to(&clients, 0.0).await;
        let destroy = |p: &ClientboundPacket| matches!(p, ClientboundPacket::DestroyEntity { .. });
        assert_eq!(count(&alice.drain(), destroy), 1);
        assert_eq!(count(&bob.drain(), destroy), 1);
        assert!(!alice.session.knows(bob.session.entity_id).await);
        assert!(!bob.session.knows(alice.session.entity_id).await);
    }

    #[tokio::test]
    async fn test_steady_visibility_sends_moves() {
        let clients = ClientManager::new(4);
        let alice = Peer::join(&clients, "Alice", 0.0).await;
        let mut bob = Peer::join(&clients, "Bob", 10.0).await;
        broadcast_movement(&clients, &alice.session).await;
        bob.drain();

        alice.move_to(&clients, 0.5).await;
        assert_eq!(
            bob.drain(),
            vec![ClientboundPacket::EntityRelativeMove {
                entity_id: alice.session.entity_id,
                dx: 16,
                dy: 0,
                dz: 0
            }]
        );

        alice.move_to(&clients, 8.0).await;
        assert!(matches!(
            bob.drain().as_slice(),
            [ClientboundPacket::EntityTeleport { x: 256, .. }]
        ));
    }

    #[tokio::test]
    async fn test_look_reaches_only_observers() {
        let clients = ClientManager::new(4);
        let alice = Peer::join(&clients, "Alice", 0.0).await;
        let mut near = Peer::join(&clients, "Near", 10.0).await;
        let mut far = Peer::join(&clients, "Far", 1000.0).await;
        broadcast_movement(&clients, &alice.session).await;
        near.drain();

        alice.session.player.write().await.set_rotation(180.0, 0.0);
        broadcast_look(&clients, &alice.session).await;

        assert_eq!(
            near.drain(),
            vec![ClientboundPacket::EntityLook {
                entity_id: alice.session.entity_id,
                yaw: 128,
                pitch: 0
            }]
        );
        assert!(far.drain().is_empty());
        assert!(!alice.session.player.read().await.rotation_dirty);
    }

    #[tokio::test]
    async fn test_despawn_everywhere() {
        let clients = ClientManager::new(4);
        let alice = Peer::join(&clients, "Alice", 0.0).await;
        let mut bob = Peer::join(&clients, "Bob", 10.0).await;
        broadcast_movement(&clients, &alice.session).await;
        bob.drain();

        despawn_everywhere(&clients, &alice.session).await;
        assert_eq!(
            bob.drain(),
            vec![ClientboundPacket::DestroyEntity {
                entity_id: alice.session.entity_id
            }]
        );

        despawn_everywhere(&clients, &alice.session).await;
        assert!(bob.drain().is_empty());
    }

    #[tokio::test]
    async fn test_closing_session_is_not_spawned() {
        let clients = ClientManager::new(4);
        let alice = Peer::join(&clients, "Alice", 0.0).await;
        let mut bob = Peer::join(&clients, "Bob", 10.0).await;

        assert!(alice.session.begin_close());
        broadcast_movement(&clients, &alice.session).await;

        assert!(bob.drain().is_empty());
        assert!(!bob.session.knows(alice.session.entity_id).await);
    }
}
