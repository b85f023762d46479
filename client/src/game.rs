//! Client-side mirror of what the server has streamed
//!
//! Applying every received packet to a [`ClientWorld`] reconstructs the
//! client's view: its own position, loaded chunks, spawned players, chat and
//! the reason it was kicked, if it was.

use flate2::read::ZlibDecoder;
use log::warn;
use shared::{
    byte_to_angle, from_fixed_point, ChunkPos, ClientboundPacket, CHUNK_DEPTH, CHUNK_HEIGHT,
    CHUNK_WIDTH,
};
use std::collections::{HashMap, HashSet};
use std::io::Read;

/// Another player as this client sees them. Coordinates stay in the wire's
/// fixed-point units so relative moves add up exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub yaw: u8,
    pub pitch: u8,
}

impl RemotePlayer {
    pub fn position(&self) -> (f64, f64, f64) {
        (
            from_fixed_point(self.x),
            from_fixed_point(self.y),
            from_fixed_point(self.z),
        )
    }

    pub fn yaw_degrees(&self) -> f32 {
        byte_to_angle(self.yaw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OwnPosition {
    pub x: f64,
    pub y: f64,
    pub stance: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

#[derive(Debug, Default)]
pub struct ClientWorld {
    pub entity_id: Option<i32>,
    pub position: Option<OwnPosition>,
    pub spawn: Option<(i32, i32, i32)>,
    pub health: Option<i16>,
    pub time: Option<i64>,
    /// Chunks announced by PreChunk, data or not
    pub announced: HashSet<ChunkPos>,
    /// Decompressed chunk blobs
    pub chunks: HashMap<ChunkPos, Vec<u8>>,
    pub players: HashMap<i32, RemotePlayer>,
    pub chat: Vec<String>,
    pub disconnect_reason: Option<String>,
}

impl ClientWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, packet: &ClientboundPacket) {
        match packet {
            ClientboundPacket::LoginResponse { entity_id, .. } => self.entity_id = Some(*entity_id),
            ClientboundPacket::SpawnPosition { x, y, z } => self.spawn = Some((*x, *y, *z)),
            ClientboundPacket::TimeUpdate { time } => self.time = Some(*time),
            ClientboundPacket::UpdateHealth { health } => self.health = Some(*health),
            ClientboundPacket::PlayerPositionAndLook {
                x,
                stance,
                y,
                z,
                yaw,
                pitch,
                ..
            } => {
                self.position = Some(OwnPosition {
                    x: *x,
                    y: *y,
                    stance: *stance,
                    z: *z,
                    yaw: *yaw,
                    pitch: *pitch,
                })
            }
            ClientboundPacket::Chat { message } => self.chat.push(message.clone()),
            ClientboundPacket::PreChunk { x, z, load } => {
                let pos = ChunkPos::new(*x, *z);
                if *load {
                    self.announced.insert(pos);
                } else {
                    self.announced.remove(&pos);
                    self.chunks.remove(&pos);
                }
            }
            ClientboundPacket::MapChunk { x, z, data, .. } => {
                let pos = ChunkPos::of_block(*x, *z);
                match decompress(data) {
                    Ok(blob) => {
                        self.chunks.insert(pos, blob);
                    }
                    Err(e) => warn!("Dropping chunk ({}, {}): {}", pos.x, pos.z, e),
                }
            }
            ClientboundPacket::BlockChange {
                x, y, z, block_type, ..
            } => {
                if let Some((chunk, index)) = self.locate_mut(*x, *y as i32, *z) {
                    chunk[index] = *block_type;
                }
            }
            ClientboundPacket::NamedEntitySpawn {
                entity_id,
                name,
                x,
                y,
                z,
                yaw,
                pitch,
                ..
            } => {
                self.players.insert(
                    *entity_id,
                    RemotePlayer {
                        name: name.clone(),
                        x: *x,
                        y: *y,
                        z: *z,
                        yaw: *yaw,
                        pitch: *pitch,
                    },
                );
            }
            ClientboundPacket::DestroyEntity { entity_id } => {
                self.players.remove(entity_id);
            }
            ClientboundPacket::EntityRelativeMove {
                entity_id,
                dx,
                dy,
                dz,
            } => {
                if let Some(player) = self.players.get_mut(entity_id) {
                    player.x += *dx as i32;
                    player.y += *dy as i32;
                    player.z += *dz as i32;
                }
            }
            ClientboundPacket::EntityLook {
                entity_id,
                yaw,
                pitch,
            } => {
                if let Some(player) = self.players.get_mut(entity_id) {
                    player.yaw = *yaw;
                    player.pitch = *pitch;
                }
            }
            ClientboundPacket::EntityTeleport {
                entity_id,
                x,
                y,
                z,
                yaw,
                pitch,
            } => {
                if let Some(player) = self.players.get_mut(entity_id) {
                    player.x = *x;
                    player.y = *y;
                    player.z = *z;
                    player.yaw = *yaw;
                    player.pitch = *pitch;
                }
            }
            ClientboundPacket::Disconnect { reason } => self.disconnect_reason = Some(reason.clone()),
            ClientboundPacket::KeepAlive | ClientboundPacket::Handshake { .. } => {}
        }
    }

    /// Block type at a world position, if its chunk is loaded.
    pub fn block_at(&self, x: i32, y: i32, z: i32) -> Option<u8> {
        if !(0..CHUNK_HEIGHT as i32).contains(&y) {
            return None;
        }
        let chunk = self.chunks.get(&ChunkPos::of_block(x, z))?;
        chunk.get(local_index(x, y, z)).copied()
    }

    pub fn player_named(&self, name: &str) -> Option<(i32, &RemotePlayer)> {
        self.players
            .iter()
            .find(|(_, player)| player.name == name)
            .map(|(id, player)| (*id, player))
    }

    fn locate_mut(&mut self, x: i32, y: i32, z: i32) -> Option<(&mut Vec<u8>, usize)> {
        if !(0..CHUNK_HEIGHT as i32).contains(&y) {
            return None;
        }
        let index = local_index(x, y, z);
        self.chunks
            .get_mut(&ChunkPos::of_block(x, z))
            .filter(|chunk| index < chunk.len())
            .map(|chunk| (chunk, index))
    }
}

fn local_index(x: i32, y: i32, z: i32) -> usize {
    let local_x = x.rem_euclid(CHUNK_WIDTH as i32) as usize;
    let local_z = z.rem_euclid(CHUNK_DEPTH as i32) as usize;
    y as usize + local_z * CHUNK_HEIGHT + local_x * CHUNK_HEIGHT * CHUNK_DEPTH
}

fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut blob = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut blob)?;
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn compressed_chunk(fill: u8) -> Vec<u8> {
        let blob = vec![fill; CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_DEPTH];
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&blob).unwrap();
        encoder.finish().unwrap()
    }

    fn spawn(entity_id: i32, name: &str) -> ClientboundPacket {
        ClientboundPacket::NamedEntitySpawn {
            entity_id,
            name: name.to_string(),
            x: 0,
            y: 2048,
            z: 0,
            yaw: 0,
            pitch: 0,
            current_item: 0,
        }
    }

    #[test]
    fn test_chunk_load_and_unload() {
        let mut world = ClientWorld::new();
        world.apply(&ClientboundPacket::PreChunk { x: -1, z: 2, load: true });
        world.apply(&ClientboundPacket::map_chunk(-1, 2, compressed_chunk(3)));

        assert!(world.announced.contains(&ChunkPos::new(-1, 2)));
        assert_eq!(world.block_at(-16, 10, 32), Some(3));
        assert_eq!(world.block_at(0, 10, 32), None);

        world.apply(&ClientboundPacket::BlockChange {
            x: -1,
            y: 10,
            z: 33,
            block_type: 7,
            metadata: 0,
        });
        assert_eq!(world.block_at(-1, 10, 33), Some(7));

        world.apply(&ClientboundPacket::PreChunk { x: -1, z: 2, load: false });
        assert!(world.chunks.is_empty());
        assert!(world.announced.is_empty());
    }

    #[test]
    fn test_relative_moves_accumulate() {
        let mut world = ClientWorld::new();
        world.apply(&spawn(4, "Bob"));
        for _ in 0..3 {
            world.apply(&ClientboundPacket::EntityRelativeMove {
                entity_id: 4,
                dx: 32,
                dy: 0,
                dz: -16,
            });
        }

        let (x, y, z) = world.players[&4].position();
        assert_eq!((x, y, z), (3.0, 64.0, -1.5));
    }

    #[test]
    fn test_teleport_look_and_destroy() {
        let mut world = ClientWorld::new();
        world.apply(&spawn(4, "Bob"));
        world.apply(&ClientboundPacket::EntityTeleport {
            entity_id: 4,
            x: 320,
            y: 2048,
            z: 64,
            yaw: 64,
            pitch: 0,
        });
        world.apply(&ClientboundPacket::EntityLook {
            entity_id: 4,
            yaw: 128,
            pitch: 10,
        });

        let (id, bob) = world.player_named("Bob").unwrap();
        assert_eq!(id, 4);
        assert_eq!(bob.position(), (10.0, 64.0, 2.0));
        assert_approx_eq!(bob.yaw_degrees(), 180.0);

        world.apply(&ClientboundPacket::DestroyEntity { entity_id: 4 });
        assert!(world.players.is_empty());
    }

    #[test]
    fn test_login_fields_and_disconnect() {
        let mut world = ClientWorld::new();
        world.apply(&ClientboundPacket::LoginResponse {
            entity_id: 1,
            unused: String::new(),
            map_seed: 0,
            dimension: 0,
        });
        world.apply(&ClientboundPacket::UpdateHealth { health: 20 });
        world.apply(&ClientboundPacket::Disconnect {
            reason: "Server closed".to_string(),
        });

        assert_eq!(world.entity_id, Some(1));
        assert_eq!(world.health, Some(20));
        assert_eq!(world.disconnect_reason.as_deref(), Some("Server closed"));
    }

    #[test]
    fn test_corrupt_chunk_is_ignored() {
        let mut world = ClientWorld::new();
        world.apply(&ClientboundPacket::map_chunk(0, 0, vec![1, 2, 3]));
        assert!(world.chunks.is_empty());
    }
}
