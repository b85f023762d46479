//! Packet catalog for both directions of the protocol
//!
//! Every packet starts with a one-byte id. Serverbound and clientbound packets
//! are separate sum types: several kinds share an id but not a layout (the
//! position-and-look packet orders stance and Y differently per direction),
//! so the direction is part of the type rather than a runtime flag.

use crate::codec::{read_bool, read_payload, read_string16, ProtocolError, WireWrite};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Packet id bytes
pub mod id {
    pub const KEEP_ALIVE: u8 = 0x00;
    pub const LOGIN: u8 = 0x01;
    pub const HANDSHAKE: u8 = 0x02;
    pub const CHAT: u8 = 0x03;
    pub const TIME_UPDATE: u8 = 0x04;
    pub const SPAWN_POSITION: u8 = 0x06;
    pub const UPDATE_HEALTH: u8 = 0x08;
    pub const FLYING: u8 = 0x0A;
    pub const PLAYER_POSITION: u8 = 0x0B;
    pub const PLAYER_LOOK: u8 = 0x0C;
    pub const PLAYER_POSITION_LOOK: u8 = 0x0D;
    pub const HOLDING_CHANGE: u8 = 0x10;
    pub const NAMED_ENTITY_SPAWN: u8 = 0x14;
    pub const DESTROY_ENTITY: u8 = 0x1D;
    pub const ENTITY_RELATIVE_MOVE: u8 = 0x1F;
    pub const ENTITY_LOOK: u8 = 0x20;
    pub const ENTITY_TELEPORT: u8 = 0x22;
    pub const PRE_CHUNK: u8 = 0x32;
    pub const MAP_CHUNK: u8 = 0x33;
    pub const BLOCK_CHANGE: u8 = 0x35;
    pub const DISCONNECT: u8 = 0xFF;
}

/// Packets sent by the client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerboundPacket {
    KeepAlive,
    LoginRequest {
        protocol_version: i32,
        username: String,
        map_seed: i64,
        dimension: i8,
    },
    Handshake {
        username: String,
    },
    Chat {
        message: String,
    },
    Flying {
        on_ground: bool,
    },
    PlayerPosition {
        x: f64,
        y: f64,
        stance: f64,
        z: f64,
        on_ground: bool,
    },
    PlayerLook {
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    /// Client order: X, Y, Stance, Z.
    PlayerPositionAndLook {
        x: f64,
        y: f64,
        stance: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    HoldingChange {
        slot: i16,
    },
    Disconnect {
        reason: String,
    },
}

impl ServerboundPacket {
    pub fn id(&self) -> u8 {
        match self {
            ServerboundPacket::KeepAlive => id::KEEP_ALIVE,
            ServerboundPacket::LoginRequest { .. } => id::LOGIN,
            ServerboundPacket::Handshake { .. } => id::HANDSHAKE,
            ServerboundPacket::Chat { .. } => id::CHAT,
            ServerboundPacket::Flying { .. } => id::FLYING,
            ServerboundPacket::PlayerPosition { .. } => id::PLAYER_POSITION,
            ServerboundPacket::PlayerLook { .. } => id::PLAYER_LOOK,
            ServerboundPacket::PlayerPositionAndLook { .. } => id::PLAYER_POSITION_LOOK,
            ServerboundPacket::HoldingChange { .. } => id::HOLDING_CHANGE,
            ServerboundPacket::Disconnect { .. } => id::DISCONNECT,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.id());
        match self {
            ServerboundPacket::KeepAlive => {}
            ServerboundPacket::LoginRequest {
                protocol_version,
                username,
                map_seed,
                dimension,
            } => {
                buf.put_i32(*protocol_version);
                buf.put_string16(username);
                buf.put_i64(*map_seed);
                buf.put_i8(*dimension);
            }
            ServerboundPacket::Handshake { username } => buf.put_string16(username),
            ServerboundPacket::Chat { message } => buf.put_string16(message),
            ServerboundPacket::Flying { on_ground } => buf.put_bool(*on_ground),
            ServerboundPacket::PlayerPosition {
                x,
                y,
                stance,
                z,
                on_ground,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*stance);
                buf.put_f64(*z);
                buf.put_bool(*on_ground);
            }
            ServerboundPacket::PlayerLook {
                yaw,
                pitch,
                on_ground,
            } => {
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_bool(*on_ground);
            }
            ServerboundPacket::PlayerPositionAndLook {
                x,
                y,
                stance,
                z,
                yaw,
                pitch,
                on_ground,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*stance);
                buf.put_f64(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_bool(*on_ground);
            }
            ServerboundPacket::HoldingChange { slot } => buf.put_i16(*slot),
            ServerboundPacket::Disconnect { reason } => buf.put_string16(reason),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Reads one packet, tag byte first.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let tag = reader.read_u8().await?;
        let packet = match tag {
            id::KEEP_ALIVE => ServerboundPacket::KeepAlive,
            id::LOGIN => ServerboundPacket::LoginRequest {
                protocol_version: reader.read_i32().await?,
                username: read_string16(reader).await?,
                map_seed: reader.read_i64().await?,
                dimension: reader.read_i8().await?,
            },
            id::HANDSHAKE => ServerboundPacket::Handshake {
                username: read_string16(reader).await?,
            },
            id::CHAT => ServerboundPacket::Chat {
                message: read_string16(reader).await?,
            },
            id::FLYING => ServerboundPacket::Flying {
                on_ground: read_bool(reader).await?,
            },
            id::PLAYER_POSITION => ServerboundPacket::PlayerPosition {
                x: reader.read_f64().await?,
                y: reader.read_f64().await?,
                stance: reader.read_f64().await?,
                z: reader.read_f64().await?,
                on_ground: read_bool(reader).await?,
            },
            id::PLAYER_LOOK => ServerboundPacket::PlayerLook {
                yaw: reader.read_f32().await?,
                pitch: reader.read_f32().await?,
                on_ground: read_bool(reader).await?,
            },
            id::PLAYER_POSITION_LOOK => ServerboundPacket::PlayerPositionAndLook {
                x: reader.read_f64().await?,
                y: reader.read_f64().await?,
                stance: reader.read_f64().await?,
                z: reader.read_f64().await?,
                yaw: reader.read_f32().await?,
                pitch: reader.read_f32().await?,
                on_ground: read_bool(reader).await?,
            },
            id::HOLDING_CHANGE => ServerboundPacket::HoldingChange {
                slot: reader.read_i16().await?,
            },
            id::DISCONNECT => ServerboundPacket::Disconnect {
                reason: read_string16(reader).await?,
            },
            other => return Err(ProtocolError::UnknownPacket(other)),
        };
        Ok(packet)
    }
}

/// Packets sent by the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientboundPacket {
    KeepAlive,
    LoginResponse {
        entity_id: i32,
        unused: String,
        map_seed: i64,
        dimension: i8,
    },
    Handshake {
        connection_hash: String,
    },
    Chat {
        message: String,
    },
    TimeUpdate {
        time: i64,
    },
    SpawnPosition {
        x: i32,
        y: i32,
        z: i32,
    },
    UpdateHealth {
        health: i16,
    },
    /// Server order: X, Stance, Y, Z.
    PlayerPositionAndLook {
        x: f64,
        stance: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    /// Coordinates are fixed-point (×32), angles in 256ths of a turn.
    NamedEntitySpawn {
        entity_id: i32,
        name: String,
        x: i32,
        y: i32,
        z: i32,
        yaw: u8,
        pitch: u8,
        current_item: i16,
    },
    DestroyEntity {
        entity_id: i32,
    },
    EntityRelativeMove {
        entity_id: i32,
        dx: i8,
        dy: i8,
        dz: i8,
    },
    EntityLook {
        entity_id: i32,
        yaw: u8,
        pitch: u8,
    },
    EntityTeleport {
        entity_id: i32,
        x: i32,
        y: i32,
        z: i32,
        yaw: u8,
        pitch: u8,
    },
    /// `load == false` tells the client to drop the column.
    PreChunk {
        x: i32,
        z: i32,
        load: bool,
    },
    /// `x`/`z` are block coordinates (chunk × 16); sizes are stored minus one.
    MapChunk {
        x: i32,
        y: i16,
        z: i32,
        size_x: u8,
        size_y: u8,
        size_z: u8,
        data: Vec<u8>,
    },
    BlockChange {
        x: i32,
        y: u8,
        z: i32,
        block_type: u8,
        metadata: u8,
    },
    Disconnect {
        reason: String,
    },
}

impl ClientboundPacket {
    /// Builds a full-column MapChunk for chunk (`chunk_x`, `chunk_z`).
    pub fn map_chunk(chunk_x: i32, chunk_z: i32, compressed: Vec<u8>) -> Self {
        ClientboundPacket::MapChunk {
            x: chunk_x * crate::CHUNK_WIDTH as i32,
            y: 0,
            z: chunk_z * crate::CHUNK_DEPTH as i32,
            size_x: (crate::CHUNK_WIDTH - 1) as u8,
            size_y: (crate::CHUNK_HEIGHT - 1) as u8,
            size_z: (crate::CHUNK_DEPTH - 1) as u8,
            data: compressed,
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            ClientboundPacket::KeepAlive => id::KEEP_ALIVE,
            ClientboundPacket::LoginResponse { .. } => id::LOGIN,
            ClientboundPacket::Handshake { .. } => id::HANDSHAKE,
            ClientboundPacket::Chat { .. } => id::CHAT,
            ClientboundPacket::TimeUpdate { .. } => id::TIME_UPDATE,
            ClientboundPacket::SpawnPosition { .. } => id::SPAWN_POSITION,
            ClientboundPacket::UpdateHealth { .. } => id::UPDATE_HEALTH,
            ClientboundPacket::PlayerPositionAndLook { .. } => id::PLAYER_POSITION_LOOK,
            ClientboundPacket::NamedEntitySpawn { .. } => id::NAMED_ENTITY_SPAWN,
            ClientboundPacket::DestroyEntity { .. } => id::DESTROY_ENTITY,
            ClientboundPacket::EntityRelativeMove { .. } => id::ENTITY_RELATIVE_MOVE,
            ClientboundPacket::EntityLook { .. } => id::ENTITY_LOOK,
            ClientboundPacket::EntityTeleport { .. } => id::ENTITY_TELEPORT,
            ClientboundPacket::PreChunk { .. } => id::PRE_CHUNK,
            ClientboundPacket::MapChunk { .. } => id::MAP_CHUNK,
            ClientboundPacket::BlockChange { .. } => id::BLOCK_CHANGE,
            ClientboundPacket::Disconnect { .. } => id::DISCONNECT,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.id());
        match self {
            ClientboundPacket::KeepAlive => {}
            ClientboundPacket::LoginResponse {
                entity_id,
                unused,
                map_seed,
                dimension,
            } => {
                buf.put_i32(*entity_id);
                buf.put_string16(unused);
                buf.put_i64(*map_seed);
                buf.put_i8(*dimension);
            }
            ClientboundPacket::Handshake { connection_hash } => buf.put_string16(connection_hash),
            ClientboundPacket::Chat { message } => buf.put_string16(message),
            ClientboundPacket::TimeUpdate { time } => buf.put_i64(*time),
            ClientboundPacket::SpawnPosition { x, y, z } => {
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
            }
            ClientboundPacket::UpdateHealth { health } => buf.put_i16(*health),
            ClientboundPacket::PlayerPositionAndLook {
                x,
                stance,
                y,
                z,
                yaw,
                pitch,
                on_ground,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*stance);
                buf.put_f64(*y);
                buf.put_f64(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_bool(*on_ground);
            }
            ClientboundPacket::NamedEntitySpawn {
                entity_id,
                name,
                x,
                y,
                z,
                yaw,
                pitch,
                current_item,
            } => {
                buf.put_i32(*entity_id);
                buf.put_string16(name);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
                buf.put_i16(*current_item);
            }
            ClientboundPacket::DestroyEntity { entity_id } => buf.put_i32(*entity_id),
            ClientboundPacket::EntityRelativeMove {
                entity_id,
                dx,
                dy,
                dz,
            } => {
                buf.put_i32(*entity_id);
                buf.put_i8(*dx);
                buf.put_i8(*dy);
                buf.put_i8(*dz);
            }
            ClientboundPacket::EntityLook {
                entity_id,
                yaw,
                pitch,
            } => {
                buf.put_i32(*entity_id);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
            }
            ClientboundPacket::EntityTeleport {
                entity_id,
                x,
                y,
                z,
                yaw,
                pitch,
            } => {
                buf.put_i32(*entity_id);
                buf.put_i32(*x);
                buf.put_i32(*y);
                buf.put_i32(*z);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
            }
            ClientboundPacket::PreChunk { x, z, load } => {
                buf.put_i32(*x);
                buf.put_i32(*z);
                buf.put_bool(*load);
            }
            ClientboundPacket::MapChunk {
                x,
                y,
                z,
                size_x,
                size_y,
                size_z,
                data,
            } => {
                buf.put_i32(*x);
                buf.put_i16(*y);
                buf.put_i32(*z);
                buf.put_u8(*size_x);
                buf.put_u8(*size_y);
                buf.put_u8(*size_z);
                buf.put_i32(data.len() as i32);
                buf.put_slice(data);
            }
            ClientboundPacket::BlockChange {
                x,
                y,
                z,
                block_type,
                metadata,
            } => {
                buf.put_i32(*x);
                buf.put_u8(*y);
                buf.put_i32(*z);
                buf.put_u8(*block_type);
                buf.put_u8(*metadata);
            }
            ClientboundPacket::Disconnect { reason } => buf.put_string16(reason),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Reads one packet, tag byte first.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let tag = reader.read_u8().await?;
        let packet = match tag {
            id::KEEP_ALIVE => ClientboundPacket::KeepAlive,
            id::LOGIN => ClientboundPacket::LoginResponse {
                entity_id: reader.read_i32().await?,
                unused: read_string16(reader).await?,
                map_seed: reader.read_i64().await?,
                dimension: reader.read_i8().await?,
            },
            id::HANDSHAKE => ClientboundPacket::Handshake {
                connection_hash: read_string16(reader).await?,
            },
            id::CHAT => ClientboundPacket::Chat {
                message: read_string16(reader).await?,
            },
            id::TIME_UPDATE => ClientboundPacket::TimeUpdate {
                time: reader.read_i64().await?,
            },
            id::SPAWN_POSITION => ClientboundPacket::SpawnPosition {
                x: reader.read_i32().await?,
                y: reader.read_i32().await?,
                z: reader.read_i32().await?,
            },
            id::UPDATE_HEALTH => ClientboundPacket::UpdateHealth {
                health: reader.read_i16().await?,
            },
            id::PLAYER_POSITION_LOOK => ClientboundPacket::PlayerPositionAndLook {
                x: reader.read_f64().await?,
                stance: reader.read_f64().await?,
                y: reader.read_f64().await?,
                z: reader.read_f64().await?,
                yaw: reader.read_f32().await?,
                pitch: reader.read_f32().await?,
                on_ground: read_bool(reader).await?,
            },
            id::NAMED_ENTITY_SPAWN => ClientboundPacket::NamedEntitySpawn {
                entity_id: reader.read_i32().await?,
                name: read_string16(reader).await?,
                x: reader.read_i32().await?,
                y: reader.read_i32().await?,
                z: reader.read_i32().await?,
                yaw: reader.read_u8().await?,
                pitch: reader.read_u8().await?,
                current_item: reader.read_i16().await?,
            },
            id::DESTROY_ENTITY => ClientboundPacket::DestroyEntity {
                entity_id: reader.read_i32().await?,
            },
            id::ENTITY_RELATIVE_MOVE => ClientboundPacket::EntityRelativeMove {
                entity_id: reader.read_i32().await?,
                dx: reader.read_i8().await?,
                dy: reader.read_i8().await?,
                dz: reader.read_i8().await?,
            },
            id::ENTITY_LOOK => ClientboundPacket::EntityLook {
                entity_id: reader.read_i32().await?,
                yaw: reader.read_u8().await?,
                pitch: reader.read_u8().await?,
            },
            id::ENTITY_TELEPORT => ClientboundPacket::EntityTeleport {
                entity_id: reader.read_i32().await?,
                x: reader.read_i32().await?,
                y: reader.read_i32().await?,
                z: reader.read_i32().await?,
                yaw: reader.read_u8().await?,
                pitch: reader.read_u8().await?,
            },
            id::PRE_CHUNK => ClientboundPacket::PreChunk {
                x: reader.read_i32().await?,
                z: reader.read_i32().await?,
                load: read_bool(reader).await?,
            },
            id::MAP_CHUNK => ClientboundPacket::MapChunk {
                x: reader.read_i32().await?,
                y: reader.read_i16().await?,
                z: reader.read_i32().await?,
                size_x: reader.read_u8().await?,
                size_y: reader.read_u8().await?,
                size_z: reader.read_u8().await?,
                data: read_payload(reader).await?,
            },
            id::BLOCK_CHANGE => ClientboundPacket::BlockChange {
                x: reader.read_i32().await?,
                y: reader.read_u8().await?,
                z: reader.read_i32().await?,
                block_type: reader.read_u8().await?,
                metadata: reader.read_u8().await?,
            },
            id::DISCONNECT => ClientboundPacket::Disconnect {
                reason: read_string16(reader).await?,
            },
            other => return Err(ProtocolError::UnknownPacket(other)),
        };
        Ok(packet)
    }
}
