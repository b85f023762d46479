//! Wire protocol shared by the server and the client
//!
//! Packet layouts live in [`packets`], field primitives in [`codec`]. This
//! module holds the protocol constants and the coordinate conversions both
//! sides agree on.

pub mod codec;
pub mod packets;

pub use codec::ProtocolError;
pub use packets::{ClientboundPacket, ServerboundPacket};

pub const PROTOCOL_VERSION: i32 = 14;
pub const MAX_USERNAME_LENGTH: usize = 16;
pub const MAX_CHAT_LENGTH: usize = 119;

pub const CHUNK_WIDTH: usize = 16;
pub const CHUNK_HEIGHT: usize = 128;
pub const CHUNK_DEPTH: usize = 16;

/// Distance from a player's feet to their eyes.
pub const PLAYER_EYE_HEIGHT: f64 = 1.62;

/// Integer column coordinate of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing the world position (`x`, `z`).
    pub fn containing(x: f64, z: f64) -> Self {
        Self {
            x: (x.floor() as i32) >> 4,
            z: (z.floor() as i32) >> 4,
        }
    }

    /// Chunk containing the block (`x`, `z`).
    pub fn of_block(x: i32, z: i32) -> Self {
        Self {
            x: x >> 4,
            z: z >> 4,
        }
    }

    /// Every chunk in the square of `radius` chunks around `self`, inclusive.
    pub fn square_around(self, radius: i32) -> impl Iterator<Item = ChunkPos> {
        (self.x - radius..=self.x + radius)
            .flat_map(move |x| (self.z - radius..=self.z + radius).map(move |z| ChunkPos { x, z }))
    }
}

/// Converts a world coordinate to the protocol's 1/32-block fixed point.
pub fn to_fixed_point(value: f64) -> i32 {
    (value * 32.0).floor() as i32
}

pub fn from_fixed_point(value: i32) -> f64 {
    value as f64 / 32.0
}

/// Converts degrees to 256ths of a full turn, wrapping.
pub fn angle_to_byte(degrees: f32) -> u8 {
    (degrees * 256.0 / 360.0) as i32 as u8
}

pub fn byte_to_angle(value: u8) -> f32 {
    value as f32 * 360.0 / 256.0
}
