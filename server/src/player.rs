//! Per-player simulation state owned by a session

use shared::{angle_to_byte, to_fixed_point, ClientboundPacket, PLAYER_EYE_HEIGHT};

pub const SPAWN_HEALTH: i16 = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Where every player starts and where stale-chunk moves are sent back to.
    pub const SPAWN: Position = Position {
        x: 0.0,
        y: 64.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance ignoring height
    pub fn horizontal_distance_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dz = other.z - self.z;
        (dx * dx + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct PlayerState {
    pub username: String,
    pub position: Position,
    pub stance: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
    pub held_slot: i16,
    /// Position peers last heard about
    pub last_broadcast: Position,
    pub last_yaw: f32,
    pub last_pitch: f32,
    /// Rotation changed since the last broadcast
    pub rotation_dirty: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl PlayerState {
    pub fn new(username: String) -> Self {
        Self {
            username,
            position: Position::SPAWN,
            stance: Position::SPAWN.y + PLAYER_EYE_HEIGHT,
            yaw: 0.0,
            pitch: 0.0,
            on_ground: true,
            held_slot: 0,
            last_broadcast: Position::SPAWN,
            last_yaw: 0.0,
            last_pitch: 0.0,
            rotation_dirty: false,
        }
    }

    /// Puts the player back at spawn facing forward.
    ///
    /// The broadcast baseline is left alone so peers get a teleport.
    pub fn reset_to_spawn(&mut self) {
        self.position = Position::SPAWN;
        self.stance = Position::SPAWN.y + PLAYER_EYE_HEIGHT;
        self.set_rotation(0.0, 0.0);
        self.on_ground = true;
    }

    pub fn set_rotation(&mut self, yaw: f32, pitch: f32) {
        if yaw != self.yaw || pitch != self.pitch {
            self.rotation_dirty = true;
        }
        self.yaw = yaw;
        self.pitch = pitch;
    }

    /// Records the current position and rotation as what peers have seen.
    pub fn mark_broadcast(&mut self) {
        self.last_broadcast = self.position;
        self.mark_rotation_broadcast();
    }

    pub fn mark_rotation_broadcast(&mut self) {
        self.last_yaw = self.yaw;
        self.last_pitch = self.pitch;
        self.rotation_dirty = false;
    }

    /// The authoritative position packet sent to the player themself.
    pub fn position_packet(&self) -> ClientboundPacket {
        ClientboundPacket::PlayerPositionAndLook {
            x: self.position.x,
            stance: self.stance,
            y: self.position.y,
            z: self.position.z,
            yaw: self.yaw,
            pitch: self.pitch,
            on_ground: self.on_ground,
        }
    }

    /// Introduces this player to someone else.
    pub fn spawn_packet(&self, entity_id: i32) -> ClientboundPacket {
        ClientboundPacket::NamedEntitySpawn {
            entity_id,
            name: self.username.clone(),
            x: to_fixed_point(self.position.x),
            y: to_fixed_point(self.position.y),
            z: to_fixed_point(self.position.z),
            yaw: angle_to_byte(self.yaw),
            pitch: angle_to_byte(self.pitch),
            // Inventory is not simulated, so everyone holds nothing.
            current_item: 0,
        }
    }

    pub fn teleport_packet(&self, entity_id: i32) -> ClientboundPacket {
        ClientboundPacket::EntityTeleport {
            entity_id,
            x: to_fixed_point(self.position.x),
            y: to_fixed_point(self.position.y),
            z: to_fixed_point(self.position.z),
            yaw: angle_to_byte(self.yaw),
            pitch: angle_to_byte(self.pitch),
        }
    }

    pub fn look_packet(&self, entity_id: i32) -> ClientboundPacket {
        ClientboundPacket::EntityLook {
            entity_id,
            yaw: angle_to_byte(self.yaw),
            pitch: angle_to_byte(self.pitch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_new_player_at_spawn() {
        let player = PlayerState::new("Alice".to_string());
        assert_eq!(player.position, Position::SPAWN);
        assert_approx_eq!(player.stance, 65.62);
        assert!(!player.rotation_dirty);
    }

    #[test]
    fn test_position_packet_matches_login_sequence() {
        let player = PlayerState::new("Alice".to_string());
        assert_eq!(
            player.position_packet(),
            ClientboundPacket::PlayerPositionAndLook {
                x: 0.0,
                stance: 64.0 + PLAYER_EYE_HEIGHT,
                y: 64.0,
                z: 0.0,
                yaw: 0.0,
                pitch: 0.0,
                on_ground: true,
            }
        );
    }

    #[test]
    fn test_rotation_dirty_only_on_change() {
        let mut player = PlayerState::new("Alice".to_string());
        player.set_rotation(0.0, 0.0);
        assert!(!player.rotation_dirty);

        player.set_rotation(90.0, 0.0);
        assert!(player.rotation_dirty);

        player.mark_broadcast();
        assert!(!player.rotation_dirty);
        assert_eq!(player.last_yaw, 90.0);
    }

    #[test]
    fn test_spawn_packet_fixed_point() {
        let mut player = PlayerState::new("Bob".to_string());
        player.position = Position::new(1.5, 64.0, -2.0);
        player.yaw = 180.0;

        assert_eq!(
            player.spawn_packet(3),
            ClientboundPacket::NamedEntitySpawn {
                entity_id: 3,
                name: "Bob".to_string(),
                x: 48,
                y: 2048,
                z: -64,
                yaw: 128,
                pitch: 0,
                current_item: 0,
            }
        );
    }

    #[test]
    fn test_distances() {
        let a = Position::new(0.0, 64.0, 0.0);
        let b = Position::new(3.0, 68.0, 4.0);
        assert_approx_eq!(a.distance_to(&b), 41f64.sqrt());
        assert_approx_eq!(a.horizontal_distance_to(&b), 5.0);
    }
}
