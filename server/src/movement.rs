//! Movement validation
//!
//! Checks run in a fixed order and the first failure wins:
//! 1. every coordinate is finite
//! 2. stance sits 0.1 to 1.65 above y
//! 3. the move covers at most 100 blocks
//! 4. the destination lies inside the world border
//! 5. the destination chunk is loaded for this player
//!
//! Only the last check is recoverable: the player is sent back to spawn
//! instead of being kicked.

use crate::error::DisconnectReason;
use crate::player::Position;

pub const MIN_STANCE_OFFSET: f64 = 0.1;
pub const MAX_STANCE_OFFSET: f64 = 1.65;
/// Slack for rounding in `stance - y` at large heights
const STANCE_TOLERANCE: f64 = 1e-9;
pub const MAX_MOVE_DISTANCE: f64 = 100.0;
pub const WORLD_BORDER: f64 = 3.2e7;
pub const MIN_Y: f64 = 0.0;
pub const MAX_Y: f64 = 256.0;

/// A position update as received from the client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRequest {
    pub x: f64,
    pub y: f64,
    pub stance: f64,
    pub z: f64,
}

impl MoveRequest {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

/// Outcome of a move that did not end the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveVerdict {
    Accept,
    /// Destination chunk is not loaded; send the player back to spawn.
    SnapToSpawn,
}

/// Validates a move from `last`, the last accepted position.
///
/// `chunk_loaded` says whether the destination chunk is subscribed for this
/// player; it only matters once every other check has passed.
pub fn validate(
    last: &Position,
    request: &MoveRequest,
    chunk_loaded: bool,
) -> Result<MoveVerdict, DisconnectReason> {
    let MoveRequest { x, y, stance, z } = *request;

    if ![x, y, stance, z].iter().all(|v| v.is_finite()) {
        return Err(DisconnectReason::invalid_position());
    }

    let offset = stance - y;
    if !(MIN_STANCE_OFFSET - STANCE_TOLERANCE..=MAX_STANCE_OFFSET + STANCE_TOLERANCE).contains(&offset) {
        return Err(DisconnectReason::illegal_stance());
    }

    if last.distance_to(&request.position()) > MAX_MOVE_DISTANCE {
        return Err(DisconnectReason::moved_too_quickly());
    }

    if x.abs() > WORLD_BORDER || z.abs() > WORLD_BORDER || !(MIN_Y..=MAX_Y).contains(&y) {
        return Err(DisconnectReason::illegal_position());
    }

    if !chunk_loaded {
        return Ok(MoveVerdict::SnapToSpawn);
    }

    Ok(MoveVerdict::Accept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(x: f64, y: f64, z: f64, stance_offset: f64) -> MoveRequest {
        MoveRequest {
            x,
            y,
            stance: y + stance_offset,
            z,
        }
    }

    #[test]
    fn test_accepts_normal_walk() {
        let last = Position::SPAWN;
        let verdict = validate(&last, &request(0.3, 64.0, 0.2, 1.62), true);
        assert_eq!(verdict, Ok(MoveVerdict::Accept));
    }

    #[test]
    fn test_rejects_non_finite() {
        let last = Position::SPAWN;
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(
                validate(&last, &request(bad, 64.0, 0.0, 1.62), true),
                Err(DisconnectReason::invalid_position())
            );
        }
        let nan_stance = MoveRequest {
            x: 0.0,
            y: 64.0,
            stance: f64::NAN,
            z: 0.0,
        };
        assert_eq!(
            validate(&last, &nan_stance, true),
            Err(DisconnectReason::invalid_position())
        );
    }

    #[test]
    fn test_stance_boundaries() {
        let last = Position::new(0.0, 0.0, 0.0);
        assert_eq!(validate(&last, &request(0.0, 0.0, 0.0, 0.1), true), Ok(MoveVerdict::Accept));
        assert_eq!(validate(&last, &request(0.0, 0.0, 0.0, 1.65), true), Ok(MoveVerdict::Accept));

        // 64.1 - 64.0 rounds to just under 0.1.
        let ground = Position::SPAWN;
        for stance in [64.1, 65.65] {
            let at_ground = MoveRequest {
                x: 0.0,
                y: 64.0,
                stance,
                z: 0.0,
            };
            assert_eq!(validate(&ground, &at_ground, true), Ok(MoveVerdict::Accept));
        }

        for offset in [0.09, 1.66, -1.0, 0.0, 5.0] {
            assert_eq!(
                validate(&last, &request(0.0, 0.0, 0.0, offset), true),
                Err(DisconnectReason::illegal_stance()),
                "offset {}",
                offset
            );
        }
    }

    #[test]
    fn test_move_distance_limit() {
        let last = Position::new(0.0, 64.0, 0.0);
        assert_eq!(
            validate(&last, &request(100.0, 64.0, 0.0, 1.62), true),
            Ok(MoveVerdict::Accept)
        );
        assert_eq!(
            validate(&last, &request(100.01, 64.0, 0.0, 1.62), true),
            Err(DisconnectReason::moved_too_quickly())
        );
        assert_eq!(
            validate(&last, &request(60.0, 64.0, 80.1, 1.62), true),
            Err(DisconnectReason::moved_too_quickly())
        );
    }

    #[test]
    fn test_world_border() {
        let last = Position::new(WORLD_BORDER - 10.0, 64.0, 0.0);
        assert_eq!(
            validate(&last, &request(WORLD_BORDER, 64.0, 0.0, 1.62), true),
            Ok(MoveVerdict::Accept)
        );
        assert_eq!(
            validate(&last, &request(WORLD_BORDER + 1.0, 64.0, 0.0, 1.62), true),
            Err(DisconnectReason::illegal_position())
        );

        let last = Position::new(0.0, 64.0, -WORLD_BORDER + 5.0);
        assert_eq!(
            validate(&last, &request(0.0, 64.0, -WORLD_BORDER - 0.5, 1.62), true),
            Err(DisconnectReason::illegal_position())
        );
    }

    #[test]
    fn test_height_bounds() {
        let last = Position::new(0.0, 200.0, 0.0);
        assert_eq!(validate(&last, &request(0.0, 256.0, 0.0, 1.62), true), Ok(MoveVerdict::Accept));
        assert_eq!(
            validate(&last, &request(0.0, 256.5, 0.0, 1.62), true),
            Err(DisconnectReason::illegal_position())
        );

        let last = Position::new(0.0, 1.0, 0.0);
        assert_eq!(
            validate(&last, &request(0.0, -0.5, 0.0, 1.62), true),
            Err(DisconnectReason::illegal_position())
        );
    }

    #[test]
    fn test_unloaded_chunk_snaps_to_spawn() {
        let last = Position::SPAWN;
        assert_eq!(
            validate(&last, &request(90.0, 64.0, 0.0, 1.62), false),
            Ok(MoveVerdict::SnapToSpawn)
        );
    }

    #[test]
    fn test_first_failure_wins() {
        // Too fast and outside the border: speed is checked first.
        let last = Position::new(WORLD_BORDER, 64.0, 0.0);
        assert_eq!(
            validate(&last, &request(WORLD_BORDER + 500.0, 64.0, 0.0, 1.62), true),
            Err(DisconnectReason::moved_too_quickly())
        );

        // Bad stance and unloaded chunk: the stance error is fatal.
        assert_eq!(
            validate(&Position::SPAWN, &request(0.0, 64.0, 0.0, 3.0), false),
            Err(DisconnectReason::illegal_stance())
        );
    }
}
