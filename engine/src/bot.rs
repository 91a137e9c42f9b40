//! Synthetic opponent.
//!
//! The bot is a client of the same paddle-move entry point a human uses,
//! never a privileged internal call: its timer task computes a decision from
//! the visible physics state and routes it through the engine like any other
//! move command.

use crate::physics::PhysicsState;
use proto::{MoveDirection, PlayerId, Side, PADDLE_HEIGHT};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Pixels of tolerance around the paddle center to prevent jitter.
pub const BOT_DEADZONE: f32 = 10.0;

/// Bot decision cadence; slightly faster than a physics step.
pub const BOT_TICK: Duration = Duration::from_millis(16);

/// Reserved prefix distinguishing synthetic identities from human ones.
pub const BOT_ID_PREFIX: &str = "bot-";

/// Mints a fresh bot identity.
pub fn mint_bot_id() -> PlayerId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64;
    format!("{}{}-{:04x}", BOT_ID_PREFIX, millis, rand::random::<u16>())
}

/// Tracks the ball with a dead-zone: no move when the ball is within
/// [`BOT_DEADZONE`] of the paddle center.
pub fn decide(physics: &PhysicsState, side: Side) -> Option<MoveDirection> {
    let paddle_center = physics.paddles[side.index()] + PADDLE_HEIGHT / 2.0;
    let ball_y = physics.ball_y;

    if ball_y < paddle_center - BOT_DEADZONE {
        Some(MoveDirection::Up)
    } else if ball_y > paddle_center + BOT_DEADZONE {
        Some(MoveDirection::Down)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::PLAYFIELD_HEIGHT;

    #[test]
    fn tracks_ball_upward() {
        let mut physics = PhysicsState::new();
        physics.paddles[1] = PLAYFIELD_HEIGHT - PADDLE_HEIGHT;
        physics.ball_y = 0.0;
        assert_eq!(decide(&physics, Side::Right), Some(MoveDirection::Up));
    }

    #[test]
    fn tracks_ball_downward() {
        let mut physics = PhysicsState::new();
        physics.paddles[0] = 0.0;
        physics.ball_y = PLAYFIELD_HEIGHT;
        assert_eq!(decide(&physics, Side::Left), Some(MoveDirection::Down));
    }

    #[test]
    fn holds_still_inside_deadzone() {
        let mut physics = PhysicsState::new();
        physics.paddles[0] = 100.0;
        physics.ball_y = 100.0 + PADDLE_HEIGHT / 2.0 + BOT_DEADZONE / 2.0;
        assert_eq!(decide(&physics, Side::Left), None);
    }

    #[test]
    fn minted_ids_carry_bot_prefix() {
        let id = mint_bot_id();
        assert!(id.starts_with(BOT_ID_PREFIX));
        assert_ne!(mint_bot_id(), mint_bot_id());
    }
}
