//! Authoritative per-match physics.
//!
//! Fixed-step simulation, server-only: clients never compute outcomes. The
//! ball holds a target speed that grows 5% on every paddle hit (unbounded;
//! escalation is a gameplay choice) and velocity is renormalized to match it
//! exactly after each hit.

use proto::{
    MoveDirection, Side, BALL_SIZE, BASE_BALL_SPEED, PADDLE_HEIGHT, PADDLE_STEP, PADDLE_WIDTH,
    PLAYFIELD_HEIGHT, PLAYFIELD_WIDTH, SPEED_GROWTH, SPIN_FACTOR,
};
use rand::Rng;

/// Rescales a velocity vector to match `target_speed` while preserving
/// direction. Zero magnitude degenerates to a horizontal serve.
pub fn normalize_velocity(vx: f32, vy: f32, target_speed: f32) -> (f32, f32) {
    let speed = (vx * vx + vy * vy).sqrt();
    if speed == 0.0 {
        return (target_speed, 0.0);
    }
    let scale = target_speed / speed;
    (vx * scale, vy * scale)
}

#[derive(Debug, Clone)]
pub struct PhysicsState {
    pub ball_x: f32,
    pub ball_y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    /// Current target speed; velocity magnitude equals this after every hit.
    pub ball_speed: f32,
    /// Paddle top-edge y positions, index 0 = left, 1 = right.
    pub paddles: [f32; 2],
    /// Points, index 0 = left, 1 = right.
    pub scores: [u32; 2],
}

impl PhysicsState {
    /// Centered ball and paddles, fresh random serve.
    pub fn new() -> Self {
        let paddle_center = (PLAYFIELD_HEIGHT - PADDLE_HEIGHT) / 2.0;
        let mut state = Self {
            ball_x: PLAYFIELD_WIDTH / 2.0,
            ball_y: PLAYFIELD_HEIGHT / 2.0,
            vel_x: BASE_BALL_SPEED,
            vel_y: 0.0,
            ball_speed: BASE_BALL_SPEED,
            paddles: [paddle_center, paddle_center],
            scores: [0, 0],
        };
        let toward = if rand::thread_rng().gen_bool(0.5) {
            Side::Left
        } else {
            Side::Right
        };
        state.serve(toward);
        state
    }

    /// Resets the ball to center with base speed and a fresh serve moving
    /// toward `toward` (the side that just lost the point).
    pub fn serve(&mut self, toward: Side) {
        self.ball_x = PLAYFIELD_WIDTH / 2.0;
        self.ball_y = PLAYFIELD_HEIGHT / 2.0;
        self.ball_speed = BASE_BALL_SPEED;

        let dir_x = match toward {
            Side::Left => -1.0,
            Side::Right => 1.0,
        };
        let dir_y: f32 = rand::thread_rng().gen_range(-0.5..=0.5);
        let (vx, vy) = normalize_velocity(
            dir_x * BASE_BALL_SPEED,
            dir_y * BASE_BALL_SPEED,
            self.ball_speed,
        );
        self.vel_x = vx;
        self.vel_y = vy;
    }

    /// Clamped absolute paddle positioning (mouse/touch input).
    pub fn set_paddle(&mut self, side: Side, y: f32) {
        self.paddles[side.index()] = y.clamp(0.0, PLAYFIELD_HEIGHT - PADDLE_HEIGHT);
    }

    /// Clamped relative paddle step (keyboard input).
    pub fn step_paddle(&mut self, side: Side, direction: MoveDirection) {
        let dy = match direction {
            MoveDirection::Up => -PADDLE_STEP,
            MoveDirection::Down => PADDLE_STEP,
        };
        let current = self.paddles[side.index()];
        self.paddles[side.index()] = (current + dy).clamp(0.0, PLAYFIELD_HEIGHT - PADDLE_HEIGHT);
    }

    /// Advances the simulation one fixed step. Returns the side that scored
    /// this step, if any; the ball has already been re-served in that case.
    pub fn step(&mut self) -> Option<Side> {
        let mut bx = self.ball_x + self.vel_x;
        let mut by = self.ball_y + self.vel_y;
        let mut bvx = self.vel_x;
        let mut bvy = self.vel_y;

        // Top/bottom walls reflect; clamp to avoid sticking.
        if by <= 0.0 || by + BALL_SIZE >= PLAYFIELD_HEIGHT {
            bvy = -bvy;
            if by <= 0.0 {
                by = 1.0;
            }
            if by + BALL_SIZE >= PLAYFIELD_HEIGHT {
                by = PLAYFIELD_HEIGHT - BALL_SIZE - 1.0;
            }
        }

        // Left paddle.
        let pad_left = self.paddles[0];
        if bx <= PADDLE_WIDTH && by + BALL_SIZE >= pad_left && by <= pad_left + PADDLE_HEIGHT {
            bx = PADDLE_WIDTH + 1.0;
            bvx = -bvx;

            let hit_pos = (by + BALL_SIZE / 2.0) - (pad_left + PADDLE_HEIGHT / 2.0);
            bvy += hit_pos * SPIN_FACTOR;

            self.ball_speed *= SPEED_GROWTH;
            let (vx, vy) = normalize_velocity(bvx, bvy, self.ball_speed);
            bvx = vx;
            bvy = vy;
        }

        // Right paddle.
        let pad_right = self.paddles[1];
        if bx + BALL_SIZE >= PLAYFIELD_WIDTH - PADDLE_WIDTH
            && by + BALL_SIZE >= pad_right
            && by <= pad_right + PADDLE_HEIGHT
        {
            bx = PLAYFIELD_WIDTH - PADDLE_WIDTH - BALL_SIZE - 1.0;
            bvx = -bvx;

            let hit_pos = (by + BALL_SIZE / 2.0) - (pad_right + PADDLE_HEIGHT / 2.0);
            bvy += hit_pos * SPIN_FACTOR;

            self.ball_speed *= SPEED_GROWTH;
            let (vx, vy) = normalize_velocity(bvx, bvy, self.ball_speed);
            bvx = vx;
            bvy = vy;
        }

        // Goal lines: the ball fully exiting scores for the opposite side
        // and triggers a serve biased toward the side that lost the point.
        if bx < 0.0 {
            self.scores[Side::Right.index()] += 1;
            self.serve(Side::Left);
            return Some(Side::Right);
        }
        if bx > PLAYFIELD_WIDTH {
            self.scores[Side::Left.index()] += 1;
            self.serve(Side::Right);
            return Some(Side::Left);
        }

        self.ball_x = bx;
        self.ball_y = by;
        self.vel_x = bvx;
        self.vel_y = bvy;
        None
    }

    pub fn score(&self, side: Side) -> u32 {
        self.scores[side.index()]
    }
}

impl Default for PhysicsState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn velocity_magnitude(state: &PhysicsState) -> f32 {
        (state.vel_x * state.vel_x + state.vel_y * state.vel_y).sqrt()
    }

    /// Places the ball one step away from the left paddle so the next step
    /// registers a hit.
    fn stage_left_paddle_hit(state: &mut PhysicsState) {
        let pad = state.paddles[0];
        state.ball_x = PADDLE_WIDTH + BASE_BALL_SPEED;
        state.ball_y = pad + PADDLE_HEIGHT / 2.0 - BALL_SIZE / 2.0;
        state.vel_x = -state.ball_speed;
        state.vel_y = 0.0;
    }

    #[test]
    fn speed_grows_five_percent_per_hit() {
        let mut state = PhysicsState::new();

        for hit in 1..=8 {
            stage_left_paddle_hit(&mut state);
            let scored = state.step();
            assert_eq!(scored, None);
            let expected = BASE_BALL_SPEED * SPEED_GROWTH.powi(hit);
            assert_approx_eq!(state.ball_speed, expected, 1e-3);
        }
    }

    #[test]
    fn velocity_magnitude_matches_target_after_renormalization() {
        let mut state = PhysicsState::new();

        for _ in 0..5 {
            stage_left_paddle_hit(&mut state);
            state.step();
            assert_approx_eq!(velocity_magnitude(&state), state.ball_speed, 1e-3);
        }
    }

    #[test]
    fn center_hit_reverses_horizontal_velocity() {
        let mut state = PhysicsState::new();
        stage_left_paddle_hit(&mut state);
        state.step();
        assert!(state.vel_x > 0.0);
        assert_eq!(state.ball_x, PADDLE_WIDTH + 1.0);
    }

    #[test]
    fn off_center_hit_adds_spin() {
        let mut state = PhysicsState::new();
        stage_left_paddle_hit(&mut state);
        // Strike near the bottom edge of the paddle.
        state.ball_y = state.paddles[0] + PADDLE_HEIGHT - BALL_SIZE / 2.0;
        state.step();
        assert!(state.vel_y > 0.0);
    }

    #[test]
    fn wall_bounce_reflects_and_clamps() {
        let mut state = PhysicsState::new();
        state.ball_y = 2.0;
        state.vel_x = 0.0;
        state.vel_y = -5.0;
        state.ball_x = PLAYFIELD_WIDTH / 2.0;

        state.step();
        assert!(state.vel_y > 0.0);
        assert_eq!(state.ball_y, 1.0);
    }

    #[test]
    fn goal_scores_for_opposite_side_and_resets_serve() {
        let mut state = PhysicsState::new();
        // Move paddle out of the way so the ball exits past the left goal.
        state.paddles[0] = PLAYFIELD_HEIGHT - PADDLE_HEIGHT;
        state.ball_x = 2.0;
        state.ball_y = 10.0;
        state.vel_x = -10.0;
        state.vel_y = 0.0;
        state.ball_speed = 10.0;

        let scored = state.step();
        assert_eq!(scored, Some(Side::Right));
        assert_eq!(state.score(Side::Right), 1);
        assert_eq!(state.score(Side::Left), 0);

        // Ball reset to center, speed reset to base, serve toward the loser.
        assert_approx_eq!(state.ball_x, PLAYFIELD_WIDTH / 2.0);
        assert_approx_eq!(state.ball_y, PLAYFIELD_HEIGHT / 2.0);
        assert_approx_eq!(state.ball_speed, BASE_BALL_SPEED);
        assert!(state.vel_x < 0.0);
        assert_approx_eq!(velocity_magnitude(&state), BASE_BALL_SPEED, 1e-3);
    }

    #[test]
    fn normalize_zero_magnitude_defaults_to_horizontal_serve() {
        let (vx, vy) = normalize_velocity(0.0, 0.0, 5.0);
        assert_approx_eq!(vx, 5.0);
        assert_approx_eq!(vy, 0.0);
    }

    #[test]
    fn paddle_moves_clamp_to_playfield() {
        let mut state = PhysicsState::new();

        state.set_paddle(Side::Left, -100.0);
        assert_eq!(state.paddles[0], 0.0);

        state.set_paddle(Side::Left, PLAYFIELD_HEIGHT * 2.0);
        assert_eq!(state.paddles[0], PLAYFIELD_HEIGHT - PADDLE_HEIGHT);

        state.set_paddle(Side::Right, 0.0);
        state.step_paddle(Side::Right, MoveDirection::Up);
        assert_eq!(state.paddles[1], 0.0);

        state.step_paddle(Side::Right, MoveDirection::Down);
        assert_eq!(state.paddles[1], PADDLE_STEP);
    }
}
